use std::sync::Arc;
use std::time::Duration;

use norepeat::api::build_rocket;
use norepeat::dedup::{DedupGuard, DedupKey, FailureMode, RetryPolicy};
use norepeat::store::{ClaimStore, ClaimToken, MemoryClaimStore, StoreUnavailable};
use rocket::http::{ContentType, Status};
use rocket::local::asynchronous::Client;
use serde_json::Value;

const ALICE: &str = r#"{"userName":"alice","userAge":30}"#;
const BOB: &str = r#"{"userName":"bob","userAge":25}"#;

struct DownStore;

#[rocket::async_trait]
impl ClaimStore for DownStore {
    async fn claim_if_absent(
        &self,
        _key: &DedupKey,
        _token: &ClaimToken,
        _ttl: Duration,
    ) -> Result<bool, StoreUnavailable> {
        Err(StoreUnavailable::new("connection refused"))
    }

    async fn claim_owner(&self, _key: &DedupKey) -> Result<Option<ClaimToken>, StoreUnavailable> {
        Err(StoreUnavailable::new("connection refused"))
    }
}

async fn client(guard: DedupGuard) -> Client {
    Client::tracked(build_rocket(guard))
        .await
        .expect("valid rocket instance")
}

async fn post(client: &Client, body: &'static str) -> (Status, String) {
    let response = client
        .post("/repeat")
        .header(ContentType::JSON)
        .body(body)
        .dispatch()
        .await;
    let status = response.status();
    let body = response.into_string().await.unwrap_or_default();
    (status, body)
}

#[rocket::async_test]
async fn first_call_runs_and_repeat_conflicts() {
    let client = client(DedupGuard::new(Arc::new(MemoryClaimStore::new()))).await;

    let (status, body) = post(&client, ALICE).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body, "redis access ok:alice 30");

    let (status, body) = post(&client, ALICE).await;
    assert_eq!(status, Status::Conflict);
    let error: Value = serde_json::from_str(&body).unwrap();
    let message = error["error"].as_str().unwrap();
    assert!(message.starts_with("duplicate submission, key=norepeat_/repeat_"));
}

#[rocket::async_test]
async fn different_users_do_not_block_each_other() {
    let client = client(DedupGuard::new(Arc::new(MemoryClaimStore::new()))).await;

    let (alice, bob) = tokio::join!(post(&client, ALICE), post(&client, BOB));
    assert_eq!(alice.0, Status::Ok);
    assert_eq!(bob.0, Status::Ok);
    assert_eq!(bob.1, "redis access ok:bob 25");
}

#[rocket::async_test]
async fn field_order_in_the_body_does_not_matter() {
    let client = client(DedupGuard::new(Arc::new(MemoryClaimStore::new()))).await;

    let (status, _) = post(&client, ALICE).await;
    assert_eq!(status, Status::Ok);

    let (status, _) = post(&client, r#"{"userAge":30,"userName":"alice"}"#).await;
    assert_eq!(status, Status::Conflict);
}

#[rocket::async_test]
async fn unreachable_store_answers_service_unavailable() {
    let guard = DedupGuard::new(Arc::new(DownStore)).with_retry_policy(RetryPolicy::none());
    let client = client(guard).await;

    let (status, body) = post(&client, ALICE).await;
    assert_eq!(status, Status::ServiceUnavailable);
    assert!(!body.contains("redis access ok"));
}

#[rocket::async_test]
async fn fail_open_serves_while_the_store_is_down() {
    let guard = DedupGuard::new(Arc::new(DownStore))
        .with_retry_policy(RetryPolicy::none())
        .with_failure_mode(FailureMode::FailOpen);
    let client = client(guard).await;

    assert_eq!(post(&client, ALICE).await.0, Status::Ok);
    assert_eq!(post(&client, ALICE).await.0, Status::Ok);
}
