use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use norepeat::dedup::{Arguments, DedupGuard, Outcome};
use norepeat::store::{ClaimStore, MemoryClaimStore, RedbClaimStore};
use serde_json::json;

const RACERS: usize = 48;

fn alice() -> Arguments {
    Arguments::from(vec![json!("alice"), json!(30)])
}

async fn race(store: Arc<dyn ClaimStore>, ttl: Duration) -> Vec<Outcome> {
    let tasks = (0..RACERS).map(|_| {
        // One guard per task, as separate replicas would have.
        let guard = DedupGuard::new(Arc::clone(&store));
        tokio::spawn(async move { guard.try_acquire("/repeat", &alice(), ttl).await })
    });

    join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked").expect("store reachable"))
        .collect()
}

fn accepted(outcomes: &[Outcome]) -> usize {
    outcomes.iter().filter(|o| o.is_accepted()).count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn memory_store_has_a_single_winner() {
    let outcomes = race(Arc::new(MemoryClaimStore::new()), Duration::from_secs(5)).await;
    assert_eq!(accepted(&outcomes), 1);

    let key = outcomes[0].key();
    assert!(outcomes.iter().all(|o| o.key() == key));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn redb_store_has_a_single_winner_and_reclaims_after_ttl() {
    let path = std::env::temp_dir()
        .join("norepeat-tests")
        .join(format!("{}.redb", uuid::Uuid::new_v4()));
    let store: Arc<dyn ClaimStore> = Arc::new(RedbClaimStore::open(&path).unwrap());
    let ttl = Duration::from_millis(1500);

    let outcomes = race(Arc::clone(&store), ttl).await;
    assert_eq!(accepted(&outcomes), 1);

    tokio::time::sleep(Duration::from_millis(2000)).await;
    let outcomes = race(Arc::clone(&store), ttl).await;
    assert_eq!(accepted(&outcomes), 1);

    drop(store);
    let _ = std::fs::remove_file(path);
}
