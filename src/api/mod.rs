pub mod handlers;

use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use rocket::{Build, Rocket};
use serde_json::json;
use std::io::Cursor;

use crate::dedup::{DedupError, DedupGuard, KeyDerivationError};
use handlers::repeat::generate_repeat_routes;

/// Mounts the guarded routes with `guard` as managed state.
pub fn build_rocket(guard: DedupGuard) -> Rocket<Build> {
    rocket::build()
        .manage(guard)
        .mount("/", generate_repeat_routes())
}

#[derive(Debug)]
pub struct AppError {
    pub status: Status,
    pub error: anyhow::Error,
}

#[rocket::async_trait]
impl<'r, 'o: 'r> Responder<'r, 'o> for AppError {
    fn respond_to(self, _req: &'r Request<'_>) -> response::Result<'o> {
        let outer_msg = self.error.to_string();

        let chain: Vec<String> = self.error.chain().map(|e| e.to_string()).collect();

        let body = json!({
            "error": outer_msg,
            "chain": chain,
        })
        .to_string();

        Response::build()
            .status(self.status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

impl<E> From<E> for AppError
where
    anyhow::Error: From<E>,
{
    fn from(err: E) -> Self {
        let error = anyhow::Error::from(err);
        AppError {
            status: status_for(&error),
            error,
        }
    }
}

/// Status code a guard failure is reported with.
pub fn status_for(error: &anyhow::Error) -> Status {
    if let Some(dedup) = error.downcast_ref::<DedupError>() {
        return match dedup {
            DedupError::DuplicateSubmission { .. } => Status::Conflict,
            DedupError::StoreUnavailable(_) => Status::ServiceUnavailable,
            DedupError::KeyDerivation(_) | DedupError::InvalidTtl(_) => Status::BadRequest,
        };
    }
    if error.downcast_ref::<KeyDerivationError>().is_some() {
        return Status::BadRequest;
    }
    Status::InternalServerError
}

pub type AppResult<T> = Result<T, AppError>;
