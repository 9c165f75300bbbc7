use rocket::serde::json::Json;
use rocket::{Route, State, post, routes};
use serde::{Deserialize, Serialize};

use crate::api::AppResult;
use crate::dedup::{Arguments, DedupGuard, Norepeat};

pub const REPEAT: Norepeat = Norepeat::new("/repeat", 5000);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_name: String,
    pub user_age: u32,
}

pub fn generate_repeat_routes() -> Vec<Route> {
    routes![repeat]
}

#[post("/repeat", format = "json", data = "<json_data>")]
pub async fn repeat(guard: &State<DedupGuard>, json_data: Json<User>) -> AppResult<String> {
    let user = json_data.into_inner();
    let args = Arguments::new().with(&user)?;

    let body = guard
        .guarded(&REPEAT, &args, move || async move {
            format!("redis access ok:{} {}", user.user_name, user.user_age)
        })
        .await?;
    Ok(body)
}
