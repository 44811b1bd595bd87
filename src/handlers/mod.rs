pub mod auth;
pub mod comments;
pub mod posts;
pub mod users;

use axum::{http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::services::Submission;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
}

impl PageQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1)
    }
}

/// `201` with the created item, or `429` when the author is over quota.
pub(crate) fn submission_response<T: Serialize>(
    submission: Submission<T>,
    key: &str,
) -> (StatusCode, Json<Value>) {
    match submission {
        Submission::Created(item) => (StatusCode::CREATED, Json(json!({ key: item }))),
        Submission::Refused { limit } => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "message": format!("You have reached today's limit of {} {}s", limit, key),
                "limit": limit
            })),
        ),
    }
}
