use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Text that replaces a deleted comment's body.
pub const TOMBSTONE_TEXT: &str = "[Deleted]";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Comment {
    pub id: i64,
    pub text: String,
    pub author_id: i64,
    pub post_id: i64,
    pub parent_id: Option<i64>,
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub thread_timestamp: DateTime<Utc>,
    pub score: i32,
    pub thread_score: i32,
}

impl Comment {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// A comment ready to be persisted. The store derives `path`,
/// `thread_timestamp` and `thread_score` from the parent in the same unit of
/// work that inserts the row.
#[derive(Debug, Clone)]
pub struct NewComment {
    pub text: String,
    pub author_id: i64,
    pub post_id: i64,
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

// Create comment / reply request
#[derive(Debug, Validate, Deserialize)]
pub struct CreateCommentRequest {
    #[validate(length(min = 1, max = 140))]
    pub text: String,
}

// Update comment request
#[derive(Debug, Validate, Deserialize)]
pub struct UpdateCommentRequest {
    #[validate(length(min = 1, max = 140))]
    pub text: String,
}

/// A comment in display order, with its nesting depth.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadedComment {
    #[serde(flatten)]
    pub comment: Comment,
    pub level: usize,
}
