use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::models::ThreadedComment;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub url: Option<String>,
    pub url_base: Option<String>,
    pub text: Option<String>,
    pub author_id: Option<i64>,
    pub score: i32,
    pub pop_score: f64,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// A post ready to be persisted; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub url: Option<String>,
    pub url_base: Option<String>,
    pub text: Option<String>,
    pub author_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

// Create post request
#[derive(Debug, Validate, Deserialize)]
pub struct CreatePostRequest {
    #[validate(length(min = 1, max = 80))]
    pub title: String,
    #[validate(url, length(max = 120))]
    pub url: Option<String>,
    #[validate(length(max = 280))]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostFilter {
    All,
    Source(String),
    Author(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOrder {
    Popularity,
    Newest,
}

#[derive(Debug, Clone)]
pub struct PostQuery {
    pub filter: PostFilter,
    pub order: PostOrder,
    pub limit: i64,
    pub offset: i64,
}

/// One page of a feed, with the metadata a renderer needs to number rows
/// and link to the next page.
#[derive(Debug, Serialize)]
pub struct PostPage {
    pub posts: Vec<Post>,
    pub page: u32,
    pub per_page: u32,
    pub has_next: bool,
    pub next_page: Option<u32>,
    pub start_rank: u32,
}

// Post page with its discussion
#[derive(Debug, Serialize)]
pub struct PostResponse {
    #[serde(flatten)]
    pub post: Post,
    pub comment_count: i64,
    pub comments: Vec<ThreadedComment>,
}
