//! Persistence contract for users, posts, comments and votes.
//!
//! Every method is one logical unit: implementations apply it atomically
//! (a transaction for Postgres, a single write lock for the in-memory store).

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    models::{
        Comment, NewComment, NewPost, NewUser, Post, PostFilter, PostQuery, UpdateProfileRequest,
        User, VoteOutcome,
    },
    services::thread::PathScheme,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    // Users

    /// Fails with `Conflict` when the username or email is taken.
    async fn create_user(&self, user: NewUser) -> Result<User>;
    async fn get_user(&self, user_id: i64) -> Result<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn update_user_profile(&self, user_id: i64, update: UpdateProfileRequest)
    -> Result<User>;

    // Posts

    async fn insert_post(&self, post: NewPost) -> Result<Post>;
    async fn get_post(&self, post_id: i64) -> Result<Option<Post>>;
    async fn soft_delete_post(&self, post_id: i64) -> Result<()>;
    /// Recomputes `pop_score` of every live post; returns how many were touched.
    async fn refresh_pop_scores(&self, now: DateTime<Utc>, gravity: f64) -> Result<u64>;
    /// Live posts only.
    async fn list_posts(&self, query: PostQuery) -> Result<Vec<Post>>;
    async fn count_posts(&self, filter: PostFilter) -> Result<i64>;
    /// Records the vote and bumps the post score and the author's karma, or
    /// does nothing if this user already voted on the post.
    async fn upvote_post(&self, user_id: i64, post_id: i64) -> Result<VoteOutcome>;
    /// Live posts by `author_id` created at or after `since`.
    async fn count_posts_since(&self, author_id: i64, since: DateTime<Utc>) -> Result<i64>;

    // Comments

    /// Two-phase insert: reserve an id, derive the path from it, persist both
    /// or neither. Replies take their thread timestamp and score from the
    /// thread in the same unit of work. `NotFound` when the post or the
    /// parent (on that post) does not exist.
    async fn insert_comment(&self, comment: NewComment, scheme: &PathScheme) -> Result<Comment>;
    async fn get_comment(&self, comment_id: i64) -> Result<Option<Comment>>;
    /// Ordered by `(thread_score DESC, path ASC)`.
    async fn list_post_comments(&self, post_id: i64) -> Result<Vec<Comment>>;
    async fn count_post_comments(&self, post_id: i64) -> Result<i64>;
    async fn update_comment_text(&self, comment_id: i64, text: &str) -> Result<()>;
    /// Records the vote and bumps the comment score; on a thread root the new
    /// score is copied to the whole subtree as `thread_score`.
    async fn upvote_comment(&self, user_id: i64, comment_id: i64) -> Result<VoteOutcome>;
    async fn count_comments_since(&self, author_id: i64, since: DateTime<Utc>) -> Result<i64>;
}
