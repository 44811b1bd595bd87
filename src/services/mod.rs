pub mod background_jobs;
pub mod comment_service;
pub mod post_service;
pub mod rate_limit;
pub mod score;
pub mod thread;
pub mod user_service;

/// Outcome of a rate-limited write.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission<T> {
    Created(T),
    /// The author already reached today's quota of `limit` items.
    Refused { limit: i64 },
}
