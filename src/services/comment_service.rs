use chrono::{DateTime, Utc};
use validator::Validate;

use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        Comment, CreateCommentRequest, NewComment, TOMBSTONE_TEXT, ThreadedComment,
        UpdateCommentRequest, User, VoteOutcome,
    },
    services::{Submission, rate_limit::RateLimiter, user_service},
    store::Store,
};

async fn get_comment(store: &dyn Store, comment_id: i64) -> Result<Comment> {
    store
        .get_comment(comment_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))
}

async fn check_quota(
    store: &dyn Store,
    config: &Config,
    author_id: i64,
    now: DateTime<Utc>,
) -> Result<Option<i64>> {
    let limiter = RateLimiter::from_config(config);
    if limiter.can_comment(store, author_id, now).await? {
        Ok(None)
    } else {
        tracing::info!("User {} reached the daily comment limit", author_id);
        Ok(Some(limiter.comments_per_day()))
    }
}

/// Starts a new thread on a post.
pub async fn create_comment(
    store: &dyn Store,
    config: &Config,
    author_id: i64,
    post_id: i64,
    request: &CreateCommentRequest,
    now: DateTime<Utc>,
) -> Result<Submission<Comment>> {
    request.validate()?;

    if store.get_post(post_id).await?.is_none() {
        return Err(AppError::NotFound("Post not found".to_string()));
    }
    if let Some(limit) = check_quota(store, config, author_id, now).await? {
        return Ok(Submission::Refused { limit });
    }

    let comment = store
        .insert_comment(
            NewComment {
                text: request.text.trim().to_string(),
                author_id,
                post_id,
                parent_id: None,
                created_at: now,
            },
            &config.path_scheme(),
        )
        .await?;

    tracing::info!("Comment {} added to post {}", comment.id, post_id);
    Ok(Submission::Created(comment))
}

/// Answers an existing comment. The reply joins the parent's post and
/// thread; the store copies the thread timestamp and score from the thread
/// while holding it, so a concurrent root upvote cannot be missed.
pub async fn reply(
    store: &dyn Store,
    config: &Config,
    author_id: i64,
    parent_id: i64,
    request: &CreateCommentRequest,
    now: DateTime<Utc>,
) -> Result<Submission<Comment>> {
    request.validate()?;

    let parent = get_comment(store, parent_id).await?;
    if let Some(limit) = check_quota(store, config, author_id, now).await? {
        return Ok(Submission::Refused { limit });
    }

    let comment = store
        .insert_comment(
            NewComment {
                text: request.text.trim().to_string(),
                author_id,
                post_id: parent.post_id,
                parent_id: Some(parent.id),
                created_at: now,
            },
            &config.path_scheme(),
        )
        .await?;

    tracing::info!("Comment {} replies to {}", comment.id, parent_id);
    Ok(Submission::Created(comment))
}

/// All comments of a post in display order: strongest threads first, each
/// thread depth-first by path.
pub async fn thread_for_post(
    store: &dyn Store,
    config: &Config,
    post_id: i64,
) -> Result<Vec<ThreadedComment>> {
    let scheme = config.path_scheme();
    let comments = store.list_post_comments(post_id).await?;

    Ok(comments
        .into_iter()
        .map(|comment| ThreadedComment {
            level: scheme.level(&comment.path),
            comment,
        })
        .collect())
}

pub async fn edit_comment(
    store: &dyn Store,
    actor: &User,
    comment_id: i64,
    request: &UpdateCommentRequest,
) -> Result<Comment> {
    request.validate()?;

    let comment = get_comment(store, comment_id).await?;
    if comment.author_id != actor.id {
        return Err(AppError::NotFound("Comment not found".to_string()));
    }

    let text = request.text.trim();
    store.update_comment_text(comment_id, text).await?;
    tracing::debug!("Comment {} edited", comment_id);

    Ok(Comment {
        text: text.to_string(),
        ..comment
    })
}

/// Replaces the text with a tombstone. The comment keeps its place in the
/// tree so replies stay attached.
pub async fn delete_comment(
    store: &dyn Store,
    config: &Config,
    actor: &User,
    comment_id: i64,
) -> Result<()> {
    let comment = get_comment(store, comment_id).await?;
    if comment.author_id != actor.id && !user_service::is_admin(config, actor) {
        return Err(AppError::NotFound("Comment not found".to_string()));
    }

    store.update_comment_text(comment_id, TOMBSTONE_TEXT).await?;
    tracing::info!("Comment {} deleted by user {}", comment_id, actor.id);
    Ok(())
}

pub async fn upvote_comment(
    store: &dyn Store,
    user_id: i64,
    comment_id: i64,
) -> Result<VoteOutcome> {
    let outcome = store.upvote_comment(user_id, comment_id).await?;
    if !outcome.counted() {
        tracing::debug!("User {} already voted on comment {}", user_id, comment_id);
    }
    Ok(outcome)
}
