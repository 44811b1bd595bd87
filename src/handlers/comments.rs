use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde_json::{Value, json};

use crate::{
    AppState,
    auth::AuthUser,
    error::Result,
    handlers::submission_response,
    models::{Comment, CreateCommentRequest, UpdateCommentRequest},
    services::{comment_service, user_service},
};

pub async fn reply(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(comment_id): Path<i64>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let submission = comment_service::reply(
        state.store.as_ref(),
        &state.config,
        auth_user.user_id,
        comment_id,
        &payload,
        Utc::now(),
    )
    .await?;
    Ok(submission_response(submission, "comment"))
}

pub async fn update_comment(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(comment_id): Path<i64>,
    Json(payload): Json<UpdateCommentRequest>,
) -> Result<Json<Comment>> {
    let actor = user_service::current_user(state.store.as_ref(), auth_user.user_id).await?;
    let comment =
        comment_service::edit_comment(state.store.as_ref(), &actor, comment_id, &payload).await?;
    Ok(Json(comment))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(comment_id): Path<i64>,
) -> Result<StatusCode> {
    let actor = user_service::current_user(state.store.as_ref(), auth_user.user_id).await?;
    comment_service::delete_comment(state.store.as_ref(), &state.config, &actor, comment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn upvote_comment(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(comment_id): Path<i64>,
) -> Result<Json<Value>> {
    let outcome =
        comment_service::upvote_comment(state.store.as_ref(), auth_user.user_id, comment_id)
            .await?;
    Ok(Json(json!({
        "comment_id": comment_id,
        "vote": outcome
    })))
}
