use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde_json::{Value, json};

use crate::{
    AppState,
    auth::{AuthUser, OptionalAuthUser},
    error::{AppError, Result},
    handlers::{PageQuery, submission_response},
    models::{CreateCommentRequest, CreatePostRequest, PostPage, PostResponse},
    services::{comment_service, post_service, user_service},
};

pub async fn top_posts(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PostPage>> {
    let page =
        post_service::top_posts(state.store.as_ref(), &state.config, query.page(), Utc::now())
            .await?;
    Ok(Json(page))
}

pub async fn newest_posts(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PostPage>> {
    let page =
        post_service::newest_posts(state.store.as_ref(), &state.config, query.page(), Utc::now())
            .await?;
    Ok(Json(page))
}

pub async fn posts_from_source(
    State(state): State<AppState>,
    Path(url_base): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PostPage>> {
    let page = post_service::posts_from_source(
        state.store.as_ref(),
        &state.config,
        &url_base,
        query.page(),
        Utc::now(),
    )
    .await?;
    Ok(Json(page))
}

pub async fn user_posts(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PostPage>> {
    let page = post_service::user_submissions(
        state.store.as_ref(),
        &state.config,
        &username,
        query.page(),
        Utc::now(),
    )
    .await?;
    Ok(Json(page))
}

pub async fn get_post(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
) -> Result<Json<PostResponse>> {
    let post = post_service::get_post_page(state.store.as_ref(), &state.config, post_id).await?;
    Ok(Json(post))
}

pub async fn create_post(
    State(state): State<AppState>,
    OptionalAuthUser(auth_user): OptionalAuthUser,
    Json(payload): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let author_id = match auth_user {
        Some(user) => Some(user.user_id),
        None if state.config.allow_anonymous_posts => None,
        None => {
            return Err(AppError::Authentication(
                "Missing authorization header".to_string(),
            ));
        }
    };

    let submission = post_service::submit_post(
        state.store.as_ref(),
        &state.config,
        author_id,
        &payload,
        Utc::now(),
    )
    .await?;
    Ok(submission_response(submission, "post"))
}

pub async fn delete_post(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(post_id): Path<i64>,
) -> Result<StatusCode> {
    let actor = user_service::current_user(state.store.as_ref(), auth_user.user_id).await?;
    post_service::delete_post(state.store.as_ref(), &state.config, &actor, post_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn upvote_post(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(post_id): Path<i64>,
) -> Result<Json<Value>> {
    let outcome = post_service::upvote_post(state.store.as_ref(), auth_user.user_id, post_id).await?;
    Ok(Json(json!({
        "post_id": post_id,
        "vote": outcome
    })))
}

pub async fn create_comment(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(post_id): Path<i64>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let submission = comment_service::create_comment(
        state.store.as_ref(),
        &state.config,
        auth_user.user_id,
        post_id,
        &payload,
        Utc::now(),
    )
    .await?;
    Ok(submission_response(submission, "comment"))
}
