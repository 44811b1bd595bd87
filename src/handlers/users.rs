use axum::{
    extract::{Path, State},
    response::Json,
};

use crate::{
    AppState,
    auth::AuthUser,
    error::Result,
    models::{UpdateProfileRequest, UserResponse},
    services::user_service,
};

pub async fn get_user_by_username(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<UserResponse>> {
    let user = user_service::get_user_by_username(state.store.as_ref(), &username).await?;
    Ok(Json(user.into()))
}

pub async fn get_current_user(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<UserResponse>> {
    let user = user_service::current_user(state.store.as_ref(), auth_user.user_id).await?;
    Ok(Json(user.into()))
}

pub async fn update_current_user(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>> {
    let user =
        user_service::update_profile(state.store.as_ref(), auth_user.user_id, payload).await?;
    Ok(Json(user.into()))
}
