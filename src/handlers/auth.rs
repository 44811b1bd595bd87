use axum::{extract::State, http::StatusCode, response::Json};
use chrono::Utc;
use serde_json::{Value, json};

use crate::{
    AppState,
    auth::Claims,
    error::Result,
    models::{LoginRequest, RegisterRequest, User, UserResponse},
    services::user_service,
};

fn token_response(state: &AppState, user: User) -> Result<Value> {
    let (token, claims) = Claims::new(user.id, user.username.clone(), &state.config.jwt_secret)?;
    Ok(json!({
        "token": token,
        "expires_at": claims.exp,
        "user": UserResponse::from(user)
    }))
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let user =
        user_service::register(state.store.as_ref(), &state.config, &payload, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(token_response(&state, user)?)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<Value>> {
    let user = user_service::authenticate(state.store.as_ref(), &payload).await?;
    tracing::info!("User {} logged in", user.username);
    Ok(Json(token_response(&state, user)?))
}
