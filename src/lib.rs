pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod store;

use axum::{
    Router,
    http::{
        HeaderValue, Method,
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, post, put},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{config::Config, store::Store};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .allowed_origins
                .iter()
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                        None
                    }
                })
                .collect::<Vec<_>>(),
        )
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE]);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/posts/newest", get(handlers::posts::newest_posts))
        .route(
            "/api/posts/source/{url_base}",
            get(handlers::posts::posts_from_source),
        )
        .route(
            "/api/users/{username}/posts",
            get(handlers::posts::user_posts),
        )
        .route(
            "/api/users/{username}",
            get(handlers::users::get_user_by_username),
        );

    // Post, comment and profile routes. Writes extract `AuthUser`; post
    // submission checks the anonymous-post policy itself.
    let protected_routes = Router::new()
        .route(
            "/api/users/me",
            get(handlers::users::get_current_user).put(handlers::users::update_current_user),
        )
        // Post routes
        .route(
            "/api/posts",
            get(handlers::posts::top_posts).post(handlers::posts::create_post),
        )
        .route(
            "/api/posts/{post_id}",
            get(handlers::posts::get_post).delete(handlers::posts::delete_post),
        )
        .route(
            "/api/posts/{post_id}/upvote",
            post(handlers::posts::upvote_post),
        )
        .route(
            "/api/posts/{post_id}/comments",
            post(handlers::posts::create_comment),
        )
        // Comment routes
        .route(
            "/api/comments/{comment_id}",
            put(handlers::comments::update_comment).delete(handlers::comments::delete_comment),
        )
        .route(
            "/api/comments/{comment_id}/replies",
            post(handlers::comments::reply),
        )
        .route(
            "/api/comments/{comment_id}/upvote",
            post(handlers::comments::upvote_comment),
        );

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
