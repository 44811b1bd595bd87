use serde::Deserialize;
use std::{env, str::FromStr};

use crate::services::{score::DEFAULT_GRAVITY, thread::PathScheme};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,

    // Feed
    pub posts_per_page: u32,
    pub total_posts: u32,
    pub popularity_gravity: f64,
    pub popularity_refresh_secs: u64,

    // Rate limiting
    pub user_posts_per_day: i64,
    pub user_comments_per_day: i64,
    pub rate_limit_utc_offset_minutes: i32,

    // Threads
    pub comment_path_width: usize,

    // Policy
    pub admin_emails: Vec<String>,
    pub allow_anonymous_posts: bool,
    pub bcrypt_cost: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").ok(),
            jwt_secret: env::var("JWT_SECRET")?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_or("PORT", 3000),
            allowed_origins: list_or("ALLOWED_ORIGINS", "http://localhost:3000"),

            posts_per_page: parse_or("POSTS_PER_PAGE", 30),
            total_posts: parse_or("TOTAL_POSTS", 500),
            popularity_gravity: parse_or("POPULARITY_GRAVITY", DEFAULT_GRAVITY),
            popularity_refresh_secs: parse_or("POPULARITY_REFRESH_SECS", 0),

            user_posts_per_day: parse_or("USER_POSTS_PER_DAY", 10),
            user_comments_per_day: parse_or("USER_COMMENTS_PER_DAY", 100),
            rate_limit_utc_offset_minutes: parse_or("RATE_LIMIT_UTC_OFFSET_MINUTES", 0),

            comment_path_width: parse_or("COMMENT_PATH_WIDTH", PathScheme::DEFAULT_WIDTH),

            admin_emails: list_or("ADMIN_EMAILS", ""),
            allow_anonymous_posts: parse_or("ALLOW_ANONYMOUS_POSTS", false),
            bcrypt_cost: parse_or("BCRYPT_COST", bcrypt::DEFAULT_COST),
        })
    }

    pub fn path_scheme(&self) -> PathScheme {
        PathScheme::new(self.comment_path_width)
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails
            .iter()
            .any(|admin| admin.eq_ignore_ascii_case(email))
    }

    /// Feed reads refresh popularity themselves unless a background job does it.
    pub fn refresh_on_read(&self) -> bool {
        self.popularity_refresh_secs == 0
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            jwt_secret: "change-me".to_string(),
            host: "127.0.0.1".to_string(),
            port: 3000,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            posts_per_page: 30,
            total_posts: 500,
            popularity_gravity: DEFAULT_GRAVITY,
            popularity_refresh_secs: 0,
            user_posts_per_day: 10,
            user_comments_per_day: 100,
            rate_limit_utc_offset_minutes: 0,
            comment_path_width: PathScheme::DEFAULT_WIDTH,
            admin_emails: Vec::new(),
            allow_anonymous_posts: false,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid {} value {:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn list_or(key: &str, default: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
