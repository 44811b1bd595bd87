use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub about_me: Option<String>,
    pub karma: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Route segments under `/api/users/` that can't double as usernames.
const RESERVED_USERNAMES: &[&str] = &["me"];

fn validate_username(username: &str) -> Result<(), ValidationError> {
    if RESERVED_USERNAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(username.trim()))
    {
        return Err(ValidationError::new("reserved_username"));
    }
    Ok(())
}

#[derive(Debug, Validate, Deserialize)]
pub struct RegisterRequest {
    #[validate(
        length(min = 3, max = 64),
        custom(function = "validate_username")
    )]
    pub username: String,
    #[validate(email, length(max = 120))]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

// Profile edit; absent fields are left unchanged
#[derive(Debug, Clone, Default, Validate, Deserialize)]
pub struct UpdateProfileRequest {
    #[validate(
        length(min = 3, max = 64),
        custom(function = "validate_username")
    )]
    pub username: Option<String>,
    #[validate(email, length(max = 120))]
    pub email: Option<String>,
    #[validate(length(max = 140))]
    pub about_me: Option<String>,
}

// User response (public view)
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub about_me: Option<String>,
    pub karma: i32,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            about_me: user.about_me,
            karma: user.karma,
            created_at: user.created_at,
        }
    }
}
