use chrono::{DateTime, Utc};
use validator::Validate;

use crate::{
    auth::{hash_password, verify_password},
    config::Config,
    error::{AppError, Result},
    models::{LoginRequest, NewUser, RegisterRequest, UpdateProfileRequest, User},
    store::Store,
};

pub async fn register(
    store: &dyn Store,
    config: &Config,
    request: &RegisterRequest,
    now: DateTime<Utc>,
) -> Result<User> {
    request.validate()?;

    let user = store
        .create_user(NewUser {
            username: request.username.trim().to_string(),
            email: request.email.trim().to_lowercase(),
            password_hash: hash_password(&request.password, config.bcrypt_cost)?,
            created_at: now,
        })
        .await?;

    tracing::info!("User {} registered", user.username);
    Ok(user)
}

/// Unknown usernames and wrong passwords fail the same way.
pub async fn authenticate(store: &dyn Store, request: &LoginRequest) -> Result<User> {
    let invalid = || AppError::Authentication("Invalid username or password".to_string());

    let user = store
        .get_user_by_username(request.username.trim())
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(&request.password, &user.password_hash)? {
        tracing::debug!("Failed login for {}", user.username);
        return Err(invalid());
    }

    Ok(user)
}

pub async fn get_user_by_username(store: &dyn Store, username: &str) -> Result<User> {
    store
        .get_user_by_username(username)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

/// Loads the account behind a token. A token for a vanished account is no
/// longer valid.
pub async fn current_user(store: &dyn Store, user_id: i64) -> Result<User> {
    store
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::Authentication("Account no longer exists".to_string()))
}

pub fn is_admin(config: &Config, user: &User) -> bool {
    config.is_admin_email(&user.email)
}

pub async fn update_profile(
    store: &dyn Store,
    user_id: i64,
    request: UpdateProfileRequest,
) -> Result<User> {
    request.validate()?;

    let request = UpdateProfileRequest {
        username: request.username.map(|u| u.trim().to_string()),
        email: request.email.map(|e| e.trim().to_lowercase()),
        about_me: request.about_me,
    };
    let user = store.update_user_profile(user_id, request).await?;
    tracing::info!("User {} updated their profile", user.id);
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn config() -> Config {
        Config {
            bcrypt_cost: 4,
            ..Config::default()
        }
    }

    fn registration(username: &str, email: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: "correct horse".to_string(),
        }
    }

    #[tokio::test]
    async fn register_then_login() {
        let store = MemoryStore::new();
        let user = register(&store, &config(), &registration("susan", "Susan@Example.com"), Utc::now())
            .await
            .unwrap();
        assert_eq!(user.karma, 1);
        assert_eq!(user.email, "susan@example.com");

        let logged_in = authenticate(
            &store,
            &LoginRequest {
                username: "susan".to_string(),
                password: "correct horse".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(logged_in.id, user.id);

        let err = authenticate(
            &store,
            &LoginRequest {
                username: "susan".to_string(),
                password: "wrong horse".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let store = MemoryStore::new();
        register(&store, &config(), &registration("susan", "a@example.com"), Utc::now())
            .await
            .unwrap();
        let err = register(&store, &config(), &registration("susan", "b@example.com"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn invalid_registration_is_rejected() {
        let store = MemoryStore::new();
        let err = register(&store, &config(), &registration("su", "not-an-email"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn profile_update_keeps_unset_fields() {
        let store = MemoryStore::new();
        let user = register(&store, &config(), &registration("susan", "s@example.com"), Utc::now())
            .await
            .unwrap();

        let updated = update_profile(
            &store,
            user.id,
            UpdateProfileRequest {
                about_me: Some("hello".to_string()),
                ..UpdateProfileRequest::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(updated.username, "susan");
        assert_eq!(updated.about_me.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn me_is_not_a_username() {
        let store = MemoryStore::new();
        let err = register(&store, &config(), &registration("  me  ", "me@example.com"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let user = register(&store, &config(), &registration("susan", "s@example.com"), Utc::now())
            .await
            .unwrap();
        let err = update_profile(
            &store,
            user.id,
            UpdateProfileRequest {
                username: Some(" Me ".to_string()),
                ..UpdateProfileRequest::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(store.get_user_by_username("me").await.unwrap().is_none());
    }
}
