use std::sync::Arc;

use tokio::task;

use crate::db::CredentialStore;
use crate::errors::{AppError, AppResult};
use crate::jwt::{AuthUser, SessionCodec};
use crate::models::user::{NewUser, User};
use crate::utils::{hash_password, verify_password};

/// Signup, login and per-request authentication on top of the credential
/// store and the session codec.
#[derive(Clone)]
pub struct Authenticator {
    store: Arc<dyn CredentialStore>,
    codec: SessionCodec,
}

impl Authenticator {
    pub fn new(store: Arc<dyn CredentialStore>, codec: SessionCodec) -> Self {
        Self { store, codec }
    }

    pub fn codec(&self) -> &SessionCodec {
        &self.codec
    }

    /// Creates a user. Username uniqueness is checked up front and enforced
    /// again by the store, so a lost race still surfaces as `Conflict`.
    pub async fn signup(&self, username: &str, email: Option<&str>, password: &str) -> AppResult<User> {
        validate_username(username)?;
        let email = normalize_email(email)?;

        match self.store.find_user_by_username(username).await {
            Ok(_) => return Err(AppError::conflict("username already taken")),
            Err(AppError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        let password = password.to_string();
        let password_hash = task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|err| AppError::internal(format!("password hashing task failed: {err}")))??;

        let created = self
            .store
            .insert_user(NewUser {
                username: username.to_string(),
                email,
                password_hash,
            })
            .await?;

        tracing::info!(target: "audit", user_id = created.id, username = %created.username, "user signed up");
        Ok(User::from(created))
    }

    /// Verifies credentials and mints a session token carrying the user's
    /// current role names.
    pub async fn login(&self, username: &str, password: &str) -> AppResult<String> {
        let user = self.store.find_user_by_username(username).await?;

        let password = password.to_string();
        let stored_hash = user.password_hash.clone();
        let valid = task::spawn_blocking(move || verify_password(&password, &stored_hash))
            .await
            .map_err(|err| AppError::internal(format!("password verification task failed: {err}")))?;

        if !valid {
            tracing::info!(user_id = user.id, "login rejected: bad password");
            return Err(AppError::InvalidCredentials);
        }

        let roles = self
            .store
            .find_roles_for_user(user.id)
            .await?
            .into_iter()
            .map(|role| role.name)
            .collect();

        let token = self
            .codec
            .mint(user.id, &user.username, user.email.as_deref(), roles)?;

        tracing::info!(user_id = user.id, "login succeeded");
        Ok(token)
    }

    /// Verifies the token and confirms its subject still exists.
    pub async fn authenticate(&self, token: &str) -> AppResult<AuthUser> {
        let claims = self.codec.verify(token)?;

        match self.store.find_user_by_id(claims.user_id).await {
            Ok(_) => Ok(AuthUser::from(claims)),
            Err(AppError::NotFound(_)) => {
                tracing::info!(user_id = claims.user_id, "token subject no longer exists");
                Err(AppError::unauthorized("user no longer exists"))
            }
            Err(err) => Err(err),
        }
    }

    /// Current user record with role names attached.
    pub async fn current_user(&self, user_id: i64) -> AppResult<User> {
        let db_user = match self.store.find_user_by_id(user_id).await {
            Err(AppError::NotFound(_)) => return Err(AppError::unauthorized("user no longer exists")),
            other => other?,
        };

        let mut user = User::from(db_user);
        user.roles = self
            .store
            .find_roles_for_user(user_id)
            .await?
            .into_iter()
            .map(|role| role.name)
            .collect();
        Ok(user)
    }
}

fn validate_username(username: &str) -> AppResult<()> {
    if username.is_empty() {
        return Err(AppError::bad_request("username must not be empty"));
    }
    if username.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AppError::bad_request("username must not contain whitespace"));
    }
    Ok(())
}

fn normalize_email(email: Option<&str>) -> AppResult<Option<String>> {
    match email.map(str::trim).filter(|email| !email.is_empty()) {
        None => Ok(None),
        Some(email) if email.contains('@') => Ok(Some(email.to_string())),
        Some(_) => Err(AppError::bad_request("email address is invalid")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_pool, SqliteStore};
    use crate::jwt::JwtConfig;

    async fn setup() -> (Arc<SqliteStore>, Authenticator) {
        let store = Arc::new(SqliteStore::new(test_pool().await));
        let codec = SessionCodec::new(&JwtConfig::new(b"authenticator-test-secret".to_vec(), 4));
        let auth = Authenticator::new(store.clone(), codec);
        (store, auth)
    }

    #[tokio::test]
    async fn signup_hides_hash_and_rejects_duplicates() {
        let (store, auth) = setup().await;

        let user = auth.signup("ada", Some("ada@example.com"), "password123").await.unwrap();
        assert_eq!(user.username, "ada");
        assert_eq!(user.email.as_deref(), Some("ada@example.com"));

        let stored = store.find_user_by_id(user.id).await.unwrap();
        assert_ne!(stored.password_hash, "password123");
        assert!(stored.password_hash.starts_with("$argon2"));

        let body = serde_json::to_string(&user).unwrap();
        assert!(!body.contains("password"));

        let err = auth.signup("ada", None, "password456").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)), "got {err:?}");
        let err = auth.signup("grace", Some("ada@example.com"), "password456").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn signup_validates_input() {
        let (_, auth) = setup().await;

        for (username, email, password) in [
            ("", None, "password123"),
            ("ada lovelace", None, "password123"),
            ("ada", Some("not-an-email"), "password123"),
            ("ada", None, "short"),
        ] {
            let err = auth.signup(username, email, password).await.unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "{username:?}: got {err:?}");
        }
    }

    #[tokio::test]
    async fn login_embeds_current_roles() {
        let (store, auth) = setup().await;
        let user = auth.signup("ada", None, "password123").await.unwrap();
        let role = store.insert_role("editor", None).await.unwrap();
        store.insert_user_role(user.id, role.id).await.unwrap();

        let token = auth.login("ada", "password123").await.unwrap();
        let claims = auth.codec().verify(&token).unwrap();

        assert_eq!(claims.user_id, user.id);
        assert_eq!(claims.username, "ada");
        assert_eq!(claims.roles, vec!["editor".to_string()]);
        assert_eq!(claims.expires_at - claims.issued_at, 4 * 3600);
    }

    #[tokio::test]
    async fn login_distinguishes_unknown_user_and_bad_password() {
        let (_, auth) = setup().await;
        auth.signup("ada", None, "password123").await.unwrap();

        let err = auth.login("grace", "password123").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");

        let err = auth.login("ada", "password124").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials), "got {err:?}");
    }

    #[tokio::test]
    async fn authenticate_rejects_token_of_deleted_user() {
        let (store, auth) = setup().await;
        let user = auth.signup("ada", None, "password123").await.unwrap();
        let token = auth.login("ada", "password123").await.unwrap();

        let identity = auth.authenticate(&token).await.unwrap();
        assert_eq!(identity.user_id, user.id);
        assert_eq!(identity.username, "ada");

        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user.id)
            .execute(store.pool())
            .await
            .unwrap();

        let err = auth.authenticate(&token).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn authenticate_propagates_token_errors() {
        let (_, auth) = setup().await;
        let err = auth.authenticate("not-a-token").await.unwrap_err();
        assert!(err.is_token_error(), "got {err:?}");
    }

    #[tokio::test]
    async fn current_user_lists_role_names() {
        let (store, auth) = setup().await;
        let user = auth.signup("ada", None, "password123").await.unwrap();
        let role = store.insert_role("viewer", None).await.unwrap();
        store.insert_user_role(user.id, role.id).await.unwrap();

        let me = auth.current_user(user.id).await.unwrap();
        assert_eq!(me.roles, vec!["viewer".to_string()]);

        let err = auth.current_user(999).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
