//! Client authentication and user credentials.

use crate::error::AppError;
use crate::model::UserIdentity;
use crate::security::{
    constant_time_compare, generate_token, hash_password, verify_password, IssuedToken, TokenKind,
};
use crate::store::{Account, AccountStore, StoreError};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Token pair handed out on sign-up and login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: IssuedToken,
    pub refresh_token: IssuedToken,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Clone)]
pub struct Authenticator {
    accounts: Arc<dyn AccountStore>,
    client_id: String,
    admin_secret: String,
}

impl Authenticator {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        client_id: impl Into<String>,
        admin_secret: impl Into<String>,
    ) -> Self {
        Self {
            accounts,
            client_id: client_id.into(),
            admin_secret: admin_secret.into(),
        }
    }

    /// Check that a request comes from the known client application.
    pub fn authenticate_client(&self, client_id: Option<&str>) -> Result<(), AppError> {
        let client_id = present(client_id)
            .ok_or_else(|| AppError::BadRequest("Request must contain a client Id".to_string()))?;

        if !constant_time_compare(client_id, &self.client_id) {
            warn!("Rejected request with wrong client id");
            return Err(AppError::Unauthorized("Unauthorized client request".to_string()));
        }
        Ok(())
    }

    /// Resolve the caller of a request from their access token.
    pub async fn authorize(
        &self,
        username: Option<&str>,
        access_token: Option<&str>,
    ) -> Result<UserIdentity, AppError> {
        let (Some(username), Some(access_token)) = (present(username), present(access_token))
        else {
            return Err(AppError::BadRequest(
                "Request must contain both username and access token".to_string(),
            ));
        };

        let account = self
            .accounts
            .find_account(&username.to_lowercase())
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid user".to_string()))?;

        if !constant_time_compare(&account.access_token.token, access_token) {
            return Err(AppError::Unauthorized("Invalid user access token".to_string()));
        }
        if account.access_token.is_expired_at(Utc::now()) {
            return Err(AppError::Expired("Token has expired".to_string()));
        }

        Ok(UserIdentity {
            username: account.username,
            is_admin: account.is_admin,
        })
    }

    /// Register a user. The account is an administrator iff the supplied
    /// application secret matches the configured one.
    pub async fn create_user(
        &self,
        username: Option<&str>,
        password: Option<&str>,
        application_secret: Option<&str>,
    ) -> Result<Credentials, AppError> {
        let (Some(username), Some(password)) = (present(username), present(password)) else {
            return Err(AppError::BadRequest(
                "Create user request must contain username and password".to_string(),
            ));
        };

        let is_admin = application_secret
            .map(|secret| constant_time_compare(secret, &self.admin_secret))
            .unwrap_or(false);

        let credentials = Credentials {
            access_token: generate_token(TokenKind::Access),
            refresh_token: generate_token(TokenKind::Refresh),
        };
        let account = Account {
            username: username.to_lowercase(),
            password_hash: hash_password(password),
            is_admin,
            access_token: credentials.access_token.clone(),
            refresh_token: credentials.refresh_token.clone(),
        };

        match self.accounts.create_account(&account).await {
            Ok(()) => {
                info!("Created user {} (admin: {})", account.username, is_admin);
                Ok(credentials)
            }
            Err(StoreError::DuplicateKey(_)) => Err(AppError::Conflict(
                "Duplicate key, username must be unique".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Verify a password and rotate both tokens.
    pub async fn login(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Credentials, AppError> {
        let (Some(username), Some(password)) = (present(username), present(password)) else {
            return Err(AppError::BadRequest(
                "Login request must contain username and password".to_string(),
            ));
        };

        let account = self
            .accounts
            .find_account(&username.to_lowercase())
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        if !verify_password(password, &account.password_hash) {
            return Err(AppError::Unauthorized("Invalid password".to_string()));
        }

        let credentials = Credentials {
            access_token: generate_token(TokenKind::Access),
            refresh_token: generate_token(TokenKind::Refresh),
        };
        self.accounts
            .update_tokens(
                &account.username,
                &credentials.access_token,
                Some(&credentials.refresh_token),
            )
            .await?;

        debug!("User {} logged in", account.username);
        Ok(credentials)
    }

    pub async fn user_exists(&self, username: &str) -> Result<bool, AppError> {
        Ok(self
            .accounts
            .find_account(&username.to_lowercase())
            .await?
            .is_some())
    }

    /// Exchange a valid refresh token for a fresh access token.
    pub async fn renew_token(
        &self,
        username: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<IssuedToken, AppError> {
        let (Some(username), Some(refresh_token)) = (present(username), present(refresh_token))
        else {
            return Err(AppError::BadRequest(
                "Request must contain both username and refresh token".to_string(),
            ));
        };

        let account = self
            .accounts
            .find_account(&username.to_lowercase())
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid user".to_string()))?;

        if !constant_time_compare(&account.refresh_token.token, refresh_token) {
            return Err(AppError::Unauthorized("Invalid refresh token".to_string()));
        }
        if account.refresh_token.is_expired_at(Utc::now()) {
            return Err(AppError::Expired("Refresh token is expired".to_string()));
        }

        let access_token = generate_token(TokenKind::Access);
        self.accounts
            .update_tokens(&account.username, &access_token, None)
            .await?;

        debug!("Renewed access token for {}", account.username);
        Ok(access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::Duration;

    const CLIENT_ID: &str = "test-client";
    const ADMIN_SECRET: &str = "admin-secret";

    fn authenticator() -> (Arc<MemoryStore>, Authenticator) {
        let store = Arc::new(MemoryStore::new());
        let auth = Authenticator::new(store.clone(), CLIENT_ID, ADMIN_SECRET);
        (store, auth)
    }

    fn expired(token: &IssuedToken) -> IssuedToken {
        IssuedToken {
            token: token.token.clone(),
            expiration: Utc::now() - Duration::minutes(1),
        }
    }

    // ==================== Client Tests ====================

    #[test]
    fn test_authenticate_client() {
        let (_, auth) = authenticator();

        assert!(auth.authenticate_client(Some(CLIENT_ID)).is_ok());
        assert!(matches!(auth.authenticate_client(None), Err(AppError::BadRequest(_))));
        assert!(matches!(auth.authenticate_client(Some("")), Err(AppError::BadRequest(_))));
        assert!(matches!(
            auth.authenticate_client(Some("other-client")),
            Err(AppError::Unauthorized(_))
        ));
    }

    // ==================== Account Tests ====================

    #[tokio::test]
    async fn test_create_user_and_authorize() {
        let (_, auth) = authenticator();

        let credentials = auth.create_user(Some("Alice"), Some("pw"), None).await.unwrap();
        let user = auth
            .authorize(Some("ALICE"), Some(&credentials.access_token.token))
            .await
            .unwrap();

        assert_eq!(user.username, "alice");
        assert!(!user.is_admin);
    }

    #[tokio::test]
    async fn test_admin_requires_matching_secret() {
        let (_, auth) = authenticator();

        let admin = auth.create_user(Some("root"), Some("pw"), Some(ADMIN_SECRET)).await.unwrap();
        let other = auth.create_user(Some("mallory"), Some("pw"), Some("guess")).await.unwrap();

        let root = auth.authorize(Some("root"), Some(&admin.access_token.token)).await.unwrap();
        let mallory = auth
            .authorize(Some("mallory"), Some(&other.access_token.token))
            .await
            .unwrap();
        assert!(root.is_admin);
        assert!(!mallory.is_admin);
    }

    #[tokio::test]
    async fn test_duplicate_username_is_conflict() {
        let (_, auth) = authenticator();
        auth.create_user(Some("bob"), Some("pw"), None).await.unwrap();

        let result = auth.create_user(Some("BOB"), Some("other"), None).await;
        match result {
            Err(AppError::Conflict(message)) => {
                assert!(message.contains("username must be unique"))
            }
            other => panic!("Expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_user_requires_fields() {
        let (_, auth) = authenticator();
        assert!(matches!(
            auth.create_user(Some("bob"), None, None).await,
            Err(AppError::BadRequest(_))
        ));
    }

    // ==================== Login Tests ====================

    #[tokio::test]
    async fn test_login_rotates_tokens() {
        let (_, auth) = authenticator();
        let first = auth.create_user(Some("carol"), Some("pw"), None).await.unwrap();

        let second = auth.login(Some("carol"), Some("pw")).await.unwrap();
        assert_ne!(first.access_token.token, second.access_token.token);

        let stale = auth.authorize(Some("carol"), Some(&first.access_token.token)).await;
        assert!(matches!(stale, Err(AppError::Unauthorized(_))));
        assert!(auth.authorize(Some("carol"), Some(&second.access_token.token)).await.is_ok());
    }

    #[tokio::test]
    async fn test_login_failures() {
        let (_, auth) = authenticator();
        auth.create_user(Some("dave"), Some("pw"), None).await.unwrap();

        assert!(matches!(auth.login(Some("nobody"), Some("pw")).await, Err(AppError::NotFound(_))));
        assert!(matches!(
            auth.login(Some("dave"), Some("wrong")).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(auth.login(None, Some("pw")).await, Err(AppError::BadRequest(_))));
    }

    // ==================== Token Tests ====================

    #[tokio::test]
    async fn test_authorize_rejects_expired_and_unknown() {
        let (store, auth) = authenticator();
        let credentials = auth.create_user(Some("erin"), Some("pw"), None).await.unwrap();

        store
            .update_tokens("erin", &expired(&credentials.access_token), None)
            .await
            .unwrap();

        let result = auth.authorize(Some("erin"), Some(&credentials.access_token.token)).await;
        assert!(matches!(result, Err(AppError::Expired(_))));

        let unknown = auth.authorize(Some("ghost"), Some("token")).await;
        assert!(matches!(unknown, Err(AppError::Unauthorized(_))));

        let missing = auth.authorize(Some("erin"), None).await;
        assert!(matches!(missing, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_renew_token() {
        let (_, auth) = authenticator();
        let credentials = auth.create_user(Some("frank"), Some("pw"), None).await.unwrap();

        let renewed = auth
            .renew_token(Some("frank"), Some(&credentials.refresh_token.token))
            .await
            .unwrap();
        assert!(auth.authorize(Some("frank"), Some(&renewed.token)).await.is_ok());

        let wrong = auth.renew_token(Some("frank"), Some("not-the-token")).await;
        assert!(matches!(wrong, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_renew_with_expired_refresh_token() {
        let (store, auth) = authenticator();
        let credentials = auth.create_user(Some("grace"), Some("pw"), None).await.unwrap();

        store
            .update_tokens(
                "grace",
                &credentials.access_token,
                Some(&expired(&credentials.refresh_token)),
            )
            .await
            .unwrap();

        let result = auth
            .renew_token(Some("grace"), Some(&credentials.refresh_token.token))
            .await;
        assert!(matches!(result, Err(AppError::Expired(_))));
    }
}
