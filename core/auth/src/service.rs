//! Account and session lifecycle.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::tokens::{generate_refresh_token, TokenIssuer};
use strongroom_common::{validate, Error, Result, SensitiveBytes, Session, User, UserId};
use strongroom_crypto::CryptoEngine;
use strongroom_storage::{SessionStore, StoreDeadline, UserStore};

/// Default access token lifetime in seconds.
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Default refresh token (session) lifetime in days.
pub const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 30;

const DUMMY_PASSWORD: &str = "strongroom-timing-equalizer";

/// Settings the auth service is constructed with.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub token_secret: SensitiveBytes,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub store_deadline: StoreDeadline,
}

impl AuthSettings {
    /// Settings with default lifetimes and no store deadline.
    pub fn new(token_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            token_secret: SensitiveBytes::new(token_secret.into()),
            access_token_ttl: Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECS),
            refresh_token_ttl: Duration::days(DEFAULT_REFRESH_TOKEN_TTL_DAYS),
            store_deadline: StoreDeadline::none(),
        }
    }
}

/// A freshly issued access/refresh pair.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Result of a successful login.
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub user: User,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

/// Registration, login, token rotation and logout.
///
/// Holds no mutable state of its own; everything lives in the stores, so a
/// single instance can be shared across tasks behind an `Arc`.
pub struct AuthService {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    crypto: Arc<CryptoEngine>,
    tokens: TokenIssuer,
    refresh_ttl: Duration,
    deadline: StoreDeadline,
    dummy_hash: String,
}

impl AuthService {
    /// Create the service.
    ///
    /// # Errors
    /// - `Validation` if the token secret is too short or a TTL is not positive
    /// - `Crypto` if the timing-equalizer hash cannot be computed
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        crypto: Arc<CryptoEngine>,
        settings: AuthSettings,
    ) -> Result<Self> {
        let tokens = TokenIssuer::new(settings.token_secret.as_bytes(), settings.access_token_ttl)?;
        if settings.refresh_token_ttl <= Duration::zero() {
            return Err(Error::Validation(
                "Refresh token TTL must be positive".to_string(),
            ));
        }
        let dummy_hash = crypto.hash_password(DUMMY_PASSWORD)?;

        Ok(Self {
            users,
            sessions,
            crypto,
            tokens,
            refresh_ttl: settings.refresh_token_ttl,
            deadline: settings.store_deadline,
            dummy_hash,
        })
    }

    async fn hash_password(&self, password: &str) -> Result<String> {
        let crypto = Arc::clone(&self.crypto);
        let password = password.to_string();
        tokio::task::spawn_blocking(move || crypto.hash_password(&password))
            .await
            .map_err(|e| Error::Crypto(format!("Password hashing task failed: {}", e)))?
    }

    async fn verify_password(&self, password: &str, encoded: String) -> Result<bool> {
        let crypto = Arc::clone(&self.crypto);
        let password = password.to_string();
        tokio::task::spawn_blocking(move || crypto.verify_password(&password, &encoded))
            .await
            .map_err(|e| Error::Crypto(format!("Password verification task failed: {}", e)))
    }

    /// Create an account.
    ///
    /// # Errors
    /// - `Validation` for a malformed email or a short password
    /// - `Conflict` if the email is already registered
    pub async fn register(&self, email: &str, password: &str) -> Result<User> {
        validate::email(email)?;
        validate::password(password)?;

        let existing = self
            .deadline
            .run("get user by email", self.users.get_by_email(email))
            .await?;
        if existing.is_some() {
            return Err(Error::Conflict(
                "user with this email already exists".to_string(),
            ));
        }

        let hash = self.hash_password(password).await?;
        let user = User::new(email, hash);
        // A racing registration for the same email surfaces here as Conflict.
        self.deadline
            .run("create user", self.users.create(&user))
            .await?;

        debug!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Authenticate with email and password and open a new session.
    ///
    /// # Errors
    /// - `Auth("invalid credentials")` for an unknown email or a wrong password
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome> {
        let user = self
            .deadline
            .run("get user by email", self.users.get_by_email(email))
            .await?;

        let encoded = match &user {
            Some(user) => user.password_hash.clone(),
            None => self.dummy_hash.clone(),
        };
        let verified = self.verify_password(password, encoded).await?;

        let user = match user {
            Some(user) if verified => user,
            _ => return Err(Error::Auth("invalid credentials".to_string())),
        };

        let now = Utc::now();
        let (access_token, expires_at) = self.tokens.issue(&user, now)?;
        let refresh_token = generate_refresh_token();
        let refresh_expires_at = now + self.refresh_ttl;
        let session = Session::new(user.id, refresh_token.clone(), refresh_expires_at);
        self.deadline
            .run("create session", self.sessions.create(&session))
            .await?;

        debug!(user_id = %user.id, session_id = %session.id, "Session opened");
        Ok(LoginOutcome {
            user,
            tokens: TokenPair {
                access_token,
                refresh_token,
                expires_at,
                refresh_expires_at,
            },
        })
    }

    /// Exchange a refresh token for a new pair, retiring the old token.
    ///
    /// # Errors
    /// - `Auth("invalid refresh token")` if unknown or already rotated
    /// - `Auth("refresh token expired")` if the session has expired
    /// - `Auth("user not found")` if the session owner no longer exists
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair> {
        let invalid = || Error::Auth("invalid refresh token".to_string());

        let session = self
            .deadline
            .run(
                "get session by refresh token",
                self.sessions.get_by_refresh_token(refresh_token),
            )
            .await?
            .ok_or_else(invalid)?;

        let now = Utc::now();
        if session.is_expired_at(now) {
            return Err(Error::Auth("refresh token expired".to_string()));
        }

        let user = self
            .deadline
            .run("get user by id", self.users.get_by_id(session.user_id))
            .await?
            .ok_or_else(|| Error::Auth("user not found".to_string()))?;

        let new_refresh = generate_refresh_token();
        let refresh_expires_at = now + self.refresh_ttl;
        let rotated = self
            .deadline
            .run(
                "rotate refresh token",
                self.sessions
                    .rotate_refresh_token(refresh_token, &new_refresh, refresh_expires_at),
            )
            .await?
            .ok_or_else(invalid)?;

        let (access_token, expires_at) = self.tokens.issue(&user, now)?;

        debug!(user_id = %user.id, session_id = %rotated.id, "Refresh token rotated");
        Ok(TokenPair {
            access_token,
            refresh_token: new_refresh,
            expires_at,
            refresh_expires_at,
        })
    }

    /// End the session holding `refresh_token`.
    ///
    /// Access tokens already issued stay valid until they expire.
    ///
    /// # Errors
    /// - `Auth("invalid refresh token")` if no session holds the token
    pub async fn logout(&self, refresh_token: &str) -> Result<()> {
        let session = self
            .deadline
            .run(
                "delete session by refresh token",
                self.sessions.delete_by_refresh_token(refresh_token),
            )
            .await?
            .ok_or_else(|| Error::Auth("invalid refresh token".to_string()))?;

        debug!(user_id = %session.user_id, session_id = %session.id, "Session closed");
        Ok(())
    }

    /// End every session of a user. Returns how many were closed.
    pub async fn logout_all(&self, user_id: UserId) -> Result<u64> {
        let removed = self
            .deadline
            .run(
                "delete sessions by user",
                self.sessions.delete_by_user_id(user_id),
            )
            .await?;
        debug!(user_id = %user_id, removed, "All sessions closed");
        Ok(removed)
    }

    /// Resolve the user behind an access token.
    ///
    /// # Errors
    /// - `Auth` for any invalid, expired or forged token
    /// - `Auth("user not found")` if the user has been deleted
    pub async fn validate_token(&self, access_token: &str) -> Result<User> {
        let claims = self.tokens.verify(access_token, Utc::now())?;
        self.deadline
            .run("get user by id", self.users.get_by_id(claims.user_id))
            .await?
            .ok_or_else(|| Error::Auth("user not found".to_string()))
    }

    /// Delete sessions past their expiry. Returns how many were removed.
    pub async fn purge_expired_sessions(&self) -> Result<u64> {
        let removed = self
            .deadline
            .run("delete expired sessions", self.sessions.delete_expired(Utc::now()))
            .await?;
        debug!(removed, "Expired sessions purged");
        Ok(removed)
    }

    /// Sessions currently open for a user.
    pub async fn sessions(&self, user_id: UserId) -> Result<Vec<Session>> {
        self.deadline
            .run("get sessions by user", self.sessions.get_by_user_id(user_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use strongroom_crypto::KdfParams;
    use strongroom_storage::{MemoryStore, SqliteStore};

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn service_with(store: Arc<MemoryStore>, settings: AuthSettings) -> AuthService {
        let crypto = Arc::new(CryptoEngine::new(KdfParams::insecure_fast()));
        AuthService::new(store.clone(), store, crypto, settings).unwrap()
    }

    fn service() -> (AuthService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        (service_with(store.clone(), AuthSettings::new(SECRET)), store)
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let (auth, _) = service();
        let user = auth.register("a@x.com", "password1").await.unwrap();
        assert!(user.password_hash.starts_with("$argon2id$"));

        let outcome = auth.login("a@x.com", "password1").await.unwrap();
        assert_eq!(outcome.user.id, user.id);
        assert!(!outcome.tokens.refresh_token.is_empty());

        let resolved = auth.validate_token(&outcome.tokens.access_token).await.unwrap();
        assert_eq!(resolved.id, user.id);
        assert_eq!(auth.sessions(user.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let (auth, _) = service();
        assert!(matches!(
            auth.register("not-an-email", "password1").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            auth.register("a@x.com", "short").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let (auth, store) = service();
        let first = auth.register("a@x.com", "password1").await.unwrap();
        let err = auth.register("a@x.com", "password2").await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let stored = UserStore::get_by_email(store.as_ref(), "a@x.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, first.id);
        assert_eq!(stored.password_hash, first.password_hash);
        auth.login("a@x.com", "password1").await.unwrap();
        assert!(matches!(
            auth.login("a@x.com", "password2").await,
            Err(Error::Auth(_))
        ));
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let (auth, _) = service();
        auth.register("a@x.com", "password1").await.unwrap();

        let unknown = auth.login("nobody@x.com", "password1").await.unwrap_err();
        let wrong = auth.login("a@x.com", "wrong-password").await.unwrap_err();
        assert_eq!(unknown.to_string(), wrong.to_string());
        assert!(matches!(unknown, Error::Auth(ref m) if m == "invalid credentials"));
    }

    #[tokio::test]
    async fn test_refresh_rotates_token() {
        let (auth, _) = service();
        auth.register("a@x.com", "password1").await.unwrap();
        let outcome = auth.login("a@x.com", "password1").await.unwrap();
        let old = outcome.tokens.refresh_token;

        let pair = auth.refresh_token(&old).await.unwrap();
        assert_ne!(pair.refresh_token, old);

        let err = auth.refresh_token(&old).await.unwrap_err();
        assert!(matches!(err, Error::Auth(ref m) if m == "invalid refresh token"));
        auth.refresh_token(&pair.refresh_token).await.unwrap();
    }

    async fn assert_single_refresh_winner(auth: AuthService) {
        auth.register("a@x.com", "password1").await.unwrap();
        let token = auth
            .login("a@x.com", "password1")
            .await
            .unwrap()
            .tokens
            .refresh_token;

        let auth = Arc::new(auth);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let auth = Arc::clone(&auth);
                let token = token.clone();
                tokio::spawn(async move { auth.refresh_token(&token).await })
            })
            .collect();

        let mut winners = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(pair) => winners.push(pair),
                Err(Error::Auth(msg)) => assert_eq!(msg, "invalid refresh token"),
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(winners.len(), 1);

        let err = auth.refresh_token(&token).await.unwrap_err();
        assert!(matches!(err, Error::Auth(ref m) if m == "invalid refresh token"));
        auth.refresh_token(&winners[0].refresh_token).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_refresh_has_one_winner() {
        let (auth, _) = service();
        assert_single_refresh_winner(auth).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_has_one_winner_on_sqlite() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let crypto = Arc::new(CryptoEngine::new(KdfParams::insecure_fast()));
        let auth =
            AuthService::new(store.clone(), store, crypto, AuthSettings::new(SECRET)).unwrap();
        assert_single_refresh_winner(auth).await;
    }

    #[tokio::test]
    async fn test_expired_refresh_token() {
        let (auth, store) = service();
        let user = auth.register("a@x.com", "password1").await.unwrap();
        let stale = Session::new(user.id, "stale-token", Utc::now() - Duration::minutes(1));
        SessionStore::create(store.as_ref(), &stale).await.unwrap();

        let err = auth.refresh_token("stale-token").await.unwrap_err();
        assert!(matches!(err, Error::Auth(ref m) if m == "refresh token expired"));

        assert_eq!(auth.purge_expired_sessions().await.unwrap(), 1);
        let err = auth.refresh_token("stale-token").await.unwrap_err();
        assert!(matches!(err, Error::Auth(ref m) if m == "invalid refresh token"));
    }

    #[tokio::test]
    async fn test_refresh_for_deleted_user() {
        let (auth, store) = service();
        let user = auth.register("a@x.com", "password1").await.unwrap();
        let token = auth
            .login("a@x.com", "password1")
            .await
            .unwrap()
            .tokens
            .refresh_token;
        UserStore::delete(store.as_ref(), user.id).await.unwrap();

        let err = auth.refresh_token(&token).await.unwrap_err();
        assert!(matches!(err, Error::Auth(ref m) if m == "user not found"));
    }

    #[tokio::test]
    async fn test_logout() {
        let (auth, _) = service();
        auth.register("a@x.com", "password1").await.unwrap();
        let outcome = auth.login("a@x.com", "password1").await.unwrap();

        auth.logout(&outcome.tokens.refresh_token).await.unwrap();
        assert!(matches!(
            auth.logout(&outcome.tokens.refresh_token).await,
            Err(Error::Auth(_))
        ));
        assert!(matches!(
            auth.refresh_token(&outcome.tokens.refresh_token).await,
            Err(Error::Auth(_))
        ));

        // Stateless access tokens outlive the session.
        auth.validate_token(&outcome.tokens.access_token).await.unwrap();
    }

    #[tokio::test]
    async fn test_logout_all() {
        let (auth, _) = service();
        let user = auth.register("a@x.com", "password1").await.unwrap();
        auth.login("a@x.com", "password1").await.unwrap();
        auth.login("a@x.com", "password1").await.unwrap();

        assert_eq!(auth.logout_all(user.id).await.unwrap(), 2);
        assert!(auth.sessions(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validate_rejects_garbage() {
        let (auth, _) = service();
        assert!(matches!(
            auth.validate_token("garbage").await,
            Err(Error::Auth(_))
        ));
    }

    #[test]
    fn test_short_secret_rejected() {
        let store = Arc::new(MemoryStore::default());
        let crypto = Arc::new(CryptoEngine::new(KdfParams::insecure_fast()));
        let result = AuthService::new(
            store.clone(),
            store,
            crypto,
            AuthSettings::new(b"too-short".to_vec()),
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    struct StalledUsers;

    #[async_trait]
    impl UserStore for StalledUsers {
        async fn create(&self, _user: &User) -> Result<()> {
            std::future::pending().await
        }
        async fn get_by_email(&self, _email: &str) -> Result<Option<User>> {
            std::future::pending().await
        }
        async fn get_by_id(&self, _id: UserId) -> Result<Option<User>> {
            std::future::pending().await
        }
        async fn update(&self, _user: &User) -> Result<()> {
            std::future::pending().await
        }
        async fn delete(&self, _id: UserId) -> Result<bool> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_deadline_surfaces_as_store_error() {
        let sessions = Arc::new(MemoryStore::default());
        let crypto = Arc::new(CryptoEngine::new(KdfParams::insecure_fast()));
        let mut settings = AuthSettings::new(SECRET);
        settings.store_deadline = StoreDeadline::new(std::time::Duration::from_millis(100));
        let auth = AuthService::new(Arc::new(StalledUsers), sessions, crypto, settings).unwrap();

        let err = auth.login("a@x.com", "password1").await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }
}
