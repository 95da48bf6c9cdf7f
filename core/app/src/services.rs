//! Service wiring.
//!
//! Builds the store adapters, the crypto engine and the two services from
//! one validated [`AppConfig`].

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;
use strongroom_auth::AuthService;
use strongroom_common::{Error, Result, User};
use strongroom_crypto::CryptoEngine;
use strongroom_storage::{
    DataItemStore, DataVersionStore, MemoryStore, SessionStore, SqliteStore, UserStore,
};
use strongroom_vault::VaultOperations;

/// The auth and vault services sharing one set of stores.
pub struct Services {
    pub auth: AuthService,
    pub vault: VaultOperations,
}

impl Services {
    /// Wire services over explicit store implementations.
    pub fn build(
        config: &AppConfig,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        items: Arc<dyn DataItemStore>,
        versions: Arc<dyn DataVersionStore>,
    ) -> Result<Self> {
        config.validate()?;
        let crypto = Arc::new(CryptoEngine::new(config.security.kdf.clone()));

        let auth = AuthService::new(users, sessions, Arc::clone(&crypto), config.auth_settings()?)?;
        let vault = VaultOperations::new(items, versions, crypto, config.store_deadline());
        Ok(Self { auth, vault })
    }

    /// Services over the SQLite database named in the configuration.
    pub fn open(config: &AppConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.database.path)?);
        info!(path = %config.database.path.display(), "Services ready");
        Self::build(config, store.clone(), store.clone(), store.clone(), store)
    }

    /// Services over a fresh in-memory store.
    pub fn in_memory(config: &AppConfig) -> Result<Self> {
        let store = Arc::new(MemoryStore::default());
        Self::build(config, store.clone(), store.clone(), store.clone(), store)
    }

    /// Resolve the caller behind an `Authorization` header value.
    ///
    /// Accepts either `Bearer <token>` or the bare token.
    pub async fn authenticate(&self, authorization: &str) -> Result<User> {
        let token = authorization
            .strip_prefix("Bearer ")
            .unwrap_or(authorization)
            .trim();
        if token.is_empty() {
            return Err(Error::Auth("missing access token".to_string()));
        }

        match self.auth.validate_token(token).await {
            Ok(user) => Ok(user),
            Err(e) => {
                warn!(error = %e, "Rejected access token");
                Err(e)
            }
        }
    }
}
