//! Repository traits consumed by the auth and vault services.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use strongroom_common::{
    DataId, DataItem, DataType, DataVersion, Result, Session, SessionId, User, UserId,
};

/// Persistence for user accounts.
///
/// Lookups return `Ok(None)` when nothing matches so that absence is never
/// confused with a backend failure.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Persist a new user.
    ///
    /// # Errors
    /// - `Conflict` if the email is already taken
    /// - `Store` on backend failure
    async fn create(&self, user: &User) -> Result<()>;

    /// Find a user by email.
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Find a user by id.
    async fn get_by_id(&self, id: UserId) -> Result<Option<User>>;

    /// Overwrite an existing user.
    ///
    /// # Errors
    /// - `NotFound` if no user has this id
    /// - `Conflict` if the new email is taken by someone else
    async fn update(&self, user: &User) -> Result<()>;

    /// Remove a user. Returns whether a row was deleted.
    async fn delete(&self, id: UserId) -> Result<bool>;
}

/// Persistence for login sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session.
    ///
    /// # Errors
    /// - `Conflict` if the refresh token collides with an existing session
    async fn create(&self, session: &Session) -> Result<()>;

    /// Find the session currently holding `refresh_token`.
    async fn get_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Session>>;

    /// All sessions belonging to a user.
    async fn get_by_user_id(&self, user_id: UserId) -> Result<Vec<Session>>;

    /// Overwrite an existing session.
    async fn update(&self, session: &Session) -> Result<()>;

    /// Atomically replace `old_token` with `new_token`.
    ///
    /// # Postconditions
    /// - On `Some`, the returned session holds `new_token` and `expires_at`,
    ///   and `old_token` matches no session
    /// - At most one of any number of concurrent calls with the same
    ///   `old_token` returns `Some`; the rest return `None`
    async fn rotate_refresh_token(
        &self,
        old_token: &str,
        new_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Session>>;

    /// Delete a session by id. Returns whether a row was deleted.
    async fn delete(&self, id: SessionId) -> Result<bool>;

    /// Atomically delete the session holding `refresh_token`, returning it.
    async fn delete_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Session>>;

    /// Delete every session of a user. Returns the number removed.
    async fn delete_by_user_id(&self, user_id: UserId) -> Result<u64>;

    /// Delete sessions whose expiry is before `now`. Returns the number removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Persistence for encrypted data items.
///
/// Items arrive already encrypted; implementations never see plaintext.
#[async_trait]
pub trait DataItemStore: Send + Sync {
    /// Persist a new item.
    async fn create(&self, item: &DataItem) -> Result<()>;

    /// Find an item by id.
    async fn get_by_id(&self, id: DataId) -> Result<Option<DataItem>>;

    /// Items of a user, most recently updated first.
    async fn get_by_user_id(&self, user_id: UserId) -> Result<Vec<DataItem>>;

    /// Items of a user with the given type, most recently updated first.
    async fn get_by_user_id_and_type(
        &self,
        user_id: UserId,
        data_type: DataType,
    ) -> Result<Vec<DataItem>>;

    /// Overwrite an existing item.
    ///
    /// # Errors
    /// - `NotFound` if no item has this id
    async fn update(&self, item: &DataItem) -> Result<()>;

    /// Delete an item. Returns whether a row was deleted.
    async fn delete(&self, id: DataId) -> Result<bool>;

    /// Items of a user with `updated_at > since`, oldest change first.
    async fn get_updated_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<DataItem>>;
}

/// Append-only persistence for item version history.
#[async_trait]
pub trait DataVersionStore: Send + Sync {
    /// Append a version row.
    async fn create(&self, version: &DataVersion) -> Result<()>;

    /// All versions of an item, highest version first.
    async fn get_by_data_id(&self, data_id: DataId) -> Result<Vec<DataVersion>>;

    /// Highest version recorded for an item.
    async fn get_latest_version(&self, data_id: DataId) -> Result<Option<DataVersion>>;
}
