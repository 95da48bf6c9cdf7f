//! In-memory store for testing and ephemeral deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::store::{DataItemStore, DataVersionStore, SessionStore, UserStore};
use strongroom_common::{
    DataId, DataItem, DataType, DataVersion, Error, Result, Session, SessionId, User, UserId,
};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| Error::Store("memory store lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| Error::Store("memory store lock poisoned".to_string()))
}

/// In-memory implementation of every store trait.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Each table sits behind its own lock, so single-row
/// operations are atomic with respect to each other.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<UserId, User>>,
    sessions: RwLock<HashMap<SessionId, Session>>,
    items: RwLock<HashMap<DataId, DataItem>>,
    versions: RwLock<Vec<DataVersion>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn select_items<F>(&self, filter: F) -> Result<Vec<DataItem>>
    where
        F: Fn(&DataItem) -> bool,
    {
        let items = read(&self.items)?;
        Ok(items.values().filter(|i| filter(i)).cloned().collect())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create(&self, user: &User) -> Result<()> {
        let mut users = write(&self.users)?;
        if users.values().any(|u| u.email == user.email) {
            return Err(Error::Conflict(format!(
                "User with email {} already exists",
                user.email
            )));
        }
        if users.contains_key(&user.id) {
            return Err(Error::Conflict(format!("User {} already exists", user.id)));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let users = read(&self.users)?;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn get_by_id(&self, id: UserId) -> Result<Option<User>> {
        Ok(read(&self.users)?.get(&id).cloned())
    }

    async fn update(&self, user: &User) -> Result<()> {
        let mut users = write(&self.users)?;
        if users
            .values()
            .any(|u| u.email == user.email && u.id != user.id)
        {
            return Err(Error::Conflict(format!(
                "User with email {} already exists",
                user.email
            )));
        }
        match users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("User not found: {}", user.id))),
        }
    }

    async fn delete(&self, id: UserId) -> Result<bool> {
        Ok(write(&self.users)?.remove(&id).is_some())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, session: &Session) -> Result<()> {
        let mut sessions = write(&self.sessions)?;
        if sessions
            .values()
            .any(|s| s.refresh_token == session.refresh_token)
        {
            return Err(Error::Conflict("Refresh token already in use".to_string()));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Session>> {
        let sessions = read(&self.sessions)?;
        Ok(sessions
            .values()
            .find(|s| s.refresh_token == refresh_token)
            .cloned())
    }

    async fn get_by_user_id(&self, user_id: UserId) -> Result<Vec<Session>> {
        let sessions = read(&self.sessions)?;
        let mut found: Vec<Session> = sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn update(&self, session: &Session) -> Result<()> {
        let mut sessions = write(&self.sessions)?;
        match sessions.get_mut(&session.id) {
            Some(existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("Session not found: {}", session.id))),
        }
    }

    async fn rotate_refresh_token(
        &self,
        old_token: &str,
        new_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        // Lookup and swap under one write guard.
        let mut sessions = write(&self.sessions)?;
        let Some(session) = sessions
            .values_mut()
            .find(|s| s.refresh_token == old_token)
        else {
            return Ok(None);
        };

        session.refresh_token = new_token.to_string();
        session.expires_at = expires_at;
        session.updated_at = Utc::now();
        Ok(Some(session.clone()))
    }

    async fn delete(&self, id: SessionId) -> Result<bool> {
        Ok(write(&self.sessions)?.remove(&id).is_some())
    }

    async fn delete_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Session>> {
        let mut sessions = write(&self.sessions)?;
        let id = sessions
            .values()
            .find(|s| s.refresh_token == refresh_token)
            .map(|s| s.id);
        Ok(id.and_then(|id| sessions.remove(&id)))
    }

    async fn delete_by_user_id(&self, user_id: UserId) -> Result<u64> {
        let mut sessions = write(&self.sessions)?;
        let before = sessions.len();
        sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - sessions.len()) as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut sessions = write(&self.sessions)?;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at >= now);
        Ok((before - sessions.len()) as u64)
    }
}

#[async_trait]
impl DataItemStore for MemoryStore {
    async fn create(&self, item: &DataItem) -> Result<()> {
        let mut items = write(&self.items)?;
        if items.contains_key(&item.id) {
            return Err(Error::Conflict(format!("Data item {} already exists", item.id)));
        }
        items.insert(item.id, item.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: DataId) -> Result<Option<DataItem>> {
        Ok(read(&self.items)?.get(&id).cloned())
    }

    async fn get_by_user_id(&self, user_id: UserId) -> Result<Vec<DataItem>> {
        let mut found = self.select_items(|i| i.user_id == user_id)?;
        found.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(found)
    }

    async fn get_by_user_id_and_type(
        &self,
        user_id: UserId,
        data_type: DataType,
    ) -> Result<Vec<DataItem>> {
        let mut found =
            self.select_items(|i| i.user_id == user_id && i.data_type == data_type)?;
        found.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(found)
    }

    async fn update(&self, item: &DataItem) -> Result<()> {
        let mut items = write(&self.items)?;
        match items.get_mut(&item.id) {
            Some(existing) => {
                *existing = item.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("Data item not found: {}", item.id))),
        }
    }

    async fn delete(&self, id: DataId) -> Result<bool> {
        Ok(write(&self.items)?.remove(&id).is_some())
    }

    async fn get_updated_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<DataItem>> {
        let mut found = self.select_items(|i| i.user_id == user_id && i.updated_at > since)?;
        found.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(found)
    }
}

#[async_trait]
impl DataVersionStore for MemoryStore {
    async fn create(&self, version: &DataVersion) -> Result<()> {
        write(&self.versions)?.push(version.clone());
        Ok(())
    }

    async fn get_by_data_id(&self, data_id: DataId) -> Result<Vec<DataVersion>> {
        let versions = read(&self.versions)?;
        let mut found: Vec<DataVersion> = versions
            .iter()
            .filter(|v| v.data_id == data_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(found)
    }

    async fn get_latest_version(&self, data_id: DataId) -> Result<Option<DataVersion>> {
        let versions = read(&self.versions)?;
        Ok(versions
            .iter()
            .filter(|v| v.data_id == data_id)
            .max_by_key(|v| v.version)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use strongroom_common::{ItemSecret, SensitiveBytes};

    fn item(user_id: UserId, data_type: DataType, updated_at: DateTime<Utc>) -> DataItem {
        DataItem {
            id: DataId::new(),
            user_id,
            data_type,
            name: "entry".to_string(),
            metadata: String::new(),
            secret: Some(ItemSecret {
                encrypted_payload: vec![1, 2, 3],
                item_key: SensitiveBytes::new(vec![9; 32]),
            }),
            created_at: updated_at,
            updated_at,
            version: 1,
        }
    }

    #[tokio::test]
    async fn test_user_email_is_unique() {
        let store = MemoryStore::new();
        UserStore::create(&store, &User::new("a@x.com", "h1")).await.unwrap();

        let err = UserStore::create(&store, &User::new("a@x.com", "h2"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let stored = store.get_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "h1");
    }

    #[tokio::test]
    async fn test_rotate_is_single_use() {
        let store = MemoryStore::new();
        let session = Session::new(UserId::new(), "old", Utc::now() + Duration::days(1));
        SessionStore::create(&store, &session).await.unwrap();

        let later = Utc::now() + Duration::days(30);
        let rotated = store
            .rotate_refresh_token("old", "new", later)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rotated.id, session.id);
        assert_eq!(rotated.refresh_token, "new");
        assert_eq!(rotated.expires_at, later);

        assert!(store
            .rotate_refresh_token("old", "newer", later)
            .await
            .unwrap()
            .is_none());
        assert!(store.get_by_refresh_token("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_by_refresh_token() {
        let store = MemoryStore::new();
        let session = Session::new(UserId::new(), "tok", Utc::now() + Duration::days(1));
        SessionStore::create(&store, &session).await.unwrap();

        let removed = store.delete_by_refresh_token("tok").await.unwrap().unwrap();
        assert_eq!(removed.id, session.id);
        assert!(store.delete_by_refresh_token("tok").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_expired_sessions() {
        let store = MemoryStore::new();
        let user = UserId::new();
        let now = Utc::now();
        SessionStore::create(&store, &Session::new(user, "live", now + Duration::days(1)))
            .await
            .unwrap();
        SessionStore::create(&store, &Session::new(user, "dead", now - Duration::days(1)))
            .await
            .unwrap();

        assert_eq!(store.delete_expired(now).await.unwrap(), 1);
        let left = SessionStore::get_by_user_id(&store, user).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].refresh_token, "live");
    }

    #[tokio::test]
    async fn test_item_ordering() {
        let store = MemoryStore::new();
        let user = UserId::new();
        let t0 = Utc::now();
        let older = item(user, DataType::TextData, t0);
        let newer = item(user, DataType::BankCard, t0 + Duration::seconds(5));
        DataItemStore::create(&store, &older).await.unwrap();
        DataItemStore::create(&store, &newer).await.unwrap();
        DataItemStore::create(&store, &item(UserId::new(), DataType::TextData, t0))
            .await
            .unwrap();

        let listed = DataItemStore::get_by_user_id(&store, user).await.unwrap();
        assert_eq!(
            listed.iter().map(|i| i.id).collect::<Vec<_>>(),
            vec![newer.id, older.id]
        );

        let cards = store
            .get_by_user_id_and_type(user, DataType::BankCard)
            .await
            .unwrap();
        assert_eq!(cards.len(), 1);

        let since = store
            .get_updated_since(user, t0 - Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(
            since.iter().map(|i| i.id).collect::<Vec<_>>(),
            vec![older.id, newer.id]
        );
        assert_eq!(store.get_updated_since(user, t0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_item_is_not_found() {
        let store = MemoryStore::new();
        let err = DataItemStore::update(&store, &item(UserId::new(), DataType::TextData, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_versions_newest_first() {
        let store = MemoryStore::new();
        let data_id = DataId::new();
        for v in 1..=3 {
            DataVersionStore::create(&store, &DataVersion::new(data_id, v))
                .await
                .unwrap();
        }

        let versions = store.get_by_data_id(data_id).await.unwrap();
        assert_eq!(
            versions.iter().map(|v| v.version).collect::<Vec<_>>(),
            vec![3, 2, 1]
        );
        assert_eq!(
            store.get_latest_version(data_id).await.unwrap().unwrap().version,
            3
        );
        assert!(store.get_latest_version(DataId::new()).await.unwrap().is_none());
    }
}
