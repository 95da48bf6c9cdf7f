//! Encrypted data item operations.

use chrono::{DateTime, SubsecRound, Utc};
use std::sync::Arc;
use tracing::debug;

use strongroom_common::{
    validate, DataId, DataItem, DataType, DataVersion, Error, ItemSecret, Result,
    SensitiveBytes, UserId,
};
use strongroom_crypto::{CryptoEngine, ItemKey};
use strongroom_storage::{DataItemStore, DataVersionStore, StoreDeadline};

/// Current time at the microsecond precision the stores persist.
fn stored_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Vault operations handler.
///
/// Encryption and decryption happen here and nowhere else; the stores only
/// ever receive ciphertext and opaque key bytes. Listings and sync results
/// are returned with their secrets stripped.
pub struct VaultOperations {
    items: Arc<dyn DataItemStore>,
    versions: Arc<dyn DataVersionStore>,
    crypto: Arc<CryptoEngine>,
    deadline: StoreDeadline,
}

impl VaultOperations {
    /// Create a handler over the given stores.
    pub fn new(
        items: Arc<dyn DataItemStore>,
        versions: Arc<dyn DataVersionStore>,
        crypto: Arc<CryptoEngine>,
        deadline: StoreDeadline,
    ) -> Self {
        Self {
            items,
            versions,
            crypto,
            deadline,
        }
    }

    /// Load an item and check that `user_id` owns it.
    async fn owned_item(&self, user_id: UserId, data_id: DataId) -> Result<DataItem> {
        let item = self
            .deadline
            .run("get data item", self.items.get_by_id(data_id))
            .await?
            .ok_or_else(|| Error::NotFound("data not found".to_string()))?;

        if item.user_id != user_id {
            return Err(Error::AccessDenied("access denied".to_string()));
        }
        Ok(item)
    }

    async fn record_version(&self, data_id: DataId, version: u64) -> Result<()> {
        let row = DataVersion::new(data_id, version);
        self.deadline
            .run("create data version", self.versions.create(&row))
            .await
    }

    fn item_key(item: &DataItem) -> Result<ItemKey> {
        let secret = item
            .secret
            .as_ref()
            .ok_or_else(|| Error::Store(format!("Data item {} has no payload", item.id)))?;
        ItemKey::from_slice(secret.item_key.as_bytes())
    }

    /// Encrypt and store a new item at version 1.
    ///
    /// # Postconditions
    /// - The item is persisted with version 1
    /// - One version row with version 1 exists for it
    ///
    /// # Errors
    /// - `Validation` for a blank or over-long name
    /// - `PartialWrite` if the item was stored but its version row was not
    pub async fn create_data(
        &self,
        user_id: UserId,
        data_type: DataType,
        name: &str,
        metadata: &str,
        plaintext: &[u8],
    ) -> Result<DataItem> {
        validate::data_name(name)?;

        let key = self.crypto.generate_key();
        let encrypted_payload = self.crypto.encrypt(plaintext, &key)?;

        let now = stored_now();
        let item = DataItem {
            id: DataId::new(),
            user_id,
            data_type,
            name: name.to_string(),
            metadata: metadata.to_string(),
            secret: Some(ItemSecret {
                encrypted_payload,
                item_key: key.to_sensitive(),
            }),
            created_at: now,
            updated_at: now,
            version: 1,
        };

        self.deadline
            .run("create data item", self.items.create(&item))
            .await?;
        self.record_version(item.id, item.version)
            .await
            .map_err(|e| e.after_commit(format!("data item {} created", item.id)))?;

        debug!(user_id = %user_id, data_id = %item.id, data_type = %data_type, "Data item created");
        Ok(item)
    }

    /// Fetch one item with its payload.
    ///
    /// # Errors
    /// - `NotFound` if no item has this id
    /// - `AccessDenied` if the item belongs to another user
    pub async fn get_data(&self, user_id: UserId, data_id: DataId) -> Result<DataItem> {
        self.owned_item(user_id, data_id).await
    }

    /// Fetch one item and decrypt its payload.
    pub async fn open_data(
        &self,
        user_id: UserId,
        data_id: DataId,
    ) -> Result<(DataItem, SensitiveBytes)> {
        let item = self.owned_item(user_id, data_id).await?;
        let key = Self::item_key(&item)?;
        let ciphertext = item
            .secret
            .as_ref()
            .map(|secret| secret.encrypted_payload.as_slice())
            .unwrap_or_default();
        let plaintext = self.crypto.decrypt(ciphertext, &key)?;

        debug!(user_id = %user_id, data_id = %data_id, "Data item opened");
        Ok((item, SensitiveBytes::new(plaintext)))
    }

    /// All items of a user, newest change first, secrets stripped.
    pub async fn get_user_data(&self, user_id: UserId) -> Result<Vec<DataItem>> {
        let items = self
            .deadline
            .run("get user data", self.items.get_by_user_id(user_id))
            .await?;
        Ok(items.into_iter().map(DataItem::redacted).collect())
    }

    /// Items of a user with the given type, newest change first, secrets stripped.
    pub async fn get_user_data_by_type(
        &self,
        user_id: UserId,
        data_type: DataType,
    ) -> Result<Vec<DataItem>> {
        let items = self
            .deadline
            .run(
                "get user data by type",
                self.items.get_by_user_id_and_type(user_id, data_type),
            )
            .await?;
        Ok(items.into_iter().map(DataItem::redacted).collect())
    }

    /// Replace an item's name, metadata and payload.
    ///
    /// The payload is re-encrypted under the item's existing key and the
    /// version is bumped by one. Concurrent updates are not serialized; the
    /// last write wins.
    ///
    /// # Errors
    /// - `NotFound` / `AccessDenied` as for [`get_data`](Self::get_data)
    /// - `Validation` for a blank or over-long name
    /// - `PartialWrite` if the item was updated but its version row was not
    pub async fn update_data(
        &self,
        user_id: UserId,
        data_id: DataId,
        name: &str,
        metadata: &str,
        plaintext: &[u8],
    ) -> Result<DataItem> {
        let mut item = self.owned_item(user_id, data_id).await?;
        validate::data_name(name)?;

        let key = Self::item_key(&item)?;
        let encrypted_payload = self.crypto.encrypt(plaintext, &key)?;

        item.name = name.to_string();
        item.metadata = metadata.to_string();
        item.secret = Some(ItemSecret {
            encrypted_payload,
            item_key: key.to_sensitive(),
        });
        item.version += 1;
        item.updated_at = stored_now();

        self.deadline
            .run("update data item", self.items.update(&item))
            .await?;
        self.record_version(item.id, item.version)
            .await
            .map_err(|e| {
                e.after_commit(format!(
                    "data item {} updated to version {}",
                    item.id, item.version
                ))
            })?;

        debug!(user_id = %user_id, data_id = %data_id, version = item.version, "Data item updated");
        Ok(item)
    }

    /// Delete an item. Its version history is kept.
    pub async fn delete_data(&self, user_id: UserId, data_id: DataId) -> Result<()> {
        self.owned_item(user_id, data_id).await?;

        let deleted = self
            .deadline
            .run("delete data item", self.items.delete(data_id))
            .await?;
        if !deleted {
            return Err(Error::NotFound("data not found".to_string()));
        }

        debug!(user_id = %user_id, data_id = %data_id, "Data item deleted");
        Ok(())
    }

    /// Items changed after `since`, oldest change first, secrets stripped.
    ///
    /// Deletions are not reported.
    pub async fn sync_data(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<DataItem>> {
        let items = self
            .deadline
            .run(
                "get data updated since",
                self.items.get_updated_since(user_id, since),
            )
            .await?;
        debug!(user_id = %user_id, changed = items.len(), "Sync computed");
        Ok(items.into_iter().map(DataItem::redacted).collect())
    }

    /// Version history of an item, newest first.
    pub async fn get_versions(&self, user_id: UserId, data_id: DataId) -> Result<Vec<DataVersion>> {
        self.owned_item(user_id, data_id).await?;
        self.deadline
            .run("get data versions", self.versions.get_by_data_id(data_id))
            .await
    }

    /// Highest recorded version of an item.
    ///
    /// # Errors
    /// - `NotFound` if the item has no version rows
    pub async fn latest_version(&self, user_id: UserId, data_id: DataId) -> Result<DataVersion> {
        self.owned_item(user_id, data_id).await?;
        self.deadline
            .run(
                "get latest data version",
                self.versions.get_latest_version(data_id),
            )
            .await?
            .ok_or_else(|| Error::NotFound("no versions recorded".to_string()))
    }
}
