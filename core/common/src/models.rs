//! Domain records shared by the core services and the store adapters.
//!
//! These are plain data structures. How they map onto tables or documents is
//! entirely the business of the store implementations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::{DataId, SensitiveBytes, SessionId, UserId, VersionId};
use crate::{Error, Result};

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Build a new user record stamped with the current time.
    pub fn new(email: impl Into<String>, password_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new(),
            email: email.into(),
            password_hash: password_hash.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A live authentication grant backed by a refresh token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    #[serde(skip_serializing, default)]
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Build a new session for `user_id`.
    pub fn new(user_id: UserId, refresh_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            user_id,
            refresh_token: refresh_token.into(),
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the session is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Kind of secret held by a data item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    LoginPassword,
    TextData,
    BinaryData,
    BankCard,
}

impl DataType {
    /// All known data types.
    pub const ALL: [DataType; 4] = [
        DataType::LoginPassword,
        DataType::TextData,
        DataType::BinaryData,
        DataType::BankCard,
    ];

    /// Wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::LoginPassword => "login_password",
            DataType::TextData => "text_data",
            DataType::BinaryData => "binary_data",
            DataType::BankCard => "bank_card",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DataType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("Unknown data type: {}", s)))
    }
}

/// The encrypted part of a data item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSecret {
    /// `nonce || ciphertext || tag`.
    pub encrypted_payload: Vec<u8>,
    /// Per-item key, generated at creation and never rotated.
    pub item_key: SensitiveBytes,
}

/// An encrypted secret owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataItem {
    pub id: DataId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub data_type: DataType,
    pub name: String,
    pub metadata: String,
    /// `None` once the item has been stripped for listing or sync.
    #[serde(skip)]
    pub secret: Option<ItemSecret>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl DataItem {
    /// Drop the payload and key, keeping only metadata.
    pub fn redacted(mut self) -> Self {
        self.secret = None;
        self
    }

    /// Whether the item still carries its payload and key.
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }
}

/// Immutable audit record, one per successful create or update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataVersion {
    pub id: VersionId,
    pub data_id: DataId,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl DataVersion {
    /// Record `version` of `data_id`.
    pub fn new(data_id: DataId, version: u64) -> Self {
        Self {
            id: VersionId::new(),
            data_id,
            version,
            created_at: Utc::now(),
        }
    }
}
