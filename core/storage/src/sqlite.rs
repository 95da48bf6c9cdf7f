//! SQLite-backed store.
//!
//! One connection behind a mutex; every call runs on the blocking pool so the
//! async runtime never waits on disk I/O. Timestamps are stored as
//! microseconds since the Unix epoch, identifiers as hyphenated UUID text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::{DataItemStore, DataVersionStore, SessionStore, UserStore};
use strongroom_common::{
    DataId, DataItem, DataType, DataVersion, Error, ItemSecret, Result, SensitiveBytes, Session,
    SessionId, User, UserId, VersionId,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS user_sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    refresh_token TEXT NOT NULL UNIQUE,
    expires_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS data_items (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    type TEXT NOT NULL,
    name TEXT NOT NULL,
    metadata TEXT NOT NULL,
    encrypted_data BLOB NOT NULL,
    encryption_key BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS data_versions (
    id TEXT PRIMARY KEY,
    data_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_user ON user_sessions(user_id);
CREATE INDEX IF NOT EXISTS idx_items_user_updated ON data_items(user_id, updated_at);
CREATE INDEX IF NOT EXISTS idx_versions_data ON data_versions(data_id, version);
"#;

const SESSION_COLUMNS: &str = "id, user_id, refresh_token, expires_at, created_at, updated_at";
const ITEM_COLUMNS: &str = "id, user_id, type, name, metadata, encrypted_data, encryption_key, \
                            created_at, updated_at, version";
const USER_COLUMNS: &str = "id, email, password_hash, created_at, updated_at";
const VERSION_COLUMNS: &str = "id, data_id, version, created_at";

fn map_sqlite_error(e: rusqlite::Error) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            Error::Conflict(e.to_string())
        }
        _ => Error::Store(e.to_string()),
    }
}

fn conversion_error(idx: usize, ty: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, message.into())
}

fn micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn col_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(value).ok_or_else(|| {
        conversion_error(idx, Type::Integer, format!("timestamp out of range: {}", value))
    })
}

fn col_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let value: String = row.get(idx)?;
    Uuid::parse_str(&value).map_err(|e| conversion_error(idx, Type::Text, e.to_string()))
}

fn col_version(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value)
        .map_err(|_| conversion_error(idx, Type::Integer, format!("negative version: {}", value)))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId::from_uuid(col_uuid(row, 0)?),
        email: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: col_timestamp(row, 3)?,
        updated_at: col_timestamp(row, 4)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: SessionId::from_uuid(col_uuid(row, 0)?),
        user_id: UserId::from_uuid(col_uuid(row, 1)?),
        refresh_token: row.get(2)?,
        expires_at: col_timestamp(row, 3)?,
        created_at: col_timestamp(row, 4)?,
        updated_at: col_timestamp(row, 5)?,
    })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<DataItem> {
    let type_name: String = row.get(2)?;
    let data_type: DataType = type_name
        .parse()
        .map_err(|e: Error| conversion_error(2, Type::Text, e.to_string()))?;

    Ok(DataItem {
        id: DataId::from_uuid(col_uuid(row, 0)?),
        user_id: UserId::from_uuid(col_uuid(row, 1)?),
        data_type,
        name: row.get(3)?,
        metadata: row.get(4)?,
        secret: Some(ItemSecret {
            encrypted_payload: row.get(5)?,
            item_key: SensitiveBytes::new(row.get(6)?),
        }),
        created_at: col_timestamp(row, 7)?,
        updated_at: col_timestamp(row, 8)?,
        version: col_version(row, 9)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<DataVersion> {
    Ok(DataVersion {
        id: VersionId::from_uuid(col_uuid(row, 0)?),
        data_id: DataId::from_uuid(col_uuid(row, 1)?),
        version: col_version(row, 2)?,
        created_at: col_timestamp(row, 3)?,
    })
}

/// Column values of a data item ready to be bound.
struct ItemRow {
    id: String,
    user_id: String,
    data_type: &'static str,
    name: String,
    metadata: String,
    encrypted_payload: Vec<u8>,
    item_key: Vec<u8>,
    created_at: i64,
    updated_at: i64,
    version: i64,
}

impl ItemRow {
    fn from_item(item: &DataItem) -> Result<Self> {
        let secret = item.secret.as_ref().ok_or_else(|| {
            Error::Validation(format!("Data item {} has no encrypted payload", item.id))
        })?;
        let version = i64::try_from(item.version)
            .map_err(|_| Error::Validation(format!("Version out of range: {}", item.version)))?;

        Ok(Self {
            id: item.id.to_string(),
            user_id: item.user_id.to_string(),
            data_type: item.data_type.as_str(),
            name: item.name.clone(),
            metadata: item.metadata.clone(),
            encrypted_payload: secret.encrypted_payload.clone(),
            item_key: secret.item_key.as_bytes().to_vec(),
            created_at: micros(&item.created_at),
            updated_at: micros(&item.updated_at),
            version,
        })
    }
}

/// SQLite implementation of every store trait.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).map_err(map_sqlite_error)?;
        let store = Self::with_connection(conn)?;
        info!(path = %db_path.as_ref().display(), "SQLite store opened");
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(map_sqlite_error)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(map_sqlite_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn call<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::Store("SQLite connection lock poisoned".to_string()))?;
            op(&mut guard).map_err(map_sqlite_error)
        })
        .await
        .map_err(|e| Error::Store(format!("SQLite task failed: {}", e)))?
    }

    async fn query_items(
        &self,
        filter: &'static str,
        order: &'static str,
        args: Vec<rusqlite::types::Value>,
    ) -> Result<Vec<DataItem>> {
        self.call(move |conn| {
            let sql = format!(
                "SELECT {} FROM data_items WHERE {} ORDER BY updated_at {}",
                ITEM_COLUMNS, filter, order
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(args), item_from_row)?;
            rows.collect()
        })
        .await
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn create(&self, user: &User) -> Result<()> {
        let user = user.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO users (id, email, password_hash, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.id.to_string(),
                    user.email,
                    user.password_hash,
                    micros(&user.created_at),
                    micros(&user.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
                [email],
                user_from_row,
            )
            .optional()
        })
        .await
    }

    async fn get_by_id(&self, id: UserId) -> Result<Option<User>> {
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                [id.to_string()],
                user_from_row,
            )
            .optional()
        })
        .await
    }

    async fn update(&self, user: &User) -> Result<()> {
        let user = user.clone();
        let id = user.id;
        let changed = self
            .call(move |conn| {
                conn.execute(
                    "UPDATE users SET email = ?1, password_hash = ?2, updated_at = ?3
                     WHERE id = ?4",
                    params![
                        user.email,
                        user.password_hash,
                        micros(&user.updated_at),
                        user.id.to_string(),
                    ],
                )
            })
            .await?;
        if changed == 0 {
            return Err(Error::NotFound(format!("User not found: {}", id)));
        }
        Ok(())
    }

    async fn delete(&self, id: UserId) -> Result<bool> {
        let changed = self
            .call(move |conn| conn.execute("DELETE FROM users WHERE id = ?1", [id.to_string()]))
            .await?;
        Ok(changed > 0)
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create(&self, session: &Session) -> Result<()> {
        let session = session.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO user_sessions
                 (id, user_id, refresh_token, expires_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session.id.to_string(),
                    session.user_id.to_string(),
                    session.refresh_token,
                    micros(&session.expires_at),
                    micros(&session.created_at),
                    micros(&session.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Session>> {
        let token = refresh_token.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM user_sessions WHERE refresh_token = ?1",
                    SESSION_COLUMNS
                ),
                [token],
                session_from_row,
            )
            .optional()
        })
        .await
    }

    async fn get_by_user_id(&self, user_id: UserId) -> Result<Vec<Session>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM user_sessions WHERE user_id = ?1 ORDER BY created_at DESC",
                SESSION_COLUMNS
            ))?;
            let rows = stmt.query_map([user_id.to_string()], session_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn update(&self, session: &Session) -> Result<()> {
        let session = session.clone();
        let id = session.id;
        let changed = self
            .call(move |conn| {
                conn.execute(
                    "UPDATE user_sessions
                     SET refresh_token = ?1, expires_at = ?2, updated_at = ?3
                     WHERE id = ?4",
                    params![
                        session.refresh_token,
                        micros(&session.expires_at),
                        micros(&session.updated_at),
                        session.id.to_string(),
                    ],
                )
            })
            .await?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Session not found: {}", id)));
        }
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        old_token: &str,
        new_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let old_token = old_token.to_string();
        let new_token = new_token.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            // The WHERE clause is the compare; zero rows means someone else won.
            let changed = tx.execute(
                "UPDATE user_sessions
                 SET refresh_token = ?1, expires_at = ?2, updated_at = ?3
                 WHERE refresh_token = ?4",
                params![
                    new_token,
                    micros(&expires_at),
                    micros(&Utc::now()),
                    old_token,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let session = tx.query_row(
                &format!(
                    "SELECT {} FROM user_sessions WHERE refresh_token = ?1",
                    SESSION_COLUMNS
                ),
                [&new_token],
                session_from_row,
            )?;
            tx.commit()?;
            Ok(Some(session))
        })
        .await
    }

    async fn delete(&self, id: SessionId) -> Result<bool> {
        let changed = self
            .call(move |conn| {
                conn.execute("DELETE FROM user_sessions WHERE id = ?1", [id.to_string()])
            })
            .await?;
        Ok(changed > 0)
    }

    async fn delete_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Session>> {
        let token = refresh_token.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let session = tx
                .query_row(
                    &format!(
                        "SELECT {} FROM user_sessions WHERE refresh_token = ?1",
                        SESSION_COLUMNS
                    ),
                    [&token],
                    session_from_row,
                )
                .optional()?;
            if let Some(session) = &session {
                tx.execute(
                    "DELETE FROM user_sessions WHERE id = ?1",
                    [session.id.to_string()],
                )?;
            }
            tx.commit()?;
            Ok(session)
        })
        .await
    }

    async fn delete_by_user_id(&self, user_id: UserId) -> Result<u64> {
        let changed = self
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM user_sessions WHERE user_id = ?1",
                    [user_id.to_string()],
                )
            })
            .await?;
        Ok(changed as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let changed = self
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM user_sessions WHERE expires_at < ?1",
                    [micros(&now)],
                )
            })
            .await?;
        debug!(removed = changed, "Expired sessions deleted");
        Ok(changed as u64)
    }
}

#[async_trait]
impl DataItemStore for SqliteStore {
    async fn create(&self, item: &DataItem) -> Result<()> {
        let row = ItemRow::from_item(item)?;
        self.call(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO data_items ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    ITEM_COLUMNS
                ),
                params![
                    row.id,
                    row.user_id,
                    row.data_type,
                    row.name,
                    row.metadata,
                    row.encrypted_payload,
                    row.item_key,
                    row.created_at,
                    row.updated_at,
                    row.version,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_by_id(&self, id: DataId) -> Result<Option<DataItem>> {
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM data_items WHERE id = ?1", ITEM_COLUMNS),
                [id.to_string()],
                item_from_row,
            )
            .optional()
        })
        .await
    }

    async fn get_by_user_id(&self, user_id: UserId) -> Result<Vec<DataItem>> {
        self.query_items("user_id = ?1", "DESC", vec![user_id.to_string().into()])
            .await
    }

    async fn get_by_user_id_and_type(
        &self,
        user_id: UserId,
        data_type: DataType,
    ) -> Result<Vec<DataItem>> {
        self.query_items(
            "user_id = ?1 AND type = ?2",
            "DESC",
            vec![
                user_id.to_string().into(),
                data_type.as_str().to_string().into(),
            ],
        )
        .await
    }

    async fn update(&self, item: &DataItem) -> Result<()> {
        let row = ItemRow::from_item(item)?;
        let id = item.id;
        let changed = self
            .call(move |conn| {
                conn.execute(
                    "UPDATE data_items
                     SET type = ?1, name = ?2, metadata = ?3, encrypted_data = ?4,
                         encryption_key = ?5, updated_at = ?6, version = ?7
                     WHERE id = ?8",
                    params![
                        row.data_type,
                        row.name,
                        row.metadata,
                        row.encrypted_payload,
                        row.item_key,
                        row.updated_at,
                        row.version,
                        row.id,
                    ],
                )
            })
            .await?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Data item not found: {}", id)));
        }
        Ok(())
    }

    async fn delete(&self, id: DataId) -> Result<bool> {
        let changed = self
            .call(move |conn| conn.execute("DELETE FROM data_items WHERE id = ?1", [id.to_string()]))
            .await?;
        Ok(changed > 0)
    }

    async fn get_updated_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<DataItem>> {
        self.query_items(
            "user_id = ?1 AND updated_at > ?2",
            "ASC",
            vec![user_id.to_string().into(), micros(&since).into()],
        )
        .await
    }
}

#[async_trait]
impl DataVersionStore for SqliteStore {
    async fn create(&self, version: &DataVersion) -> Result<()> {
        let version = version.clone();
        let number = i64::try_from(version.version)
            .map_err(|_| Error::Validation(format!("Version out of range: {}", version.version)))?;
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO data_versions (id, data_id, version, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    version.id.to_string(),
                    version.data_id.to_string(),
                    number,
                    micros(&version.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_by_data_id(&self, data_id: DataId) -> Result<Vec<DataVersion>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM data_versions WHERE data_id = ?1 ORDER BY version DESC",
                VERSION_COLUMNS
            ))?;
            let rows = stmt.query_map([data_id.to_string()], version_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn get_latest_version(&self, data_id: DataId) -> Result<Option<DataVersion>> {
        self.call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM data_versions WHERE data_id = ?1
                     ORDER BY version DESC LIMIT 1",
                    VERSION_COLUMNS
                ),
                [data_id.to_string()],
                version_from_row,
            )
            .optional()
        })
        .await
    }
}
