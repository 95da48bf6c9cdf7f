//! Common utilities and types shared across Strongroom modules.
//!
//! This module provides foundational types that are used throughout the codebase,
//! ensuring consistency and type safety.

pub mod error;
pub mod models;
pub mod types;
pub mod validate;

pub use error::{Error, Result};
pub use models::{DataItem, DataType, DataVersion, ItemSecret, Session, User};
pub use types::{DataId, SensitiveBytes, SessionId, UserId, VersionId};
