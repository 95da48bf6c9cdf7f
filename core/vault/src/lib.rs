//! Vault engine for Strongroom.
//!
//! This module provides:
//! - Creation, update and deletion of per-user encrypted data items
//! - Append-only version history for every item
//! - Ownership checks on every item access
//! - Incremental sync by modification time
//!
//! # Architecture
//! The vault sits between the request layer and the stores. Each item is
//! sealed with its own random key; plaintext never reaches a store.

pub mod operations;

pub use operations::VaultOperations;
