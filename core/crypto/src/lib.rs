//! Cryptographic primitives for Strongroom.
//!
//! This module provides:
//! - Password hashing using Argon2id with self-describing encoded hashes
//! - Authenticated encryption using XChaCha20-Poly1305
//! - Per-item keys with automatic zeroization
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Constant-time comparison of password hashes

pub mod aead;
pub mod engine;
pub mod kdf;
pub mod keys;

pub use aead::{decrypt, encrypt};
pub use engine::CryptoEngine;
pub use kdf::{hash_password, verify_password, KdfParams};
pub use keys::{random_bytes, ItemKey, Salt, KEY_LENGTH};
