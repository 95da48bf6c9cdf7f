//! Authentication for Strongroom.
//!
//! - [`AuthService`]: registration, login, refresh rotation, logout
//! - [`TokenIssuer`]: HS256 access tokens
//!
//! Refresh rotation relies on the session store's atomic compare-and-swap,
//! so a rotated refresh token can never be used again, even by a concurrent
//! caller holding the same token.

pub mod service;
pub mod tokens;

pub use service::{AuthService, AuthSettings, LoginOutcome, TokenPair};
pub use tokens::{generate_refresh_token, AccessClaims, TokenIssuer};
