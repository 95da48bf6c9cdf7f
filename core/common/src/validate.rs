//! Input validation shared by the auth and vault services.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{Error, Result};

/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum accepted data item name length, in characters.
pub const MAX_NAME_LENGTH: usize = 255;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .expect("email pattern is a valid regex")
});

/// Check that `email` is present and looks like an address.
pub fn email(email: &str) -> Result<()> {
    if email.is_empty() {
        return Err(Error::Validation("email is required".to_string()));
    }
    if !EMAIL_PATTERN.is_match(email) {
        return Err(Error::Validation("invalid email format".to_string()));
    }
    Ok(())
}

/// Check that `password` is present and long enough.
pub fn password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(Error::Validation("password is required".to_string()));
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(Error::Validation(format!(
            "password must be at least {} characters long",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// Check that a data item name is non-blank and within bounds.
pub fn data_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Validation("name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(Error::Validation(format!(
            "name must be at most {} characters",
            MAX_NAME_LENGTH
        )));
    }
    Ok(())
}
