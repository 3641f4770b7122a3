//! Shared validation utilities
//!
//! ```rust,ignore
//! use gamedb_server::features::shared::validation::{validate_short_name, validate_url};
//!
//! let short_name = validate_short_name(" WUCC ")?; // "wucc"
//! validate_url("https://example.org/results", "results")?;
//! ```

use thiserror::Error;

pub const MAX_SHORT_NAME_LENGTH: usize = 64;
pub const MAX_NAME_LENGTH: usize = 256;
pub const MAX_URL_LENGTH: usize = 2048;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShortNameValidationError {
    #[error("Event short name is required and cannot be empty")]
    Required,

    #[error("Event short name must be between 1 and {max_length} characters")]
    TooLong { max_length: usize },

    #[error("Event short name can only contain letters, numbers, hyphens and underscores")]
    InvalidFormat,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameValidationError {
    #[error("Name is required and cannot be empty")]
    Required,

    #[error("Name must be between 1 and {max_length} characters")]
    TooLong { max_length: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UrlValidationError {
    #[error("{field_name} URL is invalid: must start with http:// or https://")]
    InvalidFormat { field_name: String },

    #[error("{field_name} URL must not exceed {max_length} characters")]
    TooLong { field_name: String, max_length: usize },
}

/// Normalize and validate an event short name.
///
/// Short names are case-insensitive; the lowercase form is returned.
pub fn validate_short_name(short_name: &str) -> Result<String, ShortNameValidationError> {
    let trimmed = short_name.trim();
    if trimmed.is_empty() {
        return Err(ShortNameValidationError::Required);
    }
    if trimmed.len() > MAX_SHORT_NAME_LENGTH {
        return Err(ShortNameValidationError::TooLong {
            max_length: MAX_SHORT_NAME_LENGTH,
        });
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ShortNameValidationError::InvalidFormat);
    }
    Ok(trimmed.to_ascii_lowercase())
}

pub fn validate_name(name: &str, max_length: usize) -> Result<(), NameValidationError> {
    if name.trim().is_empty() {
        return Err(NameValidationError::Required);
    }
    if name.len() > max_length {
        return Err(NameValidationError::TooLong { max_length });
    }
    Ok(())
}

/// Validate an absolute http(s) URL with a non-empty host
pub fn validate_url(url: &str, field_name: &str) -> Result<(), UrlValidationError> {
    if url.len() > MAX_URL_LENGTH {
        return Err(UrlValidationError::TooLong {
            field_name: field_name.to_string(),
            max_length: MAX_URL_LENGTH,
        });
    }

    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    let host = rest.and_then(|rest| rest.split(['/', '?', '#']).next());

    match host {
        Some(host) if !host.is_empty() && !url.chars().any(char::is_whitespace) => Ok(()),
        _ => Err(UrlValidationError::InvalidFormat {
            field_name: field_name.to_string(),
        }),
    }
}

/// Treat blank form values as absent
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
