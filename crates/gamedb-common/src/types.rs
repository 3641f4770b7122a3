//! Identifiers shared between the server and its workers

use crate::error::GamedbError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum accepted handle length
pub const MAX_HANDLE_LEN: usize = 128;

/// Opaque reference to a staged payload.
///
/// Handles are generated by the staging store. They are restricted to ASCII
/// letters, digits, `-` and `_` so they can be embedded in object keys and
/// URLs without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PayloadHandle(String);

impl PayloadHandle {
    /// Generate a fresh random handle
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PayloadHandle {
    type Err = GamedbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > MAX_HANDLE_LEN {
            return Err(GamedbError::InvalidHandle(format!(
                "handle must be 1-{} characters",
                MAX_HANDLE_LEN
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(GamedbError::InvalidHandle(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for PayloadHandle {
    type Error = GamedbError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PayloadHandle> for String {
    fn from(handle: PayloadHandle) -> Self {
        handle.0
    }
}

impl fmt::Display for PayloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_generated_handles_are_unique_and_valid() {
        let a = PayloadHandle::generate();
        let b = PayloadHandle::generate();
        assert_ne!(a, b);
        assert!(a.as_str().parse::<PayloadHandle>().is_ok());
    }

    #[test]
    fn test_rejects_path_separators() {
        assert!("../etc/passwd".parse::<PayloadHandle>().is_err());
        assert!("a/b".parse::<PayloadHandle>().is_err());
        assert!("".parse::<PayloadHandle>().is_err());
    }

    #[test]
    fn test_serde_validates() {
        let ok: PayloadHandle = serde_json::from_str("\"abc-123\"").unwrap();
        assert_eq!(ok.as_str(), "abc-123");
        assert!(serde_json::from_str::<PayloadHandle>("\"a b\"").is_err());
    }

    proptest! {
        #[test]
        fn valid_charset_roundtrips(s in "[A-Za-z0-9_-]{1,128}") {
            let handle: PayloadHandle = s.parse().unwrap();
            prop_assert_eq!(handle.to_string(), s);
        }

        #[test]
        fn overlong_rejected(s in "[a-z]{129,200}") {
            prop_assert!(s.parse::<PayloadHandle>().is_err());
        }
    }
}
