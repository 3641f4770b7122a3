//! GameDB Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the GameDB workspace.
//!
//! - **Error Handling**: [`GamedbError`] and the [`Result`] alias
//! - **Checksums**: incremental SHA-256 for staged payloads
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Types**: identifiers shared between the server and its workers

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

pub use error::{GamedbError, Result};
pub use types::PayloadHandle;
