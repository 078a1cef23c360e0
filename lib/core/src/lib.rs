//! Foundational types shared by the imagik crates.
//!
//! This crate carries the `Result` alias every layer reports errors through
//! and the ULID-backed identifiers used for sessions and request tracing.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ParseIdError, RequestId, SessionId};
