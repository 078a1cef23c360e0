//! Error handling foundation for imagik.
//!
//! Only the `Result` alias lives here. Every crate defines its own context
//! enums (`ServerError`, `RouteError`, ...) and wraps them in a rootcause
//! `Report` as they propagate.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
