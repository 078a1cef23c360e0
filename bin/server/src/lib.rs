//! imagik HTTP front door.
//!
//! This crate provides the request pipeline in front of imagik's content
//! handlers: pluggable authentication drivers, trust-zone routing, cookie
//! sessions, CSRF protection and metrics.

pub mod auth;
pub mod config;
pub mod content;
pub mod csrf;
pub mod error;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod router;
pub mod server;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::{Server, ServerBuilder};
