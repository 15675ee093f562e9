//! Core library for devportal, a developer portal API client.
//!
//! This crate provides:
//! - Configuration loading and management
//! - XDG-compliant path resolution
//! - Schema and example config generation
//! - An authenticated portal session with CSRF handling, retry and pagination

pub mod config;
pub mod error;
pub mod paths;
pub mod portal;
pub mod schema;

pub use config::{AppConfig, HttpConfig, LogLevel, LoggingConfig, PortalConfig};
pub use error::{CoreError, Result};
pub use paths::AppPaths;
pub use portal::{AuthSession, ClientError, Credentials, PortalClient, Session};
pub use schema::{generate_example_config, generate_schema};

/// Application name used for config directories and environment prefix.
pub const APP_NAME: &str = "devportal";

/// Returns the environment variable prefix for this application.
#[must_use]
pub fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
