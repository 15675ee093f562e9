//! Developer portal API client.
//!
//! Layers, bottom up:
//! - [`transport`]: request dispatch with retry on timeout and response classification
//! - [`csrf`]: per-session anti-forgery token storage
//! - [`auth`]: login, session state and team bookkeeping
//! - [`paginate`]: fetching paged collections in full
//! - [`team`]: choosing the active team
//! - [`client`]: resource operations built on the layers above

pub mod auth;
pub mod client;
pub mod csrf;
pub mod error;
pub mod models;
pub mod paginate;
pub mod team;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use auth::{AuthSession, Credentials, Session};
pub use client::PortalClient;
pub use csrf::{CsrfTokenStore, CsrfTokens};
pub use error::ClientError;
pub use models::{AppIdKind, Record, Team, TeamMember};
pub use paginate::{PageRequest, Paginator};
pub use team::{Resolution, TeamOverrides, prompt_for_team, resolve_team};
pub use transport::{ApiRequest, RawResponse, RetryPolicy, RetryingTransport};
