//! Failure kinds surfaced by the session pipeline.

use thiserror::Error;

/// Errors returned by the authenticated portal client.
///
/// Every kind propagates to the immediate caller. Timeouts are the only
/// failure retried internally; once the retry budget is spent they surface as
/// [`ClientError::TransportTimeout`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The login was rejected. Does not say which credential was wrong.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// A previously valid session is no longer accepted by the service.
    #[error("session expired - log in again")]
    SessionExpired,

    /// Every attempt of a request timed out.
    #[error("request timed out after {attempts} attempts: {source}")]
    TransportTimeout {
        /// Total attempts made, including the first.
        attempts: u32,
        /// The timeout reported by the final attempt.
        #[source]
        source: reqwest::Error,
    },

    /// A transport fault that is not worth retrying (refused connection, DNS, TLS).
    #[error("transport error: {0}")]
    TransportError(#[source] reqwest::Error),

    /// The service answered successfully but embedded an application error.
    ///
    /// `message` is the server text exactly as received.
    #[error("{message}")]
    UnexpectedResponse {
        /// Human-readable message from the server, unmodified.
        message: String,
        /// Numeric result code, when the server sent one.
        result_code: Option<i64>,
    },

    /// The service answered with a non-success status that is not an auth failure.
    #[error("unexpected HTTP status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// A call that needs a session was made before logging in.
    #[error("not logged in")]
    NotLoggedIn,

    /// The account is not a member of any team.
    #[error("your account is in no teams")]
    NoTeams,

    /// A request URL could not be built.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A response body could not be decoded.
    #[error("decoding response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Build an [`ClientError::UnexpectedResponse`] without a result code.
    #[must_use]
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            message: message.into(),
            result_code: None,
        }
    }

    /// Whether re-authenticating could make the failed call succeed.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::InvalidCredentials | Self::SessionExpired | Self::NotLoggedIn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_response_displays_message_verbatim() {
        let err = ClientError::UnexpectedResponse {
            message: r"first line\nsecond line".to_string(),
            result_code: Some(35),
        };
        assert_eq!(err.to_string(), r"first line\nsecond line");
    }

    #[test]
    fn auth_failures_are_flagged() {
        assert!(ClientError::SessionExpired.is_auth_failure());
        assert!(ClientError::InvalidCredentials.is_auth_failure());
        assert!(!ClientError::NoTeams.is_auth_failure());
        assert!(!ClientError::unexpected("boom").is_auth_failure());
    }
}
