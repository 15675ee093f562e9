//! Anti-forgery token holder.

use serde::{Deserialize, Serialize};

/// Header carrying the CSRF token.
pub const CSRF_HEADER: &str = "csrf";
/// Header carrying the CSRF timestamp.
pub const CSRF_TS_HEADER: &str = "csrf_ts";

/// The CSRF token pair echoed back to the service on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfTokens {
    /// Value sent as the `csrf` header.
    pub token: String,
    /// Value sent as the `csrf_ts` header.
    pub timestamp: String,
}

/// Holds the CSRF tokens of the active session.
///
/// Both values are stored together, so a token without a timestamp (or the
/// reverse) cannot be represented.
#[derive(Debug, Clone, Default)]
pub struct CsrfTokenStore {
    tokens: Option<CsrfTokens>,
}

impl CsrfTokenStore {
    /// Create an empty store.
    #[must_use]
    pub const fn new() -> Self {
        Self { tokens: None }
    }

    /// Currently stored tokens, if discovered.
    #[must_use]
    pub const fn get(&self) -> Option<&CsrfTokens> {
        self.tokens.as_ref()
    }

    /// Store a freshly discovered token pair, replacing any previous one.
    pub fn set(&mut self, token: impl Into<String>, timestamp: impl Into<String>) {
        self.tokens = Some(CsrfTokens {
            token: token.into(),
            timestamp: timestamp.into(),
        });
    }

    /// Forget the stored tokens.
    pub fn clear(&mut self) {
        self.tokens = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_returns_pair() {
        let mut store = CsrfTokenStore::new();
        assert!(store.get().is_none());

        store.set("top_secret", "123123");
        let tokens = store.get().cloned();
        assert_eq!(
            tokens,
            Some(CsrfTokens {
                token: "top_secret".to_string(),
                timestamp: "123123".to_string(),
            })
        );
    }

    #[test]
    fn clear_drops_both_values() {
        let mut store = CsrfTokenStore::new();
        store.set("a", "b");
        store.clear();
        assert!(store.get().is_none());
    }
}
