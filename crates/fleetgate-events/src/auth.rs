//! Token authentication for observer connections.
//!
//! The first frame on every observer connection must be an `auth` message.
//! Token comparison is constant-time to avoid leaking prefix length through
//! timing, even though the tokens here are deployment secrets rather than
//! per-user credentials.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Privilege level granted to an authenticated observer.
///
/// Admins additionally receive audit events; they belong to the implicit
/// admin room by role alone, there is no way to join it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserverRole {
    Observer,
    Admin,
}

/// Validates an auth token and maps it to a role.
pub trait TokenValidator: Send + Sync + 'static {
    /// Returns the role for `token`, or `None` when the token is invalid.
    fn validate(&self, token: &str) -> Option<ObserverRole>;
}

/// Validator backed by fixed tokens supplied at startup.
#[derive(Debug, Clone)]
pub struct StaticTokenValidator {
    observer_token: String,
    admin_token: Option<String>,
}

impl StaticTokenValidator {
    pub fn new(observer_token: impl Into<String>, admin_token: Option<String>) -> Self {
        Self {
            observer_token: observer_token.into(),
            admin_token,
        }
    }
}

/// Constant-time equality; unequal lengths short-circuit, which leaks only
/// the length, not the content.
fn tokens_match(candidate: &str, expected: &str) -> bool {
    candidate.len() == expected.len()
        && candidate.as_bytes().ct_eq(expected.as_bytes()).into()
}

impl TokenValidator for StaticTokenValidator {
    fn validate(&self, token: &str) -> Option<ObserverRole> {
        if let Some(admin) = &self.admin_token
            && tokens_match(token, admin)
        {
            return Some(ObserverRole::Admin);
        }
        if tokens_match(token, &self.observer_token) {
            return Some(ObserverRole::Observer);
        }
        None
    }
}
