//! Error types for the identity provider boundary and the session lifecycle
//!
//! Provider failures never escape the session manager as faults: they are
//! converted into session state transitions (unauthenticated, logged out) and
//! these errors only describe what happened.

use thiserror::Error;

/// Failure talking to the identity provider
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network failure, timeout, or non-success HTTP status
    #[error("identity provider unreachable: {0}")]
    Unreachable(String),

    /// The provider answered but refused the request (e.g. `invalid_grant`)
    #[error("identity provider rejected the request: {0}")]
    Rejected(String),

    /// The provider answered with data we cannot use
    #[error("malformed identity provider response: {0}")]
    Malformed(String),
}

/// Startup silent check failed; the application runs unauthenticated
#[derive(Debug, Error)]
pub enum InitError {
    #[error("identity provider unreachable during initialization: {0}")]
    Unreachable(String),

    #[error("identity provider returned malformed data during initialization: {0}")]
    Malformed(String),
}

impl From<ProviderError> for InitError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unreachable(msg) => InitError::Unreachable(msg),
            // A rejected silent check still means the provider is misconfigured for us
            ProviderError::Rejected(msg) | ProviderError::Malformed(msg) => {
                InitError::Malformed(msg)
            }
        }
    }
}

/// The session can no longer be renewed
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("no authenticated session to refresh")]
    NotAuthenticated,

    #[error("token refresh rejected: {0}")]
    Rejected(String),

    #[error("token refresh failed: {0}")]
    Unreachable(String),
}

impl From<ProviderError> for RefreshError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unreachable(msg) => RefreshError::Unreachable(msg),
            ProviderError::Rejected(msg) | ProviderError::Malformed(msg) => {
                RefreshError::Rejected(msg)
            }
        }
    }
}

/// Failure completing the authorization-code callback
#[derive(Debug, Error)]
pub enum LoginError {
    /// Callback `state` does not match any pending login (CSRF or expired)
    #[error("unknown or expired login state")]
    UnknownState,

    /// The provider redirected back with an OAuth error
    #[error("authorization failed: {error}")]
    Authorization {
        error: String,
        description: Option<String>,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
