//! Top-level error types for storeauth.

use thiserror::Error;

use crate::store::StoreError;
use crate::transport::TransportError;

/// Top-level error type returned by [`AuthSession`](crate::AuthSession).
#[derive(Debug, Error)]
pub enum AuthError {
    /// A token could not be parsed, the persisted credential is incomplete,
    /// or the root macaroon is not scoped to this authority.
    #[error("invalid credentials: {message}")]
    InvalidCredential { message: String },

    /// The authorization service rejected a discharge or refresh request.
    #[error("authentication failed ({status}): {body}")]
    AuthenticationFailed { status: u16, body: String },

    /// The account requires a one-time password; retry the login with `otp` set.
    #[error("two-factor authentication required")]
    TwoFactorRequired,

    /// Network-level failure talking to a remote endpoint.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A request body could not be encoded as JSON. Credentials are untouched.
    #[error("failed to encode request body: {0}")]
    RequestBody(#[from] serde_json::Error),

    /// The credential store could not be read or written.
    ///
    /// When returned from an operation that changed credentials, the
    /// in-memory session may be ahead of what is durably saved.
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
}

impl AuthError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidCredential {
            message: message.into(),
        }
    }
}

/// Error type for [`ClientConfig`](crate::ClientConfig) loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file exists but could not be read.
    #[error("failed to read config from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`ClientConfig`](crate::ClientConfig).
    #[error("failed to parse config from {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// The authority URL is not an absolute URL with a host.
    #[error("invalid authority URL {url}: {message}")]
    InvalidAuthority { url: String, message: String },

    /// No platform configuration directory could be determined.
    #[error("configuration directory not available")]
    ConfigDirUnavailable,
}
