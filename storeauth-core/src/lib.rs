//! # storeauth core
//!
//! Macaroon-authenticated HTTP sessions for store APIs.
//!
//! This crate provides:
//! - [`AuthSession`] - Attaches credentials to requests and transparently
//!   refreshes expired discharges
//! - [`macaroon`] - Parsing, caveat lookup, and discharge binding
//! - [`CredentialStore`] - Persistence backends (file, memory, OS keyring)
//! - [`Transport`] - The HTTP seam, with a `reqwest` implementation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use storeauth_core::{AuthSession, AuthorityEndpoint, FileCredentialStore, ReqwestTransport};
//!
//! let session = AuthSession::open(
//!     AuthorityEndpoint::from_env()?,
//!     FileCredentialStore::open_default()?,
//!     ReqwestTransport::new()?,
//! )
//! .await?;
//! let response = session.get(url).await?;
//! ```

pub mod authority;
pub mod challenge;
pub mod config;
pub mod error;
pub mod macaroon;
pub mod secret;
pub mod session;
pub mod store;
pub mod transport;

// Re-export commonly used types at crate root
pub use authority::AuthorityEndpoint;

pub use challenge::{MacaroonNeedsRefresh, RefreshChallenge};

pub use config::ClientConfig;

pub use error::{AuthError, ConfigError};

pub use secret::Secret;

pub use session::{AuthSession, LoginRequest, RequestOptions};

pub use store::{
    CredentialSection,
    CredentialStore,
    FileCredentialStore,
    MemoryCredentialStore,
    StoreError,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringCredentialStore;

pub use transport::{
    HttpRequest,
    HttpResponse,
    ReqwestTransport,
    Transport,
    TransportConfig,
    TransportError,
};
