//! Credential persistence.
//!
//! This module provides:
//! - [`CredentialSection`] - The named fields persisted for one authority
//! - [`CredentialStore`] - Trait for persistence backends
//! - [`FileCredentialStore`] - TOML file with one table per authority host
//! - [`MemoryCredentialStore`] - In-memory implementation for testing
//! - [`KeyringCredentialStore`] - OS keyring implementation (with `keyring-store` feature)
//!
//! # Section Layout
//!
//! Each authority gets its own section, keyed by the authority host:
//!
//! ```toml
//! ["login.ubuntu.com"]
//! email = "dev@example.com"
//! macaroon = "MDAy..."
//! unbound_discharge = "MDAz..."
//! ```
//!
//! The same layout is used by [`CredentialSection::export`], optionally
//! base64-encoded so it survives copy and paste.

use std::collections::BTreeMap;
use std::io::Write;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::authority::AuthorityEndpoint;

mod file;
mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringCredentialStore;

/// Serialized root macaroon.
pub const MACAROON: &str = "macaroon";
/// Serialized discharge, as issued by the service (before binding).
pub const UNBOUND_DISCHARGE: &str = "unbound_discharge";
/// Account email used at login.
pub const EMAIL: &str = "email";

/// Error type for credential store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error reading or writing the store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted credentials could not be parsed.
    #[error("failed to parse credentials from {origin}: {message}")]
    Parse { origin: String, message: String },

    /// The credentials could not be serialized.
    #[error("failed to encode credentials: {0}")]
    Encode(#[from] toml::ser::Error),

    /// Configuration directory not available.
    #[error("configuration directory not available")]
    ConfigDirUnavailable,

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    Backend { message: String },
}

/// The credential fields stored for one authority.
///
/// Mutations only affect this in-memory copy; persist it with
/// [`CredentialStore::save`].
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialSection {
    fields: BTreeMap<String, String>,
}

impl CredentialSection {
    /// Create an empty section.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Remove every field.
    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field names currently set, in sorted order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn root(&self) -> Option<&str> {
        self.get(MACAROON)
    }

    pub fn unbound_discharge(&self) -> Option<&str> {
        self.get(UNBOUND_DISCHARGE)
    }

    pub fn email(&self) -> Option<&str> {
        self.get(EMAIL)
    }

    /// Write this section for `authority` to `writer`.
    ///
    /// With `encode` set the document is base64-encoded; [`import`](Self::import)
    /// accepts both forms.
    pub fn export<W: Write>(
        &self,
        writer: &mut W,
        authority: &AuthorityEndpoint,
        encode: bool,
    ) -> Result<(), StoreError> {
        let mut document = CredentialDocument::new();
        document.insert(authority.host().to_string(), self.clone());
        let text = toml::to_string(&document)?;

        if encode {
            writer.write_all(STANDARD.encode(text).as_bytes())?;
        } else {
            writer.write_all(text.as_bytes())?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read the section for `authority` from an exported document.
    ///
    /// Tries the text as TOML first, then as base64-encoded TOML. A valid
    /// document without a section for `authority` yields an empty section.
    pub fn import(text: &str, authority: &AuthorityEndpoint) -> Result<Self, StoreError> {
        let mut document = match parse_document(text, "export") {
            Ok(document) => document,
            Err(plain_err) => {
                let decoded = STANDARD
                    .decode(text.trim().as_bytes())
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
                    .ok_or(plain_err)?;
                parse_document(&decoded, "encoded export")?
            }
        };

        Ok(document.remove(authority.host()).unwrap_or_default())
    }
}

impl std::fmt::Debug for CredentialSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Values are bearer credentials; only show which fields are present.
        f.debug_struct("CredentialSection")
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// All sections of a credentials file, keyed by authority host.
pub(crate) type CredentialDocument = BTreeMap<String, CredentialSection>;

pub(crate) fn parse_document(text: &str, origin: &str) -> Result<CredentialDocument, StoreError> {
    toml::from_str(text).map_err(|e| StoreError::Parse {
        origin: origin.to_string(),
        message: e.to_string(),
    })
}

/// Abstraction over credential persistence backends.
///
/// Implementations include:
/// - [`FileCredentialStore`] - TOML file on disk
/// - [`MemoryCredentialStore`] - In-memory storage for testing
/// - [`KeyringCredentialStore`] (with `keyring-store` feature) - OS keyring
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the section for `authority`.
    ///
    /// Returns an empty section if nothing has been saved yet.
    async fn load(&self, authority: &AuthorityEndpoint) -> Result<CredentialSection, StoreError>;

    /// Replace the persisted section for `authority` with `section`.
    ///
    /// All fields are written together; sections for other authorities are
    /// left untouched.
    async fn save(
        &self,
        authority: &AuthorityEndpoint,
        section: &CredentialSection,
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: CredentialStore + ?Sized> CredentialStore for std::sync::Arc<S> {
    async fn load(&self, authority: &AuthorityEndpoint) -> Result<CredentialSection, StoreError> {
        (**self).load(authority).await
    }

    async fn save(
        &self,
        authority: &AuthorityEndpoint,
        section: &CredentialSection,
    ) -> Result<(), StoreError> {
        (**self).save(authority, section).await
    }
}
