//! OS keyring-backed credential storage implementation.

use async_trait::async_trait;
use keyring::Entry;

use super::{CredentialSection, CredentialStore, StoreError};
use crate::authority::AuthorityEndpoint;

/// OS keyring-backed credential store.
///
/// This store uses the platform's native keyring service:
/// - macOS: Keychain
/// - Linux: kernel keyutils
/// - Windows: Credential Manager
///
/// Each authority's section is stored as one JSON-encoded entry whose
/// service is `{service_name}/{authority host}`. Saving an empty section
/// deletes the entry.
pub struct KeyringCredentialStore {
    service_name: String,
}

impl KeyringCredentialStore {
    /// Try to create a new keyring store.
    ///
    /// Returns an error if the keyring backend is not available on this platform.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        let probe = format!("{}/__probe__", service_name);
        match Entry::new(&probe, "availability_check") {
            Ok(_) => Ok(Self {
                service_name: service_name.to_string(),
            }),
            Err(e) => Err(StoreError::Backend {
                message: format!("keyring backend not available: {}", e),
            }),
        }
    }

    fn entry(&self, authority: &AuthorityEndpoint) -> Result<Entry, StoreError> {
        let service = format!("{}/{}", self.service_name, authority.host());
        Entry::new(&service, "credentials").map_err(|e| StoreError::Backend {
            message: format!("failed to create keyring entry: {}", e),
        })
    }
}

impl std::fmt::Debug for KeyringCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringCredentialStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    async fn load(&self, authority: &AuthorityEndpoint) -> Result<CredentialSection, StoreError> {
        let entry = self.entry(authority)?;

        match entry.get_password() {
            Ok(json) => serde_json::from_str(&json).map_err(|e| StoreError::Parse {
                origin: format!("keyring entry for {}", authority.host()),
                message: e.to_string(),
            }),
            Err(keyring::Error::NoEntry) => Ok(CredentialSection::new()),
            Err(e) => Err(StoreError::Backend {
                message: format!("keyring error: {}", e),
            }),
        }
    }

    async fn save(
        &self,
        authority: &AuthorityEndpoint,
        section: &CredentialSection,
    ) -> Result<(), StoreError> {
        let entry = self.entry(authority)?;

        if section.is_empty() {
            return match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(StoreError::Backend {
                    message: format!("failed to delete keyring entry: {}", e),
                }),
            };
        }

        let json = serde_json::to_string(section).map_err(|e| StoreError::Backend {
            message: format!("failed to encode credentials: {}", e),
        })?;
        entry.set_password(&json).map_err(|e| StoreError::Backend {
            message: format!("failed to set keyring password: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests tolerate platforms without a working keyring daemon.

    #[test]
    fn test_keyring_store_creation() {
        match KeyringCredentialStore::try_new("storeauth-test") {
            Ok(store) => assert_eq!(store.service_name, "storeauth-test"),
            Err(StoreError::Backend { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[tokio::test]
    async fn test_keyring_store_round_trip_when_available() {
        let Ok(store) = KeyringCredentialStore::try_new("storeauth-test-ops") else {
            return;
        };
        let authority = AuthorityEndpoint::parse("https://keyring-test.invalid/").unwrap();

        let mut section = CredentialSection::new();
        section.set("macaroon", "root");
        section.set("unbound_discharge", "discharge");
        if let Err(e) = store.save(&authority, &section).await {
            eprintln!("Keyring set failed, skipping test: {}", e);
            return;
        }

        // A save that reported success must be visible through a fresh entry
        let reopened = KeyringCredentialStore::try_new("storeauth-test-ops").unwrap();
        let loaded = reopened.load(&authority).await.unwrap();
        assert_eq!(loaded, section, "saved section was not persisted");

        store
            .save(&authority, &CredentialSection::new())
            .await
            .unwrap();
        assert!(store.load(&authority).await.unwrap().is_empty());
    }
}
