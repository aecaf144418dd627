//! In-memory credential storage implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CredentialSection, CredentialStore, StoreError};
use crate::authority::AuthorityEndpoint;

/// In-memory credential store for testing and ephemeral sessions.
///
/// This store is not persistent; data is lost when the process exits.
///
/// # Thread Safety
///
/// This implementation uses interior mutability via `RwLock` and is
/// safe to share across threads.
pub struct MemoryCredentialStore {
    sections: RwLock<HashMap<String, CredentialSection>>,
    saves: AtomicUsize,
}

impl MemoryCredentialStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            sections: RwLock::new(HashMap::new()),
            saves: AtomicUsize::new(0),
        }
    }

    /// Create a memory store holding `section` for `authority`.
    pub fn with_section(authority: &AuthorityEndpoint, section: CredentialSection) -> Self {
        let store = Self::new();
        store
            .sections
            .write()
            .insert(authority.host().to_string(), section);
        store
    }

    /// Number of successful saves since construction.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCredentialStore")
            .field("sections_count", &self.sections.read().len())
            .finish()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, authority: &AuthorityEndpoint) -> Result<CredentialSection, StoreError> {
        Ok(self
            .sections
            .read()
            .get(authority.host())
            .cloned()
            .unwrap_or_default())
    }

    async fn save(
        &self,
        authority: &AuthorityEndpoint,
        section: &CredentialSection,
    ) -> Result<(), StoreError> {
        self.sections
            .write()
            .insert(authority.host().to_string(), section.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
