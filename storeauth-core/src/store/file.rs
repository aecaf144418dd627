//! Disk-backed credential storage.
//!
//! Credentials live in a single TOML file in the platform configuration
//! directory, one table per authority host:
//! `~/.config/storeauth/credentials.toml` on Linux.

use std::fs;
use std::path::{Path, PathBuf};

use std::io::Write;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::NamedTempFile;

use super::{CredentialDocument, CredentialSection, CredentialStore, StoreError, parse_document};
use crate::authority::AuthorityEndpoint;

const FILE_NAME: &str = "credentials.toml";

/// Credential store backed by a TOML file.
///
/// Saves rewrite the whole file through a temporary sibling followed by a
/// rename, so readers never observe a half-written document.
pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    /// Get the default path of the credentials file.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let dirs = directories::ProjectDirs::from("", "", "storeauth")
            .ok_or(StoreError::ConfigDirUnavailable)?;
        Ok(dirs.config_dir().join(FILE_NAME))
    }

    /// Open the credentials file at the default location.
    pub fn open_default() -> Result<Self, StoreError> {
        Ok(Self::new(Self::default_path()?))
    }

    /// Use the credentials file at `path`.
    ///
    /// Nothing is read or created until the first load or save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Get the storage path for this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<CredentialDocument, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => parse_document(&contents, &self.path.display().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CredentialDocument::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_document(&self, document: &CredentialDocument) -> Result<(), StoreError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let contents = toml::to_string(document)?;

        // Unique sibling so concurrent writers never share a temp file;
        // created with 0600 on unix.
        let mut tmp = NamedTempFile::with_prefix_in(".credentials", parent)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl std::fmt::Debug for FileCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCredentialStore")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, authority: &AuthorityEndpoint) -> Result<CredentialSection, StoreError> {
        let mut document = self.read_document()?;
        Ok(document.remove(authority.host()).unwrap_or_default())
    }

    async fn save(
        &self,
        authority: &AuthorityEndpoint,
        section: &CredentialSection,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();

        let mut document = self.read_document()?;
        document.insert(authority.host().to_string(), section.clone());
        self.write_document(&document)?;

        tracing::debug!(
            "Saved credentials for {} to {}",
            authority.host(),
            self.path.display()
        );
        Ok(())
    }
}
