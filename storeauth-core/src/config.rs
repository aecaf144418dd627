//! Client configuration.
//!
//! Settings are read from `<config dir>/storeauth/config.toml` when it
//! exists; every field has a default. The authority URL can additionally be
//! overridden with `UBUNTU_ONE_SSO_URL`.
//!
//! ```toml
//! authority_url = "https://login.staging.ubuntu.com/"
//! timeout_secs = 10
//! connect_retries = 5
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::authority::{AUTHORITY_URL_ENV, AuthorityEndpoint, DEFAULT_AUTHORITY_URL};
use crate::error::ConfigError;
use crate::store::{FileCredentialStore, StoreError};
use crate::transport::TransportConfig;

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the authorization service.
    pub authority_url: String,

    /// Credentials file; the platform default when unset.
    pub credentials_path: Option<PathBuf>,

    pub timeout_secs: u64,

    pub connect_retries: u32,

    pub retry_backoff_ms: u64,

    /// Custom `User-Agent`; the crate default when unset.
    pub user_agent: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let transport = TransportConfig::default();
        Self {
            authority_url: DEFAULT_AUTHORITY_URL.to_string(),
            credentials_path: None,
            timeout_secs: transport.timeout.as_secs(),
            connect_retries: transport.connect_retries,
            retry_backoff_ms: transport.retry_backoff.as_millis() as u64,
            user_agent: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from the default location, then apply the
    /// environment override.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match default_config_path() {
            Some(path) if path.exists() => Self::load_from_path(&path)?,
            _ => Self::default(),
        };
        config.apply_authority_override(std::env::var(AUTHORITY_URL_ENV).ok());
        Ok(config)
    }

    /// Load configuration from a specific TOML file.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Replace the authority URL when `url` is set and non-blank.
    pub fn apply_authority_override(&mut self, url: Option<String>) {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            tracing::debug!("Authority overridden by {}: {}", AUTHORITY_URL_ENV, url);
            self.authority_url = url;
        }
    }

    pub fn authority(&self) -> Result<AuthorityEndpoint, ConfigError> {
        AuthorityEndpoint::parse(&self.authority_url)
    }

    pub fn transport(&self) -> TransportConfig {
        let defaults = TransportConfig::default();
        TransportConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            connect_retries: self.connect_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
        }
    }

    /// The file credential store this configuration points at.
    pub fn credential_store(&self) -> Result<FileCredentialStore, StoreError> {
        match &self.credentials_path {
            Some(path) => Ok(FileCredentialStore::new(path.clone())),
            None => FileCredentialStore::open_default(),
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "storeauth").map(|d| d.config_dir().join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.authority().unwrap().host(), "login.ubuntu.com");

        let transport = config.transport();
        assert_eq!(transport.timeout, Duration::from_secs(30));
        assert_eq!(transport.connect_retries, 3);
        assert!(transport.user_agent.starts_with("storeauth/"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            "authority_url = \"https://login.staging.ubuntu.com/\"\ntimeout_secs = 5\n",
        )
        .unwrap();

        let config = ClientConfig::load_from_path(&path).unwrap();
        assert_eq!(config.authority().unwrap().host(), "login.staging.ubuntu.com");
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.connect_retries, 3);
    }

    #[test]
    fn test_invalid_file_is_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "timeout_secs = \"soon\"").unwrap();

        assert!(matches!(
            ClientConfig::load_from_path(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_authority_override() {
        let mut config = ClientConfig::default();
        config.apply_authority_override(Some(String::new()));
        assert_eq!(config.authority_url, DEFAULT_AUTHORITY_URL);

        config.apply_authority_override(Some("http://localhost:8000/".to_string()));
        assert_eq!(config.authority().unwrap().host(), "localhost:8000");
    }

    #[test]
    fn test_explicit_credentials_path() {
        let config = ClientConfig {
            credentials_path: Some(PathBuf::from("/tmp/creds.toml")),
            ..ClientConfig::default()
        };
        let store = config.credential_store().unwrap();
        assert_eq!(store.path(), Path::new("/tmp/creds.toml"));
    }
}
