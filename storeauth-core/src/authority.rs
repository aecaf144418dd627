//! Authorization service endpoints.
//!
//! An [`AuthorityEndpoint`] pins a session to one instance of the
//! authorization service (production or staging). Its host component is the
//! key of the persisted credential section.

use std::fmt;

use url::Url;

use crate::error::ConfigError;

/// Default authorization service.
pub const DEFAULT_AUTHORITY_URL: &str = "https://login.ubuntu.com/";

/// Environment variable overriding [`DEFAULT_AUTHORITY_URL`].
pub const AUTHORITY_URL_ENV: &str = "UBUNTU_ONE_SSO_URL";

const DISCHARGE_PATH: &str = "/api/v2/tokens/discharge";
const REFRESH_PATH: &str = "/api/v2/tokens/refresh";

/// A specific authorization service instance.
///
/// # Examples
///
/// ```
/// use storeauth_core::AuthorityEndpoint;
///
/// let staging = AuthorityEndpoint::parse("https://login.staging.ubuntu.com/").unwrap();
/// assert_eq!(staging.host(), "login.staging.ubuntu.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityEndpoint {
    base: Url,
    host: String,
}

impl AuthorityEndpoint {
    /// Parse an authority from its base URL.
    ///
    /// The URL must be absolute and carry a host.
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let base = Url::parse(url).map_err(|e| ConfigError::InvalidAuthority {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let host = match (base.host_str(), base.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(ConfigError::InvalidAuthority {
                    url: url.to_string(),
                    message: "URL has no host".to_string(),
                });
            }
        };

        Ok(Self { base, host })
    }

    /// Resolve the active authority from the environment.
    ///
    /// Uses `UBUNTU_ONE_SSO_URL` when set, otherwise the production service.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_override(std::env::var(AUTHORITY_URL_ENV).ok())
    }

    /// Resolve an authority from an optional override URL.
    pub fn from_override(url: Option<String>) -> Result<Self, ConfigError> {
        match url.filter(|u| !u.trim().is_empty()) {
            Some(url) => Self::parse(&url),
            None => Self::parse(DEFAULT_AUTHORITY_URL),
        }
    }

    /// The `host[:port]` component, used as the credential section name
    /// and matched against caveat locations.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The base URL of the service.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Endpoint that exchanges a caveat id and user credentials for a discharge.
    pub fn discharge_url(&self) -> Url {
        self.endpoint(DISCHARGE_PATH)
    }

    /// Endpoint that refreshes an expired discharge.
    pub fn refresh_url(&self) -> Url {
        self.endpoint(REFRESH_PATH)
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url.set_query(None);
        url.set_fragment(None);
        url
    }
}

impl fmt::Display for AuthorityEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)
    }
}
