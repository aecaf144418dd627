//! Authenticated sessions with transparent discharge refresh.
//!
//! [`AuthSession`] owns the credential for one [`AuthorityEndpoint`]. It
//! attaches the macaroon `Authorization` header to outgoing requests and,
//! when the server answers with a refresh challenge, refreshes the discharge,
//! persists it, and retries the request exactly once.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use storeauth_core::{AuthSession, ClientConfig, LoginRequest, ReqwestTransport};
//! use url::Url;
//!
//! let config = ClientConfig::load()?;
//! let session = AuthSession::open(
//!     config.authority()?,
//!     config.credential_store()?,
//!     ReqwestTransport::with_config(config.transport())?,
//! )
//! .await?;
//!
//! if !session.is_authenticated() {
//!     let root = String::from("MDAy..."); // issued by the store
//!     session
//!         .login(LoginRequest::new("dev@example.com", "password", root))
//!         .await?;
//! }
//!
//! let response = session
//!     .get(Url::parse("https://dashboard.snapcraft.io/dev/api/account")?)
//!     .await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

use std::io::Write;

use parking_lot::RwLock;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use url::Url;

use crate::authority::AuthorityEndpoint;
use crate::challenge::{MacaroonNeedsRefresh, RefreshChallenge};
use crate::error::AuthError;
use crate::macaroon;
use crate::secret::Secret;
use crate::store::{CredentialSection, CredentialStore, EMAIL, MACAROON, UNBOUND_DISCHARGE};
use crate::transport::{HttpRequest, HttpResponse, Method, Transport};

const TWO_FACTOR_REQUIRED: &str = "twofactor-required";

/// Credentials for [`AuthSession::login`].
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: Secret,
    pub otp: Option<Secret>,
    /// Serialized root macaroon to discharge.
    pub macaroon: String,
}

impl LoginRequest {
    pub fn new(
        email: impl Into<String>,
        password: impl Into<Secret>,
        macaroon: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            otp: None,
            macaroon: macaroon.into(),
        }
    }

    /// Supply a one-time password after [`AuthError::TwoFactorRequired`].
    pub fn with_otp(mut self, otp: impl Into<Secret>) -> Self {
        self.otp = Some(otp.into());
        self
    }
}

/// Per-request options for [`AuthSession::request`].
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    /// Attach the session's `Authorization` header. Defaults to `true`.
    pub authenticate: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            headers: HeaderMap::new(),
            body: None,
            authenticate: true,
        }
    }
}

impl RequestOptions {
    /// Options for a request that must not carry credentials.
    pub fn anonymous() -> Self {
        Self {
            authenticate: false,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

#[derive(Serialize)]
struct DischargeBody<'a> {
    email: &'a str,
    password: &'a str,
    caveat_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    otp: Option<&'a str>,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    discharge_macaroon: &'a str,
}

#[derive(Deserialize)]
struct DischargeResponse {
    discharge_macaroon: String,
}

#[derive(Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error_list: Vec<ErrorEntry>,
}

#[derive(Deserialize)]
struct ErrorEntry {
    #[serde(default)]
    code: Option<String>,
}

struct SessionState {
    section: CredentialSection,
    auth_header: Option<String>,
    /// Bumped on every credential change.
    generation: u64,
}

/// A session against one authorization service.
///
/// Safe to share between tasks; concurrent refresh challenges result in a
/// single refresh exchange.
pub struct AuthSession<S: CredentialStore, T: Transport> {
    authority: AuthorityEndpoint,
    store: S,
    transport: T,
    challenge: Box<dyn RefreshChallenge>,
    state: RwLock<SessionState>,
    refresh_lock: Mutex<()>,
}

impl<S: CredentialStore, T: Transport> AuthSession<S, T> {
    /// Open a session, hydrating credentials from `store`.
    ///
    /// Incomplete or malformed persisted credentials leave the session
    /// unauthenticated. Store read errors are returned.
    pub async fn open(authority: AuthorityEndpoint, store: S, transport: T) -> Result<Self, AuthError> {
        let section = store.load(&authority).await?;

        let auth_header = match header_for(&section) {
            Ok(header) => Some(header),
            Err(e) => {
                if !section.is_empty() {
                    tracing::warn!(
                        "Ignoring stored credentials for {}: {}",
                        authority.host(),
                        e
                    );
                }
                None
            }
        };

        tracing::debug!(
            "Opened session for {} (authenticated: {})",
            authority.host(),
            auth_header.is_some()
        );

        Ok(Self {
            authority,
            store,
            transport,
            challenge: Box::new(MacaroonNeedsRefresh),
            state: RwLock::new(SessionState {
                section,
                auth_header,
                generation: 0,
            }),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Replace the refresh challenge predicate.
    pub fn with_challenge(mut self, challenge: impl RefreshChallenge + 'static) -> Self {
        self.challenge = Box::new(challenge);
        self
    }

    pub fn authority(&self) -> &AuthorityEndpoint {
        &self.authority
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().auth_header.is_some()
    }

    /// The current `Authorization` header value, if authenticated.
    pub fn auth_header(&self) -> Option<String> {
        self.state.read().auth_header.clone()
    }

    /// Email recorded at login.
    pub fn email(&self) -> Option<String> {
        self.state.read().section.email().map(str::to_string)
    }

    /// Discharge `request.macaroon` with the authorization service and store
    /// the result.
    ///
    /// Any previously stored credential is replaced, never merged.
    pub async fn login(&self, request: LoginRequest) -> Result<(), AuthError> {
        let caveat_id = macaroon::extract_caveat_id(&request.macaroon, self.authority.host())?;
        let unbound = self.discharge(&request, &caveat_id).await?;

        let mut section = CredentialSection::new();
        section.set(MACAROON, request.macaroon.as_str());
        section.set(UNBOUND_DISCHARGE, unbound);
        section.set(EMAIL, request.email.as_str());
        let header = header_for(&section)?;

        let _guard = self.refresh_lock.lock().await;
        self.install(section.clone(), Some(header));
        self.store.save(&self.authority, &section).await?;

        tracing::info!("Logged in to {} as {}", self.authority.host(), request.email);
        Ok(())
    }

    /// Adopt credentials previously written by [`export`](Self::export).
    ///
    /// Accepts plain or encoded exports. The imported credential replaces
    /// the current one and is persisted.
    pub async fn login_with_exported(&self, exported: &str) -> Result<(), AuthError> {
        let section = CredentialSection::import(exported, &self.authority)?;
        let header = header_for(&section)?;

        let _guard = self.refresh_lock.lock().await;
        self.install(section.clone(), Some(header));
        self.store.save(&self.authority, &section).await?;

        tracing::info!("Imported credentials for {}", self.authority.host());
        Ok(())
    }

    /// Forget the credential and persist the empty section.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let section = CredentialSection::new();

        let _guard = self.refresh_lock.lock().await;
        self.install(section.clone(), None);
        self.store.save(&self.authority, &section).await?;

        tracing::info!("Logged out of {}", self.authority.host());
        Ok(())
    }

    /// Write the current credential to `writer` in the store's section format.
    pub fn export<W: Write>(&self, writer: &mut W, encode: bool) -> Result<(), AuthError> {
        let section = self.state.read().section.clone();
        section.export(writer, &self.authority, encode)?;
        Ok(())
    }

    pub async fn get(&self, url: Url) -> Result<HttpResponse, AuthError> {
        self.request(Method::GET, url, RequestOptions::default())
            .await
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<HttpResponse, AuthError> {
        let request = HttpRequest::new(Method::POST, url).with_json(body)?;
        let options = RequestOptions {
            headers: request.headers,
            body: request.body,
            authenticate: true,
        };
        self.request(request.method, request.url, options).await
    }

    /// Send a request, refreshing the discharge and retrying once if the
    /// server challenges it.
    ///
    /// A retried request that is challenged again is returned as-is.
    /// Requests made with `authenticate: false` carry no `Authorization`
    /// header and are never retried.
    pub async fn request(
        &self,
        method: Method,
        url: Url,
        options: RequestOptions,
    ) -> Result<HttpResponse, AuthError> {
        let RequestOptions {
            headers,
            body,
            authenticate,
        } = options;

        let mut request = HttpRequest {
            method,
            url,
            headers,
            body,
        };
        // A caller-supplied Authorization must not leak through either path.
        request.headers.remove(AUTHORIZATION);

        if !authenticate {
            return Ok(self.transport.execute(request).await?);
        }

        let (header, generation) = self.snapshot();
        if let Some(header) = header {
            request.headers.insert(AUTHORIZATION, header_value(&header)?);
        }

        let response = self.transport.execute(request.clone()).await?;
        if !self.challenge.is_refresh_challenge(&response) {
            return Ok(response);
        }

        tracing::debug!("Refresh challenge for {} {}", request.method, request.url);
        let header = self.refresh_after_challenge(generation).await?;
        request
            .headers
            .insert(AUTHORIZATION, header_value(&header)?);

        let response = self.transport.execute(request.clone()).await?;
        if self.challenge.is_refresh_challenge(&response) {
            tracing::warn!(
                "Still challenged after refresh for {} {}; not retrying again",
                request.method,
                request.url
            );
        }
        Ok(response)
    }

    fn snapshot(&self) -> (Option<String>, u64) {
        let state = self.state.read();
        (state.auth_header.clone(), state.generation)
    }

    fn install(&self, section: CredentialSection, auth_header: Option<String>) {
        let mut state = self.state.write();
        state.section = section;
        state.auth_header = auth_header;
        state.generation += 1;
    }

    /// Refresh the discharge unless another caller already did so after
    /// `seen_generation`, returning the header to retry with.
    async fn refresh_after_challenge(&self, seen_generation: u64) -> Result<String, AuthError> {
        let _guard = self.refresh_lock.lock().await;

        let (mut section, current_header, generation) = {
            let state = self.state.read();
            (
                state.section.clone(),
                state.auth_header.clone(),
                state.generation,
            )
        };

        if generation != seen_generation {
            if let Some(header) = current_header {
                tracing::debug!("Discharge already refreshed by a concurrent request");
                return Ok(header);
            }
        }

        let unbound = section
            .unbound_discharge()
            .ok_or_else(|| AuthError::invalid("no discharge macaroon to refresh"))?
            .to_string();

        let refreshed = self.refresh_discharge(&unbound).await?;
        section.set(UNBOUND_DISCHARGE, refreshed);
        let header = header_for(&section)?;

        self.install(section.clone(), Some(header.clone()));
        self.store.save(&self.authority, &section).await?;

        tracing::info!("Refreshed discharge for {}", self.authority.host());
        Ok(header)
    }

    async fn discharge(&self, login: &LoginRequest, caveat_id: &str) -> Result<String, AuthError> {
        let body = DischargeBody {
            email: &login.email,
            password: login.password.expose(),
            caveat_id,
            otp: login.otp.as_ref().map(Secret::expose),
        };
        let request = HttpRequest::new(Method::POST, self.authority.discharge_url())
            .with_json(&body)?;

        let response = self.transport.execute(request).await?;
        if response.is_success() {
            return discharge_from(&response);
        }

        let errors: ErrorResponse = response.json().unwrap_or_default();
        if response.status == StatusCode::UNAUTHORIZED
            && errors
                .error_list
                .iter()
                .any(|e| e.code.as_deref() == Some(TWO_FACTOR_REQUIRED))
        {
            tracing::debug!("Discharge for {} requires two-factor", login.email);
            return Err(AuthError::TwoFactorRequired);
        }

        Err(failed(&response))
    }

    async fn refresh_discharge(&self, unbound: &str) -> Result<String, AuthError> {
        let request = HttpRequest::new(Method::POST, self.authority.refresh_url())
            .with_json(&RefreshBody {
                discharge_macaroon: unbound,
            })?;

        let response = self.transport.execute(request).await?;
        if response.is_success() {
            discharge_from(&response)
        } else {
            Err(failed(&response))
        }
    }
}

/// Build the `Authorization` header for a stored section.
fn header_for(section: &CredentialSection) -> Result<String, AuthError> {
    let root = section
        .root()
        .ok_or_else(|| AuthError::invalid("root macaroon not in the credential store"))?;
    let unbound = section
        .unbound_discharge()
        .ok_or_else(|| AuthError::invalid("unbound discharge not in the credential store"))?;
    macaroon::authorization_header(root, unbound)
}

fn header_value(header: &str) -> Result<HeaderValue, AuthError> {
    let mut value = HeaderValue::from_str(header)
        .map_err(|_| AuthError::invalid("authorization header is not valid ASCII"))?;
    value.set_sensitive(true);
    Ok(value)
}

fn discharge_from(response: &HttpResponse) -> Result<String, AuthError> {
    response
        .json::<DischargeResponse>()
        .map(|r| r.discharge_macaroon)
        .map_err(|_| failed(response))
}

fn failed(response: &HttpResponse) -> AuthError {
    AuthError::AuthenticationFailed {
        status: response.status.as_u16(),
        body: response.text(),
    }
}
