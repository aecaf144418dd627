//! Integration tests for the login lifecycle.
//!
//! These tests verify the end-to-end behavior of credential management:
//! - Discharging a root macaroon at login
//! - Two-factor and generic authentication failures
//! - Logout leaving the persisted section empty
//! - Exporting and importing credentials between sessions
//! - Error handling for storage failures

use async_trait::async_trait;
use storeauth_core::{
    AuthError, AuthSession, AuthorityEndpoint, CredentialSection, CredentialStore,
    FileCredentialStore, LoginRequest, ReqwestTransport, StoreError,
    challenge::NEEDS_REFRESH,
    macaroon::{self, Macaroon},
    transport::StatusCode,
};
use tempfile::TempDir;
use url::Url;
use wiremock::{
    matchers::{body_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn root_for(authority: &AuthorityEndpoint) -> String {
    Macaroon::new("dashboard.snapcraft.io", "root-id", b"root-key")
        .add_third_party_caveat(authority.host(), "abc", b"vid".to_vec())
        .serialize()
        .unwrap()
}

fn discharge(authority: &AuthorityEndpoint, id: &str) -> String {
    Macaroon::new(authority.host(), id, b"discharge-key")
        .serialize()
        .unwrap()
}

/// Helper to open a session backed by a credentials file in a temp dir.
async fn file_session(
    server: &MockServer,
) -> (
    AuthSession<FileCredentialStore, ReqwestTransport>,
    AuthorityEndpoint,
    TempDir,
) {
    let temp_dir = TempDir::new().unwrap();
    let authority = AuthorityEndpoint::parse(&server.uri()).unwrap();
    let store = FileCredentialStore::new(temp_dir.path().join("credentials.toml"));
    let session = AuthSession::open(authority.clone(), store, ReqwestTransport::new().unwrap())
        .await
        .unwrap();
    (session, authority, temp_dir)
}

async fn mount_discharge(server: &MockServer, authority: &AuthorityEndpoint, id: &str) {
    Mock::given(method("POST"))
        .and(path("/api/v2/tokens/discharge"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "discharge_macaroon": discharge(authority, id),
        })))
        .mount(server)
        .await;
}

/// Store whose saves always fail.
struct ReadOnlyStore;

#[async_trait]
impl CredentialStore for ReadOnlyStore {
    async fn load(&self, _authority: &AuthorityEndpoint) -> Result<CredentialSection, StoreError> {
        Ok(CredentialSection::new())
    }

    async fn save(
        &self,
        _authority: &AuthorityEndpoint,
        _section: &CredentialSection,
    ) -> Result<(), StoreError> {
        Err(StoreError::Backend {
            message: "read-only".to_string(),
        })
    }
}

#[tokio::test]
async fn test_login_refresh_scenario() {
    let server = MockServer::start().await;
    let (session, authority, _temp) = file_session(&server).await;
    let root = root_for(&authority);

    Mock::given(method("POST"))
        .and(path("/api/v2/tokens/discharge"))
        .and(body_json(serde_json::json!({
            "email": "dev@example.com",
            "password": "hunter2",
            "caveat_id": "abc",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "discharge_macaroon": discharge(&authority, "D1"),
        })))
        .expect(1)
        .mount(&server)
        .await;

    session
        .login(LoginRequest::new("dev@example.com", "hunter2", root.clone()))
        .await
        .unwrap();

    let expected_d1 = macaroon::authorization_header(&root, &discharge(&authority, "D1")).unwrap();
    assert!(session.is_authenticated());
    assert_eq!(session.auth_header().unwrap(), expected_d1);
    assert!(expected_d1.starts_with(&format!("Macaroon root={}, discharge=", root)));

    Mock::given(method("GET"))
        .and(path("/dev/api/account"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", NEEDS_REFRESH))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v2/tokens/refresh"))
        .and(body_json(serde_json::json!({
            "discharge_macaroon": discharge(&authority, "D1"),
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "discharge_macaroon": discharge(&authority, "D2"),
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/dev/api/account"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/dev/api/account", server.uri())).unwrap();
    let response = session.get(url).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);

    let expected_d2 = macaroon::authorization_header(&root, &discharge(&authority, "D2")).unwrap();
    assert_eq!(session.auth_header().unwrap(), expected_d2);

    let received = server.received_requests().await.unwrap();
    let retried = received.last().unwrap();
    assert_eq!(
        retried.headers.get("authorization").unwrap().to_str().unwrap(),
        expected_d2
    );
}

#[tokio::test]
async fn test_login_then_logout_leaves_section_empty() {
    let server = MockServer::start().await;
    let (session, authority, temp) = file_session(&server).await;
    mount_discharge(&server, &authority, "D1").await;

    session
        .login(LoginRequest::new("dev@example.com", "pw", root_for(&authority)))
        .await
        .unwrap();

    let store = FileCredentialStore::new(temp.path().join("credentials.toml"));
    assert_eq!(
        store.load(&authority).await.unwrap().email(),
        Some("dev@example.com")
    );

    session.logout().await.unwrap();

    assert!(!session.is_authenticated());
    assert!(store.load(&authority).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_two_factor_required() {
    let server = MockServer::start().await;
    let (session, authority, _temp) = file_session(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/v2/tokens/discharge"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error_list": [
                {"code": "twofactor-required", "message": "2-factor authentication required."}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = session
        .login(LoginRequest::new("dev@example.com", "pw", root_for(&authority)))
        .await;

    assert!(matches!(result, Err(AuthError::TwoFactorRequired)));
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn test_otp_retry_after_two_factor() {
    let server = MockServer::start().await;
    let (session, authority, _temp) = file_session(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/v2/tokens/discharge"))
        .and(body_json(serde_json::json!({
            "email": "dev@example.com",
            "password": "pw",
            "caveat_id": "abc",
            "otp": "424242",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "discharge_macaroon": discharge(&authority, "D1"),
        })))
        .expect(1)
        .mount(&server)
        .await;

    session
        .login(LoginRequest::new("dev@example.com", "pw", root_for(&authority)).with_otp("424242"))
        .await
        .unwrap();

    assert!(session.is_authenticated());
}

#[tokio::test]
async fn test_bad_password_is_authentication_failure() {
    let server = MockServer::start().await;
    let (session, authority, _temp) = file_session(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/v2/tokens/discharge"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error_list": [{"code": "invalid-credentials"}]
        })))
        .mount(&server)
        .await;

    let result = session
        .login(LoginRequest::new("dev@example.com", "wrong", root_for(&authority)))
        .await;

    match result {
        Err(AuthError::AuthenticationFailed { status, body }) => {
            assert_eq!(status, 401);
            assert!(body.contains("invalid-credentials"));
        }
        other => panic!("expected AuthenticationFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_non_json_error_is_authentication_failure() {
    let server = MockServer::start().await;
    let (session, authority, _temp) = file_session(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/v2/tokens/discharge"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let result = session
        .login(LoginRequest::new("dev@example.com", "pw", root_for(&authority)))
        .await;

    assert!(matches!(
        result,
        Err(AuthError::AuthenticationFailed { status: 503, .. })
    ));
}

#[tokio::test]
async fn test_export_and_import_between_sessions() {
    let server = MockServer::start().await;
    let (session, authority, _temp) = file_session(&server).await;
    mount_discharge(&server, &authority, "D1").await;

    session
        .login(LoginRequest::new("dev@example.com", "pw", root_for(&authority)))
        .await
        .unwrap();

    for encode in [false, true] {
        let mut exported = Vec::new();
        session.export(&mut exported, encode).unwrap();
        let exported = String::from_utf8(exported).unwrap();
        assert_eq!(exported.contains("dev@example.com"), !encode);

        let (other, _, _other_temp) = file_session(&server).await;
        assert!(!other.is_authenticated());

        other.login_with_exported(&exported).await.unwrap();
        assert_eq!(other.auth_header(), session.auth_header());
        assert_eq!(other.email().as_deref(), Some("dev@example.com"));
    }
}

#[tokio::test]
async fn test_import_without_credentials_is_invalid() {
    let server = MockServer::start().await;
    let (session, _authority, _temp) = file_session(&server).await;

    let result = session.login_with_exported("[\"elsewhere.example\"]\n").await;
    assert!(matches!(result, Err(AuthError::InvalidCredential { .. })));
}

#[tokio::test]
async fn test_persistence_failure_is_reported() {
    let server = MockServer::start().await;
    let authority = AuthorityEndpoint::parse(&server.uri()).unwrap();
    mount_discharge(&server, &authority, "D1").await;

    let session = AuthSession::open(authority.clone(), ReadOnlyStore, ReqwestTransport::new().unwrap())
        .await
        .unwrap();

    let result = session
        .login(LoginRequest::new("dev@example.com", "pw", root_for(&authority)))
        .await;

    assert!(matches!(
        result,
        Err(AuthError::Persistence(StoreError::Backend { .. }))
    ));
}

#[tokio::test]
async fn test_corrupt_credentials_file_fails_open() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("credentials.toml");
    std::fs::write(&path, "macaroon = [unterminated").unwrap();

    let authority = AuthorityEndpoint::parse(&server.uri()).unwrap();
    let result = AuthSession::open(
        authority,
        FileCredentialStore::new(path),
        ReqwestTransport::new().unwrap(),
    )
    .await;

    assert!(matches!(
        result,
        Err(AuthError::Persistence(StoreError::Parse { .. }))
    ));
}
