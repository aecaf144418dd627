//! Detection of "refresh your discharge" responses.

use reqwest::StatusCode;
use reqwest::header::WWW_AUTHENTICATE;

use crate::transport::HttpResponse;

/// `WWW-Authenticate` value sent when the discharge has expired.
pub const NEEDS_REFRESH: &str = "Macaroon needs_refresh=1";

/// Decides whether a response asks the client to refresh its credential.
///
/// [`AuthSession`](crate::AuthSession) refreshes and retries once when this
/// returns `true`.
pub trait RefreshChallenge: Send + Sync {
    fn is_refresh_challenge(&self, response: &HttpResponse) -> bool;
}

/// Matches `401 Unauthorized` with `WWW-Authenticate: Macaroon needs_refresh=1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MacaroonNeedsRefresh;

impl RefreshChallenge for MacaroonNeedsRefresh {
    fn is_refresh_challenge(&self, response: &HttpResponse) -> bool {
        response.status == StatusCode::UNAUTHORIZED
            && response
                .headers
                .get(WWW_AUTHENTICATE)
                .is_some_and(|v| v.as_bytes() == NEEDS_REFRESH.as_bytes())
    }
}

impl<F> RefreshChallenge for F
where
    F: Fn(&HttpResponse) -> bool + Send + Sync,
{
    fn is_refresh_challenge(&self, response: &HttpResponse) -> bool {
        self(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn response(status: StatusCode, www_authenticate: Option<&'static str>) -> HttpResponse {
        let mut response = HttpResponse::new(status);
        if let Some(value) = www_authenticate {
            response
                .headers
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static(value));
        }
        response
    }

    #[test]
    fn test_exact_challenge_matches() {
        let challenge = MacaroonNeedsRefresh;
        assert!(challenge.is_refresh_challenge(&response(
            StatusCode::UNAUTHORIZED,
            Some(NEEDS_REFRESH)
        )));
    }

    #[test]
    fn test_other_responses_do_not_match() {
        let challenge = MacaroonNeedsRefresh;
        assert!(!challenge.is_refresh_challenge(&response(StatusCode::UNAUTHORIZED, None)));
        assert!(!challenge.is_refresh_challenge(&response(
            StatusCode::FORBIDDEN,
            Some(NEEDS_REFRESH)
        )));
        assert!(!challenge.is_refresh_challenge(&response(
            StatusCode::UNAUTHORIZED,
            Some("Macaroon needs_refresh=0")
        )));
        assert!(!challenge.is_refresh_challenge(&response(
            StatusCode::UNAUTHORIZED,
            Some("macaroon needs_refresh=1")
        )));
    }

    #[test]
    fn test_closure_predicate() {
        let challenge = |r: &HttpResponse| r.status == StatusCode::PROXY_AUTHENTICATION_REQUIRED;
        assert!(challenge.is_refresh_challenge(&response(
            StatusCode::PROXY_AUTHENTICATION_REQUIRED,
            None
        )));
    }
}
