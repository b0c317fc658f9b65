// CSRF (Cross-Site Request Forgery) Protection Module
// Double-submit token validation for state-changing requests

use axum::{
    body::{Body, to_bytes},
    extract::Request,
    http::{HeaderName, Method, header},
};
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use tracing::debug;

/// Largest urlencoded body buffered while looking for the form token
const MAX_FORM_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CsrfError {
    #[error("CSRF token missing from request")]
    MissingToken,

    #[error("no CSRF token has been issued to this client")]
    NoExpectedToken,

    #[error("CSRF token does not match")]
    TokenMismatch,
}

/// Where the presented token was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Header,
    FormField,
}

/// Token presented by the client
#[derive(Debug, Clone)]
pub struct PresentedToken {
    pub value: String,
    pub source: TokenSource,
}

/// CSRF guard applied to every mutating request
#[derive(Debug, Clone)]
pub struct CsrfGuard {
    header_name: HeaderName,
    parameter_name: String,
}

impl CsrfGuard {
    pub fn new(header_name: HeaderName, parameter_name: impl Into<String>) -> Self {
        Self {
            header_name,
            parameter_name: parameter_name.into(),
        }
    }

    /// Whether requests with this method must carry a token
    pub fn requires_protection(method: &Method) -> bool {
        !matches!(
            *method,
            Method::GET | Method::HEAD | Method::TRACE | Method::OPTIONS
        )
    }

    /// Compare the presented token against the expected one.
    pub fn verify(
        &self,
        expected: Option<&str>,
        presented: Option<&PresentedToken>,
    ) -> Result<(), CsrfError> {
        let presented = presented.ok_or(CsrfError::MissingToken)?;
        let expected = expected.ok_or(CsrfError::NoExpectedToken)?;

        if !constant_time_eq(expected.as_bytes(), presented.value.as_bytes()) {
            return Err(CsrfError::TokenMismatch);
        }

        debug!("CSRF token validated ({:?})", presented.source);
        Ok(())
    }

    /// Find the token in the request header, falling back to the urlencoded form
    /// field. The body is buffered for the fallback and put back into the request.
    pub async fn extract_token(&self, req: Request) -> (Request, Option<PresentedToken>) {
        if let Some(value) = req
            .headers()
            .get(&self.header_name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            let token = PresentedToken {
                value: value.to_string(),
                source: TokenSource::Header,
            };
            return (req, Some(token));
        }

        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if !is_form {
            return (req, None);
        }

        let (parts, body) = req.into_parts();
        let bytes = match to_bytes(body, MAX_FORM_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Could not buffer form body for CSRF token: {}", e);
                return (Request::from_parts(parts, Body::empty()), None);
            }
        };

        let form: HashMap<String, String> =
            serde_urlencoded::from_bytes(&bytes).unwrap_or_default();
        let token = form
            .get(&self.parameter_name)
            .filter(|v| !v.is_empty())
            .map(|value| PresentedToken {
                value: value.clone(),
                source: TokenSource::FormField,
            });

        (Request::from_parts(parts, Body::from(bytes)), token)
    }
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_guard() -> CsrfGuard {
        CsrfGuard::new(HeaderName::from_static("x-xsrf-token"), "_csrf")
    }

    fn header_token(value: &str) -> PresentedToken {
        PresentedToken {
            value: value.to_string(),
            source: TokenSource::Header,
        }
    }

    #[test]
    fn test_safe_methods_are_not_protected() {
        assert!(!CsrfGuard::requires_protection(&Method::GET));
        assert!(!CsrfGuard::requires_protection(&Method::HEAD));
        assert!(!CsrfGuard::requires_protection(&Method::TRACE));
        assert!(!CsrfGuard::requires_protection(&Method::OPTIONS));

        assert!(CsrfGuard::requires_protection(&Method::POST));
        assert!(CsrfGuard::requires_protection(&Method::PUT));
        assert!(CsrfGuard::requires_protection(&Method::PATCH));
        assert!(CsrfGuard::requires_protection(&Method::DELETE));
    }

    #[test]
    fn test_verify_outcomes() {
        let guard = create_test_guard();

        assert!(guard.verify(Some("abc"), Some(&header_token("abc"))).is_ok());
        assert_eq!(
            guard.verify(Some("abc"), Some(&header_token("abd"))),
            Err(CsrfError::TokenMismatch)
        );
        assert_eq!(guard.verify(Some("abc"), None), Err(CsrfError::MissingToken));
        assert_eq!(
            guard.verify(None, Some(&header_token("abc"))),
            Err(CsrfError::NoExpectedToken)
        );
    }

    #[test]
    fn test_constant_time_comparison() {
        assert!(constant_time_eq(b"test", b"test"));
        assert!(!constant_time_eq(b"test", b"different"));
        assert!(!constant_time_eq(b"test", b"testing"));
    }

    #[tokio::test]
    async fn test_extract_token_from_header() {
        let guard = create_test_guard();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/orders")
            .header("X-XSRF-TOKEN", "header-token")
            .body(Body::empty())
            .unwrap();

        let (_, token) = guard.extract_token(req).await;
        let token = token.unwrap();
        assert_eq!(token.value, "header-token");
        assert_eq!(token.source, TokenSource::Header);
    }

    #[tokio::test]
    async fn test_extract_token_from_form_keeps_body() {
        let guard = create_test_guard();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/logout")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("_csrf=form-token&next=%2F"))
            .unwrap();

        let (req, token) = guard.extract_token(req).await;
        let token = token.unwrap();
        assert_eq!(token.value, "form-token");
        assert_eq!(token.source, TokenSource::FormField);

        let body = to_bytes(req.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"_csrf=form-token&next=%2F");
    }

    #[tokio::test]
    async fn test_extract_token_ignores_json_body() {
        let guard = create_test_guard();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/orders")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"_csrf":"nope"}"#))
            .unwrap();

        let (_, token) = guard.extract_token(req).await;
        assert!(token.is_none());
    }
}
