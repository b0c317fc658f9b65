use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::Response;
use tracing::warn;

use super::config::SecurityConfig;

/// Read a named cookie from the request's `Cookie` headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .find_map(|cookie| {
            let (cookie_name, value) = cookie.trim().split_once('=')?;
            (cookie_name == name && !value.is_empty()).then(|| value.to_string())
        })
}

/// Builds `Set-Cookie` values for the session and CSRF cookies
#[derive(Debug, Clone)]
pub struct CookieFactory {
    session_name: String,
    csrf_name: String,
    path: String,
    secure: bool,
    same_site: &'static str,
    csrf_http_only: bool,
}

impl CookieFactory {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            session_name: config.cookie.session_cookie_name.clone(),
            csrf_name: config.cookie.csrf_cookie_name.clone(),
            path: config.cookie.path.clone(),
            secure: config.cookie.secure,
            same_site: config.cookie.same_site.as_str(),
            csrf_http_only: config.csrf_cookie_http_only,
        }
    }

    pub fn session_cookie_name(&self) -> &str {
        &self.session_name
    }

    pub fn csrf_cookie_name(&self) -> &str {
        &self.csrf_name
    }

    /// Session id cookie, always HttpOnly
    pub fn session(&self, session_id: &str) -> String {
        format!(
            "{}={}; Path={}; HttpOnly; SameSite={}{}",
            self.session_name,
            session_id,
            self.path,
            self.same_site,
            if self.secure { "; Secure" } else { "" }
        )
    }

    /// CSRF token cookie, readable by client script unless configured otherwise
    pub fn csrf(&self, token: &str) -> String {
        format!(
            "{}={}; Path={}; SameSite={}{}{}",
            self.csrf_name,
            token,
            self.path,
            self.same_site,
            if self.csrf_http_only { "; HttpOnly" } else { "" },
            if self.secure { "; Secure" } else { "" }
        )
    }

    /// Deletion directive for any cookie name
    pub fn clear(&self, name: &str) -> String {
        format!(
            "{}=; Path={}; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
            name, self.path
        )
    }
}

/// Append a `Set-Cookie` header to a response
pub fn append_set_cookie(response: &mut Response, cookie: &str) {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => warn!("Dropping unencodable Set-Cookie value: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::config::SecurityConfig;

    #[test]
    fn test_read_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; JSESSIONID=abc123; XSRF-TOKEN=tok"),
        );

        assert_eq!(read_cookie(&headers, "JSESSIONID"), Some("abc123".to_string()));
        assert_eq!(read_cookie(&headers, "XSRF-TOKEN"), Some("tok".to_string()));
        assert_eq!(read_cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_read_cookie_across_headers_and_empty_values() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("JSESSIONID="));
        headers.append(header::COOKIE, HeaderValue::from_static("XSRF-TOKEN=second"));

        assert_eq!(read_cookie(&headers, "JSESSIONID"), None);
        assert_eq!(read_cookie(&headers, "XSRF-TOKEN"), Some("second".to_string()));
    }

    #[test]
    fn test_session_cookie_is_http_only() {
        let factory = CookieFactory::new(&SecurityConfig::default());
        let cookie = factory.session("sid");
        assert_eq!(cookie, "JSESSIONID=sid; Path=/; HttpOnly; SameSite=Lax");
    }

    #[test]
    fn test_csrf_cookie_is_readable_by_script() {
        let factory = CookieFactory::new(&SecurityConfig::default());
        let cookie = factory.csrf("tok");
        assert_eq!(cookie, "XSRF-TOKEN=tok; Path=/; SameSite=Lax");
        assert!(!cookie.contains("HttpOnly"));
    }

    #[test]
    fn test_secure_flag_and_clear() {
        let mut config = SecurityConfig::default();
        config.cookie.secure = true;
        let factory = CookieFactory::new(&config);

        assert!(factory.session("sid").ends_with("; Secure"));
        assert!(factory.csrf("tok").ends_with("; Secure"));
        assert_eq!(
            factory.clear("JSESSIONID"),
            "JSESSIONID=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT"
        );
    }
}
