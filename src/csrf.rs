//! Cross-site request forgery protection for the HTML forms.
//!
//! Double-submit token: each page that renders a form issues a random token in
//! the `csrf_token` cookie and repeats it in a hidden `csrf_token` field. A
//! state-changing request is accepted only when the submitted field equals the
//! cookie, and, when the browser names the page it came from (`Origin` or
//! `Referer`), only when that page is on this host.

use actix_web::cookie::{Cookie, SameSite};
use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{FromRequest, HttpRequest, HttpResponse};
use futures::future::{Ready, ready};
use thiserror::Error;
use uuid::Uuid;

/// Cookie name and form field name.
pub const TOKEN_NAME: &str = "csrf_token";

const TOKEN_LEN: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CsrfError {
    #[error("request was sent from another site")]
    CrossOrigin,

    #[error("form token is missing")]
    MissingToken,

    #[error("form token does not match")]
    Mismatch,
}

/// The token for the current browser, taken from its cookie or freshly issued.
#[derive(Debug, Clone)]
pub struct CsrfToken {
    value: String,
    issued: bool,
}

impl CsrfToken {
    fn for_request(req: &HttpRequest) -> Self {
        match req.cookie(TOKEN_NAME) {
            Some(cookie) if is_well_formed(cookie.value()) => Self {
                value: cookie.value().to_string(),
                issued: false,
            },
            _ => Self {
                value: Uuid::new_v4().simple().to_string(),
                issued: true,
            },
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Set the cookie on `resp` if this request was the one that issued the token.
    pub fn attach(&self, mut resp: HttpResponse) -> HttpResponse {
        if self.issued {
            let cookie = Cookie::build(TOKEN_NAME, self.value.clone())
                .path("/")
                .http_only(true)
                .same_site(SameSite::Strict)
                .finish();
            if let Err(e) = resp.add_cookie(&cookie) {
                tracing::warn!(error = %e, "Failed to set form token cookie");
            }
        }
        resp
    }
}

impl FromRequest for CsrfToken {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(Self::for_request(req)))
    }
}

fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LEN && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Host (with port) named by an `Origin` or `Referer` value.
fn source_host(value: &str) -> Option<&str> {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next()?;
    (!host.is_empty()).then_some(host)
}

/// Reject requests whose `Origin` (or, failing that, `Referer`) names another host.
///
/// A request with neither header passes; the token check still applies to it.
pub fn check_origin(req: &HttpRequest) -> Result<(), CsrfError> {
    let headers = req.headers();
    let source = headers
        .get(header::ORIGIN)
        .or_else(|| headers.get(header::REFERER));
    let Some(source) = source else {
        return Ok(());
    };

    let conn = req.connection_info();
    match source.to_str().ok().and_then(source_host) {
        Some(host) if host.eq_ignore_ascii_case(conn.host()) => Ok(()),
        _ => Err(CsrfError::CrossOrigin),
    }
}

/// Full check for a state-changing request that submitted `submitted`.
pub fn verify(req: &HttpRequest, submitted: Option<&str>) -> Result<(), CsrfError> {
    check_origin(req)?;

    let submitted = submitted
        .filter(|t| !t.is_empty())
        .ok_or(CsrfError::MissingToken)?;
    let cookie = req.cookie(TOKEN_NAME).ok_or(CsrfError::MissingToken)?;

    if is_well_formed(submitted) && constant_time_eq(cookie.value(), submitted) {
        Ok(())
    } else {
        Err(CsrfError::Mismatch)
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    const TOKEN: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn issues_token_when_cookie_missing_or_malformed() {
        let req = TestRequest::default().to_http_request();
        let token = CsrfToken::for_request(&req);
        assert!(token.issued);
        assert!(is_well_formed(token.value()));

        let req = TestRequest::default()
            .cookie(Cookie::new(TOKEN_NAME, "short"))
            .to_http_request();
        assert!(CsrfToken::for_request(&req).issued);

        let req = TestRequest::default()
            .cookie(Cookie::new(TOKEN_NAME, TOKEN))
            .to_http_request();
        let token = CsrfToken::for_request(&req);
        assert!(!token.issued);
        assert_eq!(token.value(), TOKEN);
    }

    #[test]
    fn verify_requires_matching_token() {
        let req = TestRequest::post()
            .cookie(Cookie::new(TOKEN_NAME, TOKEN))
            .to_http_request();
        assert_eq!(verify(&req, Some(TOKEN)), Ok(()));
        assert_eq!(verify(&req, None), Err(CsrfError::MissingToken));
        assert_eq!(
            verify(&req, Some("fedcba9876543210fedcba9876543210")),
            Err(CsrfError::Mismatch)
        );

        let req = TestRequest::post().to_http_request();
        assert_eq!(verify(&req, Some(TOKEN)), Err(CsrfError::MissingToken));
    }

    #[test]
    fn origin_must_match_host() {
        let req = TestRequest::post()
            .insert_header((header::HOST, "clinic.local:5000"))
            .insert_header((header::ORIGIN, "http://clinic.local:5000"))
            .to_http_request();
        assert_eq!(check_origin(&req), Ok(()));

        let req = TestRequest::post()
            .insert_header((header::HOST, "clinic.local:5000"))
            .insert_header((header::ORIGIN, "https://evil.example"))
            .to_http_request();
        assert_eq!(check_origin(&req), Err(CsrfError::CrossOrigin));

        let req = TestRequest::post()
            .insert_header((header::HOST, "clinic.local:5000"))
            .insert_header((header::REFERER, "http://evil.example/add"))
            .to_http_request();
        assert_eq!(check_origin(&req), Err(CsrfError::CrossOrigin));

        let req = TestRequest::post()
            .insert_header((header::ORIGIN, "null"))
            .to_http_request();
        assert_eq!(check_origin(&req), Err(CsrfError::CrossOrigin));
    }

    #[test]
    fn source_host_strips_scheme_and_path() {
        assert_eq!(source_host("https://clinic.local/add?x=1"), Some("clinic.local"));
        assert_eq!(source_host("http://10.0.0.2:5000"), Some("10.0.0.2:5000"));
        assert_eq!(source_host("file:///tmp/form.html"), None);
    }
}
