use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use tracing::warn;

use super::AppState;

pub const AUTH_COOKIE: &str = "auth_token";

/// Email claim of the authenticated user, inserted into request extensions
/// by [`auth_cookie`].
#[derive(Debug, Clone)]
pub struct AuthedEmail(pub String);

/// Extract a named cookie's value from the Cookie header.
pub fn cookie_value(headers: &axum::http::HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').map(str::trim).find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

/// Session cookie bounded by the token's own expiry.
pub fn session_cookie(token: &str, expires: DateTime<Utc>) -> HeaderValue {
    let value = format!(
        "{}={}; Path=/; Expires={}; HttpOnly; Secure; SameSite=Strict",
        AUTH_COOKIE,
        token,
        expires.format("%a, %d %b %Y %H:%M:%S GMT")
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

pub fn clear_cookie() -> HeaderValue {
    HeaderValue::from_static(
        "auth_token=; Path=/; Max-Age=0; HttpOnly; Secure; SameSite=Strict",
    )
}

/// Requests carrying a valid session cookie get the validated email claim
/// inserted into request extensions; anonymous requests pass through. An
/// invalid cookie is cleared and rejected.
pub async fn auth_cookie(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = cookie_value(request.headers(), AUTH_COOKIE) else {
        return next.run(request).await;
    };

    let claims = match state
        .validator
        .validate(&token, &state.auth.oidc_audience)
        .await
    {
        Ok(claims) => claims,
        Err(err) => {
            warn!("invalid auth token cookie: {}", err);
            return invalid_cookie_response();
        }
    };

    let Some(email) = claims.email.filter(|e| !e.is_empty()) else {
        warn!("auth token cookie has no email claim");
        return invalid_cookie_response();
    };

    request.extensions_mut().insert(AuthedEmail(email));
    next.run(request).await
}

fn invalid_cookie_response() -> Response {
    let mut response = (StatusCode::BAD_REQUEST, "invalid cookies").into_response();
    response
        .headers_mut()
        .append(header::SET_COOKIE, clear_cookie());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn finds_the_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("other=1; auth_token=abc123; last=x"),
        );
        assert_eq!(cookie_value(&headers, AUTH_COOKIE), Some("abc123".into()));
    }

    #[test]
    fn missing_cookie_is_none() {
        let headers = HeaderMap::new();
        assert_eq!(cookie_value(&headers, AUTH_COOKIE), None);

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("other=1"));
        assert_eq!(cookie_value(&headers, AUTH_COOKIE), None);
    }

    #[test]
    fn session_cookie_is_scoped_and_guarded() {
        let expires = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let value = session_cookie("tok", expires);
        let s = value.to_str().unwrap();
        assert!(s.starts_with("auth_token=tok"));
        assert!(s.contains("HttpOnly"));
        assert!(s.contains("Secure"));
        assert!(s.contains("SameSite=Strict"));
        assert!(s.contains("01 Mar 2026 10:00:00 GMT"));
    }
}
