use axum::http::{header, HeaderMap};
use cookie::Cookie;
use shared::domain::SessionId;

pub(crate) const SESSION_COOKIE: &str = "session";

pub(crate) fn session_cookie(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == SESSION_COOKIE)
        .map(|cookie| SessionId::new(cookie.value()))
}

/// Session token of an HTTP request: `Authorization: Bearer` first, then the
/// session cookie.
pub(crate) fn request_session(headers: &HeaderMap) -> Option<SessionId> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(SessionId::new);
    bearer.or_else(|| session_cookie(headers))
}
