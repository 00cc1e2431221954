use axum::http::{header, HeaderMap};

use crate::constants::SESSION_COOKIE_NAME;

/// `Set-Cookie` value carrying the session token.
pub fn session_cookie(token: &str, max_age_secs: i64, secure: bool) -> String {
    let mut cookie = format!("{}={}; HttpOnly", SESSION_COOKIE_NAME, token);
    if secure {
        cookie.push_str("; Secure; SameSite=None");
    } else {
        // browsers reject SameSite=None without Secure
        cookie.push_str("; SameSite=Lax");
    }
    cookie.push_str(&format!("; Path=/; Max-Age={}", max_age_secs.max(0)));
    cookie
}

pub fn clear_session_cookie(secure: bool) -> String {
    session_cookie("", 0, secure)
}

/// Extract a cookie value from headers
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
