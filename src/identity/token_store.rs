//! Session cookie handling. The cookie holds the opaque session token and nothing else.

use axum::http::{header, HeaderMap, HeaderValue};

use super::session::SessionToken;
use crate::error::{AppError, AppResult};

pub const SESSION_COOKIE: &str = "fulfillment_session";

const EXPIRED: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

#[derive(Debug, Clone, Copy)]
pub struct TokenStore {
    pub secure: bool,
}

impl TokenStore {
    pub fn new(secure: bool) -> Self {
        Self { secure }
    }

    /// Token from the request's `Cookie` header(s). An empty value counts as absent.
    pub fn read(&self, headers: &HeaderMap) -> Option<SessionToken> {
        parse_cookie(headers, SESSION_COOKIE).filter(|v| !v.is_empty())
    }

    /// Session cookie (no expiry) carrying `token`.
    pub fn write(&self, token: &str) -> AppResult<HeaderValue> {
        if token.is_empty() || !token.bytes().all(is_cookie_octet) {
            return Err(AppError::internal("bad_token", "session token is not a valid cookie value"));
        }
        self.header(&format!("{}={}", SESSION_COOKIE, token))
    }

    /// Empty value with an expiry in the past.
    pub fn clear(&self) -> HeaderValue {
        // Built from constants only, so the value is always a valid header.
        HeaderValue::from_str(&format!("{}=; Expires={}; {}", SESSION_COOKIE, EXPIRED, self.attributes()))
            .unwrap_or_else(|_| HeaderValue::from_static("fulfillment_session=; Max-Age=0; Path=/"))
    }

    fn header(&self, pair: &str) -> AppResult<HeaderValue> {
        HeaderValue::from_str(&format!("{}; {}", pair, self.attributes()))
            .map_err(|e| AppError::internal("bad_cookie".to_string(), e.to_string()))
    }

    fn attributes(&self) -> &'static str {
        if self.secure {
            "Path=/; HttpOnly; Secure; SameSite=Strict"
        } else {
            "Path=/; HttpOnly; SameSite=Strict"
        }
    }
}

fn is_cookie_octet(b: u8) -> bool {
    matches!(b, 0x21 | 0x23..=0x2B | 0x2D..=0x3A | 0x3C..=0x5B | 0x5D..=0x7E)
}

pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for cookie in headers.get_all(header::COOKIE) {
        let Ok(s) = cookie.to_str() else { continue };
        for part in s.split(';') {
            let p = part.trim();
            if let Some((k, v)) = p.split_once('=') {
                if k.trim() == name {
                    return Some(v.trim().to_string());
                }
            }
        }
    }
    None
}
