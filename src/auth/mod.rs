//! Token verification for inbound connections

mod jwt;

#[cfg(test)]
pub(crate) use jwt::testing;
pub use jwt::{Claims, JwtVerifier};

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use std::collections::HashMap;

/// Resolves an opaque access token to a principal id
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// `None` for any invalid, expired or malformed token
    async fn verify(&self, token: &str) -> Option<String>;
}

/// Query parameter carrying the token on WebSocket upgrades
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Extract the access token from the request
///
/// Browsers cannot set headers on WebSocket upgrades, so the `token` query
/// parameter is checked first, then a `Bearer` Authorization header.
pub fn extract_token(query: &HashMap<String, String>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query.get(TOKEN_QUERY_PARAM).filter(|t| !t.is_empty()) {
        return Some(token.clone());
    }

    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                let token = token.trim();
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    None
}
