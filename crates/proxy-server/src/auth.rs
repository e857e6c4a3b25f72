//! Shared-secret authentication.

use axum::http::{header, HeaderMap};
use proxy_core::{ProxyError, Result};

/// Check the `Authorization` header against the server token.
///
/// Both `Bearer <token>` and the bare token are accepted. The comparison is
/// an exact byte match.
pub fn authorize(headers: &HeaderMap, token: &str) -> Result<()> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ProxyError::Unauthorized)?;

    let presented = value.strip_prefix("Bearer ").unwrap_or(value);
    if !token.is_empty() && presented.as_bytes() == token.as_bytes() {
        Ok(())
    } else {
        Err(ProxyError::Unauthorized)
    }
}

/// Fresh random token: 16 random bytes, hex encoded.
pub fn generate_token() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
