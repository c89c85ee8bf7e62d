//! Credential helpers.
//!
//! Access tokens are JWTs issued by the service. The client never verifies
//! them; it only reads the identity claims when a login arrives as a bare
//! token (the login-success redirect) rather than as a login response.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::User;

/// Format a credential as an `Authorization` header value.
pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

/// Claims carried in the access token payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityClaims {
    #[serde(alias = "id", alias = "sub", rename = "_id")]
    id: String,
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    is_email_verified: bool,
    #[serde(default)]
    is_phone_verified: Option<bool>,
    #[serde(default)]
    following: Vec<String>,
    #[serde(default)]
    followers: Option<Vec<String>>,
    #[serde(default)]
    profile_picture: Option<String>,
}

/// Decode the identity claims of a JWT without verifying its signature.
pub fn decode_identity(token: &str) -> Result<User> {
    let mut parts = token.trim().split('.');
    let payload = match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_)) => payload,
        _ => return Err(Error::InvalidToken),
    };

    // Some issuers keep base64 padding; the URL-safe engine here expects none.
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| Error::InvalidToken)?;
    let claims: IdentityClaims =
        serde_json::from_slice(&decoded).map_err(|_| Error::InvalidToken)?;

    Ok(User {
        id: claims.id,
        username: claims.username,
        email: claims.email,
        is_email_verified: claims.is_email_verified,
        is_phone_verified: claims.is_phone_verified,
        following: claims.following,
        followers: claims.followers,
        profile_picture: claims.profile_picture,
    })
}

#[cfg(test)]
pub(crate) fn test_token(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.signature", header, payload)
}
