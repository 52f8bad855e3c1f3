//! JWT token encoding and decoding using HS256.
//!
//! The JWT carries the user identity, platform role and permissions. It is
//! accepted as a Bearer header, a `token` query parameter on the WebSocket
//! upgrade, or the first `auth` event of an unauthenticated session.

use anyhow::{Context, Result};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};

/// Deterministic identifier of the anonymous user (no-auth mode).
pub const ANONYMOUS_USER_ID: &str = "00000000-0000-0000-0000-000000000000";

/// JWT claims payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    /// User email
    pub email: String,
    /// User display name
    pub name: String,
    /// Platform role (student, instructor, administrator)
    #[serde(default = "default_role")]
    pub role: String,
    /// Fine-grained permissions granted to the user
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

fn default_role() -> String {
    "student".to_string()
}

impl Claims {
    /// Create anonymous claims for no-auth mode.
    pub fn anonymous() -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: ANONYMOUS_USER_ID.to_string(),
            email: "anonymous@local".to_string(),
            name: "Anonymous".to_string(),
            role: default_role(),
            permissions: Vec::new(),
            iat: now,
            exp: now + 86400 * 365 * 100, // effectively never expires
        }
    }
}

/// Encode a JWT token for the given user.
///
/// Uses HS256 signing with the provided secret.
pub fn encode_jwt(
    user_id: &str,
    email: &str,
    name: &str,
    role: &str,
    secret: &str,
    expiry_secs: u64,
) -> Result<String> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        name: name.to_string(),
        role: role.to_string(),
        permissions: Vec::new(),
        iat: now,
        exp: now + expiry_secs as i64,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .context("Failed to encode JWT")
}

/// Decode and validate a JWT token.
///
/// Returns the claims if the token is valid, not expired, and
/// signed with the correct secret.
pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims> {
    let token_data: TokenData<Claims> = decode(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .context("Failed to decode JWT")?;

    Ok(token_data.claims)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &str = "test-secret-key-minimum-32-chars!!";

    #[test]
    fn test_encode_decode_roundtrip() {
        let token = encode_jwt(
            "user-1",
            "alice@school.edu",
            "Alice",
            "instructor",
            TEST_SECRET,
            3600,
        )
        .expect("encode should succeed");

        let claims = decode_jwt(&token, TEST_SECRET).expect("decode should succeed");
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email, "alice@school.edu");
        assert_eq!(claims.name, "Alice");
        assert_eq!(claims.role, "instructor");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_expired_token_rejected() {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: "user-2".to_string(),
            email: "bob@school.edu".to_string(),
            name: "Bob".to_string(),
            role: "student".to_string(),
            permissions: vec![],
            iat: now - 7200, // issued 2h ago
            exp: now - 3600, // expired 1h ago
        };

        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .expect("encode should succeed");

        assert!(decode_jwt(&token, TEST_SECRET).is_err());
    }

    #[test]
    fn test_invalid_secret_rejected() {
        let token = encode_jwt("u", "c@school.edu", "C", "student", TEST_SECRET, 3600).unwrap();
        let result = decode_jwt(&token, "wrong-secret-that-is-also-32chars!");
        assert!(result.is_err(), "wrong secret should be rejected");
    }

    #[test]
    fn test_role_defaults_to_student() {
        let now = chrono::Utc::now().timestamp();
        let payload = serde_json::json!({
            "sub": "u", "email": "e@x", "name": "N", "iat": now, "exp": now + 60
        });
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &payload,
            &jsonwebtoken::EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .unwrap();
        let claims = decode_jwt(&token, TEST_SECRET).unwrap();
        assert_eq!(claims.role, "student");
        assert!(claims.permissions.is_empty());
    }

    #[test]
    fn test_anonymous_claims() {
        let claims = Claims::anonymous();
        assert_eq!(claims.sub, ANONYMOUS_USER_ID);
        assert_eq!(claims.role, "student");
        assert!(claims.exp > claims.iat);
    }
}
