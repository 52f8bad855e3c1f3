//! Authenticated identity and bearer-credential verification

use super::jwt::{decode_jwt, Claims};
use crate::chat::models::Sender;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform role of an authenticated user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Instructor,
    Administrator,
}

impl Role {
    /// Unknown roles fall back to the least privileged one
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "instructor" | "teacher" => Role::Instructor,
            "administrator" | "admin" => Role::Administrator,
            _ => Role::Student,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Instructor => "instructor",
            Role::Administrator => "administrator",
        }
    }

    /// May delete messages and impose timeouts
    pub fn can_moderate(&self) -> bool {
        matches!(self, Role::Instructor | Role::Administrator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity derived from a verified credential
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub permissions: Vec<String>,
}

impl Identity {
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            user_id: claims.sub.clone(),
            email: claims.email.clone(),
            name: claims.name.clone(),
            role: Role::parse(&claims.role),
            permissions: claims.permissions.clone(),
        }
    }

    pub fn anonymous() -> Self {
        Self::from_claims(&Claims::anonymous())
    }

    /// Message sender attached server-side for this identity
    pub fn as_sender(&self) -> Sender {
        match self.role {
            Role::Student => Sender::Student {
                id: self.user_id.clone(),
                name: self.name.clone(),
            },
            Role::Instructor | Role::Administrator => Sender::Instructor {
                id: self.user_id.clone(),
                name: self.name.clone(),
            },
        }
    }
}

/// Bearer credential verification collaborator
pub trait TokenVerifier: Send + Sync {
    /// Verify a credential, `None` when the client presented none.
    fn verify(&self, token: Option<&str>) -> Result<Identity>;
}

/// HS256 JWT verification with an optional email-domain restriction
pub struct JwtVerifier {
    secret: String,
    allowed_email_domain: Option<String>,
}

impl JwtVerifier {
    pub fn new(secret: impl Into<String>, allowed_email_domain: Option<String>) -> Self {
        Self {
            secret: secret.into(),
            allowed_email_domain,
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: Option<&str>) -> Result<Identity> {
        let token = token
            .map(|t| t.trim().trim_start_matches("Bearer ").trim())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow!("Missing credential"))?;

        let claims = decode_jwt(token, &self.secret)?;

        if let Some(ref domain) = self.allowed_email_domain {
            if !claims.email.ends_with(&format!("@{}", domain)) {
                return Err(anyhow!("Email domain not allowed (expected @{})", domain));
            }
        }

        Ok(Identity::from_claims(&claims))
    }
}

/// No-auth mode: every session is the anonymous student
pub struct AnonymousVerifier;

impl TokenVerifier for AnonymousVerifier {
    fn verify(&self, _token: Option<&str>) -> Result<Identity> {
        Ok(Identity::anonymous())
    }
}
