//! Authentication: JWT bearer credentials and role-bearing identities
//!
//! Provides:
//! - JWT token encoding/decoding (`jwt` submodule)
//! - `Identity`, `Role` and the `TokenVerifier` seam (`identity` submodule)
//! - Axum middleware and extractor for the HTTP surface

pub mod extractor;
pub mod identity;
pub mod jwt;
pub mod middleware;

pub use extractor::AuthUser;
pub use identity::{AnonymousVerifier, Identity, JwtVerifier, Role, TokenVerifier};
