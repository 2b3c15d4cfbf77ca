//! Authentication core.
//!
//! Dual-token system: short-lived access tokens (15 min, stateless apart
//! from the session they are bound to) and long-lived refresh tokens
//! (30 days, revocable by `jti`). Refresh tokens are single use: every
//! rotation denylists the presented token.

mod errors;
mod password;
mod service;
mod types;

pub use errors::AuthError;
pub use password::{Argon2Hasher, CredentialHasher, PasswordError};
pub use service::AuthCore;
pub use types::{AuthenticatedUser, ClientInfo, LoginOutcome, TokenPair};
