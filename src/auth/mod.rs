//! # Identity
//!
//! Verifies signed access tokens into [`Identity`] values, issues them, and
//! manages refresh sessions.

pub mod crypto;
pub mod identity;
pub mod jwt;
pub mod session;

pub use identity::{Identity, Role, SERVICE_ROLE};
pub use jwt::{AccessClaims, IdentityConfig, IdentityResolver, TokenIssuer};
pub use session::{
    InMemorySessionRepository, Session, SessionConfig, SessionEvent, SessionManager,
    SessionRepository, TokenPair,
};
