//! # Sessions
//!
//! Sign-in, refresh-token rotation and sign-out.
//!
//! A session pairs a short-lived access token with a long-lived refresh token.
//! Refreshing rotates both: the presented refresh token is revoked and a new
//! session is opened, so a stolen refresh token can be used at most once.
//!
//! ## Invariants
//! - Refresh tokens are single-use
//! - Sessions expire at their stated time
//! - Sign-out invalidates immediately

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use super::crypto::{constant_time_str_eq, generate_token, hash_token};
use super::identity::{Identity, Role};
use super::jwt::{bounded_ttl, TokenIssuer, MAX_TOKEN_TTL_SECS};
use crate::errors::{AccessError, AccessResult};

/// Session record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,

    /// Caller this session belongs to
    pub subject_id: String,

    /// Role embedded in access tokens minted for this session
    pub role: Role,

    /// Hashed refresh token (the raw token is only handed to the client)
    #[serde(default, skip_serializing)]
    pub refresh_token_hash: String,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

/// Tokens handed to the client on sign-in and refresh
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    /// Short-lived signed access token
    pub access_token: String,

    /// Long-lived, single-use refresh token
    pub refresh_token: String,

    pub token_type: String,

    /// Access token expiration
    pub expires_at: DateTime<Utc>,
}

/// Session lifecycle transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    TokenRefreshed,
    SignedOut,
}

impl SessionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEvent::SignedIn => "SIGNED_IN",
            SessionEvent::TokenRefreshed => "TOKEN_REFRESHED",
            SessionEvent::SignedOut => "SIGNED_OUT",
        }
    }
}

/// Session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Refresh token lifetime in seconds (default: 30 days)
    #[serde(default = "default_refresh_token_ttl_secs")]
    pub refresh_token_ttl_secs: i64,
}

fn default_refresh_token_ttl_secs() -> i64 {
    30 * 24 * 60 * 60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_token_ttl_secs: default_refresh_token_ttl_secs(),
        }
    }
}

impl SessionConfig {
    /// Refresh token lifetime; `None` if the configured value is out of range
    pub fn refresh_token_ttl(&self) -> Option<Duration> {
        bounded_ttl(self.refresh_token_ttl_secs)
    }

    pub fn validate(&self) -> AccessResult<()> {
        if self.refresh_token_ttl().is_none() {
            return Err(AccessError::InvalidConfig(format!(
                "session.refresh_token_ttl_secs must be between 1 and {}",
                MAX_TOKEN_TTL_SECS
            )));
        }
        Ok(())
    }
}

/// Opens, rotates and closes sessions
pub struct SessionManager<R: SessionRepository> {
    config: SessionConfig,
    repository: R,
    issuer: TokenIssuer,
}

impl<R: SessionRepository> SessionManager<R> {
    pub fn new(config: SessionConfig, repository: R, issuer: TokenIssuer) -> Self {
        Self {
            config,
            repository,
            issuer,
        }
    }

    /// Open a session for an already-authenticated caller
    pub fn sign_in(&self, subject_id: &str, role: Role) -> AccessResult<(Session, TokenPair)> {
        let pair = self.open(subject_id, role)?;
        info!(
            event = SessionEvent::SignedIn.as_str(),
            session = %pair.0.id,
            subject = subject_id,
            "session opened"
        );
        Ok(pair)
    }

    /// Exchange a refresh token for a fresh token pair
    ///
    /// The presented token is revoked; presenting it again yields `SessionRevoked`.
    /// Of several concurrent refreshes with the same token, exactly one succeeds.
    pub fn refresh(&self, refresh_token: &str) -> AccessResult<(Session, TokenPair)> {
        let old = self.validate_refresh_token(refresh_token)?;

        if !self.repository.revoke_if_active(old.id)? {
            warn!(session = %old.id, subject = %old.subject_id, "refresh token already consumed");
            return Err(AccessError::SessionRevoked);
        }
        let (session, tokens) = self.open(&old.subject_id, old.role)?;

        info!(
            event = SessionEvent::TokenRefreshed.as_str(),
            previous = %old.id,
            session = %session.id,
            subject = %old.subject_id,
            "session rotated"
        );
        Ok((session, tokens))
    }

    /// Check a refresh token without consuming it
    pub fn validate_refresh_token(&self, refresh_token: &str) -> AccessResult<Session> {
        let token_hash = hash_token(refresh_token);

        let session = self
            .repository
            .find_by_refresh_token_hash(&token_hash)?
            .ok_or(AccessError::InvalidRefreshToken)?;

        if session.revoked {
            warn!(session = %session.id, subject = %session.subject_id, "revoked refresh token presented");
            return Err(AccessError::SessionRevoked);
        }

        if session.expires_at < Utc::now() {
            return Err(AccessError::SessionInvalid);
        }

        Ok(session)
    }

    /// Revoke one session
    pub fn sign_out(&self, session_id: Uuid) -> AccessResult<()> {
        self.repository.revoke(session_id)?;
        info!(event = SessionEvent::SignedOut.as_str(), session = %session_id, "session revoked");
        Ok(())
    }

    /// Revoke every session of a caller
    pub fn sign_out_everywhere(&self, subject_id: &str) -> AccessResult<()> {
        self.repository.revoke_all_for_subject(subject_id)?;
        info!(event = SessionEvent::SignedOut.as_str(), subject = subject_id, "all sessions revoked");
        Ok(())
    }

    /// Active (unrevoked) sessions of a caller
    pub fn active_sessions(&self, subject_id: &str) -> AccessResult<Vec<Session>> {
        self.repository.find_all_for_subject(subject_id)
    }

    fn open(&self, subject_id: &str, role: Role) -> AccessResult<(Session, TokenPair)> {
        let refresh_token = generate_token();
        let now = Utc::now();
        let expires_at = self
            .config
            .refresh_token_ttl()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or(AccessError::TokenGenerationFailed)?;
        let access_expires_at = self.issuer.expires_at(now)?;

        let session = Session {
            id: Uuid::new_v4(),
            subject_id: subject_id.to_string(),
            role,
            refresh_token_hash: hash_token(&refresh_token),
            created_at: now,
            expires_at,
            revoked: false,
        };
        self.repository.create(&session)?;

        let access_token = self
            .issuer
            .issue_at(&Identity::new(subject_id, role), now)?;

        let tokens = TokenPair {
            access_token,
            refresh_token,
            token_type: "bearer".to_string(),
            expires_at: access_expires_at,
        };

        Ok((session, tokens))
    }
}

/// Session storage
pub trait SessionRepository: Send + Sync {
    fn create(&self, session: &Session) -> AccessResult<()>;

    fn find_by_id(&self, id: Uuid) -> AccessResult<Option<Session>>;

    fn find_by_refresh_token_hash(&self, hash: &str) -> AccessResult<Option<Session>>;

    /// Unrevoked sessions of a caller
    fn find_all_for_subject(&self, subject_id: &str) -> AccessResult<Vec<Session>>;

    fn revoke(&self, id: Uuid) -> AccessResult<()>;

    /// Revoke `id` only if it is still active, as one atomic step.
    /// Returns false if the session was already revoked.
    fn revoke_if_active(&self, id: Uuid) -> AccessResult<bool>;

    fn revoke_all_for_subject(&self, subject_id: &str) -> AccessResult<()>;

    /// Delete expired sessions, returning how many were removed
    fn delete_expired(&self) -> AccessResult<usize>;
}

/// In-memory session repository
#[derive(Debug, Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<Vec<Session>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> AccessError {
    AccessError::StorageError("Lock poisoned".to_string())
}

impl SessionRepository for InMemorySessionRepository {
    fn create(&self, session: &Session) -> AccessResult<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        sessions.push(session.clone());
        Ok(())
    }

    fn find_by_id(&self, id: Uuid) -> AccessResult<Option<Session>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions.iter().find(|s| s.id == id).cloned())
    }

    fn find_by_refresh_token_hash(&self, hash: &str) -> AccessResult<Option<Session>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions
            .iter()
            .find(|s| constant_time_str_eq(&s.refresh_token_hash, hash))
            .cloned())
    }

    fn find_all_for_subject(&self, subject_id: &str) -> AccessResult<Vec<Session>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions
            .iter()
            .filter(|s| s.subject_id == subject_id && !s.revoked)
            .cloned()
            .collect())
    }

    fn revoke(&self, id: Uuid) -> AccessResult<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;

        match sessions.iter_mut().find(|s| s.id == id) {
            Some(session) => {
                session.revoked = true;
                Ok(())
            }
            None => Err(AccessError::SessionInvalid),
        }
    }

    fn revoke_if_active(&self, id: Uuid) -> AccessResult<bool> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;

        match sessions.iter_mut().find(|s| s.id == id) {
            Some(session) if session.revoked => Ok(false),
            Some(session) => {
                session.revoked = true;
                Ok(true)
            }
            None => Err(AccessError::SessionInvalid),
        }
    }

    fn revoke_all_for_subject(&self, subject_id: &str) -> AccessResult<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;

        for session in sessions.iter_mut().filter(|s| s.subject_id == subject_id) {
            session.revoked = true;
        }

        Ok(())
    }

    fn delete_expired(&self) -> AccessResult<usize> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;

        let now = Utc::now();
        let before = sessions.len();
        sessions.retain(|s| s.expires_at > now);
        Ok(before - sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::{IdentityConfig, IdentityResolver};
    use std::sync::Barrier;
    use std::thread;

    fn identity_config() -> IdentityConfig {
        IdentityConfig::with_secret("session_test_secret")
    }

    fn create_manager() -> SessionManager<InMemorySessionRepository> {
        SessionManager::new(
            SessionConfig::default(),
            InMemorySessionRepository::new(),
            TokenIssuer::new(identity_config()),
        )
    }

    #[test]
    fn test_sign_in_issues_verifiable_access_token() {
        let manager = create_manager();

        let (session, tokens) = manager.sign_in("alice", Role::Verified).unwrap();
        assert_eq!(session.subject_id, "alice");
        assert!(!session.revoked);
        assert_eq!(tokens.token_type, "bearer");

        let identity = IdentityResolver::new(identity_config())
            .resolve(&tokens.access_token)
            .unwrap();
        assert_eq!(identity.subject_id(), "alice");
        assert_eq!(identity.role(), Role::Verified);
    }

    #[test]
    fn test_refresh_token_is_stored_hashed() {
        let manager = create_manager();
        let (session, tokens) = manager.sign_in("alice", Role::User).unwrap();

        assert_ne!(session.refresh_token_hash, tokens.refresh_token);
        assert_eq!(session.refresh_token_hash, hash_token(&tokens.refresh_token));
    }

    #[test]
    fn test_refresh_is_single_use() {
        let manager = create_manager();
        let (_, tokens) = manager.sign_in("alice", Role::User).unwrap();

        let (new_session, new_tokens) = manager.refresh(&tokens.refresh_token).unwrap();
        assert_eq!(new_session.subject_id, "alice");
        assert_ne!(new_tokens.refresh_token, tokens.refresh_token);

        let reused = manager.refresh(&tokens.refresh_token);
        assert!(matches!(reused, Err(AccessError::SessionRevoked)));

        assert!(manager.refresh(&new_tokens.refresh_token).is_ok());
    }

    #[test]
    fn test_concurrent_refresh_spends_token_once() {
        const CONTENDERS: usize = 4;

        for _ in 0..50 {
            let manager = create_manager();
            let (_, tokens) = manager.sign_in("alice", Role::User).unwrap();
            let barrier = Barrier::new(CONTENDERS);

            let results: Vec<_> = thread::scope(|s| {
                let handles: Vec<_> = (0..CONTENDERS)
                    .map(|_| {
                        s.spawn(|| {
                            barrier.wait();
                            manager.refresh(&tokens.refresh_token)
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| *e == AccessError::SessionRevoked));
            assert_eq!(manager.active_sessions("alice").unwrap().len(), 1);
        }
    }

    #[test]
    fn test_revoke_if_active() {
        let manager = create_manager();
        let (session, _) = manager.sign_in("alice", Role::User).unwrap();

        assert!(manager.repository.revoke_if_active(session.id).unwrap());
        assert!(!manager.repository.revoke_if_active(session.id).unwrap());
        assert!(matches!(
            manager.repository.revoke_if_active(Uuid::new_v4()),
            Err(AccessError::SessionInvalid)
        ));
    }

    #[test]
    fn test_oversized_refresh_ttl_rejected_without_panic() {
        let config = SessionConfig {
            refresh_token_ttl_secs: i64::MAX,
        };
        assert!(matches!(config.validate(), Err(AccessError::InvalidConfig(_))));

        let manager = SessionManager::new(
            config,
            InMemorySessionRepository::new(),
            TokenIssuer::new(identity_config()),
        );
        assert!(matches!(
            manager.sign_in("alice", Role::User),
            Err(AccessError::TokenGenerationFailed)
        ));
        assert!(manager.active_sessions("alice").unwrap().is_empty());
    }

    #[test]
    fn test_refresh_keeps_role() {
        let manager = create_manager();
        let (_, tokens) = manager.sign_in("alice", Role::Admin).unwrap();
        let (session, new_tokens) = manager.refresh(&tokens.refresh_token).unwrap();

        assert_eq!(session.role, Role::Admin);
        let identity = IdentityResolver::new(identity_config())
            .resolve(&new_tokens.access_token)
            .unwrap();
        assert_eq!(identity.role(), Role::Admin);
    }

    #[test]
    fn test_unknown_refresh_token() {
        let manager = create_manager();
        let result = manager.refresh("not-a-token");
        assert!(matches!(result, Err(AccessError::InvalidRefreshToken)));
    }

    #[test]
    fn test_expired_session_cannot_refresh() {
        let manager = SessionManager::new(
            SessionConfig {
                refresh_token_ttl_secs: 1,
            },
            InMemorySessionRepository::new(),
            TokenIssuer::new(identity_config()),
        );
        let (session, tokens) = manager.sign_in("alice", Role::User).unwrap();

        // Age the stored session past its expiry.
        {
            let mut sessions = manager.repository.sessions.write().unwrap();
            let stored = sessions.iter_mut().find(|s| s.id == session.id).unwrap();
            stored.expires_at = Utc::now() - Duration::seconds(5);
        }

        let result = manager.refresh(&tokens.refresh_token);
        assert!(matches!(result, Err(AccessError::SessionInvalid)));
        assert_eq!(manager.repository.delete_expired().unwrap(), 1);
    }

    #[test]
    fn test_sign_out() {
        let manager = create_manager();
        let (session, tokens) = manager.sign_in("alice", Role::User).unwrap();

        manager.sign_out(session.id).unwrap();

        let result = manager.validate_refresh_token(&tokens.refresh_token);
        assert!(matches!(result, Err(AccessError::SessionRevoked)));
        assert!(manager.active_sessions("alice").unwrap().is_empty());
    }

    #[test]
    fn test_sign_out_everywhere() {
        let manager = create_manager();
        let (_, t1) = manager.sign_in("alice", Role::User).unwrap();
        let (_, t2) = manager.sign_in("alice", Role::User).unwrap();
        let (_, bob) = manager.sign_in("bob", Role::User).unwrap();

        assert_eq!(manager.active_sessions("alice").unwrap().len(), 2);

        manager.sign_out_everywhere("alice").unwrap();

        assert!(matches!(
            manager.validate_refresh_token(&t1.refresh_token),
            Err(AccessError::SessionRevoked)
        ));
        assert!(matches!(
            manager.validate_refresh_token(&t2.refresh_token),
            Err(AccessError::SessionRevoked)
        ));
        assert!(manager.validate_refresh_token(&bob.refresh_token).is_ok());
    }

    #[test]
    fn test_sign_out_unknown_session() {
        let manager = create_manager();
        assert!(matches!(
            manager.sign_out(Uuid::new_v4()),
            Err(AccessError::SessionInvalid)
        ));
    }
}
