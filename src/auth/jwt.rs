//! # Access Tokens
//!
//! Issuance and verification of signed (HS256) access tokens.
//!
//! ## Invariants
//! - Verification is stateless: signature, audience, issuer and expiry only
//! - A bad signature is reported before expiry
//! - Tokens carry no secrets (subject, role, timestamps and public claims)

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use super::identity::{Identity, Role, SERVICE_ROLE};
use crate::errors::{AccessError, AccessResult};

/// Claims carried by an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (caller id)
    pub sub: String,

    /// Role claim; unknown or missing values resolve to `user`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Issued at (Unix epoch seconds)
    pub iat: i64,

    /// Expiration (Unix epoch seconds)
    pub exp: i64,

    /// Audience
    pub aud: String,

    /// Issuer
    pub iss: String,

    /// Any further public claims (email, metadata, ...)
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

const RESERVED_CLAIMS: [&str; 6] = ["sub", "role", "iat", "exp", "aud", "iss"];

/// Token signing and verification settings
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Shared HS256 secret. Usually supplied through `ROWGUARD_JWT_SECRET`.
    #[serde(default)]
    pub secret: String,

    #[serde(default = "default_issuer")]
    pub issuer: String,

    #[serde(default = "default_audience")]
    pub audience: String,

    /// Access token lifetime in seconds (default: one hour)
    #[serde(default = "default_access_token_ttl_secs")]
    pub access_token_ttl_secs: i64,

    /// Clock skew tolerated when checking expiry
    #[serde(default)]
    pub leeway_secs: i64,
}

fn default_issuer() -> String {
    "rowguard".to_string()
}

fn default_audience() -> String {
    "authenticated".to_string()
}

fn default_access_token_ttl_secs() -> i64 {
    3600
}

/// Upper bound for any configured token lifetime (ten years)
pub const MAX_TOKEN_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// `secs` as a lifetime, or `None` outside `1..=MAX_TOKEN_TTL_SECS`
pub(crate) fn bounded_ttl(secs: i64) -> Option<Duration> {
    (1..=MAX_TOKEN_TTL_SECS)
        .contains(&secs)
        .then(|| Duration::seconds(secs))
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: default_issuer(),
            audience: default_audience(),
            access_token_ttl_secs: default_access_token_ttl_secs(),
            leeway_secs: 0,
        }
    }
}

impl fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

impl IdentityConfig {
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ..Default::default()
        }
    }

    /// Access token lifetime; `None` if the configured value is out of range
    pub fn access_token_ttl(&self) -> Option<Duration> {
        bounded_ttl(self.access_token_ttl_secs)
    }

    pub fn validate(&self) -> AccessResult<()> {
        if self.secret.is_empty() {
            return Err(AccessError::InvalidConfig(
                "identity.secret must not be empty".to_string(),
            ));
        }
        if self.access_token_ttl().is_none() {
            return Err(AccessError::InvalidConfig(format!(
                "identity.access_token_ttl_secs must be between 1 and {}",
                MAX_TOKEN_TTL_SECS
            )));
        }
        if !(0..=MAX_TOKEN_TTL_SECS).contains(&self.leeway_secs) {
            return Err(AccessError::InvalidConfig(format!(
                "identity.leeway_secs must be between 0 and {}",
                MAX_TOKEN_TTL_SECS
            )));
        }
        Ok(())
    }
}

/// Signs access tokens for identities
#[derive(Clone)]
pub struct TokenIssuer {
    config: IdentityConfig,
    encoding_key: EncodingKey,
}

impl TokenIssuer {
    pub fn new(config: IdentityConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        Self {
            config,
            encoding_key,
        }
    }

    /// Issue an access token expiring `access_token_ttl_secs` from now
    pub fn issue(&self, identity: &Identity) -> AccessResult<String> {
        self.issue_at(identity, Utc::now())
    }

    /// Issue an access token as if signed at `issued_at`
    pub fn issue_at(&self, identity: &Identity, issued_at: DateTime<Utc>) -> AccessResult<String> {
        let role = if identity.is_service_role() {
            SERVICE_ROLE.to_string()
        } else {
            identity.role().as_str().to_string()
        };

        let extra = identity
            .claims()
            .iter()
            .filter(|(k, _)| !RESERVED_CLAIMS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let claims = AccessClaims {
            sub: identity.subject_id().to_string(),
            role: Some(role),
            iat: issued_at.timestamp(),
            exp: self.expires_at(issued_at)?.timestamp(),
            aud: self.config.audience.clone(),
            iss: self.config.issuer.clone(),
            extra,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|_| AccessError::TokenGenerationFailed)
    }

    /// Expiry of a token signed at `issued_at`
    pub fn expires_at(&self, issued_at: DateTime<Utc>) -> AccessResult<DateTime<Utc>> {
        self.config
            .access_token_ttl()
            .and_then(|ttl| issued_at.checked_add_signed(ttl))
            .ok_or(AccessError::TokenGenerationFailed)
    }
}

/// Verifies access tokens and turns them into identities
#[derive(Clone)]
pub struct IdentityResolver {
    config: IdentityConfig,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl IdentityResolver {
    pub fn new(config: IdentityConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[&config.audience]);
        validation.set_issuer(&[&config.issuer]);
        // Expiry is checked against the caller-supplied clock in `resolve_at`.
        validation.validate_exp = false;

        Self {
            config,
            decoding_key,
            validation,
        }
    }

    /// Resolve a credential against the current time
    pub fn resolve(&self, token: &str) -> AccessResult<Identity> {
        self.resolve_at(token, Utc::now())
    }

    /// Resolve a credential as of `now`
    pub fn resolve_at(&self, token: &str, now: DateTime<Utc>) -> AccessResult<Identity> {
        let claims = self.verify(token)?;

        if now.timestamp() > claims.exp.saturating_add(self.config.leeway_secs) {
            debug!(sub = %claims.sub, exp = claims.exp, "credential expired");
            return Err(AccessError::Expired);
        }

        if claims.sub.is_empty() {
            return Err(AccessError::InvalidCredential);
        }

        let identity = match claims.role.as_deref() {
            Some(SERVICE_ROLE) => Identity::service(claims.sub),
            other => Identity::new(claims.sub, Role::from_claim_or_default(other)),
        };

        Ok(identity.with_claims(claims.extra))
    }

    /// Verify the signature and structure of a token without checking expiry
    pub fn verify(&self, token: &str) -> AccessResult<AccessClaims> {
        decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AccessError::Expired,
                _ => AccessError::InvalidCredential,
            })
    }
}
