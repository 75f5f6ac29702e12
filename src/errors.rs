//! # Access Errors
//!
//! Error types shared by the identity, policy and decision modules.

use thiserror::Error;

use crate::policy::Operation;

/// Result type for rowguard operations
pub type AccessResult<T> = Result<T, AccessError>;

/// Authentication, configuration and authorization errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    // ==================
    // Credential Errors
    // ==================

    /// Signature, structure or required claims of the credential are invalid
    #[error("Invalid credential")]
    InvalidCredential,

    /// The credential's expiry has passed
    #[error("Credential expired")]
    Expired,

    // ==================
    // Session Errors
    // ==================

    /// Refresh token is unknown
    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    /// Session has been revoked (includes refresh token reuse)
    #[error("Session has been revoked")]
    SessionRevoked,

    /// Session expired or does not exist
    #[error("Session expired or invalid")]
    SessionInvalid,

    // ==================
    // Policy Errors
    // ==================

    /// A policy with the same (table, operation, name) is already registered
    #[error("Duplicate policy \"{name}\" for {operation} on {table}")]
    DuplicatePolicy {
        table: String,
        operation: Operation,
        name: String,
    },

    /// Write denied. Never names the policies that were consulted.
    #[error("Access denied")]
    AccessDenied,

    /// A predicate failed while being evaluated (non-fatal, counted as false)
    #[error("Predicate evaluation failed in policy \"{policy}\": {message}")]
    PredicateEvaluation { policy: String, message: String },

    /// Request is missing a row image the operation needs
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ==================
    // Configuration Errors
    // ==================

    /// Configuration or policy definition is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ==================
    // Internal Errors
    // ==================

    /// Token signing failed
    #[error("Internal error: token generation failed")]
    TokenGenerationFailed,

    /// An external collaborator (row or relationship source) failed or timed out
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// The caller cancelled the decision before it completed
    #[error("Decision cancelled")]
    Cancelled,

    /// Storage operation failed
    #[error("Storage error: {0}")]
    StorageError(String),
}

impl AccessError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            AccessError::InvalidRequest(_) => 400,

            // 401 Unauthorized
            AccessError::InvalidCredential => 401,
            AccessError::Expired => 401,
            AccessError::InvalidRefreshToken => 401,
            AccessError::SessionRevoked => 401,
            AccessError::SessionInvalid => 401,

            // 403 Forbidden
            AccessError::AccessDenied => 403,

            // 409 Conflict
            AccessError::DuplicatePolicy { .. } => 409,

            // 500 Internal Server Error
            AccessError::PredicateEvaluation { .. } => 500,
            AccessError::InvalidConfig(_) => 500,
            AccessError::TokenGenerationFailed => 500,
            AccessError::StorageError(_) => 500,

            // 503 Service Unavailable
            AccessError::SourceUnavailable(_) => 503,
            AccessError::Cancelled => 503,
        }
    }

    /// Returns whether this error should be logged at warn level
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }

    /// Whether this error aborts the request before any identity exists
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            AccessError::InvalidCredential
                | AccessError::Expired
                | AccessError::InvalidRefreshToken
                | AccessError::SessionRevoked
                | AccessError::SessionInvalid
        )
    }
}
