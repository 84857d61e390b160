//! Error taxonomy for token issuance and validation.

use thiserror::Error;

/// Errors returned by every token operation.
///
/// Nothing in this crate logs-and-swallows one of these; each is handed back
/// to the immediate caller, which maps it to an authentication failure.
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Key provider error: {0}")]
    KeyProvider(String),

    #[error("Unexpected signing algorithm: {0}")]
    UnexpectedAlgorithm(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid token claims: {0}")]
    InvalidClaims(String),

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TokenError {
    /// Create a key provider error.
    #[must_use]
    pub fn key_provider(msg: impl Into<String>) -> Self {
        TokenError::KeyProvider(msg.into())
    }

    /// Create an invalid token error.
    #[must_use]
    pub fn invalid_token(msg: impl Into<String>) -> Self {
        TokenError::InvalidToken(msg.into())
    }

    /// Create an invalid claims error.
    #[must_use]
    pub fn invalid_claims(msg: impl Into<String>) -> Self {
        TokenError::InvalidClaims(msg.into())
    }

    /// Create an invalid argument error.
    #[must_use]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        TokenError::InvalidArgument(msg.into())
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        TokenError::Config(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        TokenError::Internal(msg.into())
    }

    /// Stable code for mapping onto responses and metric labels.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            TokenError::KeyProvider(_) => TOKEN_KEY_PROVIDER_ERROR,
            TokenError::UnexpectedAlgorithm(_) => TOKEN_UNEXPECTED_ALGORITHM,
            TokenError::InvalidToken(_) => TOKEN_INVALID,
            TokenError::InvalidClaims(_) => TOKEN_INVALID_CLAIMS,
            TokenError::InvalidSignature => TOKEN_INVALID_SIGNATURE,
            TokenError::TokenExpired => TOKEN_EXPIRED,
            TokenError::InvalidArgument(_) => TOKEN_INVALID_ARGUMENT,
            TokenError::Config(_) => TOKEN_CONFIG_ERROR,
            TokenError::Internal(_) => TOKEN_INTERNAL_ERROR,
        }
    }
}

impl From<serde_json::Error> for TokenError {
    fn from(err: serde_json::Error) -> Self {
        TokenError::InvalidClaims(err.to_string())
    }
}

impl From<base64::DecodeError> for TokenError {
    fn from(err: base64::DecodeError) -> Self {
        TokenError::InvalidToken(err.to_string())
    }
}

// Error codes handed to the HTTP-facing middleware
pub const TOKEN_KEY_PROVIDER_ERROR: &str = "TOKEN_KEY_PROVIDER_ERROR";
pub const TOKEN_UNEXPECTED_ALGORITHM: &str = "TOKEN_UNEXPECTED_ALGORITHM";
pub const TOKEN_INVALID: &str = "TOKEN_INVALID";
pub const TOKEN_INVALID_CLAIMS: &str = "TOKEN_INVALID_CLAIMS";
pub const TOKEN_INVALID_SIGNATURE: &str = "TOKEN_INVALID_SIGNATURE";
pub const TOKEN_EXPIRED: &str = "TOKEN_EXPIRED";
pub const TOKEN_INVALID_ARGUMENT: &str = "TOKEN_INVALID_ARGUMENT";
pub const TOKEN_CONFIG_ERROR: &str = "TOKEN_CONFIG_ERROR";
pub const TOKEN_INTERNAL_ERROR: &str = "TOKEN_INTERNAL_ERROR";
