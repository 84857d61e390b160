//! Shared-secret HS256 signer.
//!
//! The simpler alternative to envelope signing: one long-lived secret held in
//! process memory, validated with issuer, audience and a small leeway.

use crate::error::TokenError;
use crate::jwt::claims::{Claims, TokenGrant};
use crate::jwt::signer::TokenSigner;
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::time::Duration;
use tracing::debug;

/// Allowed clock skew when validating standard tokens.
pub const STANDARD_LEEWAY_SECS: u64 = 5;

pub struct StandardSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    expiration: Duration,
}

impl StandardSigner {
    pub fn new(
        signing_key: &[u8],
        issuer: impl Into<String>,
        audience: impl Into<String>,
        expiration: Duration,
    ) -> Self {
        StandardSigner {
            encoding_key: EncodingKey::from_secret(signing_key),
            decoding_key: DecodingKey::from_secret(signing_key),
            issuer: issuer.into(),
            audience: audience.into(),
            expiration,
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.leeway = STANDARD_LEEWAY_SECS;
        validation.validate_nbf = true;
        validation
    }
}

#[async_trait]
impl TokenSigner for StandardSigner {
    async fn generate_token(&self, grant: &TokenGrant) -> Result<String, TokenError> {
        let claims = Claims::issue(
            grant,
            &self.issuer,
            &self.audience,
            self.expiration,
            Utc::now(),
        );

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::internal(format!("failed to sign token: {}", e)))
    }

    async fn validate_token(&self, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation()).map_err(|e| {
            debug!(error = %e, "Standard token rejected");
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::TokenExpired,
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::InvalidAlgorithm => TokenError::UnexpectedAlgorithm(
                    "expected HS256".to_string(),
                ),
                _ => TokenError::invalid_token(e.to_string()),
            }
        })?;

        Ok(data.claims)
    }

    fn algorithm(&self) -> &str {
        "HS256"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::claims::TokenType;

    fn signer() -> StandardSigner {
        StandardSigner::new(
            b"standard-secret-for-tests-only!!",
            "workspaces-auth",
            "workspace-users",
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_round_trip() {
        let signer = signer();
        let grant = TokenGrant::new("alice", TokenType::Session)
            .with_groups(vec!["users".to_string()])
            .with_uid("uid-1");

        let token = signer.generate_token(&grant).await.unwrap();
        let claims = signer.validate_token(&token).await.unwrap();

        assert_eq!(claims.grant(), grant);
        assert_eq!(claims.iss, "workspaces-auth");
    }

    #[tokio::test]
    async fn test_wrong_secret() {
        let token = signer()
            .generate_token(&TokenGrant::new("alice", TokenType::Session))
            .await
            .unwrap();
        let other = StandardSigner::new(
            b"a-different-secret-entirely!!!!!",
            "workspaces-auth",
            "workspace-users",
            Duration::from_secs(3600),
        );

        let result = other.validate_token(&token).await;
        assert!(matches!(result, Err(TokenError::InvalidSignature)));
    }

    #[tokio::test]
    async fn test_audience_mismatch() {
        let token = signer()
            .generate_token(&TokenGrant::new("alice", TokenType::Session))
            .await
            .unwrap();
        let other = StandardSigner::new(
            b"standard-secret-for-tests-only!!",
            "workspaces-auth",
            "someone-else",
            Duration::from_secs(3600),
        );

        let result = other.validate_token(&token).await;
        assert!(matches!(result, Err(TokenError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn test_rejects_other_algorithm() {
        let claims = Claims::issue(
            &TokenGrant::new("alice", TokenType::Session),
            "workspaces-auth",
            "workspace-users",
            Duration::from_secs(3600),
            Utc::now(),
        );
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(b"standard-secret-for-tests-only!!"),
        )
        .unwrap();

        let result = signer().validate_token(&token).await;
        assert!(matches!(result, Err(TokenError::UnexpectedAlgorithm(_))));
    }
}
