use crate::error::TokenError;
use crate::jwt::claims::{Claims, TokenGrant};
use crate::jwt::signer::TokenSigner;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// When an issued token may be exchanged for a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub enabled: bool,
    /// How long before expiry a token becomes refreshable.
    pub window: Duration,
    /// Maximum token age for which refresh is still granted.
    pub horizon: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        RefreshPolicy {
            enabled: true,
            window: Duration::from_secs(15 * 60),
            horizon: Duration::from_secs(12 * 60 * 60),
        }
    }
}

/// Token lifecycle on top of whichever signer was configured.
pub struct TokenManager {
    signer: Arc<dyn TokenSigner>,
    policy: RefreshPolicy,
}

impl TokenManager {
    pub fn new(signer: Arc<dyn TokenSigner>, policy: RefreshPolicy) -> Self {
        TokenManager { signer, policy }
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    pub fn signer(&self) -> &Arc<dyn TokenSigner> {
        &self.signer
    }

    pub async fn generate_token(&self, grant: &TokenGrant) -> Result<String, TokenError> {
        self.signer.generate_token(grant).await
    }

    pub async fn validate_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.signer.validate_token(token).await
    }

    /// Whether `claims` should be refreshed now.
    pub fn should_refresh(&self, claims: &Claims) -> bool {
        self.should_refresh_at(claims, Utc::now())
    }

    pub fn should_refresh_at(&self, claims: &Claims, now: DateTime<Utc>) -> bool {
        if !self.policy.enabled || claims.skip_refresh {
            return false;
        }
        let (Some(expires_at), Some(issued_at)) = (claims.expires_at(), claims.issued_at()) else {
            return false;
        };

        let in_window = now
            .checked_add_signed(to_chrono(self.policy.window))
            .map_or(true, |edge| edge >= expires_at);
        let within_horizon = now.signed_duration_since(issued_at) <= to_chrono(self.policy.horizon);

        in_window && within_horizon
    }

    /// Reissue a token carrying the same identity.
    ///
    /// `skip_refresh` is not carried over; only `update_skip_refresh_token` sets it.
    pub async fn refresh_token(&self, claims: Option<&Claims>) -> Result<String, TokenError> {
        let claims = claims.ok_or_else(|| TokenError::invalid_argument("claims are required"))?;

        let grant = claims.grant().with_skip_refresh(false);
        let token = self.signer.generate_token(&grant).await?;
        debug!(user = %claims.user, "Refreshed token");
        Ok(token)
    }

    /// Reissue a token that opts out of further refreshes.
    pub async fn update_skip_refresh_token(
        &self,
        claims: Option<&Claims>,
    ) -> Result<String, TokenError> {
        let claims = claims.ok_or_else(|| TokenError::invalid_argument("claims are required"))?;

        let grant = claims.grant().with_skip_refresh(true);
        let token = self.signer.generate_token(&grant).await?;

        info!(user = %claims.user, "Issued token with refresh disabled");
        Ok(token)
    }
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}
