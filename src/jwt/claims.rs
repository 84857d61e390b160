use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Whether a token is a one-shot bootstrap credential or an ongoing session.
///
/// The token service carries this value but never enforces it; exchanging a
/// bootstrap token for a session token is the caller's policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Short-lived, exchanged for a session token.
    Bootstrap,
    /// Used for ongoing authenticated requests.
    Session,
}

impl TokenType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and authorization fields a token is issued for.
///
/// This is everything a signer needs from the caller; issuer, audience and
/// the validity window come from the signer's own configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub user: String,
    pub groups: Vec<String>,
    pub uid: String,
    pub extra: BTreeMap<String, Vec<String>>,
    pub path: String,
    pub domain: String,
    /// Absent only for grants read back from tokens issued without one.
    pub token_type: Option<TokenType>,
    pub skip_refresh: bool,
}

impl TokenGrant {
    pub fn new(user: impl Into<String>, token_type: TokenType) -> Self {
        TokenGrant {
            user: user.into(),
            groups: Vec::new(),
            uid: String::new(),
            extra: BTreeMap::new(),
            path: String::new(),
            domain: String::new(),
            token_type: Some(token_type),
            skip_refresh: false,
        }
    }

    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }

    pub fn with_extra(mut self, extra: BTreeMap<String, Vec<String>>) -> Self {
        self.extra = extra;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_skip_refresh(mut self, skip_refresh: bool) -> Self {
        self.skip_refresh = skip_refresh;
        self
    }

    /// Token type as a log and metric label.
    pub fn token_type_label(&self) -> &'static str {
        self.token_type.map_or("unspecified", |t| t.as_str())
    }
}

/// Signed token payload.
///
/// Registered claims use their standard short names; the workspace claims
/// keep the PascalCase names existing consumers already parse. Empty values
/// are omitted on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    // Standard JWT claims
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iss: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub: String,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    pub aud: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    // Workspace claims
    #[serde(rename = "User", default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(rename = "Groups", default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(rename = "Uid", default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(rename = "Extra", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Vec<String>>,
    #[serde(rename = "Path", default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(rename = "Domain", default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(rename = "TokenType", default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<TokenType>,
    #[serde(rename = "SkipRefresh", default, skip_serializing_if = "is_false")]
    pub skip_refresh: bool,
}

impl Claims {
    /// Build claims for a fresh token: `iat = nbf = now`, `exp = now + expiration`.
    pub fn issue(
        grant: &TokenGrant,
        issuer: &str,
        audience: &str,
        expiration: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let issued_at = now.timestamp();
        let lifetime = i64::try_from(expiration.as_secs()).unwrap_or(i64::MAX);

        Claims {
            iss: issuer.to_string(),
            sub: grant.user.clone(),
            aud: vec![audience.to_string()],
            exp: Some(issued_at.saturating_add(lifetime)),
            nbf: Some(issued_at),
            iat: Some(issued_at),
            user: grant.user.clone(),
            groups: grant.groups.clone(),
            uid: grant.uid.clone(),
            extra: grant.extra.clone(),
            path: grant.path.clone(),
            domain: grant.domain.clone(),
            token_type: grant.token_type,
            skip_refresh: grant.skip_refresh,
        }
    }

    /// The identity fields a reissued token carries over.
    pub fn grant(&self) -> TokenGrant {
        TokenGrant {
            user: self.user.clone(),
            groups: self.groups.clone(),
            uid: self.uid.clone(),
            extra: self.extra.clone(),
            path: self.path.clone(),
            domain: self.domain.clone(),
            token_type: self.token_type,
            skip_refresh: self.skip_refresh,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.iat.and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.nbf.and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    /// True when `nbf` is present and still after `now`.
    pub fn is_not_yet_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before().is_some_and(|nbf| nbf > now)
    }

    /// True when `exp` is present and strictly before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|exp| exp < now)
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Accept `aud` either as a single string or as an array.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(single) => vec![single],
        OneOrMany::Many(many) => many,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_grant() -> TokenGrant {
        let mut extra = BTreeMap::new();
        extra.insert("team".to_string(), vec!["ml".to_string()]);
        TokenGrant::new("alice", TokenType::Session)
            .with_groups(vec!["users".to_string()])
            .with_uid("uid-1")
            .with_extra(extra)
            .with_path("/workspaces/ns/ws")
            .with_domain("example.com")
    }

    #[test]
    fn test_issue_sets_validity_window() {
        let now = Utc::now();
        let claims = Claims::issue(
            &sample_grant(),
            "issuer",
            "aud",
            Duration::from_secs(1800),
            now,
        );

        assert_eq!(claims.iat, Some(now.timestamp()));
        assert_eq!(claims.nbf, claims.iat);
        assert_eq!(claims.exp, Some(now.timestamp() + 1800));
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.aud, vec!["aud".to_string()]);
        assert!(!claims.is_expired_at(now));
    }

    #[test]
    fn test_grant_round_trip() {
        let grant = sample_grant().with_skip_refresh(true);
        let claims = Claims::issue(&grant, "i", "a", Duration::from_secs(60), Utc::now());
        assert_eq!(claims.grant(), grant);
    }

    #[test]
    fn test_wire_names() {
        let claims = Claims::issue(
            &sample_grant(),
            "issuer",
            "aud",
            Duration::from_secs(60),
            Utc::now(),
        );
        let json = serde_json::to_value(&claims).unwrap();

        assert_eq!(json["User"], "alice");
        assert_eq!(json["Groups"][0], "users");
        assert_eq!(json["Uid"], "uid-1");
        assert_eq!(json["Extra"]["team"][0], "ml");
        assert_eq!(json["TokenType"], "session");
        assert!(json.get("SkipRefresh").is_none());
        assert!(json["exp"].is_i64());
    }

    #[test]
    fn test_empty_fields_omitted() {
        let claims = Claims::issue(
            &TokenGrant::new("bob", TokenType::Bootstrap),
            "issuer",
            "aud",
            Duration::from_secs(60),
            Utc::now(),
        );
        let json = serde_json::to_value(&claims).unwrap();

        for field in ["Groups", "Uid", "Extra", "Path", "Domain", "SkipRefresh"] {
            assert!(json.get(field).is_none(), "{field} should be omitted");
        }
        assert_eq!(json["TokenType"], "bootstrap");
    }

    #[test]
    fn test_audience_accepts_single_string() {
        let claims: Claims = serde_json::from_str(
            r#"{"aud":"workspace-users","User":"carol","TokenType":"session"}"#,
        )
        .unwrap();
        assert_eq!(claims.aud, vec!["workspace-users".to_string()]);
        assert_eq!(claims.exp, None);
        assert_eq!(claims.expires_at(), None);
    }

    #[test]
    fn test_token_type_optional() {
        let claims: Claims = serde_json::from_str(r#"{"User":"alice","iat":1700000000}"#).unwrap();
        assert_eq!(claims.token_type, None);
        assert_eq!(claims.grant().token_type_label(), "unspecified");

        let json = serde_json::to_value(&claims).unwrap();
        assert!(json.get("TokenType").is_none());

        let back: Claims = serde_json::from_value(json).unwrap();
        assert_eq!(back, claims);
    }

    #[test]
    fn test_not_before() {
        let now = Utc::now();
        let mut claims = Claims::issue(&sample_grant(), "i", "a", Duration::from_secs(60), now);
        assert!(!claims.is_not_yet_valid_at(now));

        claims.nbf = Some(now.timestamp() + 3600);
        assert!(claims.is_not_yet_valid_at(now));
        assert!(!claims.is_not_yet_valid_at(now + chrono::Duration::hours(2)));

        claims.nbf = None;
        assert!(!claims.is_not_yet_valid_at(now));
    }
}
