//! Compact `header.payload.signature` codec for envelope tokens.
//!
//! The header is a fixed struct rather than an open map: the algorithm and
//! the encrypted data key are the only fields the envelope scheme reads.

use crate::error::TokenError;
use crate::jwt::claims::Claims;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use ring::hmac;
use serde::{Deserialize, Serialize};

/// The only algorithm envelope tokens are signed or accepted with.
pub const ENVELOPE_ALGORITHM: &str = "HS384";

/// Encrypted data keys travel padded; unpadded input is also accepted.
const EDK_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Envelope token header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvelopeHeader {
    #[serde(default)]
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    /// Provider-encrypted data key, base64url.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edk: Option<String>,
}

impl EnvelopeHeader {
    pub fn new(encrypted_key: &[u8]) -> Self {
        EnvelopeHeader {
            alg: ENVELOPE_ALGORITHM.to_string(),
            typ: Some("JWT".to_string()),
            edk: Some(EDK_ENGINE.encode(encrypted_key)),
        }
    }

    /// Decode the encrypted data key; absent or malformed is a claims error.
    pub fn encrypted_data_key(&self) -> Result<Vec<u8>, TokenError> {
        let edk = self
            .edk
            .as_deref()
            .filter(|edk| !edk.is_empty())
            .ok_or_else(|| TokenError::invalid_claims("missing encrypted data key in header"))?;

        EDK_ENGINE
            .decode(edk)
            .map_err(|e| TokenError::invalid_claims(format!("invalid encrypted data key: {}", e)))
    }
}

/// A token split into its parts, signature not yet checked.
#[derive(Debug)]
pub struct UnverifiedToken<'a> {
    header: EnvelopeHeader,
    signing_input: &'a str,
    payload: &'a str,
    signature: Vec<u8>,
}

impl<'a> UnverifiedToken<'a> {
    /// Header as declared by the token. Nothing in it is trusted yet.
    pub fn header(&self) -> &EnvelopeHeader {
        &self.header
    }

    /// Verify the HS384 signature with `key`, then decode the claims.
    pub fn verify(&self, key: &[u8]) -> Result<Claims, TokenError> {
        let key = hmac::Key::new(hmac::HMAC_SHA384, key);
        hmac::verify(&key, self.signing_input.as_bytes(), &self.signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let payload = URL_SAFE_NO_PAD
            .decode(self.payload)
            .map_err(|e| TokenError::invalid_claims(format!("undecodable payload: {}", e)))?;
        Ok(serde_json::from_slice(&payload)?)
    }
}

/// Serialize and sign `claims`, embedding `encrypted_key` in the header.
pub fn encode(encrypted_key: &[u8], claims: &Claims, key: &[u8]) -> Result<String, TokenError> {
    let header = serde_json::to_vec(&EnvelopeHeader::new(encrypted_key))
        .map_err(|e| TokenError::internal(format!("header serialization failed: {}", e)))?;
    let payload = serde_json::to_vec(claims)
        .map_err(|e| TokenError::internal(format!("claims serialization failed: {}", e)))?;

    let mut token = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload)
    );

    let signing_key = hmac::Key::new(hmac::HMAC_SHA384, key);
    let tag = hmac::sign(&signing_key, token.as_bytes());

    token.push('.');
    token.push_str(&URL_SAFE_NO_PAD.encode(tag.as_ref()));
    Ok(token)
}

/// Split a compact token and decode its header without verifying anything.
pub fn decode_unverified(token: &str) -> Result<UnverifiedToken<'_>, TokenError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::invalid_token("token must have three parts"));
    };

    let header_json = URL_SAFE_NO_PAD.decode(header_b64)?;
    let header: EnvelopeHeader = serde_json::from_slice(&header_json)
        .map_err(|e| TokenError::invalid_token(format!("malformed header: {}", e)))?;
    let signature = URL_SAFE_NO_PAD.decode(signature)?;

    // header.payload, without the trailing signature segment
    let signing_input = &token[..header_b64.len() + 1 + payload.len()];

    Ok(UnverifiedToken {
        header,
        signing_input,
        payload,
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::claims::{TokenGrant, TokenType};
    use chrono::Utc;
    use std::time::Duration;

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn sample_claims() -> Claims {
        Claims::issue(
            &TokenGrant::new("alice", TokenType::Session),
            "issuer",
            "aud",
            Duration::from_secs(60),
            Utc::now(),
        )
    }

    #[test]
    fn test_encode_then_verify() {
        let claims = sample_claims();
        let token = encode(b"encrypted-key", &claims, KEY).unwrap();

        let parsed = decode_unverified(&token).unwrap();
        assert_eq!(parsed.header().alg, ENVELOPE_ALGORITHM);
        assert_eq!(parsed.header().encrypted_data_key().unwrap(), b"encrypted-key");
        assert_eq!(parsed.verify(KEY).unwrap(), claims);
    }

    #[test]
    fn test_wrong_key_is_invalid_signature() {
        let token = encode(b"edk", &sample_claims(), KEY).unwrap();
        let parsed = decode_unverified(&token).unwrap();

        let result = parsed.verify(b"another-key-another-key-another!!");
        assert!(matches!(result, Err(TokenError::InvalidSignature)));
    }

    #[test]
    fn test_tampered_payload_is_invalid_signature() {
        let token = encode(b"edk", &sample_claims(), KEY).unwrap();
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let mut forged = sample_claims();
        forged.user = "mallory".to_string();
        parts[1] = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let tampered = parts.join(".");

        let parsed = decode_unverified(&tampered).unwrap();
        assert!(matches!(parsed.verify(KEY), Err(TokenError::InvalidSignature)));
    }

    #[test]
    fn test_wrong_part_count() {
        assert!(matches!(
            decode_unverified("a.b"),
            Err(TokenError::InvalidToken(_))
        ));
        assert!(matches!(
            decode_unverified("a.b.c.d"),
            Err(TokenError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_missing_edk() {
        let header = EnvelopeHeader {
            alg: ENVELOPE_ALGORITHM.to_string(),
            typ: None,
            edk: None,
        };
        assert!(matches!(
            header.encrypted_data_key(),
            Err(TokenError::InvalidClaims(_))
        ));
    }

    #[test]
    fn test_malformed_edk() {
        let header = EnvelopeHeader {
            alg: ENVELOPE_ALGORITHM.to_string(),
            typ: None,
            edk: Some("not base64!".to_string()),
        };
        assert!(matches!(
            header.encrypted_data_key(),
            Err(TokenError::InvalidClaims(_))
        ));
    }

    #[test]
    fn test_edk_accepts_unpadded() {
        let header = EnvelopeHeader {
            alg: ENVELOPE_ALGORITHM.to_string(),
            typ: None,
            edk: Some(URL_SAFE_NO_PAD.encode(b"ab")),
        };
        assert_eq!(header.encrypted_data_key().unwrap(), b"ab");
    }
}
