//! Short-lived tokens that authorize a running job to talk to the web API.
//!
//! A token is `base64url(claims).base64url(tag)`, where `tag` is a keyed MAC of the encoded
//! claims. The web API shares the secret key and verifies tokens the same way.
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use orion::auth::{SecretKey, Tag};
use serde::{Deserialize, Serialize};

use crate::common::error::AudioqError::GenericError;

/// Scope of tokens used to download the original audio file.
pub const MEDIA_ORIGINAL_SCOPE: &str = "media:original";
/// Scope of tokens used by status hooks of a job item.
pub const ITEM_STATUS_SCOPE: &str = "analysis_jobs:item_status";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub scope: String,
    pub resource: String,
    /// Expiration as a unix timestamp in seconds.
    pub exp: i64,
}

pub fn generate_key() -> SecretKey {
    SecretKey::default()
}

pub fn serialize_key(key: &SecretKey) -> String {
    hex::encode(key.unprotected_as_bytes())
}

pub fn deserialize_key(key: &str) -> crate::Result<SecretKey> {
    let data = hex::decode(key.trim())
        .map_err(|e| GenericError(format!("Could not deserialize secret key: {e}")))?;
    let key = SecretKey::from_slice(&data)
        .map_err(|e| GenericError(format!("Could not create secret key from slice: {e}")))?;
    Ok(key)
}

pub struct TokenSigner {
    key: SecretKey,
}

impl TokenSigner {
    pub fn new(key: SecretKey) -> Self {
        Self { key }
    }

    /// Creates a signer from a hex encoded key. Without a key, a random one is generated;
    /// its tokens can only be verified by this process.
    pub fn from_hex(key: Option<&str>) -> crate::Result<Self> {
        let key = match key {
            Some(key) => deserialize_key(key)?,
            None => {
                log::warn!(
                    "No token secret key configured, generated tokens will not be accepted by the web API"
                );
                generate_key()
            }
        };
        Ok(Self::new(key))
    }

    pub fn sign(&self, claims: &TokenClaims) -> crate::Result<String> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let tag = orion::auth::authenticate(&self.key, payload.as_bytes())
            .map_err(|e| GenericError(format!("Cannot sign token: {e}")))?;
        Ok(format!(
            "{payload}.{}",
            URL_SAFE_NO_PAD.encode(tag.unprotected_as_bytes())
        ))
    }

    pub fn issue(
        &self,
        subject: &str,
        scope: &str,
        resource: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> crate::Result<String> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| GenericError(format!("Invalid token lifetime: {e}")))?;
        self.sign(&TokenClaims {
            sub: subject.to_string(),
            scope: scope.to_string(),
            resource: resource.to_string(),
            exp: (now + ttl).timestamp(),
        })
    }

    /// Checks the signature and the expiration of `token` and returns its claims.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> crate::Result<TokenClaims> {
        let invalid = || GenericError("Invalid token".to_string());

        let (payload, tag) = token.split_once('.').ok_or_else(invalid)?;
        let tag = URL_SAFE_NO_PAD.decode(tag).map_err(|_| invalid())?;
        let tag = Tag::from_slice(&tag).map_err(|_| invalid())?;
        orion::auth::authenticate_verify(&tag, &self.key, payload.as_bytes())
            .map_err(|_| invalid())?;

        let payload = URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid())?;
        let claims: TokenClaims = serde_json::from_slice(&payload).map_err(|_| invalid())?;
        if claims.exp <= now.timestamp() {
            return Err(GenericError("Token has expired".to_string()));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use crate::job::token::{
        MEDIA_ORIGINAL_SCOPE, TokenSigner, deserialize_key, generate_key, serialize_key,
    };

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn signer() -> TokenSigner {
        TokenSigner::from_hex(Some(KEY)).unwrap()
    }

    #[test]
    fn key_roundtrip() {
        let key = generate_key();
        let serialized = serialize_key(&key);
        assert_eq!(deserialize_key(&serialized).unwrap(), key);
    }

    #[test]
    fn invalid_key() {
        assert!(deserialize_key("xyz").is_err());
        assert!(TokenSigner::from_hex(Some("00ff")).is_err());
    }

    #[test]
    fn sign_and_verify() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let signer = signer();
        let token = signer
            .issue(
                "job_item:5",
                MEDIA_ORIGINAL_SCOPE,
                "audio_recordings/7",
                Duration::from_secs(3600),
                now,
            )
            .unwrap();
        let claims = signer.verify(&token, now).unwrap();
        assert_eq!(claims.sub, "job_item:5");
        assert_eq!(claims.scope, MEDIA_ORIGINAL_SCOPE);
        assert_eq!(claims.resource, "audio_recordings/7");
        assert_eq!(claims.exp, now.timestamp() + 3600);
    }

    #[test]
    fn expired_token() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let signer = signer();
        let token = signer
            .issue("s", "scope", "r", Duration::from_secs(60), now)
            .unwrap();
        assert!(signer.verify(&token, now + chrono::Duration::seconds(59)).is_ok());
        assert!(signer.verify(&token, now + chrono::Duration::seconds(60)).is_err());
    }

    #[test]
    fn tampered_token() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let signer = signer();
        let token = signer
            .issue("s", "scope", "r", Duration::from_secs(60), now)
            .unwrap();
        let (_, tag) = token.split_once('.').unwrap();
        let other = signer
            .issue("s", "admin", "r", Duration::from_secs(60), now)
            .unwrap();
        let (payload, _) = other.split_once('.').unwrap();
        assert!(signer.verify(&format!("{payload}.{tag}"), now).is_err());
        assert!(signer.verify("garbage", now).is_err());
    }

    #[test]
    fn token_from_other_key() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let token = TokenSigner::from_hex(None)
            .unwrap()
            .issue("s", "scope", "r", Duration::from_secs(60), now)
            .unwrap();
        assert!(signer().verify(&token, now).is_err());
    }
}
