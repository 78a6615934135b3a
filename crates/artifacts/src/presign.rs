//! Presigned read tokens
//!
//! A presigned URL is `{base}/v1/artifacts/{bucket}/{key}?expires=..&sig=..`
//! where `sig` is a SHA-256 token over the object path, the expiry and the
//! gateway secret. The serving route verifies the token and the expiry; the
//! signature never covers a write operation, so a leaked URL only ever grants
//! bounded read access.

use std::time::Duration;

use sha2::{Digest, Sha256};

use eca_core::{ArtifactError, ArtifactReference};

/// Verifier/minter for presign signatures.
#[derive(Debug, Clone)]
pub struct PresignToken {
    secret: String,
}

impl PresignToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn signature(&self, object_path: &str, expires_unix: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b"\x00");
        hasher.update(object_path.as_bytes());
        hasher.update(b"\x00");
        hasher.update(expires_unix.to_be_bytes());
        hex::encode(hasher.finalize())
    }

    /// Mint a presigned URL for the reference, valid for `ttl`.
    pub fn sign(
        &self,
        base_url: &str,
        reference: &ArtifactReference,
        ttl: Duration,
    ) -> Result<String, ArtifactError> {
        if self.secret.is_empty() {
            // Development convenience: unsigned links, no expiry enforcement
            return Ok(format!(
                "{}/v1/artifacts/{}",
                base_url.trim_end_matches('/'),
                reference.object_path()
            ));
        }

        let expires = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        let path = reference.object_path();
        let sig = self.signature(&path, expires);
        Ok(format!(
            "{}/v1/artifacts/{}?expires={}&sig={}",
            base_url.trim_end_matches('/'),
            path,
            expires,
            sig
        ))
    }

    /// Verify a presign query against an object path.
    pub fn verify(
        &self,
        object_path: &str,
        expires_unix: i64,
        sig: &str,
    ) -> Result<(), ArtifactError> {
        if self.secret.is_empty() {
            return Ok(());
        }

        if chrono::Utc::now().timestamp() > expires_unix {
            return Err(ArtifactError::Presign("link expired".to_string()));
        }

        let expected = self.signature(object_path, expires_unix);
        if expected != sig {
            return Err(ArtifactError::Presign("signature mismatch".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eca_core::{ArtifactKind, TurnId};

    fn reference() -> ArtifactReference {
        ArtifactReference::new(ArtifactKind::SpeechAudio, "deadbeef", TurnId::new())
    }

    #[test]
    fn test_sign_and_verify() {
        let token = PresignToken::new("secret");
        let url = token
            .sign("http://localhost:8080", &reference(), Duration::from_secs(60))
            .unwrap();

        // Pull expires and sig back out of the URL
        let query = url.split('?').nth(1).unwrap();
        let mut expires = 0i64;
        let mut sig = String::new();
        for pair in query.split('&') {
            let (k, v) = pair.split_once('=').unwrap();
            match k {
                "expires" => expires = v.parse().unwrap(),
                "sig" => sig = v.to_string(),
                _ => {}
            }
        }

        assert!(token
            .verify("audio-outputs/deadbeef", expires, &sig)
            .is_ok());
        // Wrong path fails
        assert!(token.verify("inputs/deadbeef", expires, &sig).is_err());
        // Tampered expiry fails
        assert!(token
            .verify("audio-outputs/deadbeef", expires + 1, &sig)
            .is_err());
    }

    #[test]
    fn test_expired_link_rejected() {
        let token = PresignToken::new("secret");
        let past = chrono::Utc::now().timestamp() - 10;
        let sig = token.signature("audio-outputs/deadbeef", past);
        let err = token.verify("audio-outputs/deadbeef", past, &sig);
        assert!(matches!(err, Err(ArtifactError::Presign(_))));
    }

    #[test]
    fn test_empty_secret_skips_verification() {
        let token = PresignToken::new("");
        assert!(token.verify("inputs/abc", 0, "anything").is_ok());
    }
}
