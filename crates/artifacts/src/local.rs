//! Filesystem artifact store
//!
//! Bucket-per-kind directories under a configured root:
//! `{root}/inputs/{key}`, `{root}/audio-outputs/{key}`,
//! `{root}/video-outputs/{key}`. Writes go through a temporary file and an
//! atomic rename so a crashed put never leaves a readable partial object.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use eca_config::ArtifactStoreConfig;
use eca_core::{ArtifactError, ArtifactKind, ArtifactReference, ArtifactStore, TurnId};

use crate::content_key;
use crate::presign::PresignToken;

pub struct LocalArtifactStore {
    root: PathBuf,
    token: PresignToken,
    public_base_url: String,
}

impl LocalArtifactStore {
    pub fn new(config: ArtifactStoreConfig) -> Self {
        Self {
            root: PathBuf::from(config.root_dir),
            token: PresignToken::new(config.presign_secret),
            public_base_url: config.public_base_url,
        }
    }

    fn object_file(&self, kind: ArtifactKind, key: &str) -> Result<PathBuf, ArtifactError> {
        // Keys are hex digests; anything else is a forged reference
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ArtifactError::InvalidReference(format!(
                "malformed artifact key: {:?}",
                key
            )));
        }
        Ok(self.root.join(kind.bucket()).join(key))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(
        &self,
        bytes: &[u8],
        kind: ArtifactKind,
        turn_id: TurnId,
    ) -> Result<ArtifactReference, ArtifactError> {
        let key = content_key(bytes);
        let path = self.object_file(kind, &key)?;
        let bucket_dir = self.root.join(kind.bucket());

        tokio::fs::create_dir_all(&bucket_dir)
            .await
            .map_err(|e| ArtifactError::Unavailable(e.to_string()))?;

        let tmp = bucket_dir.join(format!(".{}.tmp", key));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(kind = %kind, key = %key, size = bytes.len(), "stored artifact");
        Ok(ArtifactReference::new(kind, key, turn_id))
    }

    async fn get(&self, reference: &ArtifactReference) -> Result<Vec<u8>, ArtifactError> {
        let path = self.object_file(reference.kind, &reference.key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(reference.object_path()))
            }
            Err(e) => Err(ArtifactError::Io(e)),
        }
    }

    fn presign(
        &self,
        reference: &ArtifactReference,
        ttl: Duration,
    ) -> Result<String, ArtifactError> {
        self.token.sign(&self.public_base_url, reference, ttl)
    }

    async fn health(&self) -> bool {
        match tokio::fs::create_dir_all(&self.root).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, root = %self.root.display(), "artifact root not writable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &std::path::Path) -> LocalArtifactStore {
        LocalArtifactStore::new(ArtifactStoreConfig {
            root_dir: dir.to_string_lossy().into_owned(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let payload = vec![0u8, 1, 2, 250, 251, 252];

        let reference = store
            .put(&payload, ArtifactKind::AvatarVideo, TurnId::new())
            .await
            .unwrap();
        assert_eq!(store.get(&reference).await.unwrap(), payload);

        // Bytes land under the kind's bucket directory
        assert!(dir
            .path()
            .join("video-outputs")
            .join(&reference.key)
            .exists());
    }

    #[tokio::test]
    async fn test_forged_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let reference = ArtifactReference::new(
            ArtifactKind::InputMedia,
            "../../etc/passwd".to_string(),
            TurnId::new(),
        );
        assert!(matches!(
            store.get(&reference).await,
            Err(ArtifactError::InvalidReference(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_object_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let reference =
            ArtifactReference::new(ArtifactKind::InputMedia, "ab".repeat(32), TurnId::new());
        assert!(matches!(
            store.get(&reference).await,
            Err(ArtifactError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_health_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir.path().join("nested"));
        assert!(store.health().await);
    }
}
