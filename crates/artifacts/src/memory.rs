//! In-memory artifact store
//!
//! Default for development and tests. Contents are lost on restart, which is
//! acceptable because artifact lifetime only has to cover the owning turn.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use eca_config::ArtifactStoreConfig;
use eca_core::{ArtifactError, ArtifactKind, ArtifactReference, ArtifactStore, TurnId};

use crate::content_key;
use crate::presign::PresignToken;

pub struct InMemoryArtifactStore {
    objects: RwLock<HashMap<(ArtifactKind, String), Vec<u8>>>,
    token: PresignToken,
    public_base_url: String,
}

impl InMemoryArtifactStore {
    pub fn new(config: ArtifactStoreConfig) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            token: PresignToken::new(config.presign_secret),
            public_base_url: config.public_base_url,
        }
    }

    /// Number of stored objects, for tests and diagnostics.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl Default for InMemoryArtifactStore {
    fn default() -> Self {
        Self::new(ArtifactStoreConfig::default())
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(
        &self,
        bytes: &[u8],
        kind: ArtifactKind,
        turn_id: TurnId,
    ) -> Result<ArtifactReference, ArtifactError> {
        let key = content_key(bytes);
        self.objects
            .write()
            .insert((kind, key.clone()), bytes.to_vec());
        tracing::debug!(kind = %kind, key = %key, size = bytes.len(), "stored artifact");
        Ok(ArtifactReference::new(kind, key, turn_id))
    }

    async fn get(&self, reference: &ArtifactReference) -> Result<Vec<u8>, ArtifactError> {
        self.objects
            .read()
            .get(&(reference.kind, reference.key.clone()))
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(reference.object_path()))
    }

    fn presign(
        &self,
        reference: &ArtifactReference,
        ttl: Duration,
    ) -> Result<String, ArtifactError> {
        self.token.sign(&self.public_base_url, reference, ttl)
    }

    async fn health(&self) -> bool {
        true
    }
}
