//! Artifact Store Gateway
//!
//! Uniform put/get/presign interface over a content-addressed blob store,
//! with a bucket per artifact kind. Two backends: an in-process map for
//! tests and development, and a filesystem store for single-node
//! deployments. Keys are the SHA-256 of the content, so they are globally
//! unique and collision-free; presigned URLs grant time-bounded read access
//! only.

mod local;
mod memory;
mod presign;

pub use local::LocalArtifactStore;
pub use memory::InMemoryArtifactStore;
pub use presign::PresignToken;

use std::sync::Arc;

use eca_config::{ArtifactBackendKind, ArtifactStoreConfig};
use eca_core::ArtifactStore;

/// Hex SHA-256 of the content, the store's object key.
pub(crate) fn content_key(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(bytes))
}

/// Build the configured artifact store backend.
pub fn build_store(config: &ArtifactStoreConfig) -> Arc<dyn ArtifactStore> {
    match config.backend {
        ArtifactBackendKind::Memory => {
            tracing::info!("using in-memory artifact store");
            Arc::new(InMemoryArtifactStore::new(config.clone()))
        }
        ArtifactBackendKind::Local => {
            tracing::info!(root = %config.root_dir, "using local filesystem artifact store");
            Arc::new(LocalArtifactStore::new(config.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_key_is_sha256_hex() {
        let key = content_key(b"hello");
        assert_eq!(key.len(), 64);
        assert_eq!(
            key,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
