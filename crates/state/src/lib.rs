//! Conversation state store
//!
//! Durable record of turns and transcript messages. The store is the commit
//! point of the pipeline: a stage result only exists once `update_turn` has
//! accepted it, and `update_turn` is compare-and-swap on turn status so two
//! controller instances can never double-drive one turn.
//!
//! Backends: `InMemoryStateStore` for tests and development,
//! `ScyllaStateStore` for production (CAS via lightweight transactions).

pub mod client;
pub mod memory;
pub mod schema;
pub mod scylla_store;

pub use client::{ScyllaClient, ScyllaConfig};
pub use memory::InMemoryStateStore;
pub use scylla_store::ScyllaStateStore;

use std::sync::Arc;

use eca_config::DatabaseConfig;
use eca_core::{StateError, StateStore};

/// Build the configured state store backend, ensuring schema for Scylla.
pub async fn build_store(config: &DatabaseConfig) -> Result<Arc<dyn StateStore>, StateError> {
    if !config.enabled {
        tracing::info!("using in-memory conversation state store");
        return Ok(Arc::new(InMemoryStateStore::new()));
    }

    let client = ScyllaClient::connect(ScyllaConfig {
        hosts: config.hosts.clone(),
        keyspace: config.keyspace.clone(),
        replication_factor: config.replication_factor,
    })
    .await?;
    client.ensure_schema().await?;

    Ok(Arc::new(ScyllaStateStore::new(client)))
}
