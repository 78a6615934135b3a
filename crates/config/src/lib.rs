//! Configuration for the ECA backend
//!
//! All runtime configuration is enumerated here: database connection,
//! blob-store location and credentials, per-engine base URLs and API keys,
//! and the default provider identities. Nothing else affects core behavior.

mod settings;

pub use settings::{
    ArtifactBackendKind, ArtifactStoreConfig, DatabaseConfig, DefaultProviders, EngineConfig,
    EnginesConfig, ObservabilityConfig, PipelineConfig, RuntimeEnvironment, ServerConfig,
    Settings, load_settings,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
