//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub artifacts: ArtifactStoreConfig,

    #[serde(default)]
    pub engines: EnginesConfig,

    #[serde(default)]
    pub defaults: DefaultProviders,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_sessions() -> usize {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// ScyllaDB connection configuration for the conversation state store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// False = in-memory state store (development only)
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_db_hosts")]
    pub hosts: Vec<String>,

    #[serde(default = "default_keyspace")]
    pub keyspace: String,

    #[serde(default = "default_replication_factor")]
    pub replication_factor: u8,
}

fn default_db_hosts() -> Vec<String> {
    std::env::var("ECA_DB_HOSTS")
        .map(|s| s.split(',').map(|h| h.trim().to_string()).collect())
        .unwrap_or_else(|_| vec!["127.0.0.1:9042".to_string()])
}

fn default_keyspace() -> String {
    "eca_backend".to_string()
}

fn default_replication_factor() -> u8 {
    1
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hosts: default_db_hosts(),
            keyspace: default_keyspace(),
            replication_factor: default_replication_factor(),
        }
    }
}

/// Artifact store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactBackendKind {
    /// In-process map, contents lost on restart
    #[default]
    Memory,
    /// Bucket-per-kind directories under `root_dir`
    Local,
}

/// Blob store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactStoreConfig {
    #[serde(default)]
    pub backend: ArtifactBackendKind,

    #[serde(default = "default_artifact_root")]
    pub root_dir: String,

    /// Base URL presigned artifact links are minted under
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Secret for presign tokens. Must be set outside development.
    #[serde(default)]
    pub presign_secret: String,

    #[serde(default = "default_presign_ttl_secs")]
    pub presign_ttl_secs: u64,
}

fn default_artifact_root() -> String {
    "data/artifacts".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_presign_ttl_secs() -> u64 {
    900
}

impl Default for ArtifactStoreConfig {
    fn default() -> Self {
        Self {
            backend: ArtifactBackendKind::default(),
            root_dir: default_artifact_root(),
            public_base_url: default_public_base_url(),
            presign_secret: String::new(),
            presign_ttl_secs: default_presign_ttl_secs(),
        }
    }
}

/// One capability engine endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub base_url: String,

    /// API credential sent as a bearer token; optional for in-cluster engines
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_engine_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_engine_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

impl EngineConfig {
    fn with_url(url: &str, timeout_secs: u64) -> Self {
        Self {
            base_url: url.to_string(),
            api_key: None,
            timeout_secs,
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

/// All four capability engines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnginesConfig {
    #[serde(default = "default_perception_engine")]
    pub perception: EngineConfig,

    #[serde(default = "default_generation_engine")]
    pub generation: EngineConfig,

    #[serde(default = "default_voice_engine")]
    pub voice: EngineConfig,

    #[serde(default = "default_embodiment_engine")]
    pub embodiment: EngineConfig,

    /// Poll cadence for the embodiment job status endpoint
    #[serde(default = "default_poll_interval_secs")]
    pub embodiment_poll_interval_secs: u64,

    /// Give up on a rendering job after this long
    #[serde(default = "default_poll_timeout_secs")]
    pub embodiment_poll_timeout_secs: u64,
}

fn default_perception_engine() -> EngineConfig {
    // Perception runs heavy models; allow it the longest synchronous window
    EngineConfig::with_url("http://perception-engine:8000", 300)
}

fn default_generation_engine() -> EngineConfig {
    EngineConfig::with_url("http://generation-engine:8000", 120)
}

fn default_voice_engine() -> EngineConfig {
    EngineConfig::with_url("http://voice-engine:8000", 120)
}

fn default_embodiment_engine() -> EngineConfig {
    EngineConfig::with_url("http://embodiment-engine:8004", 30)
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_poll_timeout_secs() -> u64 {
    3600
}

impl Default for EnginesConfig {
    fn default() -> Self {
        Self {
            perception: default_perception_engine(),
            generation: default_generation_engine(),
            voice: default_voice_engine(),
            embodiment: default_embodiment_engine(),
            embodiment_poll_interval_secs: default_poll_interval_secs(),
            embodiment_poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

/// Default provider identities resolved into each new session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultProviders {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_voice_id")]
    pub voice_id: String,

    #[serde(default = "default_avatar_id")]
    pub avatar_id: String,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_voice_id() -> String {
    "default-voice".to_string()
}

fn default_avatar_id() -> String {
    "default-avatar".to_string()
}

impl Default for DefaultProviders {
    fn default() -> Self {
        Self {
            model: default_model(),
            voice_id: default_voice_id(),
            avatar_id: default_avatar_id(),
        }
    }
}

/// Pipeline execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Concurrency bound across turns, sized to the embodiment engine's
    /// rendering capacity
    #[serde(default = "default_max_concurrent_turns")]
    pub max_concurrent_turns: usize,

    /// History entries handed to the generation engine
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Reply text delivered when a turn fails outright
    #[serde(default = "default_failure_reply")]
    pub failure_reply: String,
}

fn default_max_concurrent_turns() -> usize {
    8
}

fn default_history_limit() -> usize {
    20
}

fn default_failure_reply() -> String {
    "I'm sorry, something went wrong on my end. Could you try that again?".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_turns: default_max_concurrent_turns(),
            history_limit: default_history_limit(),
            failure_reply: default_failure_reply(),
        }
    }
}

/// Logging and metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format
    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings. Strict environments reject insecure defaults.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, engine) in [
            ("engines.perception", &self.engines.perception),
            ("engines.generation", &self.engines.generation),
            ("engines.voice", &self.engines.voice),
            ("engines.embodiment", &self.engines.embodiment),
        ] {
            if engine.base_url.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("{}.base_url", name),
                    message: "engine base URL must not be empty".to_string(),
                });
            }
            if engine.timeout_secs == 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("{}.timeout_secs", name),
                    message: "timeout must be at least 1 second".to_string(),
                });
            }
        }

        if self.engines.embodiment_poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "engines.embodiment_poll_interval_secs".to_string(),
                message: "poll interval must be at least 1 second".to_string(),
            });
        }

        if self.pipeline.max_concurrent_turns == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.max_concurrent_turns".to_string(),
                message: "must allow at least one concurrent turn".to_string(),
            });
        }

        if self.environment.is_strict() && self.artifacts.presign_secret.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "artifacts.presign_secret".to_string(),
                message: "presign secret is required outside development".to_string(),
            });
        }

        if self.environment.is_strict() && !self.database.enabled {
            tracing::warn!("running a strict environment on the in-memory state store");
        }

        Ok(())
    }
}

/// Load settings from `config/default.toml`, an optional
/// `config/{env}.toml` overlay and `ECA_`-prefixed environment variables.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    if Path::new("config/default.toml").exists() {
        builder = builder.add_source(File::with_name("config/default"));
    }

    if let Some(env_name) = env {
        let overlay = format!("config/{}", env_name);
        if Path::new(&format!("{}.toml", overlay)).exists() {
            builder = builder.add_source(File::with_name(&overlay));
        }
    }

    builder = builder.add_source(Environment::with_prefix("ECA").separator("__"));

    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_default_engine_latency_profiles() {
        let engines = EnginesConfig::default();
        // Perception gets the longest synchronous window, embodiment the
        // shortest because completion is poll-based.
        assert_eq!(engines.perception.timeout_secs, 300);
        assert_eq!(engines.generation.timeout_secs, 120);
        assert_eq!(engines.voice.timeout_secs, 120);
        assert_eq!(engines.embodiment.timeout_secs, 30);
        assert_eq!(engines.embodiment_poll_interval_secs, 10);
        assert_eq!(engines.embodiment_poll_timeout_secs, 3600);
    }

    #[test]
    fn test_strict_env_requires_presign_secret() {
        let mut settings = Settings::default();
        settings.environment = RuntimeEnvironment::Production;
        assert!(settings.validate().is_err());

        settings.artifacts.presign_secret = "s3cr3t".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut settings = Settings::default();
        settings.pipeline.max_concurrent_turns = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_empty_engine_url_rejected() {
        let mut settings = Settings::default();
        settings.engines.voice.base_url = String::new();
        assert!(settings.validate().is_err());
    }
}
