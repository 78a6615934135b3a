//! Shared application state

use std::sync::Arc;

use eca_artifacts::PresignToken;
use eca_config::Settings;
use eca_core::{ArtifactStore, StateStore};
use eca_pipeline::{DeliveryHub, TurnController};

use crate::registry::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<SessionRegistry>,
    pub controller: Arc<TurnController>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub state_store: Arc<dyn StateStore>,
    pub delivery: Arc<DeliveryHub>,
    pub presign: PresignToken,
}

impl AppState {
    pub fn new(
        settings: Settings,
        controller: Arc<TurnController>,
        artifacts: Arc<dyn ArtifactStore>,
        state_store: Arc<dyn StateStore>,
        delivery: Arc<DeliveryHub>,
    ) -> Self {
        let presign = PresignToken::new(settings.artifacts.presign_secret.clone());
        let registry = Arc::new(SessionRegistry::new(settings.server.max_sessions));
        Self {
            settings: Arc::new(settings),
            registry,
            controller,
            artifacts,
            state_store,
            delivery,
            presign,
        }
    }
}
