//! Turn pipeline: controller, cancellation, and per-session delivery
//!
//! The controller drives each turn through perception, generation, voice
//! and embodiment, persisting every transition through the state store's
//! compare-and-swap before the next stage may start. Stage failures map to
//! per-stage fallbacks; the delivery hub fans progress and results out to
//! the session's live client connection.

mod controller;
pub mod delivery;

pub use controller::{PipelineError, TurnController};
pub use delivery::{DeliveryEvent, DeliveryHub, StageStatus};
