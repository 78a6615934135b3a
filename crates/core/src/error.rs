//! Failure taxonomy
//!
//! Stage adapters classify every failure as transient, stage-specific or
//! fatal; the controller is the only component that turns a classification
//! into a retry, fallback or abort decision.

use thiserror::Error;

use crate::turn::Stage;

/// Classified failure returned by a stage adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// Network error, timeout or 5xx. Retried inside the adapter; an
    /// exhausted retry budget escalates to `StageFailure`.
    #[error("transient failure in {stage}: {detail}")]
    Transient { stage: Stage, detail: String },

    /// The engine reports it cannot process this input. Handled by the
    /// controller's per-stage fallback policy.
    #[error("{stage} cannot process input: {detail}")]
    StageFailure { stage: Stage, detail: String },

    /// Misconfiguration or a dependency without which no stage can run.
    /// Fails the turn immediately, never retried.
    #[error("fatal failure in {stage}: {detail}")]
    Fatal { stage: Stage, detail: String },

    /// The turn was cancelled while the adapter was suspended.
    #[error("stage {stage} cancelled")]
    Cancelled { stage: Stage },
}

impl StageError {
    pub fn transient(stage: Stage, detail: impl Into<String>) -> Self {
        Self::Transient {
            stage,
            detail: detail.into(),
        }
    }

    pub fn stage_failure(stage: Stage, detail: impl Into<String>) -> Self {
        Self::StageFailure {
            stage,
            detail: detail.into(),
        }
    }

    pub fn fatal(stage: Stage, detail: impl Into<String>) -> Self {
        Self::Fatal {
            stage,
            detail: detail.into(),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Transient { stage, .. }
            | Self::StageFailure { stage, .. }
            | Self::Fatal { stage, .. }
            | Self::Cancelled { stage } => *stage,
        }
    }

    /// Escalate an exhausted transient failure to a stage failure.
    pub fn escalate(self) -> Self {
        match self {
            Self::Transient { stage, detail } => Self::StageFailure {
                stage,
                detail: format!("retries exhausted: {}", detail),
            },
            other => other,
        }
    }
}

/// Artifact store gateway errors.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("artifact store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid artifact reference: {0}")]
    InvalidReference(String),

    #[error("presign rejected: {0}")]
    Presign(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Conversation state store errors.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("turn not found: {0}")]
    TurnNotFound(String),

    #[error("turn {turn_id} status conflict: expected {expected}, found {actual}")]
    StatusConflict {
        turn_id: String,
        expected: String,
        actual: String,
    },

    #[error("turn already exists: {0}")]
    AlreadyExists(String),

    #[error("state store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
