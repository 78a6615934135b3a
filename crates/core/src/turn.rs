//! Turn state machine types
//!
//! A turn is one request/response cycle: user input in, avatar video out.
//! `TurnStatus` is the controller's state machine; everything that a stage
//! produces is written onto the `Turn` before the status advances, so a turn
//! record can always be re-driven idempotently from its persisted state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::ArtifactReference;

/// Session identifier
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Turn identifier
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TurnId(pub Uuid);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Pipeline stage backed by an external capability engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Perception,
    Generation,
    Voice,
    Embodiment,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Perception => "perception",
            Self::Generation => "generation",
            Self::Voice => "voice",
            Self::Embodiment => "embodiment",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Turn status. `Created` is the only initial state; `Completed`, `Failed`
/// and `Degraded` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Created,
    Perceiving,
    Generating,
    Synthesizing,
    Embodying,
    Completed,
    Failed,
    Degraded,
}

impl TurnStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Degraded)
    }

    /// The stage an active turn in this status is waiting on.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Perceiving => Some(Stage::Perception),
            Self::Generating => Some(Stage::Generation),
            Self::Synthesizing => Some(Stage::Voice),
            Self::Embodying => Some(Stage::Embodiment),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Perceiving => "perceiving",
            Self::Generating => "generating",
            Self::Synthesizing => "synthesizing",
            Self::Embodying => "embodying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Degraded => "degraded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "perceiving" => Some(Self::Perceiving),
            "generating" => Some(Self::Generating),
            "synthesizing" => Some(Self::Synthesizing),
            "embodying" => Some(Self::Embodying),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "degraded" => Some(Self::Degraded),
            _ => None,
        }
    }
}

impl std::fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a turn terminalized as `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureReason {
    /// A stage reported it cannot process the input and no fallback applies
    Stage,
    /// Blob store or state store unreachable
    Fatal,
    /// Client- or system-initiated abort
    Cancelled,
}

/// Error detail persisted on a failed turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnFailure {
    pub reason: FailureReason,
    pub detail: String,
}

impl TurnFailure {
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureReason::Cancelled, "cancelled by client")
    }
}

/// What the user submitted for this turn.
///
/// Media input goes through perception; a text-only submission skips it and
/// the turn starts at generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnInput {
    pub artifact: Option<ArtifactReference>,
    pub text: Option<String>,
}

impl TurnInput {
    pub fn media(artifact: ArtifactReference) -> Self {
        Self {
            artifact: Some(artifact),
            text: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            artifact: None,
            text: Some(text.into()),
        }
    }

    pub fn has_media(&self) -> bool {
        self.artifact.is_some()
    }
}

/// Output of the perception stage: transcript plus perceived affect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptionSummary {
    pub transcript: String,
    /// Affect sentence carried into the generation prompt, e.g.
    /// "The user appears calm and mildly curious."
    pub affect: String,
    /// False when this summary is the degraded fallback
    pub perceived: bool,
}

impl PerceptionSummary {
    pub fn new(transcript: impl Into<String>, affect: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            affect: affect.into(),
            perceived: true,
        }
    }

    /// Fallback used when perception fails: unknown emotional context.
    pub fn neutral(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            affect: "The user's emotional state could not be determined.".to_string(),
            perceived: false,
        }
    }
}

/// Output of the generation stage.
///
/// `raw` is the unstyled content response, `text` the persona-adapted reply
/// that downstream stages consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyText {
    pub raw: Option<String>,
    pub text: String,
}

impl ReplyText {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            raw: None,
            text: text.into(),
        }
    }
}

/// Entry/exit timestamps for one stage attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
}

/// One conversational turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub session_id: SessionId,
    /// Monotonic per session; also the ordering key for transcript messages
    pub seq: u64,
    pub status: TurnStatus,
    pub input: TurnInput,
    pub perception: Option<PerceptionSummary>,
    pub reply: Option<ReplyText>,
    pub speech: Option<ArtifactReference>,
    pub video: Option<ArtifactReference>,
    /// Upstream rendering job id reported by the embodiment engine
    pub provider_job_id: Option<String>,
    /// Set when any stage fell back; a completed degraded turn terminalizes
    /// as `Degraded` instead of `Completed`
    pub degraded: bool,
    pub failure: Option<TurnFailure>,
    pub timings: Vec<StageTiming>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(session_id: SessionId, seq: u64, input: TurnInput) -> Self {
        let now = Utc::now();
        Self {
            id: TurnId::new(),
            session_id,
            seq,
            status: TurnStatus::Created,
            input,
            perception: None,
            reply: None,
            speech: None,
            video: None,
            provider_job_id: None,
            degraded: false,
            failure: None,
            timings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record stage entry.
    pub fn enter_stage(&mut self, stage: Stage) {
        self.timings.push(StageTiming {
            stage,
            entered_at: Utc::now(),
            exited_at: None,
        });
    }

    /// Record stage exit for the most recent entry of `stage`.
    pub fn exit_stage(&mut self, stage: Stage) {
        if let Some(t) = self
            .timings
            .iter_mut()
            .rev()
            .find(|t| t.stage == stage && t.exited_at.is_none())
        {
            t.exited_at = Some(Utc::now());
        }
    }

    /// Transcript text the user contributed this turn, if known yet.
    ///
    /// A degraded media turn carries an empty fallback transcript; that is
    /// unknown text, not empty text, so it yields `None` rather than an
    /// empty transcript entry.
    pub fn user_text(&self) -> Option<&str> {
        self.perception
            .as_ref()
            .map(|p| p.transcript.as_str())
            .filter(|t| !t.is_empty())
            .or(self.input.text.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!TurnStatus::Created.is_terminal());
        assert!(!TurnStatus::Embodying.is_terminal());
        assert!(TurnStatus::Completed.is_terminal());
        assert!(TurnStatus::Failed.is_terminal());
        assert!(TurnStatus::Degraded.is_terminal());
    }

    #[test]
    fn test_status_stage_mapping() {
        assert_eq!(TurnStatus::Perceiving.stage(), Some(Stage::Perception));
        assert_eq!(TurnStatus::Generating.stage(), Some(Stage::Generation));
        assert_eq!(TurnStatus::Synthesizing.stage(), Some(Stage::Voice));
        assert_eq!(TurnStatus::Embodying.stage(), Some(Stage::Embodiment));
        assert_eq!(TurnStatus::Created.stage(), None);
        assert_eq!(TurnStatus::Completed.stage(), None);
    }

    #[test]
    fn test_status_parse_round_trip() {
        for s in [
            TurnStatus::Created,
            TurnStatus::Perceiving,
            TurnStatus::Generating,
            TurnStatus::Synthesizing,
            TurnStatus::Embodying,
            TurnStatus::Completed,
            TurnStatus::Failed,
            TurnStatus::Degraded,
        ] {
            assert_eq!(TurnStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TurnStatus::parse("queued"), None);
    }

    #[test]
    fn test_stage_timings() {
        let mut turn = Turn::new(SessionId::new(), 1, TurnInput::text("hello"));
        turn.enter_stage(Stage::Generation);
        assert!(turn.timings[0].exited_at.is_none());
        turn.exit_stage(Stage::Generation);
        assert!(turn.timings[0].exited_at.is_some());
    }

    #[test]
    fn test_user_text_prefers_perception() {
        let mut turn = Turn::new(SessionId::new(), 1, TurnInput::text("typed"));
        assert_eq!(turn.user_text(), Some("typed"));
        turn.perception = Some(PerceptionSummary::new("spoken", "calm"));
        assert_eq!(turn.user_text(), Some("spoken"));
    }

    #[test]
    fn test_user_text_unknown_for_degraded_media_turn() {
        let input = ArtifactReference::new(
            crate::artifact::ArtifactKind::InputMedia,
            "cc".repeat(32),
            TurnId::new(),
        );
        let mut turn = Turn::new(SessionId::new(), 1, TurnInput::media(input));
        assert_eq!(turn.user_text(), None);
        turn.perception = Some(PerceptionSummary::neutral(""));
        assert_eq!(turn.user_text(), None);
    }
}
