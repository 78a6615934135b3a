//! Artifact references
//!
//! Media produced or consumed by a turn lives in the blob store; the rest of
//! the system only ever handles opaque content-addressed references to it.

use serde::{Deserialize, Serialize};

use crate::turn::TurnId;

/// Declared content kind of a stored artifact.
///
/// Kinds map one-to-one onto blob store buckets, so a reference is fully
/// resolvable from (kind, key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// User-supplied audio or video input
    InputMedia,
    /// Synthesized agent speech
    SpeechAudio,
    /// Rendered avatar video
    AvatarVideo,
}

impl ArtifactKind {
    /// Bucket name for this kind.
    pub fn bucket(&self) -> &'static str {
        match self {
            Self::InputMedia => "inputs",
            Self::SpeechAudio => "audio-outputs",
            Self::AvatarVideo => "video-outputs",
        }
    }

    /// Parse a bucket or route segment back into a kind.
    pub fn from_bucket(s: &str) -> Option<Self> {
        match s {
            "inputs" => Some(Self::InputMedia),
            "audio-outputs" => Some(Self::SpeechAudio),
            "video-outputs" => Some(Self::AvatarVideo),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.bucket())
    }
}

/// Content-addressed locator for a stored artifact.
///
/// The store owns the bytes, the turn owns the reference. References are
/// never reused across turns: two turns storing identical bytes get the same
/// key but distinct owning turn ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactReference {
    pub kind: ArtifactKind,
    /// Hex-encoded SHA-256 of the content
    pub key: String,
    /// Turn that produced or submitted the artifact
    pub turn_id: TurnId,
}

impl ArtifactReference {
    pub fn new(kind: ArtifactKind, key: impl Into<String>, turn_id: TurnId) -> Self {
        Self {
            kind,
            key: key.into(),
            turn_id,
        }
    }

    /// Object path inside the store, `{bucket}/{key}`.
    pub fn object_path(&self) -> String {
        format!("{}/{}", self.kind.bucket(), self.key)
    }
}
