//! Record types: CapturedImage, CaptureStatus, Description, GeneratedImage,
//! PipelineChain

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Record Ids
// ============================================================================

/// Prefix for captured-image ids (`cam_1a2b3c4d`)
pub const CAPTURE_ID_PREFIX: &str = "cam";
/// Prefix for description ids (`desc_1a2b3c4d`)
pub const DESCRIPTION_ID_PREFIX: &str = "desc";
/// Prefix for generated-image ids (`gen_1a2b3c4d`)
pub const GENERATED_ID_PREFIX: &str = "gen";

/// Generate a prefixed record id with 4 random bytes of hex.
pub fn generate_id(prefix: &str) -> String {
    format!("{}_{:08x}", prefix, rand::random::<u32>())
}

// ============================================================================
// Capture Status
// ============================================================================

/// Processing status of a captured image.
///
/// ```text
/// Pending ──pickup──▶ Processing ──ok──▶ Described
///                                └─fail─▶ Error
/// ```
///
/// `Described` and `Error` are terminal. Only a manual reset moves a capture
/// back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStatus {
    Pending,
    Processing,
    Described,
    Error,
}

impl CaptureStatus {
    /// Whether the state machine allows `self → next`.
    ///
    /// Re-applying the current status is allowed (status writes are idempotent).
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Described)
                | (Self::Processing, Self::Error)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Described => "described",
            Self::Error => "error",
        }
    }
}

impl Default for CaptureStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

/// A webcam frame uploaded by a capture page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedImage {
    pub id: String,
    /// File name inside the captures directory
    pub filename: String,
    /// Source device id reported by the browser
    #[serde(default)]
    pub camera_id: Option<String>,
    /// Capture frame rate reported by the browser
    #[serde(default)]
    pub frame_rate: Option<u32>,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub status: CaptureStatus,
}

/// Fields supplied by the caller when recording a new capture.
#[derive(Debug, Clone, Default)]
pub struct NewCapture {
    pub filename: String,
    pub camera_id: Option<String>,
    pub frame_rate: Option<u32>,
    /// Initial status; `Pending` unless the caller claims the capture itself.
    pub status: CaptureStatus,
}

impl NewCapture {
    pub fn pending(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Self::default()
        }
    }
}

/// Text produced by the vision describer for one capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Description {
    pub id: String,
    pub camera_image_id: String,
    pub description: String,
    pub generated_at: DateTime<Utc>,
}

/// Image rendered from a description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: String,
    pub filename: String,
    pub text_description_id: String,
    /// Prompt sent to the generator (the description text)
    pub prompt: String,
    pub generated_at: DateTime<Utc>,
}

/// A generated image resolved back through its description to the capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineChain {
    pub capture: CapturedImage,
    pub description: Description,
    pub generation: GeneratedImage,
}

impl PipelineChain {
    /// capture ≤ description ≤ generation
    pub fn timestamps_ordered(&self) -> bool {
        self.capture.captured_at <= self.description.generated_at
            && self.description.generated_at <= self.generation.generated_at
    }
}
