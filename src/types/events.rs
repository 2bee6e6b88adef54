//! Broadcast events delivered to live viewers
//!
//! Every event serializes as one JSON frame:
//!
//! ```json
//! {"event": "description-status", "payload": {"imageId": "cam_…", "status": "seeing"}}
//! ```
//!
//! Payload field names are camelCase because the viewer pages read them
//! straight from the frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::records::{CapturedImage, Description, GeneratedImage};

// ============================================================================
// Event Envelope
// ============================================================================

/// A state transition published on the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum RelayEvent {
    /// A capture was uploaded and recorded as pending
    NewFrame(NewFramePayload),
    /// Queue processor stage transition for one capture
    DescriptionStatus(DescriptionStatusPayload),
    /// A capture was described (queue processor or posted directly)
    DescriptionComplete(DescriptionCompletePayload),
    /// Secondary notification carrying the stored description
    DescriptionReady(DescriptionReadyPayload),
    /// Orchestrator stage snapshot
    StateUpdated(StateUpdate),
    /// A generated image was stored for a description
    GenerationComplete(GenerationCompletePayload),
    /// All records and media were wiped
    DataCleared,
}

impl RelayEvent {
    /// Wire name of the event (the `event` field of the frame).
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewFrame(_) => "new-frame",
            Self::DescriptionStatus(_) => "description-status",
            Self::DescriptionComplete(_) => "description-complete",
            Self::DescriptionReady(_) => "description-ready",
            Self::StateUpdated(_) => "state-updated",
            Self::GenerationComplete(_) => "generation-complete",
            Self::DataCleared => "data-cleared",
        }
    }

    pub fn new_frame(capture: &CapturedImage) -> Self {
        Self::NewFrame(NewFramePayload {
            id: capture.id.clone(),
            filename: capture.filename.clone(),
            timestamp: capture.captured_at,
            camera_id: capture.camera_id.clone(),
            frame_rate: capture.frame_rate,
        })
    }

    pub fn viewer_status(image_id: &str, status: ViewerStatus, message: impl Into<String>) -> Self {
        Self::DescriptionStatus(DescriptionStatusPayload {
            image_id: image_id.to_string(),
            status,
            message: message.into(),
        })
    }

    pub fn description_complete(description: &Description) -> Self {
        Self::DescriptionComplete(DescriptionCompletePayload {
            image_id: description.camera_image_id.clone(),
            description_id: description.id.clone(),
            description: description.description.clone(),
            status: "described".to_string(),
        })
    }

    pub fn description_ready(description: &Description) -> Self {
        Self::DescriptionReady(DescriptionReadyPayload {
            description_id: description.id.clone(),
            camera_image_id: description.camera_image_id.clone(),
            description: description.description.clone(),
        })
    }

    pub fn generation_complete(generation: &GeneratedImage, description: &Description) -> Self {
        Self::GenerationComplete(GenerationCompletePayload {
            generated_image_id: generation.id.clone(),
            filename: generation.filename.clone(),
            description: description.description.clone(),
            timestamp: generation.generated_at,
        })
    }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFramePayload {
    pub id: String,
    pub filename: String,
    pub timestamp: DateTime<Utc>,
    pub camera_id: Option<String>,
    pub frame_rate: Option<u32>,
}

/// What the "seeing" viewer shows while the queue processor works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewerStatus {
    Seeing,
    Describing,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionStatusPayload {
    pub image_id: String,
    pub status: ViewerStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionCompletePayload {
    pub image_id: String,
    pub description_id: String,
    pub description: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionReadyPayload {
    pub description_id: String,
    pub camera_image_id: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationCompletePayload {
    pub generated_image_id: String,
    pub filename: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// Orchestrator snapshot, tagged by the stage that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StateUpdate {
    Capture {
        #[serde(rename = "latestCapture")]
        latest_capture: CapturedImage,
    },
    Description {
        #[serde(rename = "latestDescription")]
        latest_description: Description,
    },
    Generation {
        #[serde(rename = "latestGeneration")]
        latest_generation: GeneratedImage,
    },
}
