//! Per-request capture → describe → generate pipeline
//!
//! ```text
//! claim ─▶ state-updated{capture}
//!   stage 1: describe ─▶ store ─▶ described ─▶ hold floor ─▶ state-updated{description}
//!   stage 2: generate ─▶ save  ─▶ store     ─▶ hold floor ─▶ state-updated{generation}
//!                                                           ─▶ generation-complete
//! ```
//!
//! Runs are serialized by an async gate: a second request waits for the
//! first to finish so viewers never see two chains interleaved. Broadcasts
//! already sent stay sent when a later stage fails.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info};

use super::pacing::{StageFloors, StageTimer};
use super::{describe_with_timeout, mark_failed, record_description, PipelineError};
use crate::broadcast::EventBus;
use crate::generator::{GeneratorError, ImageGenerator};
use crate::storage::{MediaStore, RecordStore, StorageError};
use crate::types::{
    CaptureStatus, CapturedImage, Description, GeneratedImage, RelayEvent, StateUpdate,
};
use crate::vision::VisionDescriber;

/// Records produced by one orchestrator run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineRun {
    pub capture: CapturedImage,
    pub description: Description,
    pub generation: GeneratedImage,
}

pub struct PipelineOrchestrator {
    store: Arc<dyn RecordStore>,
    describer: Arc<dyn VisionDescriber>,
    generator: Arc<dyn ImageGenerator>,
    media: MediaStore,
    events: EventBus,
    floors: StageFloors,
    call_timeout: Duration,
    gate: Mutex<()>,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        describer: Arc<dyn VisionDescriber>,
        generator: Arc<dyn ImageGenerator>,
        media: MediaStore,
        events: EventBus,
        floors: StageFloors,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            describer,
            generator,
            media,
            events,
            floors,
            call_timeout,
            gate: Mutex::new(()),
        }
    }

    pub const fn floors(&self) -> StageFloors {
        self.floors
    }

    /// Check describer liveness before accepting work.
    pub async fn ensure_describer_available(&self) -> Result<(), PipelineError> {
        let available = tokio::time::timeout(self.call_timeout, self.describer.is_available())
            .await
            .unwrap_or(false);
        if available {
            Ok(())
        } else {
            Err(PipelineError::DescriberUnavailable)
        }
    }

    /// Run the full chain for a stored capture.
    ///
    /// The capture must be `pending` (claimed here) or already `processing`
    /// (claimed by the caller).
    pub async fn run(&self, capture: &CapturedImage) -> Result<PipelineRun, PipelineError> {
        let _turn = self.gate.lock().await;

        let capture = self.claim(&capture.id)?;
        self.events.publish(RelayEvent::StateUpdated(StateUpdate::Capture {
            latest_capture: capture.clone(),
        }));

        let description = match self.describe_stage(&capture).await {
            Ok(description) => description,
            Err(e) => {
                error!(capture_id = %capture.id, error = %e, "[Orchestrator] Description stage failed");
                if !matches!(e, PipelineError::NotRunnable { .. }) {
                    if let Err(store_err) = mark_failed(self.store.as_ref(), &capture.id) {
                        error!(
                            capture_id = %capture.id,
                            error = %store_err,
                            "[Orchestrator] Failed to mark capture as error"
                        );
                    }
                }
                return Err(e);
            }
        };

        let generation = self.generate_stage(&description).await.map_err(|e| {
            error!(
                capture_id = %capture.id,
                description_id = %description.id,
                error = %e,
                "[Orchestrator] Generation stage failed"
            );
            e
        })?;

        self.events
            .publish(RelayEvent::generation_complete(&generation, &description));

        let capture = self.store.get_capture(&capture.id)?.unwrap_or(capture);
        Ok(PipelineRun {
            capture,
            description,
            generation,
        })
    }

    /// pending → processing, or accept a capture the caller already claimed.
    fn claim(&self, id: &str) -> Result<CapturedImage, PipelineError> {
        match self
            .store
            .transition_capture_status(id, CaptureStatus::Pending, CaptureStatus::Processing)
        {
            Ok(_) => {}
            Err(StorageError::NotFound { .. }) => return Err(PipelineError::NotFound(id.to_string())),
            Err(e) => return Err(e.into()),
        }

        let capture = self
            .store
            .get_capture(id)?
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))?;
        if capture.status != CaptureStatus::Processing {
            return Err(PipelineError::NotRunnable {
                id: capture.id,
                status: capture.status,
            });
        }
        Ok(capture)
    }

    async fn describe_stage(&self, capture: &CapturedImage) -> Result<Description, PipelineError> {
        let timer = StageTimer::start();

        let path = self.media.path_for(&capture.filename);
        let text = describe_with_timeout(self.describer.as_ref(), &path, self.call_timeout).await?;
        let Some(description) = record_description(self.store.as_ref(), &capture.id, &text)? else {
            let status = self
                .store
                .get_capture(&capture.id)?
                .map(|c| c.status)
                .ok_or_else(|| PipelineError::NotFound(capture.id.clone()))?;
            return Err(PipelineError::NotRunnable {
                id: capture.id.clone(),
                status,
            });
        };

        let work = timer.elapsed();
        let held = timer.hold_until(self.floors.description).await;
        info!(
            capture_id = %capture.id,
            description_id = %description.id,
            elapsed_ms = work.as_millis() as u64,
            held_ms = held.as_millis() as u64,
            "[Orchestrator] Description ready"
        );

        self.events.publish(RelayEvent::StateUpdated(StateUpdate::Description {
            latest_description: description.clone(),
        }));
        Ok(description)
    }

    async fn generate_stage(&self, description: &Description) -> Result<GeneratedImage, PipelineError> {
        let timer = StageTimer::start();

        let bytes = tokio::time::timeout(
            self.call_timeout,
            self.generator.generate(&description.description),
        )
        .await
        .map_err(|_| GeneratorError::Timeout(self.call_timeout))??;

        let filename = self
            .media
            .save_generated(&bytes, self.generator.output_extension())
            .await?;
        let generation = self.store.insert_generated_image(
            &filename,
            &description.id,
            &description.description,
        )?;

        let work = timer.elapsed();
        let held = timer.hold_until(self.floors.generation).await;
        info!(
            generated_id = %generation.id,
            description_id = %description.id,
            filename = %generation.filename,
            bytes = bytes.len(),
            elapsed_ms = work.as_millis() as u64,
            held_ms = held.as_millis() as u64,
            "[Orchestrator] Generation ready"
        );

        self.events.publish(RelayEvent::StateUpdated(StateUpdate::Generation {
            latest_generation: generation.clone(),
        }));
        Ok(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests_support::{idle_orchestrator, stored_capture};

    #[tokio::test]
    async fn test_missing_capture_is_not_found() {
        let (orchestrator, _store) = idle_orchestrator();
        let ghost = CapturedImage {
            id: "cam_deadbeef".to_string(),
            filename: "ghost.jpg".to_string(),
            camera_id: None,
            frame_rate: None,
            captured_at: chrono::Utc::now(),
            status: CaptureStatus::Pending,
        };
        assert!(matches!(
            orchestrator.run(&ghost).await,
            Err(PipelineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_described_capture_is_not_runnable() {
        let (orchestrator, store) = idle_orchestrator();
        let capture = stored_capture(store.as_ref(), CaptureStatus::Described);
        let err = orchestrator.run(&capture).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::NotRunnable {
                status: CaptureStatus::Described,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_describer_failure_marks_capture_error() {
        let (orchestrator, store) = idle_orchestrator();
        let capture = stored_capture(store.as_ref(), CaptureStatus::Pending);

        let err = orchestrator.run(&capture).await.unwrap_err();
        assert!(matches!(err, PipelineError::Describer(_)));
        assert_eq!(
            store.get_capture(&capture.id).unwrap().unwrap().status,
            CaptureStatus::Error
        );
    }

    #[tokio::test]
    async fn test_unavailable_describer_rejected_up_front() {
        let (orchestrator, _store) = idle_orchestrator();
        assert!(matches!(
            orchestrator.ensure_describer_available().await,
            Err(PipelineError::DescriberUnavailable)
        ));
    }
}
