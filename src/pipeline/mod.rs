//! Description and generation pipeline
//!
//! ## Paths
//!
//! ```text
//! upload ─▶ pending ─▶ QueueProcessor (background, describe only)
//! start-pipeline ─▶ PipelineOrchestrator (inline, describe + generate, paced)
//! ```
//!
//! Both paths claim a capture with the store's status compare-and-set, so
//! a capture is never described twice.

use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::storage::{RecordStore, StorageError};
use crate::types::{CaptureStatus, Description};
use crate::vision::{DescriberError, VisionDescriber};

mod error;
mod orchestrator;
pub mod pacing;
mod queue_processor;
mod scheduler;

pub use error::PipelineError;
pub use orchestrator::{PipelineOrchestrator, PipelineRun};
pub use pacing::{StageFloors, StageTimer};
pub use queue_processor::{DrainOutcome, DrainReport, QueueProcessor};
pub use scheduler::run_drain_scheduler;

/// Describe with an outer deadline; blank text counts as a failure.
pub(crate) async fn describe_with_timeout(
    describer: &dyn VisionDescriber,
    path: &Path,
    call_timeout: Duration,
) -> Result<String, DescriberError> {
    let text = tokio::time::timeout(call_timeout, describer.describe(path))
        .await
        .map_err(|_| DescriberError::Timeout(call_timeout))??;

    let text = text.trim();
    if text.is_empty() {
        return Err(DescriberError::EmptyResponse);
    }
    Ok(text.to_string())
}

/// Store the description of a claimed capture and mark it `described`.
///
/// `Ok(None)` when the capture left `processing` while the model was
/// running (manual reset, clear-all); nothing is stored in that case.
pub(crate) fn record_description(
    store: &dyn RecordStore,
    capture_id: &str,
    text: &str,
) -> Result<Option<Description>, StorageError> {
    match store.get_capture(capture_id)? {
        Some(capture) if capture.status == CaptureStatus::Processing => {}
        Some(_) => return Ok(None),
        None => return Err(StorageError::capture_not_found(capture_id)),
    }

    let description = store.insert_description(capture_id, text)?;
    match store.set_capture_status(capture_id, CaptureStatus::Described) {
        Ok(()) => Ok(Some(description)),
        Err(StorageError::InvalidTransition { from, .. }) => {
            warn!(
                capture_id,
                description_id = %description.id,
                status = %from,
                "Capture changed status while its description was stored"
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Mark a claimed capture `error`. `Ok(false)` when it already left
/// `processing`.
pub(crate) fn mark_failed(store: &dyn RecordStore, capture_id: &str) -> Result<bool, StorageError> {
    match store.set_capture_status(capture_id, CaptureStatus::Error) {
        Ok(()) => Ok(true),
        Err(StorageError::InvalidTransition { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}


#[cfg(test)]
mod tests {
    use super::tests_support::OfflineDescriber;
    use super::*;

    #[tokio::test]
    async fn test_describe_error_passes_through() {
        let err = describe_with_timeout(&OfflineDescriber, Path::new("x.jpg"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DescriberError::Unavailable(_)));
    }

    #[test]
    fn test_record_description_skips_reset_capture() {
        let store = crate::storage::InMemoryStore::new();
        let capture = tests_support::stored_capture(&store, CaptureStatus::Pending);

        assert!(record_description(&store, &capture.id, "a hallway").unwrap().is_none());
        assert!(store.description_for_capture(&capture.id).unwrap().is_none());
        assert!(!mark_failed(&store, &capture.id).unwrap());
        assert_eq!(
            store.get_capture(&capture.id).unwrap().unwrap().status,
            CaptureStatus::Pending
        );
    }

    #[test]
    fn test_record_description_marks_described() {
        let store = crate::storage::InMemoryStore::new();
        let capture = tests_support::stored_capture(&store, CaptureStatus::Processing);

        let description = record_description(&store, &capture.id, "a hallway")
            .unwrap()
            .unwrap();
        assert_eq!(description.camera_image_id, capture.id);
        assert_eq!(
            store.get_capture(&capture.id).unwrap().unwrap().status,
            CaptureStatus::Described
        );
    }

    #[tokio::test]
    async fn test_unavailable_describer_skips_drain() {
        let processor = tests_support::idle_processor();
        assert_eq!(
            processor.run_drain_cycle().await,
            DrainOutcome::DescriberUnavailable
        );
        assert!(!processor.is_draining());
    }
}
