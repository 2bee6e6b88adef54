//! Background description queue
//!
//! Drains pending captures through the vision describer one at a time:
//!
//! ```text
//! pending ──claim (CAS)──▶ processing ──describe──▶ described
//!    │                          │                      └─ complete + ready
//!    └─ seeing                  └─ describing / error
//! ```
//!
//! A drain is single-flight per processor: a trigger that arrives while a
//! drain is running returns `AlreadyRunning` without touching anything.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::{describe_with_timeout, mark_failed, record_description, PipelineError};
use crate::broadcast::EventBus;
use crate::storage::{MediaStore, RecordStore, StorageError};
use crate::types::{CaptureStatus, CapturedImage, Description, RelayEvent, ViewerStatus};
use crate::vision::VisionDescriber;

const SEEING_MESSAGE: &str = "Analyzing image...";
const DESCRIBING_MESSAGE: &str = "Generating description...";

// ============================================================================
// Outcomes
// ============================================================================

/// Per-cycle counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub described: usize,
    pub failed: usize,
    /// Captures that were no longer pending when their turn came
    pub skipped: usize,
}

/// Result of one `run_drain_cycle` call. Never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another drain held the single-flight guard
    AlreadyRunning,
    /// Liveness check failed; no record was touched
    DescriberUnavailable,
    /// Listing pending captures failed
    StoreFailed(String),
    Drained(DrainReport),
}

enum ImageOutcome {
    Described,
    Failed,
    Skipped,
}

/// Releases the single-flight flag on drop.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// ============================================================================
// Queue Processor
// ============================================================================

pub struct QueueProcessor {
    store: Arc<dyn RecordStore>,
    describer: Arc<dyn VisionDescriber>,
    media: MediaStore,
    events: EventBus,
    call_timeout: Duration,
    in_flight: AtomicBool,
    wakeup: Notify,
}

impl QueueProcessor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        describer: Arc<dyn VisionDescriber>,
        media: MediaStore,
        events: EventBus,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            describer,
            media,
            events,
            call_timeout,
            in_flight: AtomicBool::new(false),
            wakeup: Notify::new(),
        }
    }

    /// Whether a drain currently holds the single-flight guard
    pub fn is_draining(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Ask the scheduler for an early drain (a new pending capture arrived).
    ///
    /// Requests made while nobody waits are remembered as one permit.
    pub fn request_drain(&self) {
        self.wakeup.notify_one();
    }

    /// Resolves once `request_drain` has been called
    pub async fn drain_requested(&self) {
        self.wakeup.notified().await;
    }

    /// Process every pending capture, newest first, one at a time.
    pub async fn run_drain_cycle(&self) -> DrainOutcome {
        let Some(_guard) = DrainGuard::acquire(&self.in_flight) else {
            debug!("[QueueProcessor] Drain already in flight, skipping trigger");
            return DrainOutcome::AlreadyRunning;
        };

        let available = tokio::time::timeout(self.call_timeout, self.describer.is_available())
            .await
            .unwrap_or(false);
        if !available {
            warn!(
                backend = self.describer.backend_name(),
                "[QueueProcessor] Describer unavailable, skipping drain"
            );
            return DrainOutcome::DescriberUnavailable;
        }

        let pending = match self.store.list_pending_captures() {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "[QueueProcessor] Failed to list pending captures");
                return DrainOutcome::StoreFailed(e.to_string());
            }
        };

        let mut report = DrainReport::default();
        if pending.is_empty() {
            return DrainOutcome::Drained(report);
        }

        let started = Instant::now();
        info!(pending = pending.len(), "[QueueProcessor] Draining pending captures");

        for capture in &pending {
            match self.process_capture(capture).await {
                ImageOutcome::Described => report.described += 1,
                ImageOutcome::Failed => report.failed += 1,
                ImageOutcome::Skipped => report.skipped += 1,
            }
        }

        info!(
            described = report.described,
            failed = report.failed,
            skipped = report.skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "[QueueProcessor] Drain complete"
        );
        DrainOutcome::Drained(report)
    }

    async fn process_capture(&self, capture: &CapturedImage) -> ImageOutcome {
        let id = capture.id.as_str();

        match self
            .store
            .transition_capture_status(id, CaptureStatus::Pending, CaptureStatus::Processing)
        {
            Ok(true) => {}
            Ok(false) | Err(StorageError::NotFound { .. }) => {
                debug!(capture_id = id, "[QueueProcessor] Capture no longer pending, skipping");
                return ImageOutcome::Skipped;
            }
            Err(e) => {
                error!(capture_id = id, error = %e, "[QueueProcessor] Failed to claim capture");
                return ImageOutcome::Failed;
            }
        }

        self.events
            .publish(RelayEvent::viewer_status(id, ViewerStatus::Seeing, SEEING_MESSAGE));

        match self.describe_and_record(capture).await {
            Ok(Some(description)) => {
                info!(
                    capture_id = id,
                    description_id = %description.id,
                    chars = description.description.len(),
                    "[QueueProcessor] Capture described"
                );
                self.events
                    .publish(RelayEvent::description_complete(&description));
                self.events.publish(RelayEvent::description_ready(&description));
                ImageOutcome::Described
            }
            Ok(None) => {
                warn!(
                    capture_id = id,
                    "[QueueProcessor] Capture left processing mid-description, result dropped"
                );
                ImageOutcome::Skipped
            }
            Err(e) => {
                warn!(capture_id = id, error = %e, "[QueueProcessor] Description failed");
                match mark_failed(self.store.as_ref(), id) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(
                            capture_id = id,
                            "[QueueProcessor] Capture left processing, not marking error"
                        );
                        return ImageOutcome::Skipped;
                    }
                    Err(store_err) => {
                        error!(
                            capture_id = id,
                            error = %store_err,
                            "[QueueProcessor] Failed to mark capture as error"
                        );
                    }
                }
                self.events
                    .publish(RelayEvent::viewer_status(id, ViewerStatus::Error, e.to_string()));
                ImageOutcome::Failed
            }
        }
    }

    async fn describe_and_record(
        &self,
        capture: &CapturedImage,
    ) -> Result<Option<Description>, PipelineError> {
        let path = self.media.path_for(&capture.filename);
        let text = describe_with_timeout(self.describer.as_ref(), &path, self.call_timeout).await?;

        self.events.publish(RelayEvent::viewer_status(
            &capture.id,
            ViewerStatus::Describing,
            DESCRIBING_MESSAGE,
        ));

        Ok(record_description(self.store.as_ref(), &capture.id, &text)?)
    }
}
