//! HTTP handlers
//!
//! All handlers return `Response` via [`ApiResponse::ok`] or
//! [`ApiErrorResponse`]. Record-store calls are short single-row sled
//! operations and run inline.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::broadcast::EventBus;
use crate::generator::GeneratorError;
use crate::pipeline::{record_description, PipelineError, PipelineOrchestrator, QueueProcessor};
use crate::storage::{extension_for_upload, MediaStore, RecordStore, StorageError};
use crate::types::{
    CaptureStatus, CapturedImage, Description, GeneratedImage, NewCapture, RelayEvent,
};
use crate::vision::VisionDescriber;

// ============================================================================
// State
// ============================================================================

/// Shared state handed to every handler
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn RecordStore>,
    pub media: MediaStore,
    pub events: EventBus,
    pub processor: Arc<QueueProcessor>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub describer: Arc<dyn VisionDescriber>,
    /// Cancelled on shutdown; closes websocket forwarders
    pub shutdown: CancellationToken,
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub store_backend: &'static str,
    pub describer_backend: &'static str,
    pub describer_available: bool,
    pub queue_draining: bool,
    pub subscribers: usize,
}

/// Snapshot for viewers that (re)connect mid-run
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentState {
    pub latest_capture: Option<CapturedImage>,
    pub latest_description: Option<Description>,
    pub latest_generation: Option<GeneratedImage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub deleted_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearResult {
    pub files_removed: usize,
}

/// Body of `POST /api/text-descriptions`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionRequest {
    pub camera_image_id: String,
    pub description: String,
}

// ============================================================================
// Multipart
// ============================================================================

/// Parsed image upload
#[derive(Debug, Default)]
struct Upload {
    bytes: Vec<u8>,
    content_type: Option<String>,
    file_name: Option<String>,
    camera_id: Option<String>,
    frame_rate: Option<u32>,
    /// Any other text field, trimmed
    fields: HashMap<String, String>,
}

impl Upload {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, Response> {
    let mut upload = Upload::default();
    let mut has_image = false;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(ApiErrorResponse::bad_request(format!("Invalid multipart body: {e}"))),
        };

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                upload.content_type = field.content_type().map(str::to_string);
                upload.file_name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiErrorResponse::bad_request(format!("Failed to read image: {e}")))?;
                upload.bytes = bytes.to_vec();
                has_image = true;
            }
            "cameraId" => {
                let text = field.text().await.unwrap_or_default();
                upload.camera_id = Some(text.trim().to_string()).filter(|s| !s.is_empty());
            }
            "frameRate" => {
                // Browsers send whatever the track reports; ignore junk
                let text = field.text().await.unwrap_or_default();
                upload.frame_rate = text
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|fps| fps.is_finite() && *fps >= 0.0)
                    .map(|fps| fps.round() as u32);
            }
            _ => {
                if let Ok(text) = field.text().await {
                    upload.fields.insert(name, text.trim().to_string());
                }
            }
        }
    }

    if !has_image || upload.bytes.is_empty() {
        return Err(ApiErrorResponse::bad_request("Missing 'image' file field"));
    }
    Ok(upload)
}

async fn store_upload_file(media: &MediaStore, upload: &Upload) -> Result<String, Response> {
    let extension = extension_for_upload(upload.content_type.as_deref(), upload.file_name.as_deref());
    media
        .save_capture(&upload.bytes, &extension)
        .await
        .map_err(storage_error)
}

/// Drop a media file whose record never made it into the store.
async fn discard_file(media: &MediaStore, filename: &str) {
    if let Err(e) = media.remove(filename).await {
        warn!(filename, error = %e, "Failed to remove orphaned media file");
    }
}

// ============================================================================
// Error mapping
// ============================================================================

fn storage_error(e: StorageError) -> Response {
    error!(error = %e, "Storage error");
    match e {
        StorageError::NotFound { .. } => ApiErrorResponse::not_found(e.to_string()),
        StorageError::InvalidTransition { .. } => ApiErrorResponse::conflict(e.to_string()),
        _ => ApiErrorResponse::internal(format!("Storage error: {e}")),
    }
}

fn pipeline_error(e: PipelineError) -> Response {
    match &e {
        PipelineError::NotFound(_) => ApiErrorResponse::not_found(e.to_string()),
        PipelineError::NotRunnable { .. }
        | PipelineError::Store(StorageError::InvalidTransition { .. }) => {
            ApiErrorResponse::conflict(e.to_string())
        }
        PipelineError::DescriberUnavailable | PipelineError::Generator(GeneratorError::NotConfigured) => {
            ApiErrorResponse::service_unavailable(e.to_string())
        }
        PipelineError::Describer(_) | PipelineError::Generator(_) => {
            ApiErrorResponse::bad_gateway(e.to_string())
        }
        PipelineError::Store(_) => ApiErrorResponse::internal(e.to_string()),
    }
}

// ============================================================================
// Health
// ============================================================================

pub async fn health(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        store_backend: state.store.backend_name(),
        describer_backend: state.describer.backend_name(),
        describer_available: state.describer.is_available().await,
        queue_draining: state.processor.is_draining(),
        subscribers: state.events.subscriber_count(),
    })
}

// ============================================================================
// Captures
// ============================================================================

/// `POST /api/camera-images`: store a frame as pending and wake the queue.
pub async fn upload_capture(State(state): State<ApiState>, multipart: Multipart) -> Response {
    let upload = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(resp) => return resp,
    };
    let filename = match store_upload_file(&state.media, &upload).await {
        Ok(filename) => filename,
        Err(resp) => return resp,
    };

    let capture = match state.store.insert_capture(NewCapture {
        filename: filename.clone(),
        camera_id: upload.camera_id,
        frame_rate: upload.frame_rate,
        status: CaptureStatus::Pending,
    }) {
        Ok(capture) => capture,
        Err(e) => {
            discard_file(&state.media, &filename).await;
            return storage_error(e);
        }
    };

    info!(
        capture_id = %capture.id,
        filename = %capture.filename,
        bytes = upload.bytes.len(),
        "Capture uploaded"
    );
    state.events.publish(RelayEvent::new_frame(&capture));
    state.processor.request_drain();

    ApiResponse::created(capture)
}

pub async fn list_captures(State(state): State<ApiState>) -> Response {
    match state.store.list_captures() {
        Ok(captures) => ApiResponse::ok(captures),
        Err(e) => storage_error(e),
    }
}

pub async fn latest_capture(State(state): State<ApiState>) -> Response {
    match state.store.latest_capture() {
        Ok(capture) => ApiResponse::ok(capture),
        Err(e) => storage_error(e),
    }
}

pub async fn get_capture(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.get_capture(&id) {
        Ok(Some(capture)) => ApiResponse::ok(capture),
        Ok(None) => ApiErrorResponse::not_found(format!("No capture with id {id}")),
        Err(e) => storage_error(e),
    }
}

/// `POST /api/camera-images/:id/reset`: manual recovery of a failed or
/// stuck capture back to `pending`.
pub async fn reset_capture(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let capture = match state.store.get_capture(&id) {
        Ok(Some(capture)) => capture,
        Ok(None) => return ApiErrorResponse::not_found(format!("No capture with id {id}")),
        Err(e) => return storage_error(e),
    };

    match capture.status {
        CaptureStatus::Described => {
            return ApiErrorResponse::conflict(format!("Capture {id} is already described"));
        }
        CaptureStatus::Pending => return ApiResponse::ok(capture),
        CaptureStatus::Processing | CaptureStatus::Error => {}
    }

    // CAS so a drain finishing concurrently is never overwritten
    match state
        .store
        .transition_capture_status(&id, capture.status, CaptureStatus::Pending)
    {
        Ok(true) => {}
        Ok(false) => {
            return ApiErrorResponse::conflict(format!("Capture {id} changed status, retry"));
        }
        Err(e) => return storage_error(e),
    }

    warn!(capture_id = %id, from = %capture.status, "Capture manually reset to pending");
    state.processor.request_drain();

    match state.store.get_capture(&id) {
        Ok(Some(capture)) => ApiResponse::ok(capture),
        Ok(None) => ApiErrorResponse::not_found(format!("No capture with id {id}")),
        Err(e) => storage_error(e),
    }
}

// ============================================================================
// Descriptions & generations
// ============================================================================

pub async fn description_for_capture(
    State(state): State<ApiState>,
    Path(camera_image_id): Path<String>,
) -> Response {
    match state.store.description_for_capture(&camera_image_id) {
        Ok(description) => ApiResponse::ok(description),
        Err(e) => storage_error(e),
    }
}

/// `POST /api/text-descriptions`: attach a description written outside the
/// queue (external describer, manual entry) and mark the capture described.
pub async fn create_description(
    State(state): State<ApiState>,
    body: Result<Json<DescriptionRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return ApiErrorResponse::bad_request(rejection.body_text()),
    };
    let text = request.description.trim();
    if text.is_empty() {
        return ApiErrorResponse::bad_request("Description text is empty");
    }

    let id = request.camera_image_id;
    let capture = match state.store.get_capture(&id) {
        Ok(Some(capture)) => capture,
        Ok(None) => return ApiErrorResponse::not_found(format!("No capture with id {id}")),
        Err(e) => return storage_error(e),
    };

    match capture.status {
        CaptureStatus::Described | CaptureStatus::Error => {
            return ApiErrorResponse::conflict(format!("Capture {id} is {}", capture.status));
        }
        CaptureStatus::Pending => match state.store.transition_capture_status(
            &id,
            CaptureStatus::Pending,
            CaptureStatus::Processing,
        ) {
            Ok(true) => {}
            Ok(false) => {
                return ApiErrorResponse::conflict(format!("Capture {id} changed status, retry"));
            }
            Err(e) => return storage_error(e),
        },
        CaptureStatus::Processing => {}
    }

    let description = match record_description(state.store.as_ref(), &id, text) {
        Ok(Some(description)) => description,
        Ok(None) => {
            return ApiErrorResponse::conflict(format!("Capture {id} changed status, retry"));
        }
        Err(e) => return storage_error(e),
    };

    info!(capture_id = %id, description_id = %description.id, "Description stored");
    state
        .events
        .publish(RelayEvent::description_complete(&description));
    state.events.publish(RelayEvent::description_ready(&description));
    ApiResponse::created(description)
}

/// `POST /api/generated-images`: store an image rendered outside the relay
/// for an existing description.
pub async fn upload_generated(State(state): State<ApiState>, multipart: Multipart) -> Response {
    let upload = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(resp) => return resp,
    };
    let Some(description_id) = upload.field("textDescriptionId") else {
        return ApiErrorResponse::bad_request("Missing 'textDescriptionId' field");
    };

    let description = match state.store.get_description(description_id) {
        Ok(Some(description)) => description,
        Ok(None) => {
            return ApiErrorResponse::not_found(format!("No description with id {description_id}"));
        }
        Err(e) => return storage_error(e),
    };
    let prompt = upload.field("prompt").unwrap_or(&description.description);

    let extension = extension_for_upload(upload.content_type.as_deref(), upload.file_name.as_deref());
    let filename = match state.media.save_generated(&upload.bytes, &extension).await {
        Ok(filename) => filename,
        Err(e) => return storage_error(e),
    };

    let generation = match state
        .store
        .insert_generated_image(&filename, &description.id, prompt)
    {
        Ok(generation) => generation,
        Err(e) => {
            discard_file(&state.media, &filename).await;
            return storage_error(e);
        }
    };

    info!(
        generated_image_id = %generation.id,
        description_id = %description.id,
        filename = %generation.filename,
        "Generated image uploaded"
    );
    state
        .events
        .publish(RelayEvent::generation_complete(&generation, &description));
    ApiResponse::created(generation)
}

pub async fn list_generated(State(state): State<ApiState>) -> Response {
    match state.store.list_generated_images() {
        Ok(images) => ApiResponse::ok(images),
        Err(e) => storage_error(e),
    }
}

pub async fn current_state(State(state): State<ApiState>) -> Response {
    let snapshot = (|| -> Result<CurrentState, StorageError> {
        let latest_capture = state.store.latest_capture()?;
        let latest_description = match &latest_capture {
            Some(capture) => state.store.description_for_capture(&capture.id)?,
            None => None,
        };
        Ok(CurrentState {
            latest_capture,
            latest_description,
            latest_generation: state.store.latest_generated_image()?,
        })
    })();

    match snapshot {
        Ok(snapshot) => ApiResponse::ok(snapshot),
        Err(e) => storage_error(e),
    }
}

// ============================================================================
// Orchestrated pipeline
// ============================================================================

/// `POST /api/start-pipeline`: describe and render one frame inline.
pub async fn start_pipeline(State(state): State<ApiState>, multipart: Multipart) -> Response {
    let upload = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(resp) => return resp,
    };

    if let Err(e) = state.orchestrator.ensure_describer_available().await {
        return pipeline_error(e);
    }

    let filename = match store_upload_file(&state.media, &upload).await {
        Ok(filename) => filename,
        Err(resp) => return resp,
    };

    // Inserted already claimed so the background queue never picks it up
    let capture = match state.store.insert_capture(NewCapture {
        filename: filename.clone(),
        camera_id: upload.camera_id,
        frame_rate: upload.frame_rate,
        status: CaptureStatus::Processing,
    }) {
        Ok(capture) => capture,
        Err(e) => {
            discard_file(&state.media, &filename).await;
            return storage_error(e);
        }
    };

    info!(capture_id = %capture.id, "🚀 Starting pipeline");
    match state.orchestrator.run(&capture).await {
        Ok(run) => ApiResponse::ok(run),
        Err(e) => pipeline_error(e),
    }
}

pub async fn get_pipeline(
    State(state): State<ApiState>,
    Path(generated_image_id): Path<String>,
) -> Response {
    match state.store.resolve_chain(&generated_image_id) {
        Ok(Some(chain)) => ApiResponse::ok(chain),
        Ok(None) => ApiErrorResponse::not_found(format!("No pipeline for {generated_image_id}")),
        Err(e) => storage_error(e),
    }
}

// ============================================================================
// Housekeeping
// ============================================================================

pub async fn clear_all(State(state): State<ApiState>) -> Response {
    if let Err(e) = state.store.clear_all() {
        return storage_error(e);
    }
    let files_removed = match state.media.clear().await {
        Ok(count) => count,
        Err(e) => return storage_error(e),
    };

    warn!(files_removed, "All records and media cleared");
    state.events.publish(RelayEvent::DataCleared);
    ApiResponse::ok(ClearResult { files_removed })
}

pub async fn cleanup_undescribed(
    State(state): State<ApiState>,
    Path(keep_image_id): Path<String>,
) -> Response {
    // Rows only; the media files stay for the history page
    match state.store.delete_undescribed_except(&keep_image_id) {
        Ok(deleted_count) => ApiResponse::ok(CleanupResult { deleted_count }),
        Err(e) => storage_error(e),
    }
}
