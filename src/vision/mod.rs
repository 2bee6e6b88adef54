//! Vision describer backends
//!
//! A describer turns one stored image into free text. The queue processor
//! and the orchestrator only see the `VisionDescriber` trait; the shipped
//! backend is `OllamaDescriber` (Ollama chat API with base64 images).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod ollama;

pub use ollama::OllamaDescriber;

/// Errors from a describe call
#[derive(Debug, Error)]
pub enum DescriberError {
    /// The model server could not be reached at all.
    #[error("vision model server unavailable: {0}")]
    Unavailable(String),

    /// HTTP transport error or non-success status.
    #[error("vision request failed: {0}")]
    Request(String),

    /// The call did not finish within the configured timeout.
    #[error("vision request timed out after {0:?}")]
    Timeout(Duration),

    /// The image file could not be read.
    #[error("failed to read image: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse vision response: {0}")]
    Parse(String),

    /// The model answered with no usable text.
    #[error("vision model returned an empty description")]
    EmptyResponse,
}

impl From<reqwest::Error> for DescriberError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(Duration::ZERO)
        } else if e.is_connect() {
            Self::Unavailable(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Async image → text backend.
///
/// Implementors must be `Send + Sync` so they can be shared as
/// `Arc<dyn VisionDescriber>`.
#[async_trait]
pub trait VisionDescriber: Send + Sync {
    /// Describe the image stored at `image_path`.
    async fn describe(&self, image_path: &Path) -> Result<String, DescriberError>;

    /// Whether the model server answers at all. Never fails.
    async fn is_available(&self) -> bool;

    /// Whether the configured model is installed on the server. Never fails.
    async fn is_model_available(&self) -> bool;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}
