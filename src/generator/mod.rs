//! Text-to-image generator backends
//!
//! The orchestrator renders an image from each description through the
//! `ImageGenerator` trait. `HttpImageGenerator` posts `{"prompt": ...}` to a
//! hosted endpoint and returns the raw image body.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod http;

pub use http::HttpImageGenerator;

#[derive(Debug, Error)]
pub enum GeneratorError {
    /// No endpoint configured; generation is disabled.
    #[error("image generator endpoint not configured")]
    NotConfigured,

    #[error("image generation request failed: {0}")]
    Request(String),

    /// The endpoint answered with a non-success status.
    #[error("image generator returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("image generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("image generator returned an empty body")]
    EmptyBody,
}

impl From<reqwest::Error> for GeneratorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(Duration::ZERO)
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Async prompt → image bytes backend.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, GeneratorError>;

    /// File extension for the bytes this backend produces
    fn output_extension(&self) -> &str;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}
