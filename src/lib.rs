//! vision-relay: webcam frame relay
//!
//! Browser captures are described by a vision-language model and rendered
//! back into images by a text-to-image service, with every state transition
//! fanned out to live viewer pages.
//!
//! ## Architecture
//!
//! - **Queue Processor**: single-flight background drain of pending captures
//! - **Pipeline Orchestrator**: paced capture → describe → generate requests
//! - **Event Bus**: fire-and-forget broadcast of relay events to websockets
//! - **Record Store**: sled-backed captures, descriptions and generations

pub mod api;
pub mod broadcast;
pub mod config;
pub mod generator;
pub mod pipeline;
pub mod storage;
pub mod types;
pub mod vision;

// Re-export configuration
pub use config::RelayConfig;

// Re-export commonly used types
pub use types::{
    CaptureStatus, CapturedImage, Description, GeneratedImage, NewCapture, PipelineChain,
    RelayEvent,
};

// Re-export core components
pub use broadcast::EventBus;
pub use pipeline::{DrainOutcome, PipelineError, PipelineOrchestrator, QueueProcessor};
pub use storage::{MediaStore, RecordStore, SledStore, StorageError};
