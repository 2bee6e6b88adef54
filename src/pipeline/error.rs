//! Pipeline error type

use crate::generator::GeneratorError;
use crate::storage::StorageError;
use crate::types::CaptureStatus;
use crate::vision::DescriberError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Liveness check failed before any record was touched.
    #[error("vision describer unavailable")]
    DescriberUnavailable,

    #[error(transparent)]
    Describer(#[from] DescriberError),

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error(transparent)]
    Store(#[from] StorageError),

    /// The capture is not in a status the orchestrator can pick up.
    #[error("capture {id} is {status}, expected pending or processing")]
    NotRunnable { id: String, status: CaptureStatus },

    #[error("capture not found: {0}")]
    NotFound(String),
}
