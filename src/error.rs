use crate::reader::ReadError;
use crate::volume::WriteError;

/// Failure of a single conversion task. One bad task never affects its
/// siblings: the worker records the error on the task and moves on.
#[derive(thiserror::Error, Debug)]
pub enum TaskError {
    /// Geometry or metadata mismatch within a series.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Generic pipeline failure.
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// Modality detection or routing failed.
    #[error("unsupported modality: {0}")]
    UnsupportedModality(String),

    #[error(transparent)]
    FileSystem(#[from] std::io::Error),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Write(#[from] WriteError),

    /// Cooperative cancellation observed at a pipeline checkpoint.
    /// Not a failure; the manager finalizes the task as cancelled.
    #[error("task was cancelled")]
    Cancelled,
}
