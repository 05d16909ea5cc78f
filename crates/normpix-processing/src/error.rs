//! Error taxonomy for the normalization pipeline.
//!
//! Every error is typed and returned to the immediate caller; nothing is
//! swallowed. Engine startup failure is fatal at process level, while a
//! single conversion failure is per-request and leaves the engine `Ready`.

use normpix_storage::StorageError;
use thiserror::Error;

/// Engine lifecycle errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// The single engine startup could not allocate its caches/worker pool.
    #[error("Engine startup failed: {0}")]
    StartupFailed(String),

    /// A conversion was attempted while the engine was not in the `Ready`
    /// state; the decode path is never entered in that case.
    #[error("Engine is not ready")]
    NotReady,
}

/// Failures of the fixed decode → rotate → flatten → encode sequence.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Transform failed: {0}")]
    TransformFailed(String),

    #[error("Encode failed: {0}")]
    EncodeFailed(String),
}

/// Upload intake errors
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    TooLarge { size: u64, max: u64 },

    #[error("Image engine is not ready")]
    EngineNotReady,

    #[error("Conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Storage failed: {0}")]
    Storage(#[from] StorageError),
}
