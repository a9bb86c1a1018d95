//! Error types for every stage of the pipeline.

use crate::gpu::{ContextId, TextureHandle};
use crate::upload::StrategyKind;
use thiserror::Error;

/// Failure to retrieve a payload. Its `Display` text becomes the diagnostic
/// payload handed to a failed task's callback.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error code: {0}")]
    Status(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Response body exceeds {0} bytes")]
    BodyTooLarge(u64),

    #[error("I/O error while reading body: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Empty payload")]
    Empty,

    #[error("Unrecognized image format")]
    UnknownFormat,

    #[error("Image decoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Decoded image has zero area ({width}x{height})")]
    ZeroArea { width: u32, height: u32 },
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Context sharing is not supported by this device")]
    SharingUnsupported,

    #[error("Unknown context {0:?}")]
    UnknownContext(ContextId),

    #[error("Context {0:?} is current on another thread")]
    Busy(ContextId),

    #[error("No context is current on this thread")]
    NotCurrent,

    #[error("Context {expected:?} is not current on this thread (found {found:?})")]
    WrongContext {
        expected: ContextId,
        found: Option<ContextId>,
    },

    #[error("Unknown texture {0:?}")]
    UnknownTexture(TextureHandle),

    #[error("Texture {0:?} belongs to another sharing group")]
    ForeignTexture(TextureHandle),

    #[error("Invalid image data: expected {expected} bytes, got {actual}")]
    InvalidImage { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to spawn fetch worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Why a completion token yielded no value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("The request was dropped before it completed")]
    Dropped,

    #[error("Timed out waiting for completion")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Upload strategy {0:?} is not available")]
    StrategyUnavailable(StrategyKind),

    #[error("Cannot switch upload strategy while {0} batch(es) are in flight")]
    BatchesInFlight(usize),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
