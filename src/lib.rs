//! Texfetch - background texture fetching and GPU upload.
//!
//! Architecture overview:
//! - One fetch worker thread drains a FIFO of HTTP requests
//! - Batches fan in through a one-shot join and report exactly once
//! - Decoding happens off the main thread, optionally across the rayon pool
//! - Two upload strategies: serialized (main thread creates textures) or
//!   shared context (worker uploads through a secondary context)
//! - The main thread polls once per frame and hands textures to tiles

pub mod batch;
pub mod config;
pub mod decode;
pub mod error;
pub mod gpu;
pub mod pipeline;
pub mod render;
pub mod state;
pub mod task;
pub mod transport;
pub mod upload;
pub mod worker;
pub mod world;

#[cfg(test)]
mod testing;

pub use batch::{BatchCoordinator, BatchJoin, Completion};
pub use config::Config;
pub use decode::{DecodedImage, Decoder, ImageDecoder};
pub use error::{PipelineError, Result};
pub use gpu::{ContextGuard, ContextId, ContextProvider, SoftwareGpu, TextureHandle};
pub use pipeline::{PollReport, TexturePipeline};
pub use task::{BatchResult, FetchOutcome, RawPayload};
pub use transport::{HttpTransport, Transport};
pub use upload::{StrategyKind, UploadStrategy};
pub use worker::FetchWorker;
pub use world::{EntityId, Tile, World};
