//! Upload strategies - how decoded batches become GPU textures.
//!
//! Both strategies receive batch results on the fetch worker thread and hand
//! finished textures out on the main thread, but they differ in where the
//! texture is created:
//!
//! - [`SerializedUploadStrategy`] decodes on the worker and queues pixels;
//!   textures are created during the main thread's poll.
//! - [`SharedContextUploadStrategy`] decodes and uploads on the worker, through
//!   a secondary context sharing the primary's objects; the poll only collects
//!   handles.

use crate::config::DecodeConfig;
use crate::decode::{decode_batch, DecodedImage, ImageDecoder};
use crate::error::ContextError;
use crate::gpu::{ContextGuard, ContextId, ContextProvider, TextureHandle};
use crate::task::RawPayload;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Which upload strategy a batch is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Serialized,
    SharedContext,
}

impl StrategyKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Serialized => "serialized",
            Self::SharedContext => "shared-context",
        }
    }
}

pub trait UploadStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Consume a batch result. Called on the fetch worker thread.
    fn process_results(&self, any_success: bool, payloads: Vec<RawPayload>);

    /// Collect textures finished since the last poll. Called once per frame on
    /// the thread owning the primary context.
    fn poll_and_upload(&self, ctx: &ContextGuard<'_>) -> Vec<TextureHandle>;

    /// Payloads dropped because they failed to decode
    fn decode_failures(&self) -> usize;
}

/// Decode on the worker, upload on the main thread.
pub struct SerializedUploadStrategy {
    decoder: Arc<dyn ImageDecoder>,
    parallel_decode: bool,
    pending: Mutex<Vec<DecodedImage>>,
    decode_failures: AtomicUsize,
}

impl SerializedUploadStrategy {
    pub fn new(decoder: Arc<dyn ImageDecoder>, config: &DecodeConfig) -> Self {
        Self {
            decoder,
            parallel_decode: config.parallel,
            pending: Mutex::new(Vec::new()),
            decode_failures: AtomicUsize::new(0),
        }
    }

    /// Decoded images waiting for the next poll
    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl UploadStrategy for SerializedUploadStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Serialized
    }

    fn process_results(&self, any_success: bool, payloads: Vec<RawPayload>) {
        if !any_success || payloads.is_empty() {
            log::info!("Batch produced no images");
            return;
        }

        let (images, failures) = decode_batch(self.decoder.as_ref(), &payloads, self.parallel_decode);
        self.decode_failures.fetch_add(failures, Ordering::Relaxed);
        log::debug!("Queued {} decoded image(s) for upload", images.len());

        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(images);
    }

    fn poll_and_upload(&self, ctx: &ContextGuard<'_>) -> Vec<TextureHandle> {
        let images = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));

        let mut handles = Vec::with_capacity(images.len());
        for image in &images {
            match ctx.create_texture(image) {
                Ok(handle) => handles.push(handle),
                Err(e) => log::error!(
                    "Texture upload of {}x{} image failed: {}",
                    image.width,
                    image.height,
                    e
                ),
            }
        }

        if !handles.is_empty() {
            log::debug!("Uploaded {} texture(s) on {:?}", handles.len(), ctx.context());
        }
        handles
    }

    fn decode_failures(&self) -> usize {
        self.decode_failures.load(Ordering::Relaxed)
    }
}

/// Decode and upload on the worker through a secondary shared context.
pub struct SharedContextUploadStrategy {
    decoder: Arc<dyn ImageDecoder>,
    parallel_decode: bool,
    provider: Arc<dyn ContextProvider>,
    secondary: ContextId,
    finished: Mutex<Vec<TextureHandle>>,
    decode_failures: AtomicUsize,
}

impl SharedContextUploadStrategy {
    /// Create the secondary context. Without it the strategy cannot exist.
    pub fn new(
        decoder: Arc<dyn ImageDecoder>,
        config: &DecodeConfig,
        provider: Arc<dyn ContextProvider>,
        primary: ContextId,
    ) -> Result<Self, ContextError> {
        let secondary = provider.create_shared_context(primary)?;
        log::info!("Shared upload context {:?} created alongside {:?}", secondary, primary);

        Ok(Self {
            decoder,
            parallel_decode: config.parallel,
            provider,
            secondary,
            finished: Mutex::new(Vec::new()),
            decode_failures: AtomicUsize::new(0),
        })
    }

    pub fn secondary_context(&self) -> ContextId {
        self.secondary
    }

    fn upload_all(&self, images: &[DecodedImage]) -> Result<Vec<TextureHandle>, ContextError> {
        // Released again when the guard drops, before the handles are published
        let ctx = ContextGuard::bind(self.provider.as_ref(), self.secondary)?;

        let mut handles = Vec::with_capacity(images.len());
        for image in images {
            match ctx.create_texture(image) {
                Ok(handle) => handles.push(handle),
                Err(e) => log::error!(
                    "Texture upload of {}x{} image failed: {}",
                    image.width,
                    image.height,
                    e
                ),
            }
        }
        Ok(handles)
    }
}

impl UploadStrategy for SharedContextUploadStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SharedContext
    }

    fn process_results(&self, any_success: bool, payloads: Vec<RawPayload>) {
        if !any_success || payloads.is_empty() {
            log::info!("Batch produced no images");
            return;
        }

        let (images, failures) = decode_batch(self.decoder.as_ref(), &payloads, self.parallel_decode);
        self.decode_failures.fetch_add(failures, Ordering::Relaxed);
        if images.is_empty() {
            return;
        }

        match self.upload_all(&images) {
            Ok(handles) => {
                log::debug!("Uploaded {} texture(s) on {:?}", handles.len(), self.secondary);
                self.finished
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(handles);
            }
            Err(e) => log::error!(
                "Cannot bind shared context {:?}, dropping {} image(s): {}",
                self.secondary,
                images.len(),
                e
            ),
        }
    }

    fn poll_and_upload(&self, _ctx: &ContextGuard<'_>) -> Vec<TextureHandle> {
        std::mem::take(&mut *self.finished.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn decode_failures(&self) -> usize {
        self.decode_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Decoder;
    use crate::gpu::{GpuCallKind, SoftwareGpu};
    use crate::testing::png_bytes;
    use std::thread;

    fn payloads() -> Vec<RawPayload> {
        vec![
            RawPayload::new(png_bytes(2, 2, [255, 0, 0, 255])),
            RawPayload::from("<html>not an image</html>"),
            RawPayload::new(png_bytes(4, 1, [0, 0, 255, 255])),
        ]
    }

    fn decoder() -> Arc<dyn ImageDecoder> {
        Arc::new(Decoder::default())
    }

    #[test]
    fn test_serialized_creates_textures_only_when_polled() {
        let gpu = Arc::new(SoftwareGpu::new());
        let primary = gpu.create_context(true);
        let strategy = Arc::new(SerializedUploadStrategy::new(decoder(), &DecodeConfig::default()));

        let worker_strategy = Arc::clone(&strategy);
        thread::spawn(move || worker_strategy.process_results(true, payloads()))
            .join()
            .unwrap();

        // Decoded, queued, but nothing touched the GPU yet
        assert_eq!(strategy.pending(), 2);
        assert_eq!(strategy.decode_failures(), 1);
        assert!(gpu.calls().is_empty());

        let ctx = ContextGuard::bind(&*gpu, primary).unwrap();
        let handles = strategy.poll_and_upload(&ctx);
        assert_eq!(handles.len(), 2);
        assert_eq!(strategy.pending(), 0);

        let this_thread = thread::current().id();
        let calls = gpu.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.kind == GpuCallKind::CreateTexture
            && c.thread == this_thread
            && c.context == primary));

        // Queue was drained; a second poll uploads nothing
        assert!(strategy.poll_and_upload(&ctx).is_empty());
        assert_eq!(gpu.calls().len(), 2);
    }

    #[test]
    fn test_shared_context_uploads_on_worker_thread() {
        let gpu = Arc::new(SoftwareGpu::new());
        let primary = gpu.create_context(true);
        gpu.make_current(Some(primary)).unwrap();

        let strategy = Arc::new(
            SharedContextUploadStrategy::new(
                decoder(),
                &DecodeConfig::default(),
                Arc::clone(&gpu) as Arc<dyn ContextProvider>,
                primary,
            )
            .unwrap(),
        );
        let secondary = strategy.secondary_context();
        assert!(gpu.shares_objects(primary, secondary).unwrap());

        let worker_strategy = Arc::clone(&strategy);
        let worker_gpu = Arc::clone(&gpu);
        let worker_thread = thread::spawn(move || {
            worker_strategy.process_results(true, payloads());
            // Secondary context is not left current on the worker
            assert_eq!(worker_gpu.current_context(), None);
            thread::current().id()
        })
        .join()
        .unwrap();

        let calls = gpu.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.kind == GpuCallKind::CreateTexture
            && c.thread == worker_thread
            && c.context == secondary));

        // Polling only reads the finished list
        let ctx = ContextGuard::assume_current(&*gpu, primary).unwrap();
        let handles = strategy.poll_and_upload(&ctx);
        assert_eq!(handles.len(), 2);
        assert_eq!(gpu.calls().len(), 2);

        // Handles created on the secondary context are usable from the primary
        for handle in handles {
            assert!(gpu.with_texture(&ctx, handle, |t| t.width).is_ok());
        }
    }

    #[test]
    fn test_shared_context_requires_sharing() {
        let gpu = Arc::new(SoftwareGpu::without_sharing());
        let primary = gpu.create_context(true);
        let result = SharedContextUploadStrategy::new(
            decoder(),
            &DecodeConfig::default(),
            gpu as Arc<dyn ContextProvider>,
            primary,
        );
        assert!(matches!(result, Err(ContextError::SharingUnsupported)));
    }

    #[test]
    fn test_failed_batch_skips_context_switch() {
        let gpu = Arc::new(SoftwareGpu::new());
        let primary = gpu.create_context(true);
        let strategy = SharedContextUploadStrategy::new(
            decoder(),
            &DecodeConfig::default(),
            Arc::clone(&gpu) as Arc<dyn ContextProvider>,
            primary,
        )
        .unwrap();

        strategy.process_results(false, Vec::new());
        strategy.process_results(true, vec![RawPayload::from("garbage")]);

        assert_eq!(strategy.decode_failures(), 1);
        assert!(gpu.calls().is_empty());
        assert_eq!(gpu.current_context(), None);
    }
}
