//! Texture pipeline - the consumer-facing API.
//!
//! Ties the batch coordinator to the upload strategies and hands finished
//! textures to the tile world. Each batch captures the strategy active when
//! it was issued, so switching strategy never affects a batch in flight.

use crate::batch::BatchCoordinator;
use crate::config::Config;
use crate::decode::ImageDecoder;
use crate::error::{ContextError, PipelineError, Result};
use crate::gpu::{ContextGuard, ContextId, ContextProvider, TextureHandle};
use crate::task::RawPayload;
use crate::transport::Transport;
use crate::upload::{SerializedUploadStrategy, SharedContextUploadStrategy, StrategyKind, UploadStrategy};
use crate::world::{EntityId, World};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Outcome of one per-frame poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Textures that became available this frame
    pub finished: usize,
    /// Textures handed to entities this frame
    pub assigned: usize,
    /// Textures still waiting for an entity
    pub unassigned: usize,
}

/// One unresolved batch. Leaves the count when dropped, even if processing
/// the batch panicked.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(count))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct TexturePipeline {
    coordinator: BatchCoordinator,
    serialized: Arc<SerializedUploadStrategy>,
    shared: Option<Arc<SharedContextUploadStrategy>>,
    active: StrategyKind,
    unassigned: VecDeque<TextureHandle>,
    in_flight: Arc<AtomicUsize>,
}

impl TexturePipeline {
    /// Build the pipeline around the primary context.
    ///
    /// The shared-context strategy is set up eagerly. If that fails it stays
    /// unavailable, and a configuration asking for it falls back to the
    /// serialized strategy.
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        decoder: Arc<dyn ImageDecoder>,
        provider: Arc<dyn ContextProvider>,
        primary: ContextId,
    ) -> Result<Self> {
        let coordinator = BatchCoordinator::spawn(transport)?;
        let serialized = Arc::new(SerializedUploadStrategy::new(Arc::clone(&decoder), &config.decode));

        let shared = match SharedContextUploadStrategy::new(decoder, &config.decode, provider, primary) {
            Ok(strategy) => Some(Arc::new(strategy)),
            Err(e) => {
                log::warn!("Shared-context upload unavailable: {}", e);
                None
            }
        };

        let active = match config.upload.strategy {
            StrategyKind::SharedContext if shared.is_none() => {
                log::warn!("Falling back to serialized upload");
                StrategyKind::Serialized
            }
            kind => kind,
        };
        log::info!("Upload strategy: {}", active.label());

        Ok(Self {
            coordinator,
            serialized,
            shared,
            active,
            unassigned: VecDeque::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn coordinator(&self) -> &BatchCoordinator {
        &self.coordinator
    }

    /// Fetch one URL; the callback runs on the worker thread.
    pub fn fetch_one(&self, url: impl Into<String>, callback: impl FnOnce(bool, RawPayload) + Send + 'static) {
        self.coordinator.fetch_one(url, callback);
    }

    pub fn fetch_many(
        &self,
        count: usize,
        url: &str,
        callback: impl FnOnce(bool, Vec<RawPayload>) + Send + 'static,
    ) {
        self.coordinator.fetch_many(count, url, callback);
    }

    pub fn fetch_many_from_urls<S: AsRef<str>>(
        &self,
        urls: &[S],
        callback: impl FnOnce(bool, Vec<RawPayload>) + Send + 'static,
    ) {
        self.coordinator.fetch_many_from_urls(urls, callback);
    }

    /// Fetch `url` `count` times and turn the results into textures.
    pub fn load_textures(&self, count: usize, url: &str) {
        let on_done = self.bind_batch();
        self.coordinator.fetch_many(count, url, on_done);
    }

    /// Fetch each URL once and turn the results into textures.
    pub fn load_textures_from_urls<S: AsRef<str>>(&self, urls: &[S]) {
        let on_done = self.bind_batch();
        self.coordinator.fetch_many_from_urls(urls, on_done);
    }

    /// Completion callback delivering a batch to the strategy active now
    fn bind_batch(&self) -> impl FnOnce(bool, Vec<RawPayload>) + Send + 'static {
        let strategy = self.strategy(self.active);
        let ticket = InFlight::enter(&self.in_flight);

        move |any_success, payloads| {
            let _ticket = ticket;
            strategy.process_results(any_success, payloads);
        }
    }

    fn strategy(&self, kind: StrategyKind) -> Arc<dyn UploadStrategy> {
        match (kind, &self.shared) {
            (StrategyKind::SharedContext, Some(shared)) => Arc::clone(shared) as Arc<dyn UploadStrategy>,
            _ => Arc::clone(&self.serialized) as Arc<dyn UploadStrategy>,
        }
    }

    /// Switch the strategy used by subsequent batches. Only allowed between
    /// batches.
    pub fn select_strategy(&mut self, kind: StrategyKind) -> Result<()> {
        if kind == self.active {
            return Ok(());
        }

        let in_flight = self.batches_in_flight();
        if in_flight > 0 {
            return Err(PipelineError::BatchesInFlight(in_flight));
        }
        if kind == StrategyKind::SharedContext && self.shared.is_none() {
            return Err(PipelineError::StrategyUnavailable(kind));
        }

        log::info!("Upload strategy: {} -> {}", self.active.label(), kind.label());
        self.active = kind;
        Ok(())
    }

    pub fn active_strategy(&self) -> StrategyKind {
        self.active
    }

    pub fn is_available(&self, kind: StrategyKind) -> bool {
        kind == StrategyKind::Serialized || self.shared.is_some()
    }

    /// Batches issued through `load_textures*` that have not resolved yet
    pub fn batches_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Payloads dropped by either strategy because they failed to decode
    pub fn decode_failures(&self) -> usize {
        self.serialized.decode_failures()
            + self.shared.as_ref().map_or(0, |s| s.decode_failures())
    }

    /// Textures finished but not yet claimed by an entity
    pub fn unassigned(&self) -> usize {
        self.unassigned.len()
    }

    /// Once per frame, on the thread owning the primary context: collect
    /// finished textures from every strategy and hand them to entities lacking
    /// one.
    ///
    /// Both strategies are drained so batches issued before a strategy switch
    /// still land.
    pub fn poll_and_upload(&mut self, ctx: &ContextGuard<'_>, world: &mut World) -> PollReport {
        let mut finished = self.serialized.poll_and_upload(ctx);
        if let Some(shared) = &self.shared {
            finished.extend(shared.poll_and_upload(ctx));
        }

        let report_finished = finished.len();
        self.unassigned.extend(finished);
        let assigned = world.assign_textures(&mut self.unassigned);

        if assigned > 0 {
            log::debug!("Assigned {} texture(s), {} waiting", assigned, self.unassigned.len());
        }
        PollReport {
            finished: report_finished,
            assigned,
            unassigned: self.unassigned.len(),
        }
    }

    /// Despawn an entity and delete its texture
    pub fn release_texture(
        &mut self,
        ctx: &ContextGuard<'_>,
        world: &mut World,
        entity: EntityId,
    ) -> std::result::Result<(), ContextError> {
        match world.despawn(entity) {
            Some(handle) => ctx.delete_texture(handle),
            None => Ok(()),
        }
    }

    /// Delete every texture, assigned or not, leaving the entities waiting
    /// for new ones.
    pub fn release_textures(&mut self, ctx: &ContextGuard<'_>, world: &mut World) -> usize {
        let mut handles = world.take_textures();
        handles.extend(self.unassigned.drain(..));

        let released = handles.len();
        for handle in handles {
            if let Err(e) = ctx.delete_texture(handle) {
                log::error!("Failed to delete texture {:?}: {}", handle, e);
            }
        }
        released
    }
}
