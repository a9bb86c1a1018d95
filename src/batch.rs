//! Fan-out/fan-in batching over the fetch worker.
//!
//! A batch turns one logical request into N fetch requests and folds their
//! results back into a single completion. The fold is a [`BatchJoin`]: a
//! counted barrier that keeps the successful payloads and fires its callback
//! exactly once, from whichever request resolves last.
//!
//! Completion order equals submission order only because the worker is a
//! single FIFO thread. A pooled worker would lose that guarantee.

use crate::error::{CompletionError, WorkerError};
use crate::task::{BatchResult, FetchOutcome, FetchRequest, ManyCallback, RawPayload};
use crate::transport::Transport;
use crate::worker::FetchWorker;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

struct JoinState {
    remaining: usize,
    collected: Vec<RawPayload>,
    on_complete: Option<ManyCallback>,
}

/// Counted barrier over a fixed number of fetch results.
pub struct BatchJoin {
    state: Mutex<JoinState>,
}

impl BatchJoin {
    pub fn new(count: usize, on_complete: ManyCallback) -> Self {
        Self {
            state: Mutex::new(JoinState {
                remaining: count,
                collected: Vec::new(),
                on_complete: Some(on_complete),
            }),
        }
    }

    /// Record one result. Returns true if this call fired the completion.
    ///
    /// The callback runs after the lock is released, on the calling thread.
    pub fn complete_one(&self, success: bool, payload: RawPayload) -> bool {
        let fired = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.remaining == 0 {
                log::error!("Batch received more results than it was created for");
                return false;
            }

            if success {
                state.collected.push(payload);
            }
            state.remaining -= 1;

            if state.remaining == 0 {
                let collected = std::mem::take(&mut state.collected);
                state.on_complete.take().map(|callback| (callback, collected))
            } else {
                None
            }
        };

        match fired {
            Some((callback, collected)) => {
                let any_success = !collected.is_empty();
                callback(any_success, collected);
                true
            }
            None => false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).remaining
    }
}

/// Channel-backed handle to a result that arrives on the worker thread.
///
/// If the worker drops the underlying requests at shutdown, the sending side
/// is dropped with them and the token reports [`CompletionError::Dropped`].
pub struct Completion<T> {
    rx: Receiver<T>,
}

impl<T> Completion<T> {
    /// Block until the result arrives.
    pub fn wait(self) -> Result<T, CompletionError> {
        self.rx.recv().map_err(|_| CompletionError::Dropped)
    }

    /// Block for at most `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, CompletionError> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => CompletionError::Timeout,
            RecvTimeoutError::Disconnected => CompletionError::Dropped,
        })
    }

    /// Non-blocking poll. `Ok(None)` means still pending.
    pub fn try_take(&self) -> Result<Option<T>, CompletionError> {
        match self.rx.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(CompletionError::Dropped),
        }
    }
}

/// Splits batch requests into fetch requests and joins their results.
pub struct BatchCoordinator {
    worker: FetchWorker,
}

impl BatchCoordinator {
    pub fn new(worker: FetchWorker) -> Self {
        Self { worker }
    }

    /// Spawn a worker over `transport` and coordinate batches on it
    pub fn spawn(transport: Arc<dyn Transport>) -> Result<Self, WorkerError> {
        Ok(Self::new(FetchWorker::spawn(transport)?))
    }

    pub fn worker(&self) -> &FetchWorker {
        &self.worker
    }

    /// Fetch one URL. The callback runs on the worker thread.
    pub fn fetch_one(
        &self,
        url: impl Into<String>,
        callback: impl FnOnce(bool, RawPayload) + Send + 'static,
    ) {
        self.worker.submit(FetchRequest::new(url, callback));
    }

    /// Fetch the same URL `count` times and report once all resolved.
    pub fn fetch_many(
        &self,
        count: usize,
        url: &str,
        callback: impl FnOnce(bool, Vec<RawPayload>) + Send + 'static,
    ) {
        self.submit_batch(std::iter::repeat(url).take(count), count, Box::new(callback));
    }

    /// Fetch each URL once and report once all resolved.
    pub fn fetch_many_from_urls<S: AsRef<str>>(
        &self,
        urls: &[S],
        callback: impl FnOnce(bool, Vec<RawPayload>) + Send + 'static,
    ) {
        self.submit_batch(urls.iter().map(AsRef::as_ref), urls.len(), Box::new(callback));
    }

    pub fn fetch_one_token(&self, url: impl Into<String>) -> Completion<FetchOutcome> {
        let (tx, rx) = bounded(1);
        self.fetch_one(url, move |success, payload| {
            let _ = tx.send(FetchOutcome { success, payload });
        });
        Completion { rx }
    }

    pub fn fetch_many_token(&self, count: usize, url: &str) -> Completion<BatchResult> {
        let (tx, rx) = bounded(1);
        self.fetch_many(count, url, move |any_success, payloads| {
            let _ = tx.send(BatchResult {
                any_success,
                payloads,
            });
        });
        Completion { rx }
    }

    pub fn fetch_many_from_urls_token<S: AsRef<str>>(&self, urls: &[S]) -> Completion<BatchResult> {
        let (tx, rx) = bounded(1);
        self.fetch_many_from_urls(urls, move |any_success, payloads| {
            let _ = tx.send(BatchResult {
                any_success,
                payloads,
            });
        });
        Completion { rx }
    }

    fn submit_batch<'a>(&self, urls: impl Iterator<Item = &'a str>, count: usize, callback: ManyCallback) {
        // No request would ever observe the zero transition, so resolve now
        if count == 0 {
            log::debug!("Empty batch resolved immediately");
            callback(false, Vec::new());
            return;
        }

        log::debug!("Submitting batch of {} fetch(es)", count);
        let join = Arc::new(BatchJoin::new(count, callback));
        for url in urls {
            let join = Arc::clone(&join);
            self.worker.submit(FetchRequest::new(url, move |success, payload| {
                join.complete_one(success, payload);
            }));
        }
    }
}
