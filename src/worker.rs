//! Fetch worker - one background thread draining a FIFO of fetch requests.
//!
//! The worker is the only component that touches the network. Requests run
//! strictly one at a time in submission order, and each callback runs on the
//! worker thread before the next request is dequeued. A slow request stalls
//! everything queued behind it.
//!
//! A panicking callback is logged and the loop moves on to the next request.
//!
//! On shutdown the request in flight finishes; everything still queued is
//! dropped without its callback being invoked.

use crate::error::{FetchError, WorkerError};
use crate::task::{FetchRequest, RawPayload};
use crate::transport::Transport;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Queue contents guarded by the worker mutex
#[derive(Default)]
struct Queue {
    requests: VecDeque<FetchRequest>,
    shutdown: bool,
}

/// State shared between submitters and the loop thread
#[derive(Default)]
struct Shared {
    queue: Mutex<Queue>,
    wake: Condvar,
}

impl Shared {
    /// A panicking callback must not wedge the queue.
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the fetch thread. Dropping it shuts the thread down and joins it.
pub struct FetchWorker {
    shared: Arc<Shared>,
    thread_handle: Option<JoinHandle<()>>,
}

impl FetchWorker {
    /// Spawn the worker thread.
    pub fn spawn(transport: Arc<dyn Transport>) -> Result<Self, WorkerError> {
        let shared = Arc::new(Shared::default());
        let loop_shared = Arc::clone(&shared);

        let thread_handle = thread::Builder::new()
            .name("fetch-worker".to_string())
            .spawn(move || {
                log::info!("Fetch worker started");
                worker_loop(&loop_shared, transport.as_ref());
                log::info!("Fetch worker exiting");
            })
            .map_err(WorkerError::Spawn)?;

        Ok(Self {
            shared,
            thread_handle: Some(thread_handle),
        })
    }

    /// Enqueue a request. Never blocks on network work; callable from any thread.
    pub fn submit(&self, request: FetchRequest) {
        {
            let mut queue = self.shared.lock();
            if queue.shutdown {
                log::warn!("Fetch worker is shut down, dropping request for {}", request.url);
                return;
            }
            queue.requests.push_back(request);
        }
        self.shared.wake.notify_one();
    }

    /// Number of requests waiting to run (the one in flight is not counted)
    pub fn pending(&self) -> usize {
        self.shared.lock().requests.len()
    }

    /// Stop accepting work and let the loop exit after the request in flight.
    /// Does not wait; dropping the worker joins the thread.
    pub fn request_shutdown(&self) {
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.lock().shutdown
    }
}

impl Drop for FetchWorker {
    fn drop(&mut self) {
        log::debug!("Shutting down fetch worker");
        self.request_shutdown();

        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                log::warn!("Fetch worker panicked: {:?}", e);
            }
        }
    }
}

/// Main loop - runs until shutdown is requested
fn worker_loop(shared: &Shared, transport: &dyn Transport) {
    loop {
        let request = {
            let queue = shared.lock();
            let mut queue = shared
                .wake
                .wait_while(queue, |q| q.requests.is_empty() && !q.shutdown)
                .unwrap_or_else(PoisonError::into_inner);

            if queue.shutdown {
                let dropped = queue.requests.len();
                queue.requests.clear();
                if dropped > 0 {
                    log::info!("Dropped {} queued fetch request(s) at shutdown", dropped);
                }
                return;
            }

            match queue.requests.pop_front() {
                Some(request) => request,
                None => continue,
            }
        };

        // Network call and callback both run outside the lock
        let (success, payload) = execute(transport, &request.url);
        let url = request.url.clone();
        if let Err(cause) = panic::catch_unwind(AssertUnwindSafe(|| request.complete(success, payload))) {
            log::error!("Callback for {} panicked: {}", url, panic_message(&*cause));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Perform one GET. Only status 200 counts as success; anything else yields
/// the diagnostic text as the payload.
fn execute(transport: &dyn Transport, url: &str) -> (bool, RawPayload) {
    log::debug!("Fetching {}", url);

    match transport.get(url) {
        Ok(response) if response.status == 200 => {
            log::debug!("Fetched {} ({} bytes)", url, response.body.len());
            (true, RawPayload::new(response.body))
        }
        Ok(response) => {
            let error = FetchError::Status(response.status);
            log::warn!("Fetch of {} failed: {}", url, error);
            (false, RawPayload::from(error.to_string()))
        }
        Err(error) => {
            log::warn!("Fetch of {} failed: {}", url, error);
            (false, RawPayload::from(error.to_string()))
        }
    }
}
