//! Test doubles shared by the unit tests.

use crate::error::FetchError;
use crate::transport::{HttpResponse, Transport};
use crossbeam_channel::{unbounded, Receiver, Sender};
use image::{ImageFormat, Rgba, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Transport answering from a fixed table. Unknown URLs fail with a
/// transport error unless a fallback response is set.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: HashMap<String, HttpResponse>,
    fallback: Option<HttpResponse>,
    gate: Option<Mutex<Receiver<()>>>,
    calls: Mutex<Vec<(String, ThreadId)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, url: &str, status: u16, body: &[u8]) -> Self {
        self.responses.insert(
            url.to_string(),
            HttpResponse {
                status,
                body: body.to_vec(),
            },
        );
        self
    }

    pub fn fallback(mut self, status: u16, body: &[u8]) -> Self {
        self.fallback = Some(HttpResponse {
            status,
            body: body.to_vec(),
        });
        self
    }

    /// Every call blocks until one message arrives on the returned sender.
    pub fn gated(mut self) -> (Self, Sender<()>) {
        let (tx, rx) = unbounded();
        self.gate = Some(Mutex::new(rx));
        (self, tx)
    }

    pub fn calls(&self) -> Vec<(String, ThreadId)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn wait_for_calls(&self, count: usize, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.calls.lock().unwrap().len() < count {
            assert!(Instant::now() < deadline, "timed out waiting for {count} calls");
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Transport for ScriptedTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), thread::current().id()));

        if let Some(gate) = &self.gate {
            let _ = gate.lock().unwrap().recv();
        }

        self.responses
            .get(url)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| FetchError::Transport(format!("no route to {url}")))
    }
}

/// Encode a solid-color RGBA image as PNG bytes
pub fn png_bytes(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba(color));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// Wait until `condition` holds, polling every millisecond
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in {timeout:?}");
        thread::sleep(Duration::from_millis(1));
    }
}
