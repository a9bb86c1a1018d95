//! Fetch requests and the payloads they resolve to.

use std::fmt;

/// Callback for a single fetch: `(success, payload)`.
pub type OneCallback = Box<dyn FnOnce(bool, RawPayload) + Send + 'static>;

/// Callback for a batch: `(any_success, successful payloads)`.
pub type ManyCallback = Box<dyn FnOnce(bool, Vec<RawPayload>) + Send + 'static>;

/// Bytes received from the network, or a diagnostic message on failure.
#[derive(Clone, PartialEq, Eq)]
pub struct RawPayload(Vec<u8>);

impl RawPayload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lossy text view, for diagnostic payloads
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl From<Vec<u8>> for RawPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for RawPayload {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

impl From<String> for RawPayload {
    fn from(text: String) -> Self {
        Self(text.into_bytes())
    }
}

impl fmt::Debug for RawPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawPayload({} bytes)", self.0.len())
    }
}

/// One unit of work for the fetch worker. Consumed exactly once.
pub struct FetchRequest {
    pub url: String,
    pub on_complete: OneCallback,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, on_complete: impl FnOnce(bool, RawPayload) + Send + 'static) -> Self {
        Self {
            url: url.into(),
            on_complete: Box::new(on_complete),
        }
    }

    /// Resolve the request, handing the payload to its callback.
    pub fn complete(self, success: bool, payload: RawPayload) {
        (self.on_complete)(success, payload);
    }
}

impl fmt::Debug for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchRequest").field("url", &self.url).finish_non_exhaustive()
    }
}

/// Value form of a single fetch result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub success: bool,
    pub payload: RawPayload,
}

/// Value form of a batch result
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchResult {
    pub any_success: bool,
    /// Successful payloads in completion order
    pub payloads: Vec<RawPayload>,
}
