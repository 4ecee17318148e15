//! Transport capability: a bidirectional message socket.

use std::{fmt, sync::Arc};

use thiserror::Error;
use url::Url;

/// Transport error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Transport closed")]
    Closed,
}

/// Callback delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed.
    Open,
    /// Text frame received.
    Message(String),
    /// Informational; a `Close` follows if the socket is gone.
    Error(TransportError),
    /// Socket closed, for any reason.
    Close,
}

/// Receiving end of a transport's callbacks.
///
/// Cloneable so a transport can hand it to its I/O task.
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

impl EventSink {
    /// Wrap a callback.
    pub fn new(f: impl Fn(TransportEvent) + Send + Sync + 'static) -> Self {
        Self { inner: Arc::new(f) }
    }

    /// Deliver an event.
    pub fn emit(&self, event: TransportEvent) {
        (self.inner)(event);
    }

    /// Deliver `Open`.
    pub fn open(&self) {
        self.emit(TransportEvent::Open);
    }

    /// Deliver a text frame.
    pub fn message(&self, text: impl Into<String>) {
        self.emit(TransportEvent::Message(text.into()));
    }

    /// Deliver an error.
    pub fn error(&self, err: TransportError) {
        self.emit(TransportEvent::Error(err));
    }

    /// Deliver `Close`.
    pub fn close(&self) {
        self.emit(TransportEvent::Close);
    }
}

/// Handle to one live socket.
pub trait TransportHandle: Send + Sync {
    /// Queue a text frame.
    ///
    /// # Errors
    /// Returns error if the socket is already gone.
    fn send(&self, data: String) -> Result<(), TransportError>;

    /// Close the socket. Idempotent.
    fn close(&self);
}

/// Factory for sockets.
///
/// Implement this to bind the channel to a native streaming facility.
/// `open` must not block: connection progress is reported through `events`.
pub trait Transport: Send + Sync {
    /// Begin connecting to `url`.
    fn open(&self, url: &Url, events: EventSink) -> Box<dyn TransportHandle>;
}
