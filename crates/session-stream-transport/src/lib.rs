//! Transport layer for session event streams.
//!
//! Provides:
//! - Transport capability traits and the callback sink
//! - Inbound frame decoding (JSON)
//! - WebSocket client transport (feature: websocket)

pub mod protocol;
pub mod transport;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use protocol::{FrameError, InboundFrame};
pub use transport::{EventSink, Transport, TransportError, TransportEvent, TransportHandle};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
