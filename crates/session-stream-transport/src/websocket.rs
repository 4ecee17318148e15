//! WebSocket client transport.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::transport::{EventSink, Transport, TransportError, TransportHandle};

enum Outbound {
    Text(String),
    Close,
}

/// [`Transport`] backed by `tokio-tungstenite`.
///
/// Each `open` spawns one I/O task, so it must be called from within a
/// Tokio runtime. Protocol-level ping/pong is answered by the library.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, url: &Url, events: EventSink) -> Box<dyn TransportHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(url.to_string(), events, rx));
        Box::new(WebSocketHandle { tx })
    }
}

struct WebSocketHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl TransportHandle for WebSocketHandle {
    fn send(&self, data: String) -> Result<(), TransportError> {
        self.tx
            .send(Outbound::Text(data))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

async fn run_socket(url: String, events: EventSink, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    let connect = connect_async(url.as_str());
    tokio::pin!(connect);

    // Frames queued before the handshake completes.
    let mut pending = Vec::new();
    let ws = loop {
        tokio::select! {
            res = &mut connect => match res {
                Ok((ws, _response)) => break ws,
                Err(e) => {
                    tracing::debug!(%url, "WebSocket connect failed: {e}");
                    drop(rx);
                    events.error(TransportError::Connect(e.to_string()));
                    events.close();
                    return;
                }
            },
            outbound = rx.recv() => match outbound {
                Some(Outbound::Text(text)) => pending.push(text),
                // Dropping `connect` releases the half-open socket.
                Some(Outbound::Close) | None => {
                    tracing::debug!(%url, "WebSocket closed during handshake");
                    drop(rx);
                    events.close();
                    return;
                }
            },
        }
    };
    events.open();

    let (mut sender, mut receiver) = ws.split();

    for text in pending {
        if let Err(e) = sender.send(Message::text(text)).await {
            events.error(TransportError::Protocol(e.to_string()));
            drop(rx);
            events.close();
            return;
        }
    }

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sender.send(Message::text(text)).await {
                        events.error(TransportError::Protocol(e.to_string()));
                        break;
                    }
                }
                // Handle dropped or closed.
                Some(Outbound::Close) | None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => events.message(text.as_str()),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => events.message(text),
                    Err(e) => tracing::warn!("Dropping malformed binary frame: {e}"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!("WebSocket error: {e}");
                    events.error(TransportError::Protocol(e.to_string()));
                    break;
                }
            },
        }
    }

    drop(rx);
    events.close();
}
