//! Session event types carried over the stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Liveness-only frame types. Never stored.
pub const CONTROL_TYPES: [&str; 2] = ["ping", "pong"];

/// Event types whose arrival invalidates the cached session detail.
pub const STATUS_TYPES: [&str; 4] = [
    "agent.running",
    "agent.waiting",
    "result.message",
    "system.message",
];

/// One fragment of a larger payload streamed across several events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartialChunk {
    /// Logical stream identifier shared by all fragments.
    pub id: String,
    /// Position of this fragment.
    pub index: u32,
    /// Number of fragments in the stream.
    pub total: u32,
    /// Fragment contents.
    pub data: String,
}

/// One unit of pushed information about a session's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    /// Session the event belongs to.
    pub session_id: String,
    /// Event type, e.g. `agent.running`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Ordering token. Not guaranteed to be globally monotonic.
    pub timestamp: String,
    /// Opaque event body.
    #[serde(default)]
    pub payload: Value,
    /// Present when the event carries one fragment of a streamed payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<PartialChunk>,
}

impl SessionEvent {
    /// Create an event without a partial chunk.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        kind: impl Into<String>,
        timestamp: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            kind: kind.into(),
            timestamp: timestamp.into(),
            payload,
            partial: None,
        }
    }

    /// Attach a partial chunk.
    #[must_use]
    pub fn with_partial(mut self, partial: PartialChunk) -> Self {
        self.partial = Some(partial);
        self
    }

    /// Signature used to detect redelivered events.
    #[must_use]
    pub fn signature(&self) -> DedupSignature {
        DedupSignature {
            timestamp: self.timestamp.clone(),
            kind: self.kind.clone(),
            partial: self.partial.clone(),
        }
    }

    /// Whether this is a `ping`/`pong` frame.
    #[must_use]
    pub fn is_control(&self) -> bool {
        is_control_type(&self.kind)
    }

    /// Whether accepting this event must invalidate the session detail.
    #[must_use]
    pub fn triggers_invalidation(&self) -> bool {
        STATUS_TYPES.contains(&self.kind.as_str())
    }
}

/// Check a raw type string against the control set.
#[must_use]
pub fn is_control_type(kind: &str) -> bool {
    CONTROL_TYPES.contains(&kind)
}

/// `(timestamp, type, partial)` identity of an event.
///
/// The payload is not part of the signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupSignature {
    timestamp: String,
    kind: String,
    partial: Option<PartialChunk>,
}
