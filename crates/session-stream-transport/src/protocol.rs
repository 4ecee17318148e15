//! Inbound wire protocol for session streams.

use serde_json::Value;
use session_stream_core::{SessionEvent, event::is_control_type};
use thiserror::Error;

/// Frame decoding error.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Frame is not a JSON object")]
    NotAnObject,
    #[error("Frame has no string `type` field")]
    MissingType,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Liveness-only `ping`/`pong` frame.
    Control(String),
    /// A session event.
    Event(SessionEvent),
}

impl InboundFrame {
    /// Decode a text frame.
    ///
    /// Control frames are recognised by `type` alone, so a bare
    /// `{"type":"ping"}` decodes without the event fields.
    ///
    /// # Errors
    /// Returns error if the text is not a JSON object with a string `type`,
    /// or if a non-control frame lacks the event fields.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .as_object()
            .ok_or(FrameError::NotAnObject)?
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingType)?;

        if is_control_type(kind) {
            return Ok(Self::Control(kind.to_string()));
        }

        Ok(Self::Event(serde_json::from_value(value)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_event() {
        let frame = InboundFrame::decode(
            r#"{"sessionId":"s1","type":"agent.running","timestamp":"T1","payload":{}}"#,
        )
        .unwrap();

        let InboundFrame::Event(event) = frame else {
            panic!("Wrong frame type");
        };
        assert_eq!(event.session_id, "s1");
        assert_eq!(event.kind, "agent.running");
    }

    #[test]
    fn test_decode_bare_ping() {
        assert_eq!(
            InboundFrame::decode(r#"{"type":"ping"}"#).unwrap(),
            InboundFrame::Control("ping".to_string())
        );
        assert_eq!(
            InboundFrame::decode(r#"{"type":"pong","sessionId":"s1"}"#).unwrap(),
            InboundFrame::Control("pong".to_string())
        );
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(
            InboundFrame::decode("not json"),
            Err(FrameError::Json(_))
        ));
        assert!(matches!(
            InboundFrame::decode("[1,2,3]"),
            Err(FrameError::NotAnObject)
        ));
        assert!(matches!(
            InboundFrame::decode(r#"{"type":5}"#),
            Err(FrameError::MissingType)
        ));
        // Event type but no timestamp.
        assert!(matches!(
            InboundFrame::decode(r#"{"sessionId":"s1","type":"agent.running"}"#),
            Err(FrameError::Json(_))
        ));
    }
}
