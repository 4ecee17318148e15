//! Inbound frame filtering and deduplication.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use session_stream_core::{
    CacheSynchronizer, ChannelConfig, DedupSignature, SessionEvent, SessionKey,
};
use session_stream_transport::InboundFrame;

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Appended to the log; `invalidated` if the detail was also marked stale.
    Accepted { invalidated: bool },
    /// `ping`/`pong`, dropped.
    Control,
    /// Undecodable, dropped.
    Malformed,
    /// Belongs to another session, dropped.
    ForeignSession,
    /// Same signature already in the log, dropped.
    Duplicate,
}

impl ReceiveOutcome {
    /// Whether the frame reached the log.
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Validates inbound frames and appends accepted events to the store.
///
/// Keeps a private mirror of every signature in the log so duplicate
/// detection never has to read the store back.
pub struct MessageReceiver<C> {
    key: SessionKey,
    expected_session: Option<String>,
    store: Arc<C>,
    seen: Mutex<HashSet<DedupSignature>>,
}

impl<C: CacheSynchronizer> MessageReceiver<C> {
    /// Create a receiver for the channel described by `config`.
    ///
    /// The signature mirror is seeded from the store's current log.
    #[must_use]
    pub fn new(config: &ChannelConfig, store: Arc<C>) -> Self {
        let key = config.key();
        let seen = store.snapshot(&key).iter().map(SessionEvent::signature).collect();
        Self {
            expected_session: config.session_scoped.then(|| config.session.clone()),
            key,
            store,
            seen: Mutex::new(seen),
        }
    }

    /// Store key events are appended under.
    #[must_use]
    pub const fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Handle one raw text frame. Never fails; rejected frames are logged and dropped.
    pub fn receive(&self, raw: &str) -> ReceiveOutcome {
        match InboundFrame::decode(raw) {
            Ok(InboundFrame::Control(_)) => ReceiveOutcome::Control,
            Ok(InboundFrame::Event(event)) => self.accept(event),
            Err(e) => {
                tracing::warn!(key = %self.key, "Failed to parse message: {e}");
                ReceiveOutcome::Malformed
            }
        }
    }

    /// Filter, dedup and append an already decoded event.
    pub fn accept(&self, event: SessionEvent) -> ReceiveOutcome {
        if event.is_control() {
            return ReceiveOutcome::Control;
        }

        if let Some(expected) = &self.expected_session {
            if event.session_id != *expected {
                tracing::warn!(
                    key = %self.key,
                    got = %event.session_id,
                    "Received message for wrong session"
                );
                return ReceiveOutcome::ForeignSession;
            }
        }

        // Held across append so check-and-insert is atomic and log order is arrival order.
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        if !seen.insert(event.signature()) {
            tracing::debug!(key = %self.key, kind = %event.kind, "Ignoring duplicate message");
            return ReceiveOutcome::Duplicate;
        }

        tracing::debug!(key = %self.key, kind = %event.kind, "Message received");
        let invalidated = event.triggers_invalidation();
        self.store.append(&self.key, event);
        if invalidated {
            self.store.invalidate(&self.key);
        }
        ReceiveOutcome::Accepted { invalidated }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use session_stream_core::MemoryCache;

    use super::*;

    /// Store recording every call in order.
    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<String>>,
        preloaded: Vec<SessionEvent>,
    }

    impl CacheSynchronizer for RecordingStore {
        fn append(&self, _key: &SessionKey, event: SessionEvent) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("append {} {}", event.kind, event.timestamp));
        }

        fn invalidate(&self, _key: &SessionKey) {
            self.calls.lock().unwrap().push("invalidate".to_string());
        }

        fn snapshot(&self, _key: &SessionKey) -> Vec<SessionEvent> {
            self.preloaded.clone()
        }
    }

    fn config() -> ChannelConfig {
        ChannelConfig::parse("http://localhost", "proj", "s1").unwrap()
    }

    fn frame(session: &str, kind: &str, ts: &str) -> String {
        json!({"sessionId": session, "type": kind, "timestamp": ts, "payload": {}}).to_string()
    }

    #[test]
    fn test_duplicate_delivery_is_stored_once() {
        let cache = Arc::new(MemoryCache::new());
        let receiver = MessageReceiver::new(&config(), Arc::clone(&cache));
        let raw = frame("s1", "agent.running", "T1");
        let mut updates = cache.get_receiver();

        assert_eq!(
            receiver.receive(&raw),
            ReceiveOutcome::Accepted { invalidated: true }
        );
        assert_eq!(receiver.receive(&raw), ReceiveOutcome::Duplicate);

        assert_eq!(cache.messages(receiver.key()).len(), 1);
        assert!(cache.is_stale(receiver.key()));

        let mut invalidations = 0;
        while let Ok(update) = updates.try_recv() {
            if matches!(update, session_stream_core::CacheUpdate::Invalidated { .. }) {
                invalidations += 1;
            }
        }
        assert_eq!(invalidations, 1);
    }

    #[test]
    fn test_partial_chunks_kept_in_arrival_order() {
        let cache = Arc::new(MemoryCache::new());
        let receiver = MessageReceiver::new(&config(), Arc::clone(&cache));
        let chunk = |index: u32, ts: &str| {
            json!({
                "sessionId": "s1",
                "type": "message.partial",
                "timestamp": ts,
                "payload": {},
                "partial": {"id": "p1", "index": index, "total": 2, "data": "x"}
            })
            .to_string()
        };

        // Later timestamp first: the log must not be re-sorted.
        assert!(receiver.receive(&chunk(0, "T2")).is_accepted());
        assert!(receiver.receive(&chunk(1, "T1")).is_accepted());

        let indexes: Vec<_> = cache
            .messages(receiver.key())
            .into_iter()
            .filter_map(|e| e.partial.map(|p| p.index))
            .collect();
        assert_eq!(indexes, [0, 1]);
        assert!(!cache.is_stale(receiver.key()));
    }

    #[test]
    fn test_same_timestamp_different_partial_is_not_duplicate() {
        let cache = Arc::new(MemoryCache::new());
        let receiver = MessageReceiver::new(&config(), Arc::clone(&cache));
        let base = SessionEvent::new("s1", "message.partial", "T1", json!({}));
        let chunk = |index| session_stream_core::PartialChunk {
            id: "p1".into(),
            index,
            total: 2,
            data: String::new(),
        };

        assert!(receiver.accept(base.clone().with_partial(chunk(0))).is_accepted());
        assert!(receiver.accept(base.clone().with_partial(chunk(1))).is_accepted());
        assert!(receiver.accept(base.clone()).is_accepted());
        assert_eq!(
            receiver.accept(base.with_partial(chunk(1))),
            ReceiveOutcome::Duplicate
        );
        assert_eq!(cache.messages(receiver.key()).len(), 3);
    }

    #[test]
    fn test_control_frames_never_stored() {
        let cache = Arc::new(MemoryCache::new());
        let receiver = MessageReceiver::new(&config(), Arc::clone(&cache));

        assert_eq!(receiver.receive(r#"{"type":"ping"}"#), ReceiveOutcome::Control);
        assert_eq!(
            receiver.receive(&frame("s1", "pong", "T1")),
            ReceiveOutcome::Control
        );
        assert_eq!(
            receiver.accept(SessionEvent::new("s1", "ping", "T2", json!({}))),
            ReceiveOutcome::Control
        );
        assert!(cache.messages(receiver.key()).is_empty());
    }

    #[test]
    fn test_malformed_frames_dropped() {
        let cache = Arc::new(MemoryCache::new());
        let receiver = MessageReceiver::new(&config(), Arc::clone(&cache));

        for raw in ["", "{", "null", r#"{"type":"agent.running"}"#, "[]"] {
            assert_eq!(receiver.receive(raw), ReceiveOutcome::Malformed, "{raw}");
        }
        assert!(cache.messages(receiver.key()).is_empty());
        assert!(!cache.is_stale(receiver.key()));
    }

    /// Records the level of every event emitted while installed.
    struct LevelRecorder(Arc<Mutex<Vec<tracing::Level>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for LevelRecorder {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            self.0.lock().unwrap().push(*event.metadata().level());
        }
    }

    #[test]
    fn test_malformed_frame_logged_as_warning() {
        use tracing_subscriber::layer::SubscriberExt;

        let cache = Arc::new(MemoryCache::new());
        let receiver = MessageReceiver::new(&config(), cache);
        let levels = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(LevelRecorder(Arc::clone(&levels)));

        let outcome = tracing::subscriber::with_default(subscriber, || receiver.receive("{bad"));

        assert_eq!(outcome, ReceiveOutcome::Malformed);
        assert_eq!(*levels.lock().unwrap(), vec![tracing::Level::WARN]);
    }

    #[test]
    fn test_foreign_session_dropped_when_scoped() {
        let cache = Arc::new(MemoryCache::new());
        let receiver = MessageReceiver::new(&config(), Arc::clone(&cache));

        assert_eq!(
            receiver.receive(&frame("other", "agent.running", "T1")),
            ReceiveOutcome::ForeignSession
        );
        assert!(cache.messages(receiver.key()).is_empty());
        assert!(!cache.is_stale(receiver.key()));
    }

    #[test]
    fn test_foreign_session_allowed_when_unscoped() {
        let cache = Arc::new(MemoryCache::new());
        let receiver =
            MessageReceiver::new(&config().with_session_scoped(false), Arc::clone(&cache));

        assert!(receiver.receive(&frame("other", "agent.running", "T1")).is_accepted());
        assert_eq!(cache.messages(receiver.key()).len(), 1);
    }

    #[test]
    fn test_only_status_types_invalidate() {
        let store = Arc::new(RecordingStore::default());
        let receiver = MessageReceiver::new(&config(), Arc::clone(&store));

        let kinds = [
            "agent.running",
            "agent.waiting",
            "result.message",
            "system.message",
            "message.partial",
            "user.message",
        ];
        for (i, kind) in kinds.iter().enumerate() {
            receiver.receive(&frame("s1", kind, &format!("T{i}")));
        }

        assert_eq!(
            *store.calls.lock().unwrap(),
            vec![
                "append agent.running T0",
                "invalidate",
                "append agent.waiting T1",
                "invalidate",
                "append result.message T2",
                "invalidate",
                "append system.message T3",
                "invalidate",
                "append message.partial T4",
                "append user.message T5",
            ]
        );
    }

    #[test]
    fn test_mirror_seeded_from_snapshot() {
        let store = Arc::new(RecordingStore {
            preloaded: vec![SessionEvent::new("s1", "agent.running", "T1", json!({}))],
            ..RecordingStore::default()
        });
        let receiver = MessageReceiver::new(&config(), Arc::clone(&store));

        assert_eq!(
            receiver.receive(&frame("s1", "agent.running", "T1")),
            ReceiveOutcome::Duplicate
        );
        assert!(store.calls.lock().unwrap().is_empty());
    }
}
