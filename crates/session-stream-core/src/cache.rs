//! In-memory session cache with broadcast + history.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{CacheSynchronizer, SessionEvent, SessionKey};

/// Live update capacity before slow subscribers start lagging.
const UPDATE_CAPACITY: usize = 10_000;

/// Change notification published by [`MemoryCache`].
#[derive(Debug, Clone, PartialEq)]
pub enum CacheUpdate {
    /// An event was appended to the key's log.
    Appended { key: SessionKey, event: SessionEvent },
    /// The key's detail record was marked stale.
    Invalidated { key: SessionKey },
}

impl CacheUpdate {
    /// Key the update refers to.
    #[must_use]
    pub const fn key(&self) -> &SessionKey {
        match self {
            Self::Appended { key, .. } | Self::Invalidated { key } => key,
        }
    }
}

#[derive(Default)]
struct Entry {
    log: Vec<SessionEvent>,
    stale: bool,
}

/// Reference [`CacheSynchronizer`] keeping every log in memory.
///
/// New observers receive the current log, then follow live updates
/// without a gap.
pub struct MemoryCache {
    entries: RwLock<HashMap<SessionKey, Entry>>,
    sender: broadcast::Sender<CacheUpdate>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            sender,
        }
    }

    /// Copy of the log for `key`, in append order.
    #[must_use]
    pub fn messages(&self, key: &SessionKey) -> Vec<SessionEvent> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|e| e.log.clone())
            .unwrap_or_default()
    }

    /// Whether the detail record for `key` needs a refetch.
    #[must_use]
    pub fn is_stale(&self, key: &SessionKey) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|e| e.stale)
    }

    /// Clear the stale flag after the consumer refetched the detail.
    pub fn clear_stale(&self, key: &SessionKey) {
        if let Some(entry) = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(key)
        {
            entry.stale = false;
        }
    }

    /// Get a receiver for live updates across all keys.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<CacheUpdate> {
        self.sender.subscribe()
    }

    /// Stream that yields the current log for `key` first, then live updates for it.
    #[must_use]
    pub fn history_plus_stream(
        &self,
        key: &SessionKey,
    ) -> futures::stream::BoxStream<'static, CacheUpdate> {
        // Subscribe under the read lock so no append falls between snapshot and live.
        let (history, rx) = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            let history = entries.get(key).map(|e| e.log.clone()).unwrap_or_default();
            (history, self.sender.subscribe())
        };

        let hist_key = key.clone();
        let hist = futures::stream::iter(history.into_iter().map(move |event| {
            CacheUpdate::Appended {
                key: hist_key.clone(),
                event,
            }
        }));

        let live_key = key.clone();
        let live = BroadcastStream::new(rx).filter_map(move |res| {
            let update = res.ok().filter(|u| *u.key() == live_key);
            async move { update }
        });

        Box::pin(hist.chain(live))
    }

    /// Stream of events only for `key`, history first.
    #[must_use]
    pub fn event_stream(&self, key: &SessionKey) -> futures::stream::BoxStream<'static, SessionEvent> {
        self.history_plus_stream(key)
            .filter_map(|update| async move {
                match update {
                    CacheUpdate::Appended { event, .. } => Some(event),
                    CacheUpdate::Invalidated { .. } => None,
                }
            })
            .boxed()
    }
}

impl CacheSynchronizer for MemoryCache {
    fn append(&self, key: &SessionKey, event: SessionEvent) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.entry(key.clone()).or_default().log.push(event.clone());
        let _ = self.sender.send(CacheUpdate::Appended {
            key: key.clone(),
            event,
        });
    }

    fn invalidate(&self, key: &SessionKey) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.entry(key.clone()).or_default().stale = true;
        let _ = self.sender.send(CacheUpdate::Invalidated { key: key.clone() });
    }

    fn snapshot(&self, key: &SessionKey) -> Vec<SessionEvent> {
        self.messages(key)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    fn event(kind: &str, ts: &str) -> SessionEvent {
        SessionEvent::new("s1", kind, ts, Value::Null)
    }

    #[test]
    fn test_append_preserves_order_per_key() {
        let cache = MemoryCache::new();
        let a = SessionKey::new("p", "s1");
        let b = SessionKey::new("p", "s2");

        cache.append(&a, event("x", "T2"));
        cache.append(&b, event("y", "T1"));
        cache.append(&a, event("z", "T1"));

        let kinds: Vec<_> = cache.messages(&a).into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, ["x", "z"]);
        assert_eq!(cache.messages(&b).len(), 1);
        assert_eq!(cache.snapshot(&a), cache.messages(&a));
    }

    #[test]
    fn test_stale_flag() {
        let cache = MemoryCache::new();
        let key = SessionKey::new("p", "s1");
        assert!(!cache.is_stale(&key));

        cache.invalidate(&key);
        assert!(cache.is_stale(&key));

        cache.clear_stale(&key);
        assert!(!cache.is_stale(&key));
    }

    #[test]
    fn test_history_then_live() {
        let cache = MemoryCache::new();
        let key = SessionKey::new("p", "s1");
        let other = SessionKey::new("p", "s2");

        cache.append(&key, event("first", "T1"));
        let mut stream = cache.history_plus_stream(&key);

        cache.append(&other, event("ignored", "T2"));
        cache.invalidate(&key);

        tokio_test::block_on(async {
            assert_eq!(
                stream.next().await,
                Some(CacheUpdate::Appended {
                    key: key.clone(),
                    event: event("first", "T1"),
                })
            );
            assert_eq!(
                stream.next().await,
                Some(CacheUpdate::Invalidated { key: key.clone() })
            );
        });
    }

    #[tokio::test]
    async fn test_event_stream_skips_invalidations() {
        let cache = MemoryCache::new();
        let key = SessionKey::new("p", "s1");
        let mut events = cache.event_stream(&key);

        cache.invalidate(&key);
        cache.append(&key, event("agent.running", "T1"));

        assert_eq!(events.next().await, Some(event("agent.running", "T1")));
    }
}
