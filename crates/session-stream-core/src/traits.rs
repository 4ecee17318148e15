//! Store contract the channel writes into.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::SessionEvent;

/// `(project, session)` pair addressing a message log and its detail flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    /// Project identifier.
    pub project: String,
    /// Session identifier.
    pub session: String,
}

impl SessionKey {
    /// Create a key.
    #[must_use]
    pub fn new(project: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            session: session.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.session)
    }
}

/// Ordered per-session message log plus a "detail needs refetch" flag.
///
/// Implement this trait to bridge into your app's state store. The channel
/// only ever appends and invalidates; it never removes or reorders.
pub trait CacheSynchronizer: Send + Sync {
    /// Append an accepted event. Must be observable immediately.
    fn append(&self, key: &SessionKey, event: SessionEvent);

    /// Mark the session's detail record stale.
    fn invalidate(&self, key: &SessionKey);

    /// Current log contents, if the store has a synchronous read path.
    ///
    /// Used once, to seed duplicate detection when a channel is created.
    fn snapshot(&self, _key: &SessionKey) -> Vec<SessionEvent> {
        Vec::new()
    }
}
