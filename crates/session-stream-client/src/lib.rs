//! Client channel for remote agent session events.
//!
//! Provides:
//! - `ConnectionManager` - Connection lifecycle with bounded exponential-backoff retries
//! - `MessageReceiver` - Frame filtering and redelivery-safe deduplication
//! - `ChannelObserver` - Optional connect/disconnect/error notifications

pub mod manager;
pub mod receiver;

pub use manager::{ChannelError, ChannelObserver, ConnectionManager, ConnectionState};
pub use receiver::{MessageReceiver, ReceiveOutcome};
