//! Core types for streaming remote agent session events.
//!
//! This crate provides the fundamental building blocks:
//! - `SessionEvent` - One pushed unit of session progress
//! - `BackoffPolicy` - Reconnection delay schedule
//! - `ChannelConfig` - Identifiers, base URL and stream URL derivation
//! - `CacheSynchronizer` - Append/invalidate store contract
//! - `MemoryCache` - Broadcast + history reference store

pub mod backoff;
pub mod cache;
pub mod config;
pub mod event;
pub mod traits;

pub use backoff::BackoffPolicy;
pub use cache::{CacheUpdate, MemoryCache};
pub use config::{ChannelConfig, ConfigError};
pub use event::{DedupSignature, PartialChunk, SessionEvent};
pub use traits::{CacheSynchronizer, SessionKey};
