//! Follow a session's event stream and print what the channel accepts.
//!
//! Run with: cargo run -p session-watch -- --url http://localhost:8080 --project demo --session s1

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use session_stream_client::{ChannelObserver, ConnectionManager, ConnectionState};
use session_stream_core::{BackoffPolicy, CacheUpdate, ChannelConfig, MemoryCache};
use session_stream_transport::{TransportError, WebSocketTransport};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "session-watch", about = "Follow a remote agent session's event stream")]
struct Args {
    /// Backend origin; `https` selects `wss`.
    #[arg(long, env = "SESSION_STREAM_URL")]
    url: Url,

    /// Project name.
    #[arg(long, env = "SESSION_STREAM_PROJECT")]
    project: String,

    /// Session name.
    #[arg(long, env = "SESSION_STREAM_SESSION")]
    session: String,

    /// Accept events for other sessions on the same socket.
    #[arg(long)]
    multiplexed: bool,

    /// Retries before giving up.
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,
}

struct LogObserver;

impl ChannelObserver for LogObserver {
    fn on_connect(&self) {
        tracing::info!("connected");
    }

    fn on_disconnect(&self) {
        tracing::info!("disconnected");
    }

    fn on_error(&self, error: &TransportError) {
        tracing::warn!("transport error: {error}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let config = ChannelConfig::new(args.url, args.project, args.session)
        .with_session_scoped(!args.multiplexed)
        .with_backoff(BackoffPolicy {
            max_attempts: args.max_attempts,
            ..BackoffPolicy::default()
        });

    let cache = Arc::new(MemoryCache::new());
    let manager = ConnectionManager::with_observer(
        &config,
        WebSocketTransport::new(),
        Arc::clone(&cache),
        Arc::new(LogObserver),
    )
    .context("invalid channel configuration")?;

    tracing::info!("watching {}", manager.url());
    let mut updates = cache.history_plus_stream(&config.key());
    let mut states = manager.subscribe();
    manager.start();

    loop {
        tokio::select! {
            update = updates.next() => match update {
                Some(CacheUpdate::Appended { event, .. }) => {
                    println!("{}", serde_json::to_string(&event)?);
                }
                Some(CacheUpdate::Invalidated { key }) => {
                    tracing::info!(%key, "session detail stale");
                    cache.clear_stale(&key);
                }
                None => break,
            },
            changed = states.changed() => {
                if changed.is_err() || *states.borrow() == ConnectionState::Closed {
                    tracing::error!("channel closed, giving up");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.stop();
    Ok(())
}
