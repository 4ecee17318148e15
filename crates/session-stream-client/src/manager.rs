//! Connection manager driving one session channel.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use session_stream_core::{BackoffPolicy, CacheSynchronizer, ChannelConfig, ConfigError, SessionKey};
use session_stream_transport::{EventSink, Transport, TransportError, TransportEvent, TransportHandle};
use tokio::{sync::watch, task::JoinHandle};
use url::Url;

use crate::receiver::MessageReceiver;

/// Channel error.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Channel not connected")]
    NotConnected,
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started, or stopped.
    Idle,
    /// Transport opened, handshake pending.
    Connecting,
    /// Handshake completed.
    Open,
    /// Waiting for the backoff timer.
    Reconnecting,
    /// Retries exhausted. Needs an explicit `start()`.
    Closed,
}

/// Optional consumer notifications. All methods default to no-ops.
pub trait ChannelObserver: Send + Sync {
    /// Transport reached `Open`.
    fn on_connect(&self) {}

    /// Transport closed unexpectedly, whether or not a retry follows.
    fn on_disconnect(&self) {}

    /// Informational; state is driven by the close that follows.
    fn on_error(&self, _error: &TransportError) {}
}

struct NoopObserver;

impl ChannelObserver for NoopObserver {}

enum Notice {
    Connected,
    Disconnected,
    Error(TransportError),
}

/// Mutable handles, owned by one manager and guarded together.
struct Inner {
    state: ConnectionState,
    attempts: u32,
    /// Bumped on every connect and on stop; callbacks carry the value they were created with.
    generation: u64,
    transport: Option<Box<dyn TransportHandle>>,
    timer: Option<JoinHandle<()>>,
}

struct Shared<T, C> {
    url: Url,
    key: SessionKey,
    backoff: BackoffPolicy,
    transport: T,
    receiver: MessageReceiver<C>,
    observer: Arc<dyn ChannelObserver>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
}

/// One logical channel per (project, session) pair.
///
/// Reconnects with exponential backoff on unexpected closure and feeds
/// decoded events through a [`MessageReceiver`] into the store. Dropping
/// the manager stops it.
///
/// Must be driven from within a Tokio runtime: reconnect timers are spawned tasks.
/// Store calls run without the manager's lock, so `append`/`invalidate` may call
/// back into it (e.g. [`ConnectionManager::send`]).
pub struct ConnectionManager<T, C>
where
    T: Transport + 'static,
    C: CacheSynchronizer + 'static,
{
    shared: Arc<Shared<T, C>>,
}

impl<T, C> ConnectionManager<T, C>
where
    T: Transport + 'static,
    C: CacheSynchronizer + 'static,
{
    /// Create a manager in `Idle` state without notifications.
    ///
    /// # Errors
    /// Returns error if the stream URL cannot be derived from `config`.
    pub fn new(config: &ChannelConfig, transport: T, store: Arc<C>) -> Result<Self, ChannelError> {
        Self::with_observer(config, transport, store, Arc::new(NoopObserver))
    }

    /// Create a manager in `Idle` state that notifies `observer`.
    ///
    /// # Errors
    /// Returns error if the stream URL cannot be derived from `config`.
    pub fn with_observer(
        config: &ChannelConfig,
        transport: T,
        store: Arc<C>,
        observer: Arc<dyn ChannelObserver>,
    ) -> Result<Self, ChannelError> {
        let url = config.stream_url()?;
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        Ok(Self {
            shared: Arc::new(Shared {
                url,
                key: config.key(),
                backoff: config.backoff,
                transport,
                receiver: MessageReceiver::new(config, store),
                observer,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Idle,
                    attempts: 0,
                    generation: 0,
                    transport: None,
                    timer: None,
                }),
                state_tx,
            }),
        })
    }

    /// Open the channel. No-op while `Connecting` or `Open`.
    ///
    /// From any other state this resets the retry budget.
    pub fn start(&self) {
        self.shared.start();
    }

    /// Close the channel and cancel any pending reconnect.
    ///
    /// Callbacks from the closed transport are ignored afterwards.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Whether the state is `Open`.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Stream endpoint in use.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.shared.url
    }

    /// Send a text frame over the live transport.
    ///
    /// # Errors
    /// Returns error if the channel is not `Open` or the transport is gone.
    pub fn send(&self, data: impl Into<String>) -> Result<(), ChannelError> {
        let inner = self.shared.lock();
        if inner.state != ConnectionState::Open {
            return Err(ChannelError::NotConnected);
        }
        inner
            .transport
            .as_ref()
            .ok_or(ChannelError::NotConnected)?
            .send(data.into())?;
        Ok(())
    }
}

impl<T, C> Drop for ConnectionManager<T, C>
where
    T: Transport + 'static,
    C: CacheSynchronizer + 'static,
{
    fn drop(&mut self) {
        self.shared.stop();
    }
}

impl<T, C> Shared<T, C>
where
    T: Transport + 'static,
    C: CacheSynchronizer + 'static,
{
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut Inner, state: ConnectionState) {
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    fn notify(&self, notice: Notice) {
        match notice {
            Notice::Connected => self.observer.on_connect(),
            Notice::Disconnected => self.observer.on_disconnect(),
            Notice::Error(e) => self.observer.on_error(&e),
        }
    }

    fn start(self: &Arc<Self>) {
        let (generation, residual) = {
            let mut inner = self.lock();
            if matches!(
                inner.state,
                ConnectionState::Connecting | ConnectionState::Open
            ) {
                tracing::debug!(key = %self.key, "Already connecting");
                return;
            }
            inner.attempts = 0;
            self.begin_connect(&mut inner)
        };

        if let Some(handle) = residual {
            handle.close();
        }
        self.open_transport(generation);
    }

    fn stop(&self) {
        let residual = {
            let mut inner = self.lock();
            inner.generation += 1;
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
            self.set_state(&mut inner, ConnectionState::Idle);
            inner.transport.take()
        };

        if let Some(handle) = residual {
            tracing::info!(key = %self.key, "Closing channel");
            handle.close();
        }
    }

    /// Move to `Connecting` under a fresh generation.
    ///
    /// Returns the generation and any transport left over, to be closed outside the lock.
    fn begin_connect(&self, inner: &mut Inner) -> (u64, Option<Box<dyn TransportHandle>>) {
        inner.generation += 1;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        self.set_state(inner, ConnectionState::Connecting);
        (inner.generation, inner.transport.take())
    }

    fn open_transport(self: &Arc<Self>, generation: u64) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let events = EventSink::new(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_event(generation, event);
            }
        });

        tracing::info!(key = %self.key, url = %self.url, "Connecting");
        let handle = self.transport.open(&self.url, events);

        let mut inner = self.lock();
        let live = inner.generation == generation
            && matches!(
                inner.state,
                ConnectionState::Connecting | ConnectionState::Open
            );
        if live {
            inner.transport = Some(handle);
        } else {
            // Stopped or already closed while opening.
            drop(inner);
            handle.close();
        }
    }

    fn handle_event(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(generation),
            TransportEvent::Message(text) => self.on_message(generation, &text),
            TransportEvent::Error(e) => self.on_error(generation, e),
            TransportEvent::Close => self.on_close(generation),
        }
    }

    fn on_open(&self, generation: u64) {
        {
            let mut inner = self.lock();
            if inner.generation != generation || inner.state != ConnectionState::Connecting {
                return;
            }
            inner.attempts = 0;
            self.set_state(&mut inner, ConnectionState::Open);
        }
        tracing::info!(key = %self.key, "Connected");
        self.notify(Notice::Connected);
    }

    fn on_message(&self, generation: u64, text: &str) {
        // Released before the store is called so `append` may use the manager.
        if self.lock().generation != generation {
            return;
        }
        self.receiver.receive(text);
    }

    fn on_error(&self, generation: u64, error: TransportError) {
        if self.lock().generation != generation {
            return;
        }
        tracing::warn!(key = %self.key, "Transport error: {error}");
        self.notify(Notice::Error(error));
    }

    fn on_close(self: &Arc<Self>, generation: u64) {
        {
            let mut inner = self.lock();
            if inner.generation != generation {
                return;
            }
            inner.transport = None;
            if !matches!(
                inner.state,
                ConnectionState::Connecting | ConnectionState::Open
            ) {
                return;
            }

            if self.backoff.allows(inner.attempts) {
                inner.attempts += 1;
                let delay = self.backoff.delay(inner.attempts - 1);
                tracing::info!(
                    key = %self.key,
                    attempt = inner.attempts,
                    max = self.backoff.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Disconnected, reconnecting"
                );
                self.set_state(&mut inner, ConnectionState::Reconnecting);
                inner.timer = Some(self.schedule_reconnect(generation, delay));
            } else {
                tracing::error!(key = %self.key, "Max reconnection attempts reached. Giving up.");
                self.set_state(&mut inner, ConnectionState::Closed);
            }
        }
        self.notify(Notice::Disconnected);
    }

    fn schedule_reconnect(self: &Arc<Self>, generation: u64, delay: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.on_timer(generation);
            }
        })
    }

    fn on_timer(self: &Arc<Self>, generation: u64) {
        let (next, residual) = {
            let mut inner = self.lock();
            if inner.generation != generation || inner.state != ConnectionState::Reconnecting {
                return;
            }
            // This task is the timer; let it finish rather than abort itself.
            inner.timer = None;
            self.begin_connect(&mut inner)
        };

        if let Some(handle) = residual {
            handle.close();
        }
        self.open_transport(next);
    }
}
