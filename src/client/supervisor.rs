//! Connection supervisor
//!
//! Owns the publish-side (connection, channel) pair and keeps it alive:
//! - a watcher task waits on the connection's close notification
//! - on close it drops the stale pair and redials with exponential backoff
//! - a successful reconnect swaps connection and channel together under the
//!   write lock, so a channel is never handed out after its connection died
//!
//! `channel()` never waits for a reconnect. During the gap it fails with
//! `Unavailable::NotEstablished` and callers retry at a higher level.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::backoff::BackoffPolicy;
use crate::broker::{Channel, Connection, DialFn};
use crate::utils::{BrokerError, Unavailable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Live,
    Reconnecting,
    Closed,
}

struct Link<C: Connection> {
    connection: Option<Arc<C>>,
    channel: Option<Arc<C::Channel>>,
    state: LinkState,
    /// Set once the live connection came from the dial function, making the
    /// supervisor its only owner.
    dialed: bool,
}

struct Shared<C: Connection> {
    link: RwLock<Link<C>>,
    dial: DialFn<C>,
    backoff: BackoffPolicy,
    shutdown: CancellationToken,
    generation: AtomicU64,
}

pub struct Supervisor<C: Connection> {
    shared: Arc<Shared<C>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

/// Opens a channel with no prefetch limit, closing it again if qos fails.
async fn open_publish_channel<C: Connection>(connection: &C) -> Result<C::Channel, BrokerError> {
    let channel = connection.open_channel().await?;
    if let Err(err) = channel.qos(0).await {
        let _ = channel.close().await;
        return Err(err);
    }
    Ok(channel)
}

impl<C: Connection> Supervisor<C> {
    /// Opens the publish channel on `connection` and starts watching it.
    /// Must be called within a Tokio runtime.
    pub async fn start(
        connection: C,
        dial: DialFn<C>,
        backoff: BackoffPolicy,
    ) -> Result<Self, BrokerError> {
        let channel = open_publish_channel(&connection).await?;

        let shared = Arc::new(Shared {
            link: RwLock::new(Link {
                connection: Some(Arc::new(connection)),
                channel: Some(Arc::new(channel)),
                state: LinkState::Live,
                dialed: false,
            }),
            dial,
            backoff,
            shutdown: CancellationToken::new(),
            generation: AtomicU64::new(0),
        });

        let watcher = tokio::spawn(watch_connection(shared.clone()));

        Ok(Self {
            shared,
            watcher: Mutex::new(Some(watcher)),
        })
    }

    /// The current channel. Never blocks waiting for a reconnect.
    pub fn channel(&self) -> Result<Arc<C::Channel>, Unavailable> {
        let link = self.shared.link.read();
        if link.state == LinkState::Closed {
            return Err(Unavailable::Closed);
        }
        link.channel.clone().ok_or(Unavailable::NotEstablished)
    }

    pub fn state(&self) -> LinkState {
        self.shared.link.read().state
    }

    /// Number of completed reconnects.
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    /// Stops the watcher and closes the current channel. Later calls are no-ops.
    ///
    /// A connection the supervisor dialed itself is closed too; the one passed
    /// to [`Supervisor::start`] is left to its owner.
    pub async fn close(&self) -> Result<(), BrokerError> {
        let (channel, connection) = {
            let mut link = self.shared.link.write();
            if link.state == LinkState::Closed {
                return Ok(());
            }
            link.state = LinkState::Closed;
            let connection = if link.dialed {
                link.connection.take()
            } else {
                None
            };
            (link.channel.take(), connection)
        };

        self.shared.shutdown.cancel();
        let watcher = self.watcher.lock().take();
        if let Some(handle) = watcher {
            if let Err(err) = handle.await {
                warn!(error = %err, "connection watcher ended abnormally");
            }
        }

        let mut result = Ok(());
        if let Some(channel) = channel {
            result = channel.close().await;
        }
        if let Some(connection) = connection {
            if let Err(err) = connection.close().await {
                warn!(error = %err, "failed to close supervised connection");
            }
        }
        result
    }
}

impl<C: Connection> Drop for Supervisor<C> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

/// Watcher loop: one per supervisor, exits once the supervisor is closed.
async fn watch_connection<C: Connection>(shared: Arc<Shared<C>>) {
    loop {
        let connection = {
            let link = shared.link.read();
            if link.state == LinkState::Closed {
                return;
            }
            link.connection.clone()
        };

        if let Some(connection) = connection {
            let cause = tokio::select! {
                _ = shared.shutdown.cancelled() => return,
                cause = connection.closed() => cause,
            };
            if shared.is_closed() {
                return;
            }
            match cause {
                Some(err) => warn!(error = %err, "broker connection closed"),
                None => warn!("broker connection closed gracefully"),
            }
        }

        if !shared.invalidate() || !shared.reconnect().await {
            return;
        }
    }
}

impl<C: Connection> Shared<C> {
    fn is_closed(&self) -> bool {
        self.link.read().state == LinkState::Closed
    }

    /// Drops the dead pair so `channel()` reports the gap. Returns false if
    /// the supervisor was closed meanwhile.
    fn invalidate(&self) -> bool {
        let mut link = self.link.write();
        if link.state == LinkState::Closed {
            return false;
        }
        link.state = LinkState::Reconnecting;
        link.channel = None;
        link.connection = None;
        true
    }

    /// Redials until it succeeds or the supervisor is closed.
    async fn reconnect(&self) -> bool {
        let mut backoff = self.backoff.start();

        loop {
            if self.is_closed() {
                return false;
            }

            info!(backoff = ?backoff.current(), "attempting to reconnect to broker");

            let attempt = tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                attempt = self.establish() => attempt,
            };

            match attempt {
                Ok((connection, channel)) => return self.install(connection, channel).await,
                Err(err) => {
                    error!(error = %err, "failed to reconnect to broker");
                    let delay = backoff.next_delay();
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return false,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn establish(&self) -> Result<(C, C::Channel), BrokerError> {
        let connection = (self.dial)().await?;
        match open_publish_channel(&connection).await {
            Ok(channel) => Ok((connection, channel)),
            Err(err) => {
                let _ = connection.close().await;
                Err(err)
            }
        }
    }

    /// Swaps in the fresh pair unless the supervisor was closed meanwhile.
    async fn install(&self, connection: C, channel: C::Channel) -> bool {
        let rejected = {
            let mut link = self.link.write();
            if link.state == LinkState::Closed {
                Some((connection, channel))
            } else {
                link.connection = Some(Arc::new(connection));
                link.channel = Some(Arc::new(channel));
                link.state = LinkState::Live;
                link.dialed = true;
                self.generation.fetch_add(1, Ordering::AcqRel);
                None
            }
        };

        match rejected {
            Some((connection, channel)) => {
                let _ = channel.close().await;
                let _ = connection.close().await;
                false
            }
            None => {
                let generation = self.generation.load(Ordering::Acquire);
                info!(generation, "successfully reconnected to broker");
                true
            }
        }
    }
}
