//! Per-reading publish session with reconnection backoff.
//!
//! Every [`PublishSession::publish`] call opens its own connection with a
//! freshly issued credential, performs exactly one publish and ends the
//! connection. The session owns the state shared by those calls: the
//! [`ConnectionState`] broadcast and the [`Backoff`] schedule.
//!
//! - connect success: `Connected`, backoff reset
//! - connect/publish/end failure: `Backoff`, delay doubled (capped)
//! - graceful end after the publish: `Disconnected`, no backoff
//!
//! While backing off, the next call sleeps for the current delay plus jitter
//! before it connects. Failures are returned to the caller and never retried
//! within the same call.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use rumqttc::QoS;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, error, info, warn};

use super::{
    backoff::Backoff,
    config::Config,
    credential::CredentialManager,
    error::TransferError,
    state::ConnectionState,
    transport::{MqttTransport, Transport},
};

/// Counts publishes in flight so shutdown can wait for them.
///
/// Callers enter a guard before spawning a publish and move it into the
/// task; the count drops when the guard does.
pub struct PublishDrain {
    inflight: AtomicUsize,
    notify: Notify,
}

impl PublishDrain {
    pub fn new() -> Self {
        Self {
            inflight: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    pub fn enter(self: &Arc<Self>) -> PublishGuard {
        self.inflight.fetch_add(1, Ordering::AcqRel);
        PublishGuard {
            drain: self.clone(),
        }
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    /// Resolves once no publish is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.notify.notified();
            if self.inflight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for PublishDrain {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PublishGuard {
    drain: Arc<PublishDrain>,
}

impl Drop for PublishGuard {
    fn drop(&mut self) {
        if self.drain.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drain.notify.notify_waiters();
        }
    }
}

struct SessionInner {
    backoff: Backoff,
    should_backoff: bool,
}

/// Owner of the publish connection lifecycle.
pub struct PublishSession {
    transport: Arc<dyn Transport>,
    credentials: CredentialManager,
    qos: QoS,
    inner: Mutex<SessionInner>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl PublishSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: CredentialManager,
        backoff: Backoff,
        qos: QoS,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            credentials,
            qos,
            inner: Mutex::new(SessionInner {
                backoff,
                should_backoff: false,
            }),
            state_tx,
            state_rx,
        }
    }

    /// Session over the rumqttc transport with the JWT credential manager.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(MqttTransport::new(config.clone())),
            CredentialManager::from_config(config),
            config.backoff.build(),
            config.publish_qos(),
        )
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Whether the next publish waits before connecting.
    pub async fn should_backoff(&self) -> bool {
        self.inner.lock().await.should_backoff
    }

    /// Delay the next wait uses, before jitter.
    pub async fn current_delay(&self) -> Duration {
        self.inner.lock().await.backoff.current_delay()
    }

    fn update_state(&self, state: ConnectionState) {
        let need_update = *self.state_tx.borrow() != state;

        if need_update {
            if self.state_tx.send(state.clone()).is_err() {
                warn!("No subscribers for state updates");
            } else {
                debug!("Connection state changed to: {}", state);
            }
        }
    }

    async fn on_connected(&self) {
        let mut inner = self.inner.lock().await;
        inner.backoff.reset();
        inner.should_backoff = false;
        self.update_state(ConnectionState::Connected);
    }

    async fn on_failure(&self, err: &TransferError) {
        let mut inner = self.inner.lock().await;
        inner.backoff.record_failure();
        inner.should_backoff = true;
        let delay = inner.backoff.current_delay();
        error!(
            "Connection error: {err}; next attempt backs off {:.2}s (failure #{})",
            delay.as_secs_f64(),
            inner.backoff.attempt()
        );
        self.update_state(ConnectionState::Backoff(delay.as_secs_f64()));
    }

    /// Publishes `payload` to `topic` over a dedicated connection.
    ///
    /// # Errors
    ///
    /// `Signing` when no credential can be issued; the caller should stop.
    /// Any other error has already been folded into the backoff state.
    pub async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransferError> {
        let wait = {
            let inner = self.inner.lock().await;
            inner.should_backoff.then(|| inner.backoff.next_sleep())
        };
        if let Some(wait) = wait {
            info!("Backing off {:.2}s before connecting", wait.as_secs_f64());
            tokio::time::sleep(wait).await;
        }

        let credential = match self.credentials.issue() {
            Ok(credential) => credential,
            Err(e) => {
                error!("Failed to issue credential: {e}");
                return Err(e.into());
            }
        };

        self.update_state(ConnectionState::Connecting);
        let mut link = match self.transport.connect(&credential).await {
            Ok(link) => link,
            Err(e) => {
                self.on_failure(&e).await;
                return Err(e);
            }
        };
        self.on_connected().await;

        info!("Publishing to {topic}: {}", String::from_utf8_lossy(&payload));
        if let Err(e) = link.publish(topic, payload, self.qos).await {
            self.on_failure(&e).await;
            return Err(e);
        }

        match link.end().await {
            Ok(()) => {
                debug!("Publish to {topic} complete, connection closed");
                self.update_state(ConnectionState::Disconnected);
                Ok(())
            }
            // The message went out; only the close failed.
            Err(e) => {
                self.on_failure(&e).await;
                Ok(())
            }
        }
    }
}
