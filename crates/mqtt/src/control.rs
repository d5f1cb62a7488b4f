//! Long-lived device connection subscribed to the configuration topic.
//!
//! Alongside the per-reading publish connections the gateway keeps one
//! connection open to receive configuration pushed by the cloud on
//! `/devices/<device>/config`. Messages are logged; nothing else acts on them.
//!
//! The bridge closes a connection once its token expires, so every reconnect
//! builds a new client with a freshly issued credential. Transient failures
//! wait on the channel's own [`Backoff`]; errors that cannot heal by retrying
//! end the channel.
//!
//! # Usage
//!
//! ```ignore
//! let cancel = CancellationToken::new();
//! let channel = ControlChannel::from_config(&config, cancel.clone());
//! let handle = tokio::spawn(channel.run());
//!
//! // On shutdown
//! cancel.cancel();
//! handle.await??;
//! ```

use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet, QoS,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{
    backoff::Backoff, client::ClientBuilder, config::Config, credential::CredentialManager,
    error::TransferError, state::ConnectionState,
};

/// How one connection of the channel ended.
enum Ended {
    /// Shutdown was requested and the disconnect went out.
    Shutdown,
    /// The connection failed; the error decides whether to retry.
    Failed(ConnectionError),
}

/// Subscriber for device configuration pushes.
pub struct ControlChannel {
    config: Config,
    credentials: CredentialManager,
    backoff: Backoff,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ControlChannel {
    pub fn new(
        config: Config,
        credentials: CredentialManager,
        backoff: Backoff,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            credentials,
            backoff,
            cancel,
            state_tx,
            state_rx,
        }
    }

    pub fn from_config(config: &Config, cancel: CancellationToken) -> Self {
        Self::new(
            config.clone(),
            CredentialManager::from_config(config),
            config.backoff.build(),
            cancel,
        )
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    fn update_state(&self, state: ConnectionState) {
        let need_update = *self.state_tx.borrow() != state;

        if need_update {
            if self.state_tx.send(state.clone()).is_err() {
                warn!("No subscribers for state updates");
            } else {
                info!("Control channel state changed to: {}", state);
            }
        }
    }

    /// Runs until cancelled or until an unrecoverable error.
    ///
    /// # Errors
    ///
    /// `Signing` when no credential can be issued, `ClientSetup` for bad TLS
    /// material, `ClientConnection` for connection errors classified fatal.
    pub async fn run(mut self) -> Result<(), TransferError> {
        info!("Starting control channel on {}", self.config.config_topic());

        loop {
            if self.cancel.is_cancelled() {
                self.update_state(ConnectionState::Disconnected);
                return Ok(());
            }

            let credential = self.credentials.issue()?;
            let (client, mut event_loop) = ClientBuilder::from_config(&self.config)
                .credential(&credential)
                .build()?;

            self.update_state(ConnectionState::Connecting);
            let err = match self.drive(&client, &mut event_loop).await {
                Ended::Shutdown => {
                    self.update_state(ConnectionState::Disconnected);
                    info!("Control channel shutdown completed");
                    return Ok(());
                }
                Ended::Failed(err) => err,
            };

            if is_fatal_error(&err) {
                error!("Fatal control channel error: {}", get_error_message(&err));
                self.update_state(ConnectionState::Disconnected);
                return Err(TransferError::from(err));
            }

            self.backoff.record_failure();
            let sleep = self.backoff.next_sleep();
            error!(
                "Reconnecting in {:.2} seconds due to error: {:?}",
                sleep.as_secs_f64(),
                get_error_message(&err)
            );
            self.update_state(ConnectionState::Backoff(
                self.backoff.current_delay().as_secs_f64(),
            ));

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.update_state(ConnectionState::Disconnected);
                    return Ok(());
                }
                _ = tokio::time::sleep(sleep) => {}
            }
        }
    }

    /// Polls one connection until it fails or shutdown is requested.
    async fn drive(&mut self, client: &AsyncClient, event_loop: &mut EventLoop) -> Ended {
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown signal received, disconnecting control channel...");
                    disconnect(client, event_loop, self.config.connection_timeout).await;
                    return Ended::Shutdown;
                }

                event = event_loop.poll() => match event {
                    Ok(event) => self.handle_event(client, event).await,
                    Err(e) => return Ended::Failed(e),
                }
            }
        }
    }

    async fn handle_event(&mut self, client: &AsyncClient, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) if ack.code == ConnectReturnCode::Success => {
                info!("Control channel connected");
                self.backoff.reset();
                self.update_state(ConnectionState::Connected);

                let topic = self.config.config_topic();
                // Queued on the request channel; the event loop sends it.
                if let Err(e) = client.subscribe(&topic, QoS::AtLeastOnce).await {
                    warn!("Failed to subscribe to {topic}: {e}");
                }
            }
            Event::Incoming(Packet::SubAck(_)) => {
                debug!("Subscribed to {}", self.config.config_topic());
            }
            Event::Incoming(Packet::Publish(publish)) => {
                info!(
                    "Config message received on '{}': {}",
                    publish.topic,
                    String::from_utf8_lossy(&publish.payload)
                );
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Disconnected by broker");
            }
            other => trace!("Control channel event: {:?}", other),
        }
    }
}

/// Sends DISCONNECT and polls until it has gone out, bounded by `timeout_secs`.
async fn disconnect(client: &AsyncClient, event_loop: &mut EventLoop, timeout_secs: u64) {
    if let Err(e) = client.disconnect().await {
        warn!("Error sending disconnect packet: {:?}", e);
        return;
    }

    let flush = async {
        loop {
            match event_loop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => return,
                Ok(_) => {}
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(timeout_secs), flush)
        .await
        .is_err()
    {
        warn!("Timed out flushing disconnect");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    // Retrying cannot succeed
    Fatal,
    // Transient; reconnect after backoff
    Reconnect,
}

fn classify_connection_error(err: &ConnectionError) -> Disposition {
    use Disposition::*;

    match err {
        // Bad CA bundle or incompatible crypto setup
        ConnectionError::Tls(_) => Fatal,

        ConnectionError::NotConnAck(_) => Fatal,
        ConnectionError::RequestsDone => Fatal,

        ConnectionError::Io(e) => match e.kind() {
            std::io::ErrorKind::AddrInUse
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidInput => Fatal,
            _ => Reconnect,
        },

        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => Reconnect,

        // The bridge drops connections whose token expired; that surfaces
        // as protocol state errors and is healed by a fresh credential.
        ConnectionError::MqttState(_) => Reconnect,

        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::RefusedProtocolVersion | ConnectReturnCode::BadClientId => Fatal,
            // Token rejected: the next attempt signs a new one.
            ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => Reconnect,
            _ => Reconnect,
        },

        #[allow(unreachable_patterns)]
        _ => Reconnect,
    }
}

fn is_fatal_error(err: &ConnectionError) -> bool {
    matches!(classify_connection_error(err), Disposition::Fatal)
}

/// Innermost message of an error chain.
fn get_error_message(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    let msg = current.to_string();
    msg.trim_matches('"').to_string()
}
