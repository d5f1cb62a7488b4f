//! Connection seam between the publish session and the MQTT wire protocol.
//!
//! [`Transport::connect`] resolves once the broker has acknowledged the
//! connection and yields a [`Link`]; the link performs publishes and is ended
//! explicitly. [`MqttTransport`] is the rumqttc implementation; tests plug in
//! scripted transports.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Outgoing, Packet, QoS};
use tracing::{debug, info, trace};

use super::{client::ClientBuilder, config::Config, credential::Credential, error::TransferError};

/// Opens authenticated connections to the bridge.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connects with `credential` and waits for the broker's acknowledgement.
    async fn connect(&self, credential: &Credential) -> Result<Box<dyn Link>, TransferError>;
}

/// An established connection.
#[async_trait]
pub trait Link: Send {
    /// Publishes `payload` and waits until the delivery completes for `qos`.
    async fn publish(&mut self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), TransferError>;

    /// Ends the connection gracefully.
    async fn end(self: Box<Self>) -> Result<(), TransferError>;
}

/// rumqttc-backed transport. Builds a new client per connection.
#[derive(Debug, Clone)]
pub struct MqttTransport {
    config: Config,
}

impl MqttTransport {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.config.connection_timeout)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, credential: &Credential) -> Result<Box<dyn Link>, TransferError> {
        let (client, event_loop) = ClientBuilder::from_config(&self.config)
            .credential(credential)
            .build()?;

        let mut link = MqttLink {
            client,
            event_loop,
            ack_timeout: self.ack_timeout(),
        };

        debug!("Connecting to {}:{}", self.config.host, self.config.port);
        link.wait_for("CONNACK", |event| match event {
            Event::Incoming(Packet::ConnAck(ack)) => Some(match ack.code {
                ConnectReturnCode::Success => Ok(()),
                code => Err(TransferError::Refused(code)),
            }),
            _ => None,
        })
        .await?;

        info!("Connected to {}:{}", self.config.host, self.config.port);
        Ok(Box::new(link))
    }
}

/// A single rumqttc connection: the client plus the event loop driving it.
pub struct MqttLink {
    client: AsyncClient,
    event_loop: EventLoop,
    ack_timeout: Duration,
}

impl MqttLink {
    /// Polls the event loop until `done` yields an outcome.
    ///
    /// Incoming publishes seen on the way are logged. The wait is bounded by
    /// the connection timeout.
    async fn wait_for<F>(&mut self, what: &str, mut done: F) -> Result<(), TransferError>
    where
        F: FnMut(&Event) -> Option<Result<(), TransferError>> + Send,
    {
        let ack_timeout = self.ack_timeout;
        let poll = async {
            loop {
                let event = self.event_loop.poll().await.map_err(TransferError::from)?;
                log_event(&event);
                if let Some(outcome) = done(&event) {
                    return outcome;
                }
            }
        };

        match tokio::time::timeout(ack_timeout, poll).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransferError::Closed(format!(
                "timed out after {ack_timeout:?} waiting for {what}"
            ))),
        }
    }
}

#[async_trait]
impl Link for MqttLink {
    async fn publish(&mut self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), TransferError> {
        self.client.publish_bytes(topic, qos, false, payload).await?;

        match qos {
            QoS::AtMostOnce => {
                self.wait_for("PUBLISH", |event| {
                    matches!(event, Event::Outgoing(Outgoing::Publish(_))).then_some(Ok(()))
                })
                .await
            }
            QoS::AtLeastOnce => {
                self.wait_for("PUBACK", |event| {
                    matches!(event, Event::Incoming(Packet::PubAck(_))).then_some(Ok(()))
                })
                .await
            }
            QoS::ExactlyOnce => {
                self.wait_for("PUBCOMP", |event| {
                    matches!(event, Event::Incoming(Packet::PubComp(_))).then_some(Ok(()))
                })
                .await
            }
        }
    }

    async fn end(mut self: Box<Self>) -> Result<(), TransferError> {
        self.client.disconnect().await?;

        let ack_timeout = self.ack_timeout;
        let drain = async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(()),
                    Ok(event) => log_event(&event),
                    Err(e) => return Err(TransferError::from(e)),
                }
            }
        };

        tokio::time::timeout(ack_timeout, drain)
            .await
            .map_err(|_| TransferError::Closed("timed out sending DISCONNECT".into()))?
    }
}

fn log_event(event: &Event) {
    match event {
        Event::Incoming(Packet::Publish(publish)) => {
            info!(
                "Message received on '{}': {}",
                publish.topic,
                String::from_utf8_lossy(&publish.payload)
            );
        }
        other => trace!("MQTT event: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::config::TlsConfig;

    #[tokio::test]
    async fn test_connect_to_unreachable_broker_fails() {
        let config = Config {
            project_id: "p".into(),
            registry_id: "r".into(),
            device_id: "d".into(),
            private_key_file: "/k.pem".into(),
            host: "127.0.0.1".into(),
            port: 1,
            connection_timeout: 2,
            tls: TlsConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let now = OffsetDateTime::now_utc();
        let credential = Credential::new("t".into(), now, now);

        let result = MqttTransport::new(config).connect(&credential).await;
        assert!(result.is_err());
        assert!(!result.err().unwrap().is_fatal());
    }

    #[tokio::test]
    async fn test_connect_with_missing_ca_is_setup_error() {
        let config = Config {
            tls: TlsConfig {
                enabled: true,
                ca_cert_path: "/nonexistent/roots.pem".into(),
            },
            ..Default::default()
        };
        let now = OffsetDateTime::now_utc();
        let credential = Credential::new("t".into(), now, now);

        let result = MqttTransport::new(config).connect(&credential).await;
        assert!(matches!(result, Err(TransferError::ClientSetup(_))));
    }
}
