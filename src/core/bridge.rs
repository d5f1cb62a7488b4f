//! Pipeline driver.
//!
//! The [`Bridge`] pulls chunks from a [`ByteSource`], runs them through the
//! assembler, decoder and normalizer, and spawns one publish task per
//! reading. Publish tasks are fire-and-forget: transport failures end up in
//! the session backoff, signing failures are reported on the fault channel.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use llapbridge_mqtt::{PublishDrain, PublishSession, TransferError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{
    llap::{FrameAssembler, LlapDecoder, ValueNormalizer},
    source::ByteSource,
};
use crate::config::Config;

/// Destination of encoded readings.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransferError>;
}

#[async_trait]
impl Publisher for PublishSession {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransferError> {
        PublishSession::publish(self, topic, payload).await
    }
}

/// How the byte pipeline stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    /// The source ran dry.
    SourceEnded,
    /// Shutdown was requested.
    Cancelled,
}

pub struct Bridge {
    assembler: FrameAssembler,
    decoder: LlapDecoder,
    normalizer: ValueNormalizer,
    publisher: Arc<dyn Publisher>,
    topic: Arc<str>,
    drain: Arc<PublishDrain>,
    faults: mpsc::UnboundedSender<TransferError>,
}

impl Bridge {
    pub fn new(
        normalizer: ValueNormalizer,
        publisher: Arc<dyn Publisher>,
        topic: impl Into<Arc<str>>,
        drain: Arc<PublishDrain>,
        faults: mpsc::UnboundedSender<TransferError>,
    ) -> Self {
        Self {
            assembler: FrameAssembler::new(),
            decoder: LlapDecoder::new(),
            normalizer,
            publisher,
            topic: topic.into(),
            drain,
            faults,
        }
    }

    pub fn from_config(
        config: &Config,
        publisher: Arc<dyn Publisher>,
        drain: Arc<PublishDrain>,
        faults: mpsc::UnboundedSender<TransferError>,
    ) -> Self {
        Self::new(
            ValueNormalizer::new(config.llap.temperature_unit),
            publisher,
            config.transport.topic(),
            drain,
            faults,
        )
    }

    /// Processes chunks until the source ends or `cancel` fires.
    pub async fn run<S: ByteSource>(mut self, mut source: S, cancel: CancellationToken) -> BridgeExit {
        info!("Bridge started, publishing to {}", self.topic);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Bridge stopping on shutdown request");
                    return BridgeExit::Cancelled;
                }
                chunk = source.next_chunk() => match chunk {
                    Some(chunk) => {
                        self.handle_chunk(&chunk);
                    }
                    None => {
                        info!("Byte source ended");
                        return BridgeExit::SourceEnded;
                    }
                },
            }
        }
    }

    /// Feeds one chunk and spawns a publish for every reading it completes.
    /// Returns the number of publishes spawned.
    pub fn handle_chunk(&mut self, chunk: &[u8]) -> usize {
        let mut spawned = 0;

        for frame in self.assembler.feed(chunk) {
            let Some(reading) = self.decoder.decode(&frame) else {
                continue;
            };
            let reading = self.normalizer.normalize(reading);
            let Some(payload) = reading.payload() else {
                debug!("Reading {} has no value to publish", reading.key());
                continue;
            };

            let guard = self.drain.enter();
            let publisher = self.publisher.clone();
            let topic = self.topic.clone();
            let faults = self.faults.clone();
            tokio::spawn(async move {
                let _guard = guard;
                if let Err(e) = publisher.publish(&topic, Bytes::from(payload)).await {
                    if e.is_fatal() {
                        error!("Publish aborted: {e}");
                        let _ = faults.send(e);
                    } else {
                        debug!("Publish failed: {e}");
                    }
                }
            });
            spawned += 1;
        }

        spawned
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex as StdMutex, time::Duration};

    use llapbridge_mqtt::SigningError;
    use tracing_test::traced_test;

    use super::*;
    use crate::config::llap::TemperatureUnit;

    #[derive(Default)]
    struct MockPublisher {
        published: StdMutex<Vec<(String, String)>>,
        fail_signing: bool,
    }

    #[async_trait]
    impl Publisher for MockPublisher {
        async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransferError> {
            if self.fail_signing {
                return Err(SigningError::InvalidKey("not a key".into()).into());
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), String::from_utf8_lossy(&payload).into_owned()));
            Ok(())
        }
    }

    struct VecSource(VecDeque<&'static [u8]>);

    #[async_trait]
    impl ByteSource for VecSource {
        async fn next_chunk(&mut self) -> Option<Bytes> {
            self.0.pop_front().map(Bytes::from_static)
        }
    }

    fn bridge(
        unit: TemperatureUnit,
        publisher: Arc<MockPublisher>,
    ) -> (Bridge, Arc<PublishDrain>, mpsc::UnboundedReceiver<TransferError>) {
        let drain = Arc::new(PublishDrain::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let bridge = Bridge::new(
            ValueNormalizer::new(unit),
            publisher,
            "/devices/gw/events",
            drain.clone(),
            tx,
        );
        (bridge, drain, rx)
    }

    async fn drained(drain: &PublishDrain) {
        tokio::time::timeout(Duration::from_secs(5), drain.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_readings_are_published_in_order_of_frames() {
        let publisher = Arc::new(MockPublisher::default());
        let (bridge, drain, _rx) = bridge(TemperatureUnit::Celsius, publisher.clone());

        let source = VecSource(VecDeque::from(vec![
            &b"xx\x00a01TMPA21"[..],
            &b".5-a02SLEEPING-"[..],
        ]));
        let exit = bridge.run(source, CancellationToken::new()).await;
        assert_eq!(exit, BridgeExit::SourceEnded);
        drained(&drain).await;

        let mut published = publisher.published.lock().unwrap().clone();
        published.sort();
        assert_eq!(
            published,
            vec![
                ("/devices/gw/events".to_string(), "{'01TMP':21.5}".to_string()),
                ("/devices/gw/events".to_string(), "{'02SLEEPING'}".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_fahrenheit_payload() {
        let publisher = Arc::new(MockPublisher::default());
        let (mut bridge, drain, _rx) = bridge(TemperatureUnit::Fahrenheit, publisher.clone());

        assert_eq!(bridge.handle_chunk(b"a01TMPA20---"), 1);
        drained(&drain).await;

        let published = publisher.published.lock().unwrap();
        assert_eq!(published[0].1, "{'01TMP':68.00}");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unrecognised_frames_are_not_published() {
        let publisher = Arc::new(MockPublisher::default());
        let (mut bridge, drain, _rx) = bridge(TemperatureUnit::Celsius, publisher.clone());

        assert_eq!(bridge.handle_chunk(b"a01HELLO----"), 0);
        assert_eq!(bridge.handle_chunk(b"a01TMPA-----"), 0);
        drained(&drain).await;

        assert!(publisher.published.lock().unwrap().is_empty());
        assert!(logs_contain("Dropping frame"));
    }

    #[tokio::test]
    async fn test_partial_frame_waits_for_more_bytes() {
        let publisher = Arc::new(MockPublisher::default());
        let (mut bridge, drain, _rx) = bridge(TemperatureUnit::Celsius, publisher.clone());

        assert_eq!(bridge.handle_chunk(b"a03BATT"), 0);
        assert_eq!(bridge.handle_chunk(b"3.10-"), 1);
        drained(&drain).await;

        assert_eq!(publisher.published.lock().unwrap()[0].1, "{'03BATT':3.10}");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_signing_failure_is_reported_as_fault() {
        let publisher = Arc::new(MockPublisher {
            fail_signing: true,
            ..Default::default()
        });
        let (mut bridge, drain, mut rx) = bridge(TemperatureUnit::Celsius, publisher);

        bridge.handle_chunk(b"a01HUM45----");
        drained(&drain).await;

        let fault = rx.recv().await.unwrap();
        assert!(fault.is_fatal());
        assert!(logs_contain("Publish aborted"));
    }

    #[tokio::test]
    async fn test_cancel_stops_bridge() {
        struct Pending;

        #[async_trait]
        impl ByteSource for Pending {
            async fn next_chunk(&mut self) -> Option<Bytes> {
                std::future::pending().await
            }
        }

        let publisher = Arc::new(MockPublisher::default());
        let (bridge, _drain, _rx) = bridge(TemperatureUnit::Celsius, publisher);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(bridge.run(Pending, cancel).await, BridgeExit::Cancelled);
    }
}
