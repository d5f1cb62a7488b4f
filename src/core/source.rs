//! Byte sources feeding the bridge.
//!
//! [`SerialSource`] reads the radio's serial port on a blocking thread and
//! forwards chunks over a bounded channel. Read timeouts are idle ticks;
//! other read errors are logged and reading continues.

use std::{
    io::{self, Read},
    thread,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::serial::SerialConfig;

/// Pause after a failed read before trying again.
const READ_ERROR_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
}

/// A stream of byte chunks.
#[async_trait]
pub trait ByteSource: Send {
    /// Next chunk, or `None` once the source has ended.
    async fn next_chunk(&mut self) -> Option<Bytes>;
}

/// Serial port source, 8N1.
pub struct SerialSource {
    rx: mpsc::Receiver<Bytes>,
}

impl SerialSource {
    /// Opens the port and starts the reader thread.
    ///
    /// # Errors
    ///
    /// `Open` when the port cannot be opened.
    pub fn open(config: &SerialConfig) -> Result<Self, SourceError> {
        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(config.read_timeout())
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .open()
            .map_err(|source| SourceError::Open {
                port: config.port.clone(),
                source,
            })?;

        info!("Opened serial port {} at {} baud", config.port, config.baud_rate);
        Ok(Self::spawn(port, config.chunk_size, config.channel_capacity))
    }

    /// Pumps `reader` on a blocking thread. The thread exits once the
    /// source is dropped.
    pub fn spawn<R>(reader: R, chunk_size: usize, capacity: usize) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity);
        tokio::task::spawn_blocking(move || pump(reader, chunk_size, tx));
        Self { rx }
    }
}

#[async_trait]
impl ByteSource for SerialSource {
    async fn next_chunk(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

fn pump<R: Read>(mut reader: R, chunk_size: usize, tx: mpsc::Sender<Bytes>) {
    let mut buf = vec![0u8; chunk_size];

    loop {
        if tx.is_closed() {
            break;
        }
        match reader.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                trace!("Serial read {} bytes: {}", n, buf[..n].escape_ascii());
                if tx.blocking_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                    break;
                }
            }
            Err(e) if is_idle(&e) => {}
            Err(e) => {
                warn!("Serial read error: {e}");
                thread::sleep(READ_ERROR_PAUSE);
            }
        }
    }
    debug!("Serial reader stopped");
}

fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
