//! Serial port settings for the LLAP radio.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// `[serial]` section. The line format is fixed at 8N1.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyAMA0`.
    #[validate(length(min = 1, message = "Serial port must not be empty"))]
    pub port: String,

    #[validate(range(min = 300, max = 4000000, message = "Baud rate must be between 300 and 4000000"))]
    pub baud_rate: u32,

    /// Blocking read timeout. An expired timeout is an idle tick, not an error.
    #[validate(range(min = 10, max = 60000, message = "Read timeout must be between 10 and 60000 ms"))]
    pub read_timeout_ms: u64,

    /// Largest chunk handed to the bridge per read.
    #[validate(range(min = 1, max = 65536, message = "Chunk size must be between 1 and 65536 bytes"))]
    pub chunk_size: usize,

    /// Chunks buffered between the reader thread and the bridge.
    #[validate(range(min = 1, max = 4096, message = "Channel capacity must be between 1 and 4096"))]
    pub channel_capacity: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyAMA0".to_string(),
            baud_rate: 9600,
            read_timeout_ms: 500,
            chunk_size: 256,
            channel_capacity: 64,
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
