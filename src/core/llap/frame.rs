//! Fixed-width LLAP frames.
//!
//! ```text
//! a 0 1 T M P A 2 1 . 5 -
//! │ └┬┘ └────────┬──────┘
//! │  │           message, padded with '-'
//! │  device id
//! start marker
//! ```

use std::fmt;

use bytes::Bytes;

use super::DecodeError;

/// Length of every LLAP frame, marker included.
pub const FRAME_LEN: usize = 12;

/// First byte of every frame.
pub const START_MARKER: u8 = b'a';

/// Offset of the message after the marker and the device id.
pub const MESSAGE_OFFSET: usize = 3;

/// Exactly [`FRAME_LEN`] bytes cut from the serial stream.
#[derive(Clone, PartialEq, Eq)]
pub struct RawFrame(Bytes);

impl RawFrame {
    /// Wraps `bytes` if it has exactly the frame length.
    pub fn new(bytes: Bytes) -> Option<Self> {
        (bytes.len() == FRAME_LEN).then_some(Self(bytes))
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Self::new(Bytes::copy_from_slice(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The frame as text.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` when the frame holds non-ASCII bytes.
    pub fn as_str(&self) -> Result<&str, DecodeError> {
        if !self.0.is_ascii() {
            return Err(DecodeError::ProtocolViolation(self.to_string()));
        }
        std::str::from_utf8(&self.0).map_err(|_| DecodeError::ProtocolViolation(self.to_string()))
    }
}

impl fmt::Display for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.escape_ascii())
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawFrame(\"{self}\")")
    }
}
