//! Recovery of fixed-width frames from the unbounded serial byte stream.
//!
//! On every [`FrameAssembler::feed`]:
//!
//! 1. the new bytes are appended to the buffer;
//! 2. the buffer is searched once for the start marker, and anything before
//!    it is discarded;
//! 3. frames are cut from the front in [`FRAME_LEN`] steps, whether or not
//!    the bytes after each frame start with a marker;
//! 4. the remainder (shorter than a frame) waits for the next feed.
//!
//! A marker further inside an over-full buffer does not cause a second
//! resynchronisation; a stream that loses bytes mid-burst realigns on the
//! next feed.
//!
//! # Example
//!
//! ```
//! use llapbridge::core::llap::FrameAssembler;
//!
//! let mut assembler = FrameAssembler::new();
//! assert_eq!(assembler.feed(b"xxa01TMP").count(), 0);
//!
//! let frames: Vec<_> = assembler.feed(b"A21.5-").collect();
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].as_bytes(), b"a01TMPA21.5-");
//! ```

use bytes::BytesMut;
use tracing::trace;

use super::{
    frame::{RawFrame, FRAME_LEN, START_MARKER},
    DecodeError,
};

/// Buffer of unconsumed serial bytes.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: BytesMut,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * FRAME_LEN),
        }
    }

    /// Appends `bytes` and returns the frames now complete.
    ///
    /// Frames are cut lazily; frames the caller does not take stay buffered
    /// and come out of the next feed.
    pub fn feed(&mut self, bytes: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(bytes);
        self.resync();
        Frames {
            buffer: &mut self.buffer,
        }
    }

    /// Bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    fn resync(&mut self) {
        match self.buffer.iter().position(|&b| b == START_MARKER) {
            Some(0) => {}
            Some(start) => {
                trace!(
                    "{} before marker: {}",
                    DecodeError::FramingAnomaly(start),
                    self.buffer[..start].escape_ascii()
                );
                let _ = self.buffer.split_to(start);
            }
            // Without a marker nothing here can start a frame. Short noise is
            // kept (the next resync drops it); a frame's worth is cleared.
            None if self.buffer.len() >= FRAME_LEN => {
                trace!(
                    "{} without marker: {}",
                    DecodeError::FramingAnomaly(self.buffer.len()),
                    self.buffer.escape_ascii()
                );
                self.buffer.clear();
            }
            None => {}
        }
    }
}

/// Frames cut from the front of the assembler buffer.
pub struct Frames<'a> {
    buffer: &'a mut BytesMut,
}

impl Iterator for Frames<'_> {
    type Item = RawFrame;

    fn next(&mut self) -> Option<RawFrame> {
        if self.buffer.len() < FRAME_LEN {
            return None;
        }
        RawFrame::new(self.buffer.split_to(FRAME_LEN).freeze())
    }
}
