//! LLAP: the fixed-width ASCII protocol of the sensor radio.
//!
//! bytes → [`FrameAssembler`] → [`RawFrame`] → [`LlapDecoder`] → [`Reading`]
//! → [`ValueNormalizer`] → payload.

use thiserror::Error;

pub mod assembler;
pub mod decoder;
pub mod frame;
pub mod normalizer;
pub mod reading;

pub use assembler::FrameAssembler;
pub use decoder::LlapDecoder;
pub use frame::{RawFrame, FRAME_LEN, START_MARKER};
pub use normalizer::ValueNormalizer;
pub use reading::{Reading, ReadingKind};

/// Why a frame produced no reading. Logged, never propagated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Bytes that never formed a frame.
    #[error("Framing anomaly: discarded {0} bytes")]
    FramingAnomaly(usize),

    #[error("No LLAP rule matches frame {0}")]
    DecodeMiss(String),

    #[error("Non-ASCII bytes in frame {0}")]
    ProtocolViolation(String),
}
