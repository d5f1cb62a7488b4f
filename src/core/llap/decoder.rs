//! Classification of LLAP frames into readings.
//!
//! The message after the device id is matched against an ordered prefix
//! table. Every matching rule overwrites the previous outcome, so the last
//! match wins; the order below is part of the behaviour.

use tracing::{debug, warn};

use super::{
    frame::{RawFrame, MESSAGE_OFFSET},
    reading::{Reading, ReadingKind},
    DecodeError,
};

/// One entry of the classification table.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub prefix: &'static str,
    pub kind: ReadingKind,
}

impl Rule {
    const fn new(prefix: &'static str, kind: ReadingKind) -> Self {
        Self { prefix, kind }
    }

    /// Frame offset where the value of a matching frame starts.
    pub fn value_offset(&self) -> usize {
        MESSAGE_OFFSET + self.prefix.len()
    }
}

/// Evaluated top to bottom, last match wins.
pub const RULES: [Rule; 9] = [
    Rule::new("TMPA", ReadingKind::Temperature),
    Rule::new("TMPB", ReadingKind::Temperature),
    Rule::new("HUM", ReadingKind::Humidity),
    Rule::new("TMPC", ReadingKind::Temperature),
    Rule::new("BUTTON", ReadingKind::Button),
    Rule::new("SLEEPING", ReadingKind::Sleeping),
    Rule::new("AWAKE", ReadingKind::Awake),
    Rule::new("BATT", ReadingKind::Battery),
    Rule::new("STARTED", ReadingKind::Started),
];

/// Stateless frame classifier.
#[derive(Debug, Clone, Copy)]
pub struct LlapDecoder {
    rules: &'static [Rule],
}

impl Default for LlapDecoder {
    fn default() -> Self {
        Self { rules: &RULES }
    }
}

impl LlapDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `frame`, logging why a frame yields nothing.
    pub fn decode(&self, frame: &RawFrame) -> Option<Reading> {
        match self.classify(frame) {
            Ok(reading) => Some(reading),
            Err(e @ DecodeError::ProtocolViolation(_)) => {
                warn!("Dropping frame: {e}");
                None
            }
            Err(e) => {
                debug!("Dropping frame: {e}");
                None
            }
        }
    }

    /// Decodes `frame` into an unnormalised reading.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` for non-ASCII frames, `DecodeMiss` when no rule
    /// matches.
    pub fn classify(&self, frame: &RawFrame) -> Result<Reading, DecodeError> {
        let text = frame.as_str()?;
        let device_id = &text[1..MESSAGE_OFFSET];
        let message = &text[MESSAGE_OFFSET..];

        let rule = self
            .rules
            .iter()
            .filter(|rule| message.starts_with(rule.prefix))
            .last()
            .ok_or_else(|| DecodeError::DecodeMiss(text.to_string()))?;

        let value = rule
            .kind
            .carries_value()
            .then(|| text[rule.value_offset()..].to_string());

        Ok(Reading::new(device_id, rule.kind, value))
    }
}
