//! Typed readings decoded from LLAP frames, and their cloud payload.

use std::fmt;

/// What a frame reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadingKind {
    Temperature,
    Humidity,
    Battery,
    Button,
    Sleeping,
    Awake,
    Started,
}

impl ReadingKind {
    /// Label used in the payload key.
    pub fn label(&self) -> &'static str {
        match self {
            ReadingKind::Temperature => "TMP",
            ReadingKind::Humidity => "HUM",
            ReadingKind::Battery => "BATT",
            ReadingKind::Button => "BUTTON",
            ReadingKind::Sleeping => "SLEEPING",
            ReadingKind::Awake => "AWAKE",
            ReadingKind::Started => "STARTED",
        }
    }

    /// Status kinds report an event and carry no value.
    pub fn carries_value(&self) -> bool {
        !matches!(
            self,
            ReadingKind::Sleeping | ReadingKind::Awake | ReadingKind::Started
        )
    }
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One decoded report of a sensor node.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Two-character node id.
    pub device_id: String,
    pub kind: ReadingKind,
    /// Value text; raw from the frame until normalised.
    pub raw_value: Option<String>,
    /// Set by normalisation when the value is numeric.
    pub numeric_value: Option<f64>,
}

impl Reading {
    pub fn new(device_id: impl Into<String>, kind: ReadingKind, raw_value: Option<String>) -> Self {
        Self {
            device_id: device_id.into(),
            kind,
            raw_value: raw_value.filter(|_| kind.carries_value()),
            numeric_value: None,
        }
    }

    /// Payload key: device id followed by the kind label, e.g. `01TMP`.
    pub fn key(&self) -> String {
        format!("{}{}", self.device_id, self.kind.label())
    }

    /// Encodes the reading for publishing.
    ///
    /// ```text
    /// {'01TMP':21.5}     value-bearing kinds
    /// {'01SLEEPING'}     status kinds
    /// ```
    ///
    /// Returns `None` for a value-bearing reading whose value is empty.
    pub fn payload(&self) -> Option<String> {
        if !self.kind.carries_value() {
            return Some(format!("{{'{}'}}", self.key()));
        }
        match self.raw_value.as_deref() {
            Some(value) if !value.is_empty() => Some(format!("{{'{}':{}}}", self.key(), value)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_payload() {
        let reading = Reading::new("01", ReadingKind::Temperature, Some("21.5".into()));
        assert_eq!(reading.payload().as_deref(), Some("{'01TMP':21.5}"));
    }

    #[test]
    fn test_status_payload_has_no_value() {
        let reading = Reading::new("01", ReadingKind::Sleeping, Some("ignored".into()));
        assert_eq!(reading.raw_value, None);
        assert_eq!(reading.payload().as_deref(), Some("{'01SLEEPING'}"));
    }

    #[test]
    fn test_empty_value_has_no_payload() {
        let reading = Reading::new("01", ReadingKind::Battery, Some(String::new()));
        assert_eq!(reading.payload(), None);
    }

    #[test]
    fn test_labels() {
        let labels: Vec<_> = [
            ReadingKind::Temperature,
            ReadingKind::Humidity,
            ReadingKind::Battery,
            ReadingKind::Button,
            ReadingKind::Sleeping,
            ReadingKind::Awake,
            ReadingKind::Started,
        ]
        .iter()
        .map(ReadingKind::label)
        .collect();
        assert_eq!(
            labels,
            ["TMP", "HUM", "BATT", "BUTTON", "SLEEPING", "AWAKE", "STARTED"]
        );
    }
}
