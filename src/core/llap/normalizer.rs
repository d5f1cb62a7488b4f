//! Value clean-up before publishing.
//!
//! Nodes pad short values with `-` to fill the frame. Padding is stripped
//! from the end only, so a leading `-` survives as the sign of a negative
//! value. Numeric text is parsed; anything else (button states like `ON`)
//! keeps its text and gets no numeric value.

use crate::config::llap::TemperatureUnit;

use super::reading::{Reading, ReadingKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct ValueNormalizer {
    unit: TemperatureUnit,
}

impl ValueNormalizer {
    pub fn new(unit: TemperatureUnit) -> Self {
        Self { unit }
    }

    /// Strips padding, parses the value and applies unit conversion.
    pub fn normalize(&self, mut reading: Reading) -> Reading {
        let Some(raw) = reading.raw_value.take() else {
            return reading;
        };

        let text = strip_padding(&raw);
        let numeric = text.parse::<f64>().ok().filter(|v| v.is_finite());

        match numeric {
            Some(celsius)
                if reading.kind == ReadingKind::Temperature
                    && self.unit == TemperatureUnit::Fahrenheit =>
            {
                let fahrenheit = round2(celsius * 1.8 + 32.0);
                reading.raw_value = Some(format!("{fahrenheit:.2}"));
                reading.numeric_value = Some(fahrenheit);
            }
            Some(value) => {
                reading.raw_value = Some(text.to_string());
                reading.numeric_value = Some(value);
            }
            None => {
                reading.raw_value = Some(text.to_string());
            }
        }
        reading
    }
}

fn strip_padding(raw: &str) -> &str {
    raw.trim().trim_end_matches('-').trim()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
