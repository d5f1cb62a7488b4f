//! Reading normalisation settings.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Unit temperature readings are published in. Nodes report Celsius.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

/// `[llap]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LlapConfig {
    pub temperature_unit: TemperatureUnit,
}
