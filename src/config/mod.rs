//! Application configuration loading and validation.
//!
//! The top-level `Config` aggregates the logger, serial, LLAP and transport
//! sections of a single TOML file. It is loaded once at startup, before the
//! tracing subscriber exists, and stays immutable afterwards.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::config::{llap::LlapConfig, logger::LoggerConfig, serial::SerialConfig};

pub mod llap;
pub mod logger;
pub mod serial;

/// Timestamped console messages for use before the tracing subscriber is
/// initialized.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style(
                time::OffsetDateTime::now_utc()
                    .format(time::macros::format_description!(
                        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
                    ))
                    .unwrap_or_default()
            ).dim(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style(
                time::OffsetDateTime::now_utc()
                    .format(time::macros::format_description!(
                        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
                    ))
                    .unwrap_or_default()
            ).dim(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style(
                time::OffsetDateTime::now_utc()
                    .format(time::macros::format_description!(
                        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
                    ))
                    .unwrap_or_default()
            ).dim(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        );
    };
}

/// Errors while locating, reading, parsing or validating the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Top-level application configuration.
#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    /// Serial port the LLAP radio is attached to.
    #[validate(nested)]
    pub serial: SerialConfig,

    /// Reading normalisation.
    #[validate(nested)]
    pub llap: LlapConfig,

    /// Cloud device identity and MQTT bridge connection.
    #[validate(nested)]
    pub transport: TransportConfig,
}

pub type TransportConfig = llapbridge_mqtt::Config;

pub const CONFIG_ENV: &str = "LLAPBRIDGE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/llapbridge/config.toml";

impl Config {
    /// Locates and loads the configuration file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be found, read, parsed, or
    /// validated.
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        Self::load(&config_path)
    }

    /// Determines the configuration file path.
    ///
    /// Priority:
    /// 1. `LLAPBRIDGE_CONFIG` environment variable
    /// 2. `/etc/llapbridge/config.toml`
    fn get_config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(config_path);
            print_info!("Using config from {}: {}", CONFIG_ENV, path.display());
            return Ok(path);
        }

        let fallback = Path::new(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Ok(fallback.to_path_buf());
        }

        Err(ConfigError::Config(format!(
            "No configuration file found. Set {CONFIG_ENV} or create {DEFAULT_CONFIG_PATH}"
        )))
    }

    /// Loads and validates configuration from `path`.
    ///
    /// # Errors
    ///
    /// Propagates IO, parsing, and validation errors as `ConfigError`.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::Config(format!(
                "File does not exist: {}",
                path.display()
            )));
        }

        let config_str = fs::read_to_string(path)?;
        Self::parse(&config_str)
    }

    /// Parses and validates configuration text.
    pub fn parse(config_str: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(config_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use llapbridge_mqtt::MessageType;
    use tempfile::NamedTempFile;

    use super::{llap::TemperatureUnit, *};

    const MINIMAL: &str = r#"
        [serial]
        port = "/dev/ttyUSB0"

        [transport]
        project_id = "blue-jet-123"
        registry_id = "my-registry"
        device_id = "rf-gateway"
        private_key_file = "/etc/llapbridge/rsa_private.pem"

        [transport.tls]
        enabled = false
    "#;

    #[test]
    fn test_parse_minimal_config_uses_defaults() {
        let config = Config::parse(MINIMAL).unwrap();

        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.llap.temperature_unit, TemperatureUnit::Celsius);
        assert_eq!(config.logger.level, "info");
        assert_eq!(config.transport.message_type, MessageType::Events);
        assert_eq!(config.transport.token_exp_mins, 20);
        assert_eq!(config.transport.port, 8883);
        assert!(config.transport.subscribe_config);
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
            [logger]
            level = "debug"

            [logger.console]
            format = "json"

            [serial]
            port = "/dev/ttyAMA0"
            baud_rate = 115200

            [llap]
            temperature_unit = "fahrenheit"

            [transport]
            project_id = "p"
            registry_id = "r"
            device_id = "d"
            private_key_file = "/k.pem"
            algorithm = "ES256"
            message_type = "state"
            subscribe_config = false

            [transport.tls]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.logger.level, "debug");
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.llap.temperature_unit, TemperatureUnit::Fahrenheit);
        assert_eq!(config.transport.topic(), "/devices/d/state");
        assert!(!config.transport.subscribe_config);
    }

    #[test]
    fn test_missing_identity_fails_validation() {
        let err = Config::parse("[transport.tls]\nenabled = false\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = Config::parse("[serial\nport = 1").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_invalid_nested_section_fails_validation() {
        let config = format!("{MINIMAL}\n[logger]\nlevel = \"chatty\"\n");
        let err = Config::parse(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.transport.device_id, "rf-gateway");
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Config(_)));
    }
}
