//! Configuration of the cloud device connection.
//!
//! Everything here is static for the lifetime of the process. The struct is
//! deserialised from the `[transport]` table of the application config and
//! validated with the `validator` crate before any connection is attempted.
//!
//! # Examples
//!
//! ```toml
//! [transport]
//! project_id = "blue-jet-123"
//! cloud_region = "us-central1"
//! registry_id = "my-registry"
//! device_id = "rf-gateway"
//! private_key_file = "/etc/llapbridge/rsa_private.pem"
//! algorithm = "RS256"
//! token_exp_mins = 20
//! host = "mqtt.googleapis.com"
//! port = 8883
//! message_type = "events"
//!
//! [transport.backoff]
//! initial_secs = 1
//! max_secs = 32
//! jitter_ms = 1000
//!
//! [transport.tls]
//! enabled = true
//! ca_cert_path = "/etc/llapbridge/roots.pem"
//! ```

use std::{fmt, path::Path, time::Duration};

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::backoff::Backoff;

/// Device connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// Cloud project that owns the device registry. Also the token audience.
    #[validate(length(min = 1, message = "Project ID must not be empty"))]
    pub project_id: String,

    /// Region hosting the registry.
    #[validate(length(min = 1, message = "Cloud region must not be empty"))]
    pub cloud_region: String,

    #[validate(length(min = 1, message = "Registry ID must not be empty"))]
    pub registry_id: String,

    /// Device identity inside the registry.
    #[validate(length(min = 1, message = "Device ID must not be empty"))]
    pub device_id: String,

    /// PEM private key used to sign connection tokens.
    ///
    /// Existence is checked when the first credential is issued, so that a
    /// bad key surfaces as a signing failure rather than a config error.
    #[validate(length(min = 1, message = "Private key file must not be empty"))]
    pub private_key_file: String,

    /// Token signing algorithm: `RS256` or `ES256`.
    pub algorithm: String,

    /// Validity window of each issued token, in minutes.
    #[validate(range(
        min = 1,
        max = 1440,
        message = "Token expiration must be between 1 and 1440 minutes"
    ))]
    pub token_exp_mins: u64,

    /// MQTT bridge hostname.
    #[validate(length(
        min = 1,
        max = 255,
        message = "Host must be between 1 and 255 characters"
    ))]
    pub host: String,

    /// MQTT bridge port.
    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Suffix of the publish topic: telemetry `events` or device `state`.
    pub message_type: MessageType,

    /// QoS used for reading publishes.
    #[validate(range(min = 0, max = 2, message = "Invalid QoS value, must be 0, 1, or 2"))]
    pub qos: u8,

    /// Keep-alive interval in seconds.
    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive: u64,

    /// TCP/TLS connect timeout in seconds, enforced by the MQTT client.
    #[validate(range(
        min = 1,
        max = 300,
        message = "Connection timeout must be between 1 and 300 seconds"
    ))]
    pub connection_timeout: u64,

    /// Keep a long-lived connection subscribed to the device config topic.
    pub subscribe_config: bool,

    #[validate(nested)]
    pub backoff: BackoffConfig,

    #[validate(nested)]
    pub tls: TlsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            project_id: String::new(),
            cloud_region: "us-central1".to_string(),
            registry_id: String::new(),
            device_id: String::new(),
            private_key_file: String::new(),
            algorithm: "RS256".to_string(),
            token_exp_mins: 20,
            host: "mqtt.googleapis.com".to_string(),
            port: 8883,
            message_type: MessageType::default(),
            qos: 1,
            keep_alive: 60,
            connection_timeout: 30,
            subscribe_config: true,
            backoff: BackoffConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

impl Config {
    /// MQTT client id the bridge expects:
    /// `projects/<p>/locations/<r>/registries/<g>/devices/<d>`.
    pub fn client_id(&self) -> String {
        format!(
            "projects/{}/locations/{}/registries/{}/devices/{}",
            self.project_id, self.cloud_region, self.registry_id, self.device_id
        )
    }

    /// Topic readings are published to: `/devices/<device>/<message_type>`.
    pub fn topic(&self) -> String {
        format!("/devices/{}/{}", self.device_id, self.message_type)
    }

    /// Topic the cloud pushes device configuration to.
    pub fn config_topic(&self) -> String {
        format!("/devices/{}/config", self.device_id)
    }

    /// Publish QoS as the MQTT client type. Out-of-range values fall back to
    /// at-least-once.
    pub fn publish_qos(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtLeastOnce,
        }
    }

    pub fn token_validity(&self) -> Duration {
        Duration::from_secs(self.token_exp_mins * 60)
    }
}

/// Kind of device message, used as the last topic segment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Telemetry events.
    #[default]
    Events,
    /// Device state.
    State,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Events => write!(f, "events"),
            Self::State => write!(f, "state"),
        }
    }
}

/// Reconnection backoff timing.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first failure, in seconds.
    #[validate(range(min = 1, max = 60, message = "Initial backoff must be between 1 and 60 seconds"))]
    pub initial_secs: u64,

    /// Ceiling for the delay, in seconds.
    #[validate(range(min = 1, max = 3600, message = "Maximum backoff must be between 1 and 3600 seconds"))]
    pub max_secs: u64,

    /// Upper bound of the random jitter added to every wait, in milliseconds.
    #[validate(range(max = 60000, message = "Jitter must not exceed 60000 ms"))]
    pub jitter_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_secs: 1,
            max_secs: 32,
            jitter_ms: 1000,
        }
    }
}

impl BackoffConfig {
    /// Builds a doubling backoff controller from these settings.
    pub fn build(&self) -> Backoff {
        Backoff::new(
            Duration::from_secs(self.initial_secs),
            Duration::from_secs(self.max_secs),
            2.0,
        )
        .with_jitter(Duration::from_millis(self.jitter_ms))
    }
}

/// TLS settings for the bridge connection.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_tls", skip_on_field_errors = false))]
pub struct TlsConfig {
    /// Whether to wrap the connection in TLS. The cloud bridge requires it.
    pub enabled: bool,

    /// PEM bundle with the root certificates of the bridge.
    pub ca_cert_path: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        TlsConfig {
            enabled: true,
            ca_cert_path: "/etc/llapbridge/roots.pem".to_string(),
        }
    }
}

/// CA bundle must exist when TLS is on.
fn validate_tls(tls: &TlsConfig) -> Result<(), ValidationError> {
    if !tls.enabled {
        return Ok(());
    }
    validate_file_path(&tls.ca_cert_path)
}

/// Validates that a file exists and is a regular file.
fn validate_file_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(
            ValidationError::new("empty_path").with_message("File path cannot be empty".into())
        );
    }

    let path_obj = Path::new(path);

    if !path_obj.exists() {
        return Err(ValidationError::new("file_not_found")
            .with_message(format!("File does not exist: {path}").into()));
    }

    if !path_obj.is_file() {
        return Err(ValidationError::new("not_a_file")
            .with_message(format!("Path is not a file: {path}").into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn valid_config() -> Config {
        Config {
            project_id: "blue-jet-123".into(),
            registry_id: "my-registry".into(),
            device_id: "rf-gateway".into(),
            private_key_file: "/etc/llapbridge/rsa_private.pem".into(),
            tls: TlsConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_client_id_format() {
        let config = valid_config();
        assert_eq!(
            config.client_id(),
            "projects/blue-jet-123/locations/us-central1/registries/my-registry/devices/rf-gateway"
        );
    }

    #[test]
    fn test_topics() {
        let mut config = valid_config();
        assert_eq!(config.topic(), "/devices/rf-gateway/events");
        config.message_type = MessageType::State;
        assert_eq!(config.topic(), "/devices/rf-gateway/state");
        assert_eq!(config.config_topic(), "/devices/rf-gateway/config");
    }

    #[test]
    fn test_valid_config_passes_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_default_requires_identity() {
        let mut config = Config::default();
        config.tls.enabled = false;
        let err = config.validate().unwrap_err();
        let fields = err.field_errors();
        assert!(fields.contains_key("project_id"));
        assert!(fields.contains_key("device_id"));
    }

    #[test]
    fn test_tls_requires_existing_ca() {
        let mut config = valid_config();
        config.tls = TlsConfig {
            enabled: true,
            ca_cert_path: "/nonexistent/roots.pem".into(),
        };
        assert!(config.validate().is_err());

        let mut ca = NamedTempFile::new().unwrap();
        ca.write_all(b"-----BEGIN CERTIFICATE-----").unwrap();
        config.tls.ca_cert_path = ca.path().to_string_lossy().into_owned();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_qos_rejected() {
        let mut config = valid_config();
        config.qos = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            project_id = "p"
            registry_id = "r"
            device_id = "d"
            private_key_file = "/k.pem"
            algorithm = "ES256"
            message_type = "state"

            [backoff]
            max_secs = 64
            "#,
        )
        .unwrap();
        assert_eq!(config.algorithm, "ES256");
        assert_eq!(config.message_type, MessageType::State);
        assert_eq!(config.backoff.max_secs, 64);
        assert_eq!(config.backoff.initial_secs, 1);
        assert_eq!(config.port, 8883);
    }

    #[test]
    fn test_backoff_config_build() {
        let backoff = BackoffConfig {
            initial_secs: 2,
            max_secs: 16,
            jitter_ms: 0,
        }
        .build();
        assert_eq!(backoff.next_sleep(), Duration::from_secs(2));
        assert_eq!(backoff.max_delay(), Duration::from_secs(16));
    }
}
