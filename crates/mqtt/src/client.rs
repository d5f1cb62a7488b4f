//! MQTT client builder for the device bridge connection.
//!
//! `ClientBuilder` wraps rumqttc's `MqttOptions` and produces an
//! `AsyncClient`/`EventLoop` pair. Every connection to the bridge needs a
//! fresh credential, so a builder is created per connection attempt and the
//! token goes in through [`ClientBuilder::credential`].
//!
//! # Examples
//!
//! ```ignore
//! let credential = credentials.issue()?;
//! let (client, event_loop) = ClientBuilder::from_config(&config)
//!     .credential(&credential)
//!     .build()?;
//! ```

use std::{fs, path::PathBuf, time::Duration};

use rumqttc::{AsyncClient, EventLoop, MqttOptions, NetworkOptions, TlsConfiguration, Transport};

use super::{config::Config, credential::Credential, error::TransferError};

/// The bridge ignores the username; authentication is the token alone.
pub const USERNAME: &str = "unused";

/// Builder for a single bridge connection.
///
/// The returned `AsyncClient` can be cloned; the `EventLoop` must be polled
/// from exactly one task.
pub struct ClientBuilder {
    /// MQTT protocol options (host, port, keep-alive, credentials)
    opts: MqttOptions,

    /// Capacity of the request channel between client and event loop.
    cap: usize,

    /// CA bundle; `None` for plain TCP.
    ca_cert_path: Option<PathBuf>,

    /// TCP/TLS connect timeout in seconds.
    connection_timeout: Option<u64>,
}

impl ClientBuilder {
    /// Creates a builder with plain TCP transport and no credentials.
    pub fn new(client_id: impl Into<String>, host: impl Into<String>, port: u16, cap: usize) -> Self {
        Self {
            opts: MqttOptions::new(client_id, host, port),
            cap,
            ca_cert_path: None,
            connection_timeout: None,
        }
    }

    /// Creates a builder from the device configuration.
    ///
    /// The client id follows the registry path the bridge expects. The
    /// session is always clean; nothing is carried between connections.
    pub fn from_config(config: &Config) -> Self {
        let mut builder = Self::new(config.client_id(), config.host.clone(), config.port, 10)
            .keep_alive(config.keep_alive)
            .clean_session(true)
            .connection_timeout(config.connection_timeout);

        if config.tls.enabled {
            builder = builder.with_tls_ca_only(&config.tls.ca_cert_path);
        }
        builder
    }

    /// Configures TLS with only a CA bundle; the server is authenticated,
    /// the client authenticates with its token.
    pub fn with_tls_ca_only(mut self, ca_cert_path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(ca_cert_path.into());
        self
    }

    /// Sets the keep-alive interval (in seconds).
    pub fn keep_alive(mut self, secs: u64) -> Self {
        self.opts.set_keep_alive(Duration::from_secs(secs));
        self
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.opts.set_clean_session(clean);
        self
    }

    /// Sets the TCP/TLS connect timeout (in seconds).
    pub fn connection_timeout(mut self, secs: u64) -> Self {
        self.connection_timeout = Some(secs);
        self
    }

    /// Sets raw MQTT credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.opts.set_credentials(username, password);
        self
    }

    /// Authenticates with a bridge token: username `unused`, password = token.
    pub fn credential(self, credential: &Credential) -> Self {
        self.credentials(USERNAME, credential.token())
    }

    fn build_tls_transport(path: &PathBuf) -> Result<Transport, TransferError> {
        let ca = fs::read(path).map_err(|e| {
            TransferError::ClientSetup(format!("Failed to read CA bundle {}: {e}", path.display()))
        })?;

        Ok(Transport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: None,
        }))
    }

    /// Constructs the MQTT client and event loop.
    ///
    /// # Errors
    ///
    /// `ClientSetup` when the CA bundle cannot be read.
    pub fn build(self) -> Result<(AsyncClient, EventLoop), TransferError> {
        let mut opts = self.opts;
        if let Some(path) = &self.ca_cert_path {
            opts.set_transport(Self::build_tls_transport(path)?);
        }

        let (client, mut event_loop) = AsyncClient::new(opts, self.cap);

        if let Some(secs) = self.connection_timeout {
            let mut network = NetworkOptions::new();
            network.set_connection_timeout(secs);
            event_loop.set_network_options(network);
        }

        Ok((client, event_loop))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;
    use time::OffsetDateTime;

    use super::*;
    use crate::config::TlsConfig;

    fn config(tls: TlsConfig) -> Config {
        Config {
            project_id: "blue-jet-123".into(),
            registry_id: "my-registry".into(),
            device_id: "rf-gateway".into(),
            private_key_file: "/etc/llapbridge/rsa_private.pem".into(),
            tls,
            ..Default::default()
        }
    }

    #[test]
    fn test_from_config_sets_identity() {
        let builder = ClientBuilder::from_config(&config(TlsConfig {
            enabled: false,
            ..Default::default()
        }));

        assert_eq!(
            builder.opts.client_id(),
            "projects/blue-jet-123/locations/us-central1/registries/my-registry/devices/rf-gateway"
        );
        assert_eq!(builder.opts.broker_address(), ("mqtt.googleapis.com".to_string(), 8883));
        assert_eq!(builder.opts.keep_alive(), Duration::from_secs(60));
        assert!(builder.opts.clean_session());
        assert!(builder.ca_cert_path.is_none());
    }

    #[test]
    fn test_credential_sets_token_as_password() {
        let now = OffsetDateTime::now_utc();
        let credential = Credential::new("signed.jwt.token".into(), now, now);

        let builder = ClientBuilder::new("id", "localhost", 8883, 10).credential(&credential);

        assert_eq!(
            builder.opts.credentials(),
            Some((USERNAME.to_string(), "signed.jwt.token".to_string()))
        );
    }

    #[test]
    fn test_build_tcp_client() {
        let result = ClientBuilder::new("id", "localhost", 1883, 10)
            .connection_timeout(5)
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_build_tls_client() {
        let mut ca = NamedTempFile::new().unwrap();
        ca.write_all(b"ca certificate content").unwrap();

        let result = ClientBuilder::from_config(&config(TlsConfig {
            enabled: true,
            ca_cert_path: ca.path().to_string_lossy().into_owned(),
        }))
        .build();

        assert!(result.is_ok());
    }

    #[test]
    fn test_build_tls_missing_ca() {
        let result = ClientBuilder::new("id", "localhost", 8883, 10)
            .with_tls_ca_only("/nonexistent/roots.pem")
            .build();

        assert!(matches!(result, Err(TransferError::ClientSetup(_))));
    }
}
