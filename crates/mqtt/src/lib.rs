//! # llapbridge-mqtt: credentialed publishing to a cloud IoT MQTT bridge
//!
//! Device-side MQTT for gateways that authenticate with short-lived signed
//! tokens instead of client certificates. Built on `rumqttc`, this crate adds:
//!
//! - **Token credentials**: a JWT (`RS256`/`ES256`) signed per connection
//!   attempt, carrying `iat`, `exp` and the project id as audience
//! - **One-shot publishing**: each message gets its own connection, one QoS 1
//!   publish and a graceful close
//! - **Backoff**: doubling reconnection delay with jitter, capped, reset on
//!   success, never giving up
//! - **State monitoring** through watch channels
//! - **Config channel**: a long-lived subscription to the device config topic
//!
//! # Quick Start
//!
//! ```ignore
//! use bytes::Bytes;
//! use llapbridge_mqtt::{Config, PublishSession};
//!
//! let session = PublishSession::from_config(&config);
//! session
//!     .publish(&config.topic(), Bytes::from_static(b"{'01TMP':21.5}"))
//!     .await?;
//! ```
//!
//! # Connection identity
//!
//! The bridge identifies a device by its registry path, used as MQTT client
//! id, and ignores the username:
//!
//! ```text
//! client id: projects/<project>/locations/<region>/registries/<registry>/devices/<device>
//! username:  unused
//! password:  <signed token>
//! topic:     /devices/<device>/<events|state>
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod control;
pub mod credential;
pub mod error;
pub mod session;
pub mod state;
pub mod transport;

pub use backoff::Backoff;
pub use client::ClientBuilder;
pub use config::{BackoffConfig, Config, MessageType, TlsConfig};
pub use control::ControlChannel;
// Every fallible operation returns TransferError; SigningError is the fatal subset.
pub use error::{SigningError, TransferError};
pub use credential::{Credential, CredentialManager, JwtSigner, SigningAlgorithm, TokenSigner};
pub use rumqttc::QoS;
pub use session::{PublishDrain, PublishGuard, PublishSession};
pub use state::ConnectionState;
pub use transport::{Link, MqttTransport, Transport};

pub type Result<T> = std::result::Result<T, TransferError>;
