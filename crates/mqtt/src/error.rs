//! Error types for credential issuance and MQTT transfer operations.
//!
//! Two layers are distinguished:
//!
//! - [`SigningError`]: the device credential could not be produced. Nothing
//!   can be delivered until the key or configuration is fixed, so callers
//!   treat it as fatal (see [`TransferError::is_fatal`]).
//! - [`TransferError`]: everything that can go wrong while opening a
//!   connection or publishing. Apart from signing failures these are
//!   transient and feed the session backoff.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to produce a signed bearer credential.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The private key file could not be read.
    #[error("Failed to read private key {path}: {source}")]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configured algorithm name is not one of the supported ones.
    #[error("Unsupported signing algorithm: {0} (expected RS256 or ES256)")]
    UnsupportedAlgorithm(String),

    /// The key was read but does not match the algorithm or is not valid PEM.
    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    /// The signer failed while encoding the token.
    #[error("Token encoding failed: {0}")]
    Encode(String),
}

/// The unified error type for connection and publish operations.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A fresh credential could not be issued for the connection attempt.
    #[error("Credential error: {0}")]
    Signing(#[from] SigningError),

    /// MQTT client initialization failed (bad TLS material, options, ...).
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    /// The local client could not queue a request.
    #[error("Client transfer error: {0}")]
    ClientTransfer(#[from] rumqttc::ClientError),

    /// The broker connection failed or was lost.
    ///
    /// Boxed to keep the enum small.
    #[error("Client connection error: {0}")]
    ClientConnection(#[from] Box<rumqttc::ConnectionError>),

    /// The broker answered CONNECT with a non-success return code.
    #[error("Connection refused by broker: {0:?}")]
    Refused(rumqttc::ConnectReturnCode),

    /// The connection ended before the expected acknowledgement arrived.
    #[error("Connection closed: {0}")]
    Closed(String),

    /// I/O failure outside the network path (TLS material loading).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Whether retrying can never succeed without operator intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransferError::Signing(_))
    }
}

impl From<rumqttc::ConnectionError> for TransferError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        TransferError::ClientConnection(Box::new(err))
    }
}
