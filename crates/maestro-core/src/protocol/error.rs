//! Transport errors

use thiserror::Error;

/// Errors that can occur while talking to a Maestro over a serial link
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported serial mode: {0}")]
    UnsupportedMode(String),

    #[error("Did not find enough serial ports: {0}")]
    PortsNotFound(String),

    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Request timed out waiting for a response")]
    Timeout,

    #[error("Request abandoned before it completed")]
    Abandoned,

    #[error("Not connected to the Maestro")]
    NotConnected,

    #[error("Transport driver has stopped")]
    DriverStopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serialport::Error> for TransportError {
    fn from(e: serialport::Error) -> Self {
        TransportError::SerialError(e.to_string())
    }
}
