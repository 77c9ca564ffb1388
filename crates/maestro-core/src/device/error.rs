//! Command errors

use thiserror::Error;

use crate::protocol::TransportError;

/// Errors returned by the Maestro command API
#[derive(Error, Debug)]
pub enum MaestroError {
    /// An argument fell outside its allowed range. Nothing was sent.
    #[error("{what} should be {min}-{max}, was {value}")]
    OutOfRange {
        /// Which argument
        what: &'static str,
        /// Value given
        value: u32,
        /// Smallest allowed value
        min: u32,
        /// Largest allowed value
        max: u32,
    },

    /// The channel cannot be used for this command
    #[error("Channel {channel} is not valid: {reason}")]
    InvalidChannel {
        /// Channel given
        channel: u8,
        /// Why it was refused
        reason: String,
    },

    /// Script output only reaches the host over the TTL port
    #[error("Must be in USB Dual Port mode to read output from subroutines")]
    RequiresDualPort,

    /// The reply did not have the expected shape
    #[error("Unexpected response: {0:02X?}")]
    UnexpectedResponse(Vec<u8>),

    /// The transport failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}
