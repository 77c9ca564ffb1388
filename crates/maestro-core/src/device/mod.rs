//! Maestro Device API
//!
//! High level servo, input and script commands on top of the serial transport.

pub mod commands;
mod error;
mod maestro;
pub mod types;

pub use commands::Command;
pub use error::MaestroError;
pub use maestro::{
    Maestro, DIGITAL_HIGH_THRESHOLD, FIRST_DIGITAL_CHANNEL, MAX_SUBROUTINE_PARAMETER,
    MAX_TARGET_US, MIN_TARGET_US,
};
pub use types::MaestroModel;
