//! # Maestro Core Library
//!
//! Core functionality for driving Pololu Maestro servo controllers over USB.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Compact protocol value encoding
//! - Serial transports that keep requests and replies in step
//! - Automatic error register probing after every write
//! - Maestro discovery and a validated command API
//!
//! ## Supported modes
//!
//! - USB Dual Port (command port + TTL port)
//! - USB Chained (command port only)
//!
//! ## Example
//!
//! ```rust,ignore
//! use maestro_core::{config::LinkConfig, device::Maestro};
//!
//! let config = LinkConfig::dual_port("/dev/ttyACM0", "/dev/ttyACM1");
//! let maestro = Maestro::connect(&config).await?;
//!
//! maestro.set_target(0, 1500).await?;
//! println!("Position: {}", maestro.get_position(0).await?);
//! ```

pub mod config;
pub mod device;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{LinkConfig, SerialMode};
    pub use crate::device::{Maestro, MaestroError, MaestroModel};
    pub use crate::protocol::{
        DualChannelTransport, LinkEvent, LinkId, PhysicalLink, PortRegistry, SerialFault,
        SingleChannelTransport, Transport, TransportConfig, TransportError, TransportEvent,
        TransportHandle,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
