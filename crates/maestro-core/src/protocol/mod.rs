//! Serial Transport
//!
//! Implements the Maestro's compact serial protocol: value encoding, the error
//! probe that follows every write, and the single- and dual-port transports that
//! keep requests and their replies in step.

pub mod codec;
mod driver;
mod dual;
mod error;
pub mod link;
pub mod probe;
pub mod serial;
mod single;
mod transport;

pub use codec::{decode16, decode8x2, encode16};
pub use driver::{wait_for_open, TransportDriver, TransportHandle};
pub use dual::DualChannelTransport;
pub use error::TransportError;
pub use link::{LinkEvent, LinkId, PhysicalLink, SerialLink};
pub use probe::SerialFault;
pub use serial::{list_ports, open_port, select_maestro_ports, MaestroPorts, PortInfo, PortRegistry};
pub use single::SingleChannelTransport;
pub use transport::{
    CompletionHandler, ResponseHandler, Transport, TransportConfig, TransportEvent, TransportState,
};

/// Default baud rate for USB Chained mode
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default timeout for responses in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Pololu's USB vendor id
pub const MAESTRO_VENDOR_ID: u16 = 0x1FFB;

/// How long the link must stay quiet after a timeout before requests resume
pub const RESYNC_QUIET_MS: u64 = 50;

/// Read timeout of the port reader threads in milliseconds
pub const READ_POLL_MS: u64 = 100;

/// Size of the reader threads' buffer
pub const READ_BUFFER_SIZE: usize = 64;
