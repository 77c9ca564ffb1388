//! Serial port handling
//!
//! Port listing, opening, and Maestro discovery.

use serde::{Deserialize, Serialize};
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::{BTreeSet, HashMap};
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{TransportError, DEFAULT_BAUD_RATE, MAESTRO_VENDOR_ID, READ_POLL_MS};
use crate::config::SerialMode;

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyACM0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Port with a name and nothing else known about it
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vid: None,
            pid: None,
            product: None,
            serial_number: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product, serial_number) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => (
                Some(usb_info.vid),
                Some(usb_info.pid),
                usb_info.product,
                usb_info.serial_number,
            ),
            _ => (None, None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
            serial_number,
        }
    }
}

/// Helper used to sort port names so that:
///  - ttyACM* ports come first (sorted numerically by suffix)
///  - then ttyUSB* ports (sorted numerically)
///  - then other ports (sorted by name)
///
/// The Maestro enumerates as two consecutive ttyACM ports, command port first.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let p = PortInfo::from(info);
                map.entry(p.name.clone()).or_insert(p);
            }
        }
        Err(e) => warn!(error = %e, "Could not enumerate serial ports"),
    }

    // Linux-only: add /dev/ttyACM* and /dev/ttyUSB* entries the API missed
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::named(&full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open a serial port configured for the Maestro (8N1, no flow control)
pub fn open_port(
    name: &str,
    baud_rate: Option<u32>,
) -> Result<Box<dyn SerialPort>, TransportError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);

    // Short read timeout keeps the reader thread responsive to close
    let mut port = serialport::new(name, baud)
        .timeout(Duration::from_millis(READ_POLL_MS))
        .open()?;
    configure_port(port.as_mut())?;

    info!(port = name, baud, "Opened serial port");
    Ok(port)
}

/// Configure a serial port for Maestro communication
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), TransportError> {
    port.set_data_bits(serialport::DataBits::Eight)?;
    port.set_parity(serialport::Parity::None)?;
    port.set_stop_bits(serialport::StopBits::One)?;
    port.set_flow_control(serialport::FlowControl::None)?;
    port.clear(serialport::ClearBuffer::All)?;
    Ok(())
}

/// Ports already claimed by a Maestro, so a second search finds a different one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRegistry {
    used: BTreeSet<String>,
}

impl PortRegistry {
    /// Registry with no ports claimed
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` belongs to a Maestro already
    pub fn is_used(&self, name: &str) -> bool {
        self.used.contains(name)
    }

    /// Claim `name`
    pub fn mark_used(&mut self, name: &str) {
        self.used.insert(name.to_string());
    }

    /// Give a port back, e.g. after its Maestro was closed
    pub fn release(&mut self, name: &str) -> bool {
        self.used.remove(name)
    }

    /// Number of claimed ports
    pub fn len(&self) -> usize {
        self.used.len()
    }

    /// Whether no port is claimed
    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

/// The two ports a Maestro enumerates as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaestroPorts {
    /// Command port
    pub command: String,
    /// TTL port
    pub ttl: String,
}

/// Pick the ports of the first unclaimed Maestro out of `ports`
///
/// Ports with the Pololu vendor id qualify. The Maestro's second port does not
/// always report a vendor id, so a port without one is accepted directly after
/// a single Pololu port. Both chosen ports are recorded in `registry`.
pub fn select_maestro_ports(
    ports: &[PortInfo],
    mode: SerialMode,
    registry: &mut PortRegistry,
) -> Result<MaestroPorts, TransportError> {
    if mode == SerialMode::Uart {
        return Err(TransportError::UnsupportedMode(
            "UART serial mode is not supported. \
             Please set your Maestro to use USB Dual Port or USB Chained mode."
                .to_string(),
        ));
    }

    let mut found: Vec<&str> = Vec::new();
    for port in ports {
        if registry.is_used(&port.name) {
            continue;
        }

        if port.vid == Some(MAESTRO_VENDOR_ID) || (found.len() == 1 && port.vid.is_none()) {
            found.push(&port.name);
        }
    }

    debug!(?found, "Candidate Maestro ports");

    let [command, ttl] = found.as_slice() else {
        return Err(TransportError::PortsNotFound(format!(
            "expected 2 Maestro ports, found {}. Is the Maestro connected and in {} mode?",
            found.len(),
            mode
        )));
    };

    registry.mark_used(command);
    registry.mark_used(ttl);
    info!(command_port = command, ttl_port = ttl, "Found Maestro");

    Ok(MaestroPorts {
        command: command.to_string(),
        ttl: ttl.to_string(),
    })
}
