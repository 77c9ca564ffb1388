//! Link configuration
//!
//! Describes how to reach a Maestro: which serial mode it is set to, which
//! ports it enumerated as, and how long to wait for replies. Stored as JSON.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::protocol::{TransportConfig, TransportError, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS};

/// Serial modes the Maestro can be set to
///
/// See the Pololu documentation (section 5.a) for what each mode does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialMode {
    /// Command port plus a TTL port; scripts can send data to the host
    UsbDualPort,
    /// Command port only
    UsbChained,
    /// TTL serial; not supported
    Uart,
}

impl fmt::Display for SerialMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SerialMode::UsbDualPort => "USB Dual Port",
            SerialMode::UsbChained => "USB Chained",
            SerialMode::Uart => "UART",
        };
        f.write_str(name)
    }
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_timeout_ms() -> Option<u64> {
    Some(DEFAULT_TIMEOUT_MS)
}

/// How to connect to a Maestro
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial mode the Maestro is set to
    pub mode: SerialMode,
    /// Command port name
    pub command_port: String,
    /// TTL port name (USB Dual Port mode only)
    #[serde(default)]
    pub ttl_port: Option<String>,
    /// Baud rate (USB Chained mode)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Response timeout in milliseconds; `null` waits forever
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: Option<u64>,
}

impl LinkConfig {
    /// USB Dual Port mode over the given command and TTL ports
    pub fn dual_port(command_port: &str, ttl_port: &str) -> Self {
        Self {
            mode: SerialMode::UsbDualPort,
            command_port: command_port.to_string(),
            ttl_port: Some(ttl_port.to_string()),
            baud_rate: DEFAULT_BAUD_RATE,
            request_timeout_ms: default_timeout_ms(),
        }
    }

    /// USB Chained mode over one port
    pub fn chained(command_port: &str, baud_rate: Option<u32>) -> Self {
        Self {
            mode: SerialMode::UsbChained,
            command_port: command_port.to_string(),
            ttl_port: None,
            baud_rate: baud_rate.unwrap_or(DEFAULT_BAUD_RATE),
            request_timeout_ms: default_timeout_ms(),
        }
    }

    /// Check the config describes something we can open
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.command_port.trim().is_empty() {
            return Err(TransportError::InvalidConfig(
                "no command port specified".to_string(),
            ));
        }

        match self.mode {
            SerialMode::Uart => Err(TransportError::UnsupportedMode(
                "UART mode is not supported".to_string(),
            )),
            SerialMode::UsbDualPort => match self.ttl_port.as_deref() {
                Some(ttl) if !ttl.trim().is_empty() => {
                    if ttl == self.command_port {
                        return Err(TransportError::InvalidConfig(
                            "command port and TTL port must differ".to_string(),
                        ));
                    }
                    Ok(())
                }
                _ => Err(TransportError::InvalidConfig(
                    "please specify both the control port and the TTL port".to_string(),
                )),
            },
            SerialMode::UsbChained => {
                if self.baud_rate == 0 {
                    return Err(TransportError::InvalidConfig(
                        "baud rate must be non-zero".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Transport settings derived from this config
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            request_timeout: self.request_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Take the request timeout from `config`, saturating at `u64::MAX` ms
    pub fn set_transport_config(&mut self, config: TransportConfig) {
        self.request_timeout_ms = config
            .request_timeout
            .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
    }

    /// Load a config from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Save the config as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, content)
    }
}
