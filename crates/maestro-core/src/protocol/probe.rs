//! Error probe
//!
//! After every write the transport asks the Maestro for its error register
//! (`Get Errors`, opcode `0xA1`). The two byte reply is a bitmask where each
//! set bit names one fault.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::codec::decode8x2;
use super::TransportError;

/// Opcode of the diagnostic read issued after every write
pub const ERROR_PROBE_OPCODE: u8 = 0xA1;

/// Number of bytes in a probe reply
pub const ERROR_PROBE_RESPONSE_LEN: usize = 2;

/// Faults the Maestro reports through its error register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SerialFault {
    /// Bit 0
    SerialSignal,
    /// Bit 1
    SerialOverrun,
    /// Bit 2
    SerialRxBufferFull,
    /// Bit 3
    SerialCrc,
    /// Bit 4
    SerialProtocol,
    /// Bit 5
    SerialTimeout,
    /// Bit 6
    ScriptStack,
    /// Bit 7
    ScriptCallStack,
    /// Bit 8
    ScriptProgramCounter,
}

impl SerialFault {
    /// All faults, in ascending bit order
    pub const ALL: [SerialFault; 9] = [
        SerialFault::SerialSignal,
        SerialFault::SerialOverrun,
        SerialFault::SerialRxBufferFull,
        SerialFault::SerialCrc,
        SerialFault::SerialProtocol,
        SerialFault::SerialTimeout,
        SerialFault::ScriptStack,
        SerialFault::ScriptCallStack,
        SerialFault::ScriptProgramCounter,
    ];

    /// Bit this fault occupies in the error register
    pub fn code(&self) -> u16 {
        match self {
            SerialFault::SerialSignal => 1,
            SerialFault::SerialOverrun => 2,
            SerialFault::SerialRxBufferFull => 4,
            SerialFault::SerialCrc => 8,
            SerialFault::SerialProtocol => 16,
            SerialFault::SerialTimeout => 32,
            SerialFault::ScriptStack => 64,
            SerialFault::ScriptCallStack => 128,
            SerialFault::ScriptProgramCounter => 256,
        }
    }

    /// Human readable description
    pub fn message(&self) -> &'static str {
        match self {
            SerialFault::SerialSignal => "Serial signal error detected",
            SerialFault::SerialOverrun => "Serial overrun error detected",
            SerialFault::SerialRxBufferFull => "Serial RX buffer full",
            SerialFault::SerialCrc => "Serial CRC error detected",
            SerialFault::SerialProtocol => "Serial protocol error detected",
            SerialFault::SerialTimeout => "Serial timeout error detected",
            SerialFault::ScriptStack => "Script stack error detected",
            SerialFault::ScriptCallStack => "Script call stack error detected",
            SerialFault::ScriptProgramCounter => "Script program counter error detected",
        }
    }

    /// Look up the fault for a single bit value
    pub fn from_code(code: u16) -> Option<SerialFault> {
        Self::ALL.iter().copied().find(|f| f.code() == code)
    }
}

impl fmt::Display for SerialFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message(), self.code())
    }
}

/// Expand an error register value into its faults, lowest bit first
pub fn decode_faults(register: u16) -> Vec<SerialFault> {
    SerialFault::ALL
        .iter()
        .copied()
        .filter(|f| register & f.code() != 0)
        .collect()
}

/// Decode a raw probe reply into its faults
pub fn parse_probe_response(data: &[u8]) -> Result<Vec<SerialFault>, TransportError> {
    Ok(decode_faults(decode8x2(data)?))
}

/// Bytes of the probe request
pub fn probe_request() -> Vec<u8> {
    vec![ERROR_PROBE_OPCODE]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_faults_for_zero() {
        assert!(decode_faults(0).is_empty());
        assert!(parse_probe_response(&[0, 0]).unwrap().is_empty());
    }

    #[test]
    fn test_multiple_faults_ascending() {
        assert_eq!(
            decode_faults(5),
            vec![SerialFault::SerialSignal, SerialFault::SerialRxBufferFull]
        );
    }

    #[test]
    fn test_high_byte_faults() {
        // 0x0100 arrives as [0x00, 0x01]
        assert_eq!(
            parse_probe_response(&[0x00, 0x01]).unwrap(),
            vec![SerialFault::ScriptProgramCounter]
        );
    }

    #[test]
    fn test_unknown_bits_ignored() {
        assert_eq!(decode_faults(0x8000 | 32), vec![SerialFault::SerialTimeout]);
    }

    #[test]
    fn test_codes_are_distinct_bits() {
        let mut seen = 0u16;
        for fault in SerialFault::ALL {
            assert_eq!(fault.code().count_ones(), 1);
            assert_eq!(seen & fault.code(), 0);
            seen |= fault.code();
            assert_eq!(SerialFault::from_code(fault.code()), Some(fault));
        }
        assert_eq!(seen, 0x01FF);
    }

    #[test]
    fn test_short_reply_rejected() {
        assert!(parse_probe_response(&[0x01]).is_err());
    }
}
