//! Value encoding
//!
//! The Maestro splits multi-byte parameters into a low byte followed by a high
//! byte. Command parameters use two 7-bit halves so that no parameter byte has
//! its top bit set (that bit marks an opcode). Telemetry results come back as a
//! 7-bit low byte with a full 8-bit high byte.

use byteorder::{ByteOrder, LittleEndian};

use super::TransportError;

/// Largest value that fits into two 7-bit halves
pub const MAX_14BIT: u16 = 0x3FFF;

/// Split a 14-bit value into `[low, high]` 7-bit halves
pub fn encode16(value: u16) -> Result<[u8; 2], TransportError> {
    if value > MAX_14BIT {
        return Err(TransportError::InvalidInput(format!(
            "value {} does not fit in 14 bits (max {})",
            value, MAX_14BIT
        )));
    }

    Ok([(value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8])
}

/// Join two 7-bit halves back into a value
///
/// Only the low 7 bits of each byte are significant, so the result always
/// fits in 14 bits.
pub fn decode16(data: &[u8]) -> Result<u16, TransportError> {
    let [low, high] = pair(data)?;
    Ok((((high & 0x7F) as u16) << 7) | (low & 0x7F) as u16)
}

/// Join a low byte and a full 8-bit high byte (telemetry readings)
pub fn decode8x2(data: &[u8]) -> Result<u16, TransportError> {
    pair(data)?;
    Ok(LittleEndian::read_u16(data))
}

fn pair(data: &[u8]) -> Result<[u8; 2], TransportError> {
    <[u8; 2]>::try_from(data).map_err(|_| {
        TransportError::InvalidInput(format!("expected 2 bytes, got {}", data.len()))
    })
}
