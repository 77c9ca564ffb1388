//! Maestro commands
//!
//! Opcodes of the Pololu compact protocol, plus the Mini SSC target command.
//! See the Pololu documentation (sections 5.e and 5.f) for their semantics.

use serde::{Deserialize, Serialize};

use crate::protocol::{encode16, TransportError};

/// Commands supported by the Maestro
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Set a channel's target in quarter-microseconds
    SetTarget,

    /// Mini SSC protocol 8-bit target
    SetMiniSscTarget,

    /// Set a channel's speed limit
    SetSpeed,

    /// Set a channel's acceleration limit
    SetAcceleration,

    /// Configure the PWM output
    SetPwm,

    /// Read a channel's position (or input value)
    GetPosition,

    /// Ask whether any servo is still moving
    GetMovingState,

    /// Read and clear the error register
    GetErrors,

    /// Send every channel to its home position
    GoHome,

    /// Stop the running script
    StopScript,

    /// Restart the script at a subroutine
    RestartScript,

    /// Restart the script at a subroutine, pushing a parameter first
    RestartScriptWithParameter,

    /// Ask whether the script is running
    GetScriptStatus,
}

impl Command {
    /// First byte on the wire
    pub fn opcode(&self) -> u8 {
        match self {
            Command::SetTarget => 0x84,
            Command::SetMiniSscTarget => 0xFF,
            Command::SetSpeed => 0x87,
            Command::SetAcceleration => 0x89,
            Command::SetPwm => 0x8A,
            Command::GetPosition => 0x90,
            Command::GetMovingState => 0x93,
            Command::GetErrors => 0xA1,
            Command::GoHome => 0xA2,
            Command::StopScript => 0xA4,
            Command::RestartScript => 0xA7,
            Command::RestartScriptWithParameter => 0xA8,
            Command::GetScriptStatus => 0xAE,
        }
    }

    /// Check if this command always produces a reply
    pub fn expects_response(&self) -> bool {
        matches!(
            self,
            Command::GetPosition
                | Command::GetMovingState
                | Command::GetErrors
                | Command::GetScriptStatus
        )
    }

    /// Opcode alone
    pub fn frame(&self) -> Vec<u8> {
        vec![self.opcode()]
    }

    /// Opcode followed by one raw byte
    pub fn frame_with_byte(&self, byte: u8) -> Vec<u8> {
        vec![self.opcode(), byte]
    }

    /// Opcode, a raw byte, then a 14-bit value split into 7-bit halves
    pub fn frame_with_value(&self, byte: u8, value: u16) -> Result<Vec<u8>, TransportError> {
        let [low, high] = encode16(value)?;
        Ok(vec![self.opcode(), byte, low, high])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_target_frame() {
        // 1500us in quarter-microseconds
        assert_eq!(
            Command::SetTarget.frame_with_value(0, 6000).unwrap(),
            vec![0x84, 0x00, 0x70, 0x2E]
        );
    }

    #[test]
    fn test_frame_rejects_wide_value() {
        assert!(Command::SetTarget.frame_with_value(0, 0x4000).is_err());
    }

    #[test]
    fn test_opcodes_have_top_bit_set() {
        for cmd in [
            Command::SetTarget,
            Command::SetSpeed,
            Command::SetAcceleration,
            Command::SetPwm,
            Command::GetPosition,
            Command::GetMovingState,
            Command::GetErrors,
            Command::GoHome,
            Command::StopScript,
            Command::RestartScript,
            Command::RestartScriptWithParameter,
            Command::GetScriptStatus,
        ] {
            assert!(cmd.opcode() & 0x80 != 0, "{:?}", cmd);
        }
    }

    #[test]
    fn test_error_opcode_matches_get_errors() {
        assert_eq!(
            Command::GetErrors.opcode(),
            crate::protocol::probe::ERROR_PROBE_OPCODE
        );
        assert!(Command::GetErrors.expects_response());
        assert!(!Command::GoHome.expects_response());
    }
}
