//! Maestro command API
//!
//! Thin, validated wrappers around the Maestro's serial commands. Every
//! request goes through a [`TransportHandle`], so the API is the same whichever
//! serial mode the board is in.

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use super::commands::Command;
use super::types::MaestroModel;
use super::MaestroError;
use crate::config::{LinkConfig, SerialMode};
use crate::protocol::{
    decode8x2, list_ports, open_port, select_maestro_ports, wait_for_open, DualChannelTransport,
    LinkEvent, LinkId, PortRegistry, SerialLink, SingleChannelTransport, Transport,
    TransportConfig, TransportDriver, TransportError, TransportEvent, TransportHandle,
};

/// Lowest servo target in microseconds
pub const MIN_TARGET_US: u16 = 640;

/// Highest servo target in microseconds
pub const MAX_TARGET_US: u16 = 2304;

/// Readings at or above this count as a high digital input
pub const DIGITAL_HIGH_THRESHOLD: u16 = 6000;

/// Channels 0-11 are analog inputs; 12 and up are digital
pub const FIRST_DIGITAL_CHANNEL: u8 = 12;

/// Largest subroutine parameter
pub const MAX_SUBROUTINE_PARAMETER: u16 = 16383;

/// A connected Maestro servo controller
#[derive(Clone)]
pub struct Maestro {
    handle: TransportHandle,
    model: Option<MaestroModel>,
}

impl Maestro {
    /// Wrap a running transport
    pub fn new(handle: TransportHandle) -> Self {
        Self {
            handle,
            model: None,
        }
    }

    /// Restrict channel numbers to what `model` has
    pub fn with_model(mut self, model: MaestroModel) -> Self {
        self.model = Some(model);
        self
    }

    /// Run `transport` on a new driver task fed by `link_events`
    pub fn spawn(
        transport: Box<dyn Transport>,
        link_events: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> (Self, broadcast::Receiver<TransportEvent>) {
        let (handle, events) = TransportDriver::spawn(transport, link_events);
        (Self::new(handle), events)
    }

    /// Open the ports described by `config` and wait until they are ready
    pub async fn connect(config: &LinkConfig) -> Result<Self, MaestroError> {
        config.validate()?;

        let transport_config = config.transport_config();
        let (link_tx, link_rx) = mpsc::unbounded_channel();

        let command_port = open_port(&config.command_port, Some(config.baud_rate))?;
        let command = SerialLink::start(
            LinkId::Command,
            &config.command_port,
            command_port,
            link_tx.clone(),
        )
        .map_err(TransportError::from)?;

        let transport: Box<dyn Transport> = match config.mode {
            SerialMode::UsbDualPort => {
                let ttl_name = config.ttl_port.as_deref().ok_or_else(|| {
                    TransportError::InvalidConfig("no TTL port specified".to_string())
                })?;
                let ttl_port = open_port(ttl_name, Some(config.baud_rate))?;
                let ttl = SerialLink::start(LinkId::Telemetry, ttl_name, ttl_port, link_tx)
                    .map_err(TransportError::from)?;

                info!(
                    command_port = %config.command_port,
                    ttl_port = ttl_name,
                    "Using USB Dual Port mode"
                );
                Box::new(DualChannelTransport::new(
                    Box::new(command),
                    Box::new(ttl),
                    transport_config,
                ))
            }
            SerialMode::UsbChained => {
                info!(
                    command_port = %config.command_port,
                    baud = config.baud_rate,
                    "Using USB Chained mode"
                );
                Box::new(SingleChannelTransport::new(
                    Box::new(command),
                    transport_config,
                ))
            }
            SerialMode::Uart => {
                return Err(TransportError::UnsupportedMode("UART".to_string()).into())
            }
        };

        let (maestro, mut events) = Self::spawn(transport, link_rx);
        wait_for_open(&mut events, transport_config.request_timeout).await?;
        Ok(maestro)
    }

    /// Find the first Maestro not yet in `registry` and connect to it
    ///
    /// The chosen ports are recorded in `registry` and released again if the
    /// connection fails.
    pub async fn find(
        mode: SerialMode,
        registry: &mut PortRegistry,
        transport_config: TransportConfig,
    ) -> Result<Self, MaestroError> {
        debug!(%mode, "Searching for attached Pololu Maestro");
        let ports = select_maestro_ports(&list_ports(), mode, registry)?;

        let mut config = match mode {
            SerialMode::UsbDualPort => LinkConfig::dual_port(&ports.command, &ports.ttl),
            _ => LinkConfig::chained(&ports.command, None),
        };
        config.set_transport_config(transport_config);

        match Self::connect(&config).await {
            Ok(maestro) => Ok(maestro),
            Err(e) => {
                registry.release(&ports.command);
                registry.release(&ports.ttl);
                Err(e)
            }
        }
    }

    /// Serial mode of the underlying transport
    pub fn mode(&self) -> SerialMode {
        self.handle.mode()
    }

    /// Model set with [`Maestro::with_model`]
    pub fn model(&self) -> Option<MaestroModel> {
        self.model
    }

    /// Receive transport events (faults, disconnects) from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.handle.subscribe()
    }

    /// Underlying transport handle
    pub fn handle(&self) -> &TransportHandle {
        &self.handle
    }

    // Servo commands

    /// Set a servo target in microseconds
    pub async fn set_target(&self, channel: u8, us: u16) -> Result<(), MaestroError> {
        self.check_channel(channel)?;
        check_range("target", us as u32, MIN_TARGET_US as u32, MAX_TARGET_US as u32)?;

        debug!(channel, us, "Setting target");
        let bytes = Command::SetTarget.frame_with_value(channel, us * 4)?;
        Ok(self.handle.write(bytes).await?)
    }

    /// Set a servo target through the Mini SSC protocol (0-254)
    pub async fn set_8bit_target(&self, channel: u8, target: u8) -> Result<(), MaestroError> {
        self.check_channel(channel)?;
        check_range("8 bit target", target as u32, 0, 254)?;

        debug!(channel, target, "Setting 8 bit target");
        let bytes = vec![Command::SetMiniSscTarget.opcode(), channel, target];
        Ok(self.handle.write(bytes).await?)
    }

    /// Set servo speed in units of 0.25 µs / 10 ms
    ///
    /// E.g. 140 takes a servo from 1000 µs to 1350 µs in 100 ms.
    pub async fn set_speed(&self, channel: u8, speed: u16) -> Result<(), MaestroError> {
        self.check_channel(channel)?;
        check_range("speed", speed as u32, 0, 255)?;

        debug!(channel, speed, "Setting speed");
        let bytes = Command::SetSpeed.frame_with_value(channel, speed)?;
        Ok(self.handle.write(bytes).await?)
    }

    /// Set servo acceleration in units of 0.25 µs / 10 ms / 80 ms
    pub async fn set_acceleration(
        &self,
        channel: u8,
        acceleration: u16,
    ) -> Result<(), MaestroError> {
        self.check_channel(channel)?;
        check_range("acceleration", acceleration as u32, 0, 255)?;

        debug!(channel, acceleration, "Setting acceleration");
        let bytes = Command::SetAcceleration.frame_with_value(channel, acceleration)?;
        Ok(self.handle.write(bytes).await?)
    }

    /// Last position sent to a channel, in quarter-microseconds
    pub async fn get_position(&self, channel: u8) -> Result<u16, MaestroError> {
        self.check_channel(channel)?;
        let data = self
            .handle
            .write_and_read(Command::GetPosition.frame_with_byte(channel))
            .await?;
        reading(data)
    }

    /// Whether any servo is still moving
    pub async fn get_moving_state(&self, channel: u8) -> Result<bool, MaestroError> {
        self.check_channel(channel)?;
        let data = self
            .handle
            .write_and_read(Command::GetMovingState.frame_with_byte(channel))
            .await?;
        flag(data)
    }

    /// Send all servos and outputs to their home positions
    pub async fn reset(&self) -> Result<(), MaestroError> {
        Ok(self.handle.write(Command::GoHome.frame()).await?)
    }

    // Input commands

    /// Read an analog input (channels 0-11), 0-1023 scaled by 4
    pub async fn analog_read(&self, channel: u8) -> Result<u16, MaestroError> {
        if channel >= FIRST_DIGITAL_CHANNEL {
            return Err(MaestroError::InvalidChannel {
                channel,
                reason: "only pins 0-11 are analog inputs".to_string(),
            });
        }
        self.check_channel(channel)?;

        let data = self
            .handle
            .write_and_read(Command::GetPosition.frame_with_byte(channel))
            .await?;
        reading(data)
    }

    /// Read a digital input (channels 12 and up)
    pub async fn digital_read(&self, channel: u8) -> Result<bool, MaestroError> {
        if channel < FIRST_DIGITAL_CHANNEL {
            return Err(MaestroError::InvalidChannel {
                channel,
                reason: "only pins 12+ are digital inputs".to_string(),
            });
        }
        self.check_channel(channel)?;

        let data = self
            .handle
            .write_and_read(Command::GetPosition.frame_with_byte(channel))
            .await?;
        Ok(reading(data)? >= DIGITAL_HIGH_THRESHOLD)
    }

    // Output commands. The Maestro has no analog outputs.

    /// Drive a channel configured as a digital output high or low
    pub async fn digital_write(&self, channel: u8, value: bool) -> Result<(), MaestroError> {
        let us = if value { MAX_TARGET_US } else { MIN_TARGET_US };
        self.set_target(channel, us).await
    }

    /// Set the PWM output's on time and period, both in 1/48 µs
    pub async fn set_pwm(&self, on_time: u16, period: u16) -> Result<(), MaestroError> {
        if let Some(model) = self.model {
            if model.pwm_channel().is_none() {
                return Err(MaestroError::InvalidChannel {
                    channel: 0,
                    reason: format!("{:?} has no PWM output", model),
                });
            }
        }

        let [on_low, on_high] = crate::protocol::encode16(on_time)?;
        let [period_low, period_high] = crate::protocol::encode16(period)?;
        let bytes = vec![
            Command::SetPwm.opcode(),
            on_low,
            on_high,
            period_low,
            period_high,
        ];
        Ok(self.handle.write(bytes).await?)
    }

    // Script commands

    /// Stop the running script
    pub async fn stop_script(&self) -> Result<(), MaestroError> {
        Ok(self.handle.write(Command::StopScript.frame()).await?)
    }

    /// Restart the script at a subroutine
    pub async fn restart_script_at_subroutine(&self, subroutine: u8) -> Result<(), MaestroError> {
        check_subroutine(subroutine)?;
        Ok(self
            .handle
            .write(Command::RestartScript.frame_with_byte(subroutine))
            .await?)
    }

    /// Restart the script at a subroutine and wait for what it sends back
    ///
    /// Scripts send data with `serial_send_byte`, which only reaches the host
    /// in USB Dual Port mode with RX wired to TX.
    pub async fn restart_script_at_subroutine_and_read(
        &self,
        subroutine: u8,
    ) -> Result<Vec<u8>, MaestroError> {
        check_subroutine(subroutine)?;
        self.require_dual_port()?;
        Ok(self
            .handle
            .write_and_read(Command::RestartScript.frame_with_byte(subroutine))
            .await?)
    }

    /// Restart the script at a subroutine with a parameter on the stack
    pub async fn restart_script_at_subroutine_with_parameter(
        &self,
        subroutine: u8,
        parameter: u16,
    ) -> Result<(), MaestroError> {
        let bytes = subroutine_with_parameter(subroutine, parameter)?;
        Ok(self.handle.write(bytes).await?)
    }

    /// Restart the script at a subroutine with a parameter and wait for its output
    pub async fn restart_script_at_subroutine_with_parameter_and_read(
        &self,
        subroutine: u8,
        parameter: u16,
    ) -> Result<Vec<u8>, MaestroError> {
        let bytes = subroutine_with_parameter(subroutine, parameter)?;
        self.require_dual_port()?;
        Ok(self.handle.write_and_read(bytes).await?)
    }

    /// Whether the script is still running
    pub async fn get_script_status(&self) -> Result<bool, MaestroError> {
        let data = self
            .handle
            .write_and_read(Command::GetScriptStatus.frame())
            .await?;
        flag(data)
    }

    /// Close the ports. Requests still queued are abandoned.
    pub async fn close(&self) -> Result<(), MaestroError> {
        Ok(self.handle.close().await?)
    }

    fn check_channel(&self, channel: u8) -> Result<(), MaestroError> {
        if channel & 0x80 != 0 {
            return Err(MaestroError::InvalidChannel {
                channel,
                reason: "channel numbers must fit in 7 bits".to_string(),
            });
        }
        match self.model {
            Some(model) if !model.has_channel(channel) => Err(MaestroError::InvalidChannel {
                channel,
                reason: format!("{:?} has {} channels", model, model.channels()),
            }),
            _ => Ok(()),
        }
    }

    fn require_dual_port(&self) -> Result<(), MaestroError> {
        if self.mode() != SerialMode::UsbDualPort {
            return Err(MaestroError::RequiresDualPort);
        }
        Ok(())
    }
}

fn check_range(what: &'static str, value: u32, min: u32, max: u32) -> Result<(), MaestroError> {
    if value < min || value > max {
        return Err(MaestroError::OutOfRange {
            what,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn check_subroutine(subroutine: u8) -> Result<(), MaestroError> {
    check_range("subroutine number", subroutine as u32, 0, 127)
}

fn subroutine_with_parameter(subroutine: u8, parameter: u16) -> Result<Vec<u8>, MaestroError> {
    check_subroutine(subroutine)?;
    check_range(
        "subroutine parameter",
        parameter as u32,
        0,
        MAX_SUBROUTINE_PARAMETER as u32,
    )?;
    Ok(Command::RestartScriptWithParameter.frame_with_value(subroutine, parameter)?)
}

/// Decode a two byte telemetry reading
fn reading(data: Vec<u8>) -> Result<u16, MaestroError> {
    decode8x2(&data).map_err(|_| MaestroError::UnexpectedResponse(data))
}

/// Decode a one byte boolean reply
fn flag(data: Vec<u8>) -> Result<bool, MaestroError> {
    match data.first().copied() {
        Some(b) => Ok(b != 0),
        None => Err(MaestroError::UnexpectedResponse(data)),
    }
}
