//! Outbound commands understood by the robot.
//!
//! A [`Command`] is immutable once built. Its wire form is produced by
//! [`crate::packet::CommandEncoder`]; the encoder needs only the
//! [`CommandKind`] (device and command id) and the data block returned by
//! [`Command::data`].

pub mod macros;

use std::fmt;

use bytes::BytesMut;
pub use macros::{MAC_END, Macro, MacroCommand, MacroMode};

use crate::packet::{COMMAND_HEADER_LEN, MAX_COMMAND_DATA, codec::put_command};

/// Device id of the core (connection and power) command set.
const DEVICE_CORE: u8 = 0x00;
/// Device id of the robot-specific command set.
const DEVICE_SPHERO: u8 = 0x02;

/// Macro id the robot reserves for streamed macro chunks.
pub const STREAMING_MACRO_ID: u8 = 0xFE;
/// Macro id of the single temporary macro slot.
pub const TEMPORARY_MACRO_ID: u8 = 0xFF;
/// Macro flag asking the robot to stop the motors when the macro ends.
pub const MACRO_FLAG_MOTOR_CONTROL: u8 = 0x01;
/// Longest name the robot accepts.
pub const MAX_NAME_LEN: usize = 48;

/// Drive mode of a single motor for [`Command::RawMotor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotorMode {
    /// Motor unpowered.
    Off,
    /// Spin forwards.
    #[default]
    Forward,
    /// Spin backwards.
    Reverse,
    /// Actively brake.
    Brake,
    /// Leave the motor as it is.
    Ignore,
}

impl MotorMode {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Off => 0x00,
            Self::Forward => 0x01,
            Self::Reverse => 0x02,
            Self::Brake => 0x03,
            Self::Ignore => 0x04,
        }
    }
}

/// Mode and power for one motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotorSetting {
    /// Drive mode.
    pub mode: MotorMode,
    /// Power level, 0-255.
    pub power: u8,
}

/// Kind tag of a command: which device/command id pair it addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Keep-alive no-op.
    Ping,
    /// Ask for the Bluetooth name and address.
    GetBluetoothInfo,
    /// Change the advertised name.
    SetName,
    /// Put the robot to sleep.
    Sleep,
    /// Reboot into the bootloader.
    JumpToBootloader,
    /// Set the current heading as zero.
    Calibrate,
    /// Toggle the stabilisation loop.
    Stabilization,
    /// Set the rotation rate.
    RotationRate,
    /// Set the main RGB LED.
    RgbLed,
    /// Set the front (aiming) LED.
    FrontLed,
    /// Roll with a heading and velocity.
    Roll,
    /// Drive the motors directly.
    RawMotor,
    /// Run a stored macro.
    RunMacro,
    /// Store a macro in the temporary slot.
    SaveTemporaryMacro,
    /// Store a macro, or a streamed chunk of one.
    SaveMacro,
    /// Abort the running macro.
    AbortMacro,
    /// Any other device/command id pair.
    Other {
        /// Device id.
        device_id: u8,
        /// Command id.
        command_id: u8,
    },
}

impl CommandKind {
    /// Device id byte on the wire.
    #[must_use]
    pub const fn device_id(self) -> u8 {
        match self {
            Self::Ping
            | Self::GetBluetoothInfo
            | Self::SetName
            | Self::Sleep
            | Self::JumpToBootloader => DEVICE_CORE,
            Self::Other { device_id, .. } => device_id,
            _ => DEVICE_SPHERO,
        }
    }

    /// Command id byte on the wire.
    #[must_use]
    pub const fn command_id(self) -> u8 {
        match self {
            Self::Ping => 0x01,
            Self::SetName => 0x10,
            Self::GetBluetoothInfo => 0x11,
            Self::Sleep => 0x22,
            Self::JumpToBootloader => 0x30,
            Self::Calibrate => 0x01,
            Self::Stabilization => 0x02,
            Self::RotationRate => 0x03,
            Self::RgbLed => 0x20,
            Self::FrontLed => 0x21,
            Self::Roll => 0x30,
            Self::RawMotor => 0x33,
            Self::RunMacro => 0x50,
            Self::SaveTemporaryMacro => 0x51,
            Self::SaveMacro => 0x52,
            Self::AbortMacro => 0x55,
            Self::Other { command_id, .. } => command_id,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other {
                device_id,
                command_id,
            } => write!(f, "command {device_id:#04x}/{command_id:#04x}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// An outbound command.
///
/// Angles are in degrees (0-359) and unit quantities (velocity, brightness,
/// rotation rate) in `0.0..=1.0`; both are clamped when serialised.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Keep-alive no-op.
    Ping,
    /// Ask for the Bluetooth name and address.
    GetBluetoothInfo,
    /// Change the advertised name (truncated to [`MAX_NAME_LEN`] bytes).
    SetName(String),
    /// Sleep, waking after `wakeup` seconds (0 = never) and running `macro_id`.
    Sleep {
        /// Seconds until wake-up.
        wakeup: u16,
        /// Macro to run on wake-up (0 = none).
        macro_id: u8,
    },
    /// Reboot into the bootloader; the connection drops.
    JumpToBootloader,
    /// Make `heading` the new zero heading.
    Calibrate {
        /// Heading in degrees.
        heading: f32,
    },
    /// Toggle the stabilisation loop.
    Stabilization(bool),
    /// Rotation rate, `0.0..=1.0`.
    RotationRate(f32),
    /// Main RGB LED colour.
    RgbLed {
        /// Red channel.
        red: u8,
        /// Green channel.
        green: u8,
        /// Blue channel.
        blue: u8,
    },
    /// Front LED brightness, `0.0..=1.0`.
    FrontLed(f32),
    /// Roll towards `heading` at `velocity`; `stop` halts the motors.
    Roll {
        /// Heading in degrees.
        heading: f32,
        /// Velocity, `0.0..=1.0`.
        velocity: f32,
        /// Whether the robot should come to rest.
        stop: bool,
    },
    /// Direct motor control.
    RawMotor {
        /// Left motor.
        left: MotorSetting,
        /// Right motor.
        right: MotorSetting,
    },
    /// Run the stored macro with this id.
    RunMacro(u8),
    /// Store macro bytes in the temporary slot.
    SaveTemporaryMacro {
        /// Macro flags.
        flags: u8,
        /// Serialised macro, terminator included.
        data: Vec<u8>,
    },
    /// Store macro bytes under `id` (or stream them with [`STREAMING_MACRO_ID`]).
    SaveMacro {
        /// Destination macro id.
        id: u8,
        /// Macro flags.
        flags: u8,
        /// Serialised macro bytes.
        data: Vec<u8>,
    },
    /// Abort any running macro.
    AbortMacro,
    /// An opaque, caller-defined message.
    Raw {
        /// Device id.
        device_id: u8,
        /// Command id.
        command_id: u8,
        /// Data block.
        data: Vec<u8>,
    },
}

impl Command {
    /// Kind tag of this command.
    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::Ping => CommandKind::Ping,
            Self::GetBluetoothInfo => CommandKind::GetBluetoothInfo,
            Self::SetName(_) => CommandKind::SetName,
            Self::Sleep { .. } => CommandKind::Sleep,
            Self::JumpToBootloader => CommandKind::JumpToBootloader,
            Self::Calibrate { .. } => CommandKind::Calibrate,
            Self::Stabilization(_) => CommandKind::Stabilization,
            Self::RotationRate(_) => CommandKind::RotationRate,
            Self::RgbLed { .. } => CommandKind::RgbLed,
            Self::FrontLed(_) => CommandKind::FrontLed,
            Self::Roll { .. } => CommandKind::Roll,
            Self::RawMotor { .. } => CommandKind::RawMotor,
            Self::RunMacro(_) => CommandKind::RunMacro,
            Self::SaveTemporaryMacro { .. } => CommandKind::SaveTemporaryMacro,
            Self::SaveMacro { .. } => CommandKind::SaveMacro,
            Self::AbortMacro => CommandKind::AbortMacro,
            Self::Raw {
                device_id,
                command_id,
                ..
            } => CommandKind::Other {
                device_id: *device_id,
                command_id: *command_id,
            },
        }
    }

    /// Data block carried after the command header.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        match self {
            Self::Ping
            | Self::GetBluetoothInfo
            | Self::JumpToBootloader
            | Self::AbortMacro => Vec::new(),
            Self::SetName(name) => {
                let mut bytes = name.as_bytes().to_vec();
                bytes.truncate(MAX_NAME_LEN);
                bytes
            }
            Self::Sleep { wakeup, macro_id } => {
                let [hi, lo] = wakeup.to_be_bytes();
                vec![hi, lo, *macro_id]
            }
            Self::Calibrate { heading } => heading_bytes(*heading).to_vec(),
            Self::Stabilization(on) => vec![u8::from(*on)],
            Self::RotationRate(rate) => vec![unit_to_byte(*rate)],
            Self::RgbLed { red, green, blue } => vec![*red, *green, *blue, 0x00],
            Self::FrontLed(brightness) => vec![unit_to_byte(*brightness)],
            Self::Roll {
                heading,
                velocity,
                stop,
            } => {
                let [hi, lo] = heading_bytes(*heading);
                let speed = if *stop { 0 } else { unit_to_byte(*velocity) };
                vec![speed, hi, lo, u8::from(!*stop)]
            }
            Self::RawMotor { left, right } => vec![
                left.mode.as_u8(),
                left.power,
                right.mode.as_u8(),
                right.power,
            ],
            Self::RunMacro(id) => vec![*id],
            Self::SaveTemporaryMacro { flags, data } => {
                let mut bytes = Vec::with_capacity(data.len() + 1);
                bytes.push(*flags);
                bytes.extend_from_slice(data);
                bytes
            }
            Self::SaveMacro { id, flags, data } => {
                let mut bytes = Vec::with_capacity(data.len() + 2);
                bytes.push(*id);
                bytes.push(*flags);
                bytes.extend_from_slice(data);
                bytes
            }
            Self::Raw { data, .. } => data.clone(),
        }
    }

    /// Number of bytes this command occupies on the wire.
    #[must_use]
    pub fn packet_len(&self) -> usize { COMMAND_HEADER_LEN + self.data().len() + 1 }

    /// Serialise the command into its wire form.
    ///
    /// Data blocks longer than the protocol allows are truncated; use
    /// [`crate::packet::CommandEncoder`] to have them rejected instead.
    #[must_use = "use the serialised bytes"]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = self.data();
        data.truncate(MAX_COMMAND_DATA);
        let mut buf = BytesMut::with_capacity(COMMAND_HEADER_LEN + data.len() + 1);
        put_command(self.kind(), &data, &mut buf);
        buf.to_vec()
    }

    /// Whether the device shadow tracks this command.
    #[must_use]
    pub const fn updates_shadow(&self) -> bool {
        matches!(
            self,
            Self::Roll { .. }
                | Self::RotationRate(_)
                | Self::RawMotor { .. }
                | Self::RgbLed { .. }
                | Self::FrontLed(_)
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.kind().fmt(f) }
}

/// Scale a unit value to a byte, clamping into `0.0..=1.0`.
#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "value is clamped to 0..=255 before the cast"
)]
#[must_use]
pub(crate) fn unit_to_byte(value: f32) -> u8 {
    let clamped = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    (clamped * 255.0).round() as u8
}

/// Big-endian heading in whole degrees, clamped into `0..=359`.
#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "value is clamped to 0..=359 before the cast"
)]
#[must_use]
pub(crate) fn heading_bytes(heading: f32) -> [u8; 2] {
    let clamped = if heading.is_nan() {
        0.0
    } else {
        heading.clamp(0.0, 359.0)
    };
    (clamped.round() as u16).to_be_bytes()
}
