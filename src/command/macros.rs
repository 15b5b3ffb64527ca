//! Macro sub-commands and macro containers.
//!
//! Macros run on the robot without a round trip per step. A [`Macro`] in
//! [`MacroMode::Normal`] is saved into the temporary slot in one piece; in
//! [`MacroMode::Streaming`] it is handed to the macro memory manager, which
//! uploads it in chunks sized to the robot's storage.

use super::{heading_bytes, unit_to_byte};

/// Terminator byte that ends a macro on the robot.
pub const MAC_END: u8 = 0x00;

const CODE_STABILIZATION: u8 = 0x03;
const CODE_ROLL: u8 = 0x05;
const CODE_RGB: u8 = 0x07;
const CODE_FRONT_LED: u8 = 0x09;
const CODE_DELAY: u8 = 0x0B;
const CODE_EMIT: u8 = 0x15;

/// One step of a macro.
#[derive(Debug, Clone, PartialEq)]
pub enum MacroCommand {
    /// Synchronisation marker; the robot echoes `id` in an information
    /// packet when execution reaches it.
    Emit(u8),
    /// Pause for a number of milliseconds.
    Delay(u16),
    /// Set the RGB LED, then wait `pcd` milliseconds.
    Rgb {
        /// Red channel.
        red: u8,
        /// Green channel.
        green: u8,
        /// Blue channel.
        blue: u8,
        /// Post-command delay in milliseconds.
        pcd: u8,
    },
    /// Set the front LED brightness (`0.0..=1.0`).
    FrontLed {
        /// Brightness.
        brightness: f32,
        /// Post-command delay in milliseconds.
        pcd: u8,
    },
    /// Roll at `speed` (`0.0..=1.0`) towards `heading` degrees.
    Roll {
        /// Speed.
        speed: f32,
        /// Heading in degrees.
        heading: f32,
        /// Post-command delay in milliseconds.
        pcd: u8,
    },
    /// Toggle stabilisation.
    Stabilization(bool),
    /// Pre-encoded bytes for a step the driver has no variant for.
    Raw(Vec<u8>),
}

impl MacroCommand {
    /// Serialised form of the step.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Emit(id) => vec![CODE_EMIT, *id],
            Self::Delay(ms) => {
                let [hi, lo] = ms.to_be_bytes();
                vec![CODE_DELAY, hi, lo]
            }
            Self::Rgb {
                red,
                green,
                blue,
                pcd,
            } => vec![CODE_RGB, *red, *green, *blue, *pcd],
            Self::FrontLed { brightness, pcd } => {
                vec![CODE_FRONT_LED, unit_to_byte(*brightness), *pcd]
            }
            Self::Roll {
                speed,
                heading,
                pcd,
            } => {
                let [hi, lo] = heading_bytes(*heading);
                vec![CODE_ROLL, unit_to_byte(*speed), hi, lo, *pcd]
            }
            Self::Stabilization(on) => vec![CODE_STABILIZATION, u8::from(*on), 0x00],
            Self::Raw(bytes) => bytes.clone(),
        }
    }

    /// Number of bytes the step occupies in robot memory.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Emit(_) => 2,
            Self::Delay(_) | Self::FrontLed { .. } | Self::Stabilization(_) => 3,
            Self::Rgb { .. } | Self::Roll { .. } => 5,
            Self::Raw(bytes) => bytes.len(),
        }
    }

    /// Whether the step has no bytes (only possible for [`Self::Raw`]).
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// How a macro reaches the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MacroMode {
    /// Saved whole into the temporary slot and run once.
    #[default]
    Normal,
    /// Uploaded in size-bounded chunks as robot memory frees up.
    Streaming,
}

/// An ordered list of macro steps plus the upload mode.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Macro {
    mode: MacroMode,
    commands: Vec<MacroCommand>,
}

impl Macro {
    /// Create an empty macro in the given mode.
    #[must_use]
    pub const fn new(mode: MacroMode) -> Self {
        Self {
            mode,
            commands: Vec::new(),
        }
    }

    /// Append a step.
    #[must_use]
    pub fn with_command(mut self, command: MacroCommand) -> Self {
        self.commands.push(command);
        self
    }

    /// Append a step in place.
    pub fn push(&mut self, command: MacroCommand) { self.commands.push(command); }

    /// Change the upload mode.
    pub const fn set_mode(&mut self, mode: MacroMode) { self.mode = mode; }

    /// Return the upload mode.
    #[must_use]
    pub const fn mode(&self) -> MacroMode { self.mode }

    /// Return the steps.
    #[must_use]
    pub fn commands(&self) -> &[MacroCommand] { &self.commands }

    /// Consume the macro and return its steps.
    #[must_use]
    pub fn into_commands(self) -> Vec<MacroCommand> { self.commands }

    /// Serialise all steps followed by [`MAC_END`].
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes: Vec<u8> = self.commands.iter().flat_map(MacroCommand::to_bytes).collect();
        bytes.push(MAC_END);
        bytes
    }
}

impl FromIterator<MacroCommand> for Macro {
    fn from_iter<I: IntoIterator<Item = MacroCommand>>(iter: I) -> Self {
        Self {
            mode: MacroMode::Normal,
            commands: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(MacroCommand::Emit(1))]
    #[case(MacroCommand::Delay(250))]
    #[case(MacroCommand::Rgb { red: 1, green: 2, blue: 3, pcd: 0 })]
    #[case(MacroCommand::FrontLed { brightness: 0.5, pcd: 10 })]
    #[case(MacroCommand::Roll { speed: 0.3, heading: 180.0, pcd: 0 })]
    #[case(MacroCommand::Stabilization(true))]
    #[case(MacroCommand::Raw(vec![0x42; 7]))]
    fn declared_length_matches_encoding(#[case] command: MacroCommand) {
        assert_eq!(command.len(), command.to_bytes().len());
    }

    #[rstest]
    fn macro_bytes_end_with_terminator() {
        let mac = Macro::new(MacroMode::Normal)
            .with_command(MacroCommand::Delay(0x0102))
            .with_command(MacroCommand::Emit(7));
        assert_eq!(mac.to_bytes(), vec![0x0B, 0x01, 0x02, 0x15, 0x07, MAC_END]);
    }
}
