//! Client-side copy of the robot's last confirmed movement and LED state.
//!
//! The shadow is written only when the robot acknowledges a command with an
//! OK status, and replayed after every connect so a fresh session resumes
//! from a known state.

use crate::command::{Command, MotorMode, MotorSetting};

/// Last confirmed roll state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Movement {
    /// Heading in degrees.
    pub heading: f32,
    /// Velocity, `0.0..=1.0`.
    pub velocity: f32,
    /// Rotation rate, `0.0..=1.0`.
    pub rotation_rate: f32,
    /// Whether the robot was told to stop.
    pub stopped: bool,
}

impl Default for Movement {
    fn default() -> Self {
        Self {
            heading: 0.0,
            velocity: 0.0,
            rotation_rate: 0.0,
            stopped: true,
        }
    }
}

/// Last confirmed direct motor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMovement {
    /// Left motor.
    pub left: MotorSetting,
    /// Right motor.
    pub right: MotorSetting,
}

impl Default for RawMovement {
    fn default() -> Self {
        let idle = MotorSetting {
            mode: MotorMode::Forward,
            power: 0,
        };
        Self {
            left: idle,
            right: idle,
        }
    }
}

/// Last confirmed LED state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Leds {
    /// Main LED colour as `(red, green, blue)`.
    pub rgb: (u8, u8, u8),
    /// Front LED brightness, `0.0..=1.0`.
    pub front: f32,
}

impl Default for Leds {
    fn default() -> Self {
        Self {
            rgb: (u8::MAX, u8::MAX, u8::MAX),
            front: 0.0,
        }
    }
}

/// Cached device state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeviceShadow {
    movement: Movement,
    raw: RawMovement,
    leds: Leds,
}

impl DeviceShadow {
    /// Return the roll state.
    #[must_use]
    pub const fn movement(&self) -> &Movement { &self.movement }

    /// Return the direct motor state.
    #[must_use]
    pub const fn raw_movement(&self) -> &RawMovement { &self.raw }

    /// Return the LED state.
    #[must_use]
    pub const fn leds(&self) -> &Leds { &self.leds }

    /// Record the effect of an acknowledged command.
    ///
    /// Returns `true` when the command changed tracked state.
    pub fn apply(&mut self, command: &Command) -> bool {
        match command {
            Command::Roll {
                heading,
                velocity,
                stop,
            } => {
                self.movement.heading = *heading;
                self.movement.velocity = *velocity;
                self.movement.stopped = *stop;
            }
            Command::RotationRate(rate) => self.movement.rotation_rate = *rate,
            Command::RawMotor { left, right } => {
                self.raw.left = *left;
                self.raw.right = *right;
            }
            Command::RgbLed { red, green, blue } => self.leds.rgb = (*red, *green, *blue),
            Command::FrontLed(brightness) => self.leds.front = *brightness,
            _ => return false,
        }
        true
    }

    /// Restore connect-time defaults.
    pub fn reset(&mut self) { *self = Self::default(); }

    /// Commands that bring a freshly connected robot into the shadowed state.
    #[must_use]
    pub fn reset_sequence(&self) -> Vec<Command> {
        let (red, green, blue) = self.leds.rgb;
        vec![
            Command::AbortMacro,
            Command::RgbLed { red, green, blue },
            Command::Roll {
                heading: self.movement.heading,
                velocity: self.movement.velocity,
                stop: self.movement.stopped,
            },
            Command::Calibrate {
                heading: self.movement.heading,
            },
            Command::FrontLed(self.leds.front),
        ]
    }
}
