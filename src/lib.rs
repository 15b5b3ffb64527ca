//! Client-side protocol engine for Sphero robots.
//!
//! The crate speaks the robot's binary serial protocol over any async byte
//! stream. It frames inbound packets, matches responses to commands in send
//! order, batches outbound writes, schedules delayed and periodic commands,
//! and streams long macros through the robot's limited macro memory.
//!
//! [`Robot`] is the entry point: build one with a [`transport::Connector`]
//! and a [`DriverConfig`], call [`Robot::connect`], then send commands and
//! register a [`RobotListener`] for responses and lifecycle events.
//!
//! Logging uses `tracing`; the crate installs no subscriber.

pub mod command;
pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod macro_memory;
pub mod packet;
pub mod robot;
pub mod scheduler;
pub mod shadow;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod test_helpers;

pub use command::{Command, Macro, MacroCommand, MacroMode};
pub use config::{ConfigError, DriverConfig};
pub use robot::{ConnectionState, Robot, RobotError, RobotEvent, RobotListener};
pub use scheduler::ScheduledTask;
pub use transport::{Connector, TcpConnector, TransportError};
