//! Observer interface for robot traffic and lifecycle events.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use super::lock;
use crate::{
    command::Command,
    packet::{Information, Response, ResponseCode},
};

/// Lifecycle and protocol events reported to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum RobotEvent {
    /// A connection was established.
    Connected,
    /// Opening the transport failed.
    ConnectFailed,
    /// A graceful disconnect completed.
    Disconnected,
    /// The transport failed while connected.
    UnexpectedDisconnect,
    /// A disconnect was requested with no active connection.
    NoConnection,
    /// A streamed macro finished and its follow-up commands were sent.
    MacroDone,
    /// A response arrived with no outstanding command to match.
    UnmatchedResponse(ResponseCode),
    /// A command received no response within the configured timeout.
    ResponseTimeout(Command),
}

impl fmt::Display for RobotEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => f.write_str("connected"),
            Self::ConnectFailed => f.write_str("connect failed"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::UnexpectedDisconnect => f.write_str("connection closed unexpectedly"),
            Self::NoConnection => f.write_str("no active connection"),
            Self::MacroDone => f.write_str("macro done"),
            Self::UnmatchedResponse(code) => write!(f, "unmatched response ({code:?})"),
            Self::ResponseTimeout(command) => write!(f, "{command} timed out"),
        }
    }
}

/// Receives robot traffic. All methods default to doing nothing.
///
/// Callbacks run on the connection's reader task and must not block.
pub trait RobotListener: Send + Sync {
    /// A response to a user command arrived.
    fn on_response(&self, _response: &Response, _command: &Command) {}

    /// An information packet arrived.
    fn on_information(&self, _information: &Information) {}

    /// A lifecycle or protocol event occurred.
    fn on_event(&self, _event: &RobotEvent) {}
}

/// Registered listeners.
#[derive(Default)]
pub(crate) struct Listeners {
    inner: Mutex<Vec<Arc<dyn RobotListener>>>,
}

impl Listeners {
    pub(crate) fn add(&self, listener: Arc<dyn RobotListener>) { lock(&self.inner).push(listener); }

    pub(crate) fn remove(&self, listener: &Arc<dyn RobotListener>) -> bool {
        let mut guard = lock(&self.inner);
        let before = guard.len();
        guard.retain(|existing| !Arc::ptr_eq(existing, listener));
        guard.len() != before
    }

    pub(crate) fn event(&self, event: &RobotEvent) {
        for listener in self.snapshot() {
            listener.on_event(event);
        }
    }

    pub(crate) fn response(&self, response: &Response, command: &Command) {
        for listener in self.snapshot() {
            listener.on_response(response, command);
        }
    }

    pub(crate) fn information(&self, information: &Information) {
        for listener in self.snapshot() {
            listener.on_information(information);
        }
    }

    // Callbacks run outside the lock so listeners may call back into the robot.
    fn snapshot(&self) -> Vec<Arc<dyn RobotListener>> { lock(&self.inner).clone() }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &lock(&self.inner).len())
            .finish()
    }
}
