//! Outbound command queue.
//!
//! Producers enqueue through a cloneable [`Dispatcher`]; a single writer task
//! (see [`writer`]) drains the queue, batches commands and writes them to the
//! transport. Once the queue stops accepting, ordinary enqueues are dropped
//! without error while [`Dispatcher::force`] still gets through, so shutdown
//! commands reach the robot after the gate has closed.

pub mod writer;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::command::Command;

/// A command awaiting transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSend {
    command: Command,
    system: bool,
}

impl PendingSend {
    /// Wrap a command; `system` marks driver-internal traffic.
    #[must_use]
    pub const fn new(command: Command, system: bool) -> Self { Self { command, system } }

    /// Return the command.
    #[must_use]
    pub const fn command(&self) -> &Command { &self.command }

    /// Whether the command was issued by the driver itself.
    #[must_use]
    pub const fn is_system(&self) -> bool { self.system }

    /// Split into command and system flag.
    #[must_use]
    pub fn into_parts(self) -> (Command, bool) { (self.command, self.system) }
}

/// Receiving end drained by the writer task.
pub type DispatchReceiver = mpsc::UnboundedReceiver<PendingSend>;

/// Cloneable producer handle for the outbound queue.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<PendingSend>,
    accepting: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Create an open queue and its receiving end.
    #[must_use]
    pub fn channel() -> (Self, DispatchReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                accepting: Arc::new(AtomicBool::new(true)),
            },
            rx,
        )
    }

    /// Queue a command for transmission.
    ///
    /// Returns `false` when the command was dropped because the queue no
    /// longer accepts work or the writer has gone away.
    pub fn enqueue(&self, command: Command, system: bool) -> bool {
        if !self.is_accepting() {
            debug!(%command, system, "dropping command: queue closed");
            return false;
        }
        self.push(PendingSend::new(command, system))
    }

    /// Queue a system command even after the gate has closed.
    pub fn force(&self, command: Command) -> bool {
        trace!(%command, "forcing command past closed gate");
        self.push(PendingSend::new(command, true))
    }

    /// Stop accepting ordinary commands.
    pub fn close(&self) { self.accepting.store(false, Ordering::Release); }

    /// Whether ordinary commands are accepted.
    #[must_use]
    pub fn is_accepting(&self) -> bool { self.accepting.load(Ordering::Acquire) }

    fn push(&self, item: PendingSend) -> bool {
        match self.tx.send(item) {
            Ok(()) => true,
            Err(err) => {
                debug!(command = %err.0.command, "dropping command: writer stopped");
                false
            }
        }
    }
}
