//! Matching responses to the commands that caused them.
//!
//! The robot answers commands strictly in the order it received them and the
//! protocol carries no usable message id, so the default [`FifoCorrelator`]
//! pairs the Nth response with the Nth transmitted command. The [`Correlator`]
//! trait keeps that policy replaceable by an id-based one.

use std::{collections::VecDeque, time::Duration};

use tokio::time::Instant;

use crate::{command::Command, packet::PacketHeader};

/// A command whose bytes have been handed to the transport and whose
/// response has not arrived yet.
#[derive(Debug, Clone, PartialEq)]
pub struct InFlight {
    command: Command,
    system: bool,
    sent_at: Instant,
}

impl InFlight {
    /// Record `command` as sent now.
    #[must_use]
    pub fn new(command: Command, system: bool) -> Self {
        Self {
            command,
            system,
            sent_at: Instant::now(),
        }
    }

    /// Return the command.
    #[must_use]
    pub const fn command(&self) -> &Command { &self.command }

    /// Consume the entry and return the command.
    #[must_use]
    pub fn into_command(self) -> Command { self.command }

    /// Whether the command was issued by the driver itself.
    #[must_use]
    pub const fn is_system(&self) -> bool { self.system }

    /// When the entry was registered.
    #[must_use]
    pub const fn sent_at(&self) -> Instant { self.sent_at }
}

/// Pairs inbound responses with outstanding commands.
pub trait Correlator: Send + std::fmt::Debug {
    /// Register a command at the moment its bytes are written.
    fn register(&mut self, entry: InFlight);

    /// Take the entry the response with `header` answers.
    ///
    /// Returns `None` when nothing is outstanding, which is a protocol
    /// violation the caller must surface.
    fn resolve(&mut self, header: &PacketHeader) -> Option<InFlight>;

    /// Remove entries that have waited longer than `timeout` as of `now`.
    fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<InFlight>;

    /// Number of outstanding entries.
    fn len(&self) -> usize;

    /// Whether nothing is outstanding.
    fn is_empty(&self) -> bool { self.len() == 0 }

    /// Drop every outstanding entry.
    fn clear(&mut self);
}

/// Strict first-in first-out correlation.
#[derive(Debug, Default)]
pub struct FifoCorrelator {
    queue: VecDeque<InFlight>,
}

impl FifoCorrelator {
    /// Create an empty correlator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }
}

impl Correlator for FifoCorrelator {
    fn register(&mut self, entry: InFlight) { self.queue.push_back(entry); }

    fn resolve(&mut self, _header: &PacketHeader) -> Option<InFlight> { self.queue.pop_front() }

    fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<InFlight> {
        // Entries are registered in send order, so expired ones form a prefix.
        let mut expired = Vec::new();
        while self
            .queue
            .front()
            .is_some_and(|entry| now.saturating_duration_since(entry.sent_at) >= timeout)
        {
            if let Some(entry) = self.queue.pop_front() {
                expired.push(entry);
            }
        }
        expired
    }

    fn len(&self) -> usize { self.queue.len() }

    fn clear(&mut self) { self.queue.clear(); }
}
