//! Delayed and periodic command scheduling.
//!
//! Every scheduled command runs as its own Tokio task holding a child of the
//! scheduler's [`CancellationToken`]. Cancelling the scheduler, which happens
//! on every disconnect, stops all of them and makes later schedules inert.
//! Timer tasks never touch the transport; they only enqueue.

use std::time::Duration;

use tokio::{
    runtime::Handle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::{command::Command, dispatch::Dispatcher};

/// Shortest accepted period for repeating commands.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);
/// Delays and periods are capped here, well inside what the clock can add.
pub const MAX_DELAY: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Deadline `delay` from now, saturating at [`MAX_DELAY`].
fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay.min(MAX_DELAY)).unwrap_or(now)
}

/// Handle to one scheduled command.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    token: CancellationToken,
}

impl ScheduledTask {
    /// Stop the command from firing again.
    pub fn cancel(&self) { self.token.cancel(); }

    /// Whether the command has been cancelled, directly or by disconnect.
    #[must_use]
    pub fn is_cancelled(&self) -> bool { self.token.is_cancelled() }
}

/// Timer front end for the outbound queue of one connection.
#[derive(Debug, Clone)]
pub struct Scheduler {
    dispatcher: Dispatcher,
    token: CancellationToken,
    runtime: Handle,
}

impl Scheduler {
    /// Create a scheduler that enqueues on `dispatcher` and stops when
    /// `parent` is cancelled.
    ///
    /// Must be called from within a Tokio runtime. Timers are spawned on
    /// that runtime even when later schedules come from other threads, and
    /// delays count from the moment of the call.
    #[must_use]
    pub fn new(dispatcher: Dispatcher, parent: &CancellationToken) -> Self {
        Self {
            dispatcher,
            token: parent.child_token(),
            runtime: Handle::current(),
        }
    }

    /// Enqueue immediately.
    pub fn now(&self, command: Command, system: bool) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.dispatcher.enqueue(command, system)
    }

    /// Enqueue once after `delay`.
    pub fn after(&self, command: Command, system: bool, delay: Duration) -> ScheduledTask {
        let token = self.token.child_token();
        let task = ScheduledTask {
            token: token.clone(),
        };
        let dispatcher = self.dispatcher.clone();
        let deadline = deadline_after(delay);
        self.runtime.spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {
                    trace!(%command, "delayed command fired");
                    dispatcher.enqueue(command, system);
                }
            }
        });
        task
    }

    /// Enqueue after `initial`, then every `period` until cancelled.
    ///
    /// Periods are clamped to `MIN_PERIOD..=MAX_DELAY`.
    pub fn periodic(
        &self,
        command: Command,
        system: bool,
        initial: Duration,
        period: Duration,
    ) -> ScheduledTask {
        let token = self.token.child_token();
        let task = ScheduledTask {
            token: token.clone(),
        };
        let dispatcher = self.dispatcher.clone();
        let start = deadline_after(initial);
        self.runtime.spawn(async move {
            let mut ticks = tokio::time::interval_at(start, period.clamp(MIN_PERIOD, MAX_DELAY));
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticks.tick() => {
                        trace!(%command, "periodic command fired");
                        dispatcher.enqueue(command.clone(), system);
                    }
                }
            }
        });
        task
    }

    /// Cancel every scheduled command.
    pub fn cancel(&self) { self.token.cancel(); }

    /// Whether the scheduler has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool { self.token.is_cancelled() }
}
