//! Streaming macro upload bounded by the robot's macro storage.
//!
//! The robot can hold only a small amount of macro data at once. A streamed
//! macro is therefore kept as a backlog on the client and uploaded in chunks
//! of at most [`MacroLimits::max_chunk`] bytes. Each chunk ends with a
//! synchronisation marker; when the robot executes the marker it sends an
//! information packet back, which frees the oldest chunk's bytes so the next
//! chunk can follow.
//!
//! [`MacroSession`] is pure bookkeeping. Its methods return the commands to
//! send and leave dispatch to the caller, which holds the session under the
//! same lock as the correlation queue.

use std::collections::VecDeque;

use thiserror::Error;
use tracing::{debug, trace};

use crate::command::{
    Command,
    MAC_END,
    MACRO_FLAG_MOTOR_CONTROL,
    MacroCommand,
    STREAMING_MACRO_ID,
};

/// Default robot macro storage in bytes.
pub const DEFAULT_BUDGET: usize = 900;
/// Default largest chunk, marker included.
pub const DEFAULT_MAX_CHUNK: usize = 100;
/// Default low-water mark below which no new chunk is started.
pub const DEFAULT_MIN_THRESHOLD: usize = 50;

/// Errors raised when a streamed macro cannot be uploaded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MacroError {
    /// A single step plus the marker does not fit in one chunk.
    #[error("macro step of {len} bytes cannot fit a {max_chunk}-byte chunk with its marker")]
    CommandTooLarge {
        /// Length of the offending step.
        len: usize,
        /// Configured chunk limit.
        max_chunk: usize,
    },
    /// A macro stored in one piece exceeds a single command's data block.
    #[error("macro of {len} bytes exceeds the {max}-byte limit for a stored macro")]
    MacroTooLong {
        /// Serialised length, terminator included.
        len: usize,
        /// Largest storable length.
        max: usize,
    },
    /// The limits cannot produce a chunk at all.
    #[error("invalid macro limits: {0}")]
    InvalidLimits(&'static str),
}

/// Storage limits of the robot's macro memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacroLimits {
    budget: usize,
    max_chunk: usize,
    min_threshold: usize,
}

impl MacroLimits {
    /// Create validated limits.
    ///
    /// # Errors
    /// Returns [`MacroError::InvalidLimits`] if `max_chunk` is zero, exceeds
    /// `budget`, or if `min_threshold` leaves no room for a chunk.
    pub const fn new(
        budget: usize,
        max_chunk: usize,
        min_threshold: usize,
    ) -> Result<Self, MacroError> {
        if max_chunk == 0 {
            return Err(MacroError::InvalidLimits("chunk size must be positive"));
        }
        if max_chunk > budget {
            return Err(MacroError::InvalidLimits("chunk size exceeds budget"));
        }
        if min_threshold >= budget {
            return Err(MacroError::InvalidLimits("threshold must be below budget"));
        }
        Ok(Self {
            budget,
            max_chunk,
            min_threshold,
        })
    }

    /// Total storage in bytes.
    #[must_use]
    pub const fn budget(&self) -> usize { self.budget }

    /// Largest chunk in bytes, marker included.
    #[must_use]
    pub const fn max_chunk(&self) -> usize { self.max_chunk }

    /// Free space at or below which no chunk is started.
    #[must_use]
    pub const fn min_threshold(&self) -> usize { self.min_threshold }
}

impl Default for MacroLimits {
    fn default() -> Self {
        Self {
            budget: DEFAULT_BUDGET,
            max_chunk: DEFAULT_MAX_CHUNK,
            min_threshold: DEFAULT_MIN_THRESHOLD,
        }
    }
}

/// Commands produced by a session step.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Progress {
    /// System commands to send now, in order.
    pub uploads: Vec<Command>,
    /// Set when the macro finished: the queued follow-up user commands.
    pub finished: Option<Vec<Command>>,
}

impl Progress {
    const fn uploads(uploads: Vec<Command>) -> Self {
        Self {
            uploads,
            finished: None,
        }
    }
}

/// Client-side state of a streamed macro.
#[derive(Debug, Clone)]
pub struct MacroSession {
    limits: MacroLimits,
    marker: MacroCommand,
    backlog: VecDeque<MacroCommand>,
    chunks: VecDeque<usize>,
    outstanding: usize,
    running: bool,
    after_completion: Vec<Command>,
}

impl MacroSession {
    /// Create an idle session that ends every chunk with `marker`.
    ///
    /// # Errors
    /// Returns [`MacroError::CommandTooLarge`] if the marker alone does not
    /// fit a chunk.
    pub fn new(limits: MacroLimits, marker: MacroCommand) -> Result<Self, MacroError> {
        if marker.len() >= limits.max_chunk {
            return Err(MacroError::CommandTooLarge {
                len: marker.len(),
                max_chunk: limits.max_chunk,
            });
        }
        Ok(Self {
            limits,
            marker,
            backlog: VecDeque::new(),
            chunks: VecDeque::new(),
            outstanding: 0,
            running: false,
            after_completion: Vec::new(),
        })
    }

    /// Whether a streamed macro is in progress.
    #[must_use]
    pub const fn is_running(&self) -> bool { self.running }

    /// Steps not uploaded yet.
    #[must_use]
    pub fn backlog_len(&self) -> usize { self.backlog.len() }

    /// Markers uploaded but not acknowledged.
    #[must_use]
    pub const fn outstanding(&self) -> usize { self.outstanding }

    /// Bytes currently occupied on the robot.
    #[must_use]
    pub fn used(&self) -> usize { self.chunks.iter().sum() }

    /// Bytes still available on the robot.
    #[must_use]
    pub fn free(&self) -> usize { self.limits.budget.saturating_sub(self.used()) }

    /// Sizes of the chunks awaiting acknowledgement, oldest first.
    #[must_use]
    pub fn tracked_chunks(&self) -> Vec<usize> { self.chunks.iter().copied().collect() }

    /// Start streaming `steps`, aborting any macro already in progress.
    ///
    /// # Errors
    /// Returns [`MacroError::CommandTooLarge`] if any step cannot fit a chunk
    /// together with the marker; the session is left untouched.
    pub fn submit(&mut self, steps: Vec<MacroCommand>) -> Result<Progress, MacroError> {
        let marker_len = self.marker.len();
        if let Some(step) = steps
            .iter()
            .find(|step| step.len() + marker_len > self.limits.max_chunk)
        {
            return Err(MacroError::CommandTooLarge {
                len: step.len(),
                max_chunk: self.limits.max_chunk,
            });
        }

        let mut uploads = Vec::new();
        if self.running || !self.backlog.is_empty() || !self.chunks.is_empty() {
            uploads.extend(self.abort());
        }

        debug!(steps = steps.len(), "streaming macro submitted");
        self.backlog = steps.into();
        self.running = true;
        uploads.extend(self.fill());

        let mut progress = Progress::uploads(uploads);
        progress.finished = self.finish_if_done();
        Ok(progress)
    }

    /// Upload as many chunks as the free budget allows.
    ///
    /// Produces nothing when the backlog is empty or free space is at or
    /// below the low-water mark.
    pub fn fill(&mut self) -> Vec<Command> {
        let mut uploads = Vec::new();
        let marker_len = self.marker.len();
        loop {
            let free = self.free();
            if self.backlog.is_empty() || free <= self.limits.min_threshold {
                break;
            }
            let cap = free.min(self.limits.max_chunk);

            let mut size = 0;
            let mut data = Vec::with_capacity(cap + 1);
            while let Some(step) = self.backlog.front() {
                if size + step.len() + marker_len > cap {
                    break;
                }
                size += step.len();
                data.extend(step.to_bytes());
                self.backlog.pop_front();
            }
            if size == 0 {
                // The next step does not fit the free space. No marker-only
                // chunk is sent; the step waits for an acknowledgement.
                break;
            }

            data.extend(self.marker.to_bytes());
            size += marker_len;
            if self.backlog.is_empty() {
                data.push(MAC_END);
            }

            trace!(size, free, remaining = self.backlog.len(), "uploading macro chunk");
            self.chunks.push_back(size);
            self.outstanding += 1;
            uploads.push(Command::SaveMacro {
                id: STREAMING_MACRO_ID,
                flags: MACRO_FLAG_MOTOR_CONTROL,
                data,
            });
        }
        uploads
    }

    /// Handle a synchronisation marker echo from the robot.
    ///
    /// Frees the oldest chunk and refills. When the backlog is drained and
    /// every marker is acknowledged the session returns to idle and the
    /// follow-up commands are handed back in [`Progress::finished`].
    pub fn acknowledge(&mut self) -> Progress {
        if !self.running {
            trace!("macro marker with no streaming macro running");
            return Progress::default();
        }
        self.outstanding = self.outstanding.saturating_sub(1);
        self.chunks.pop_front();

        let mut progress = Progress::uploads(self.fill());
        progress.finished = self.finish_if_done();
        progress
    }

    /// Abandon the macro; returns the abort command to send.
    ///
    /// Uploaded chunks are dropped from tracking since the robot discards
    /// them too.
    pub fn abort(&mut self) -> Vec<Command> {
        debug!(
            backlog = self.backlog.len(),
            outstanding = self.outstanding,
            "aborting streaming macro"
        );
        self.reset();
        vec![Command::AbortMacro]
    }

    /// Queue a user command to send once the macro finishes.
    pub fn send_after(&mut self, command: Command) { self.after_completion.push(command); }

    /// Drop every queued follow-up command.
    pub fn clear_after(&mut self) { self.after_completion.clear(); }

    /// Number of queued follow-up commands.
    #[must_use]
    pub fn after_len(&self) -> usize { self.after_completion.len() }

    /// Forget all state, including queued follow-up commands.
    pub fn clear(&mut self) {
        self.reset();
        self.after_completion.clear();
    }

    fn finish_if_done(&mut self) -> Option<Vec<Command>> {
        if self.running && self.backlog.is_empty() && self.outstanding == 0 {
            debug!(follow_up = self.after_completion.len(), "streaming macro finished");
            self.reset();
            Some(std::mem::take(&mut self.after_completion))
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.backlog.clear();
        self.chunks.clear();
        self.outstanding = 0;
        self.running = false;
    }
}
