//! Connection lifecycle and the public robot handle.
//!
//! A [`Robot`] owns at most one live connection. Connecting opens the
//! transport, starts the reader and writer tasks, replays the device shadow
//! and installs the keep-alive ping. All connection tasks share one
//! [`CancellationToken`] and are stopped together.
//!
//! # Disconnecting
//!
//! A graceful disconnect closes the outbound queue to ordinary commands and
//! forces a stop-roll and front-LED-off pair through it. Teardown waits for
//! the robot to confirm both before closing the transport, or for the grace
//! period in [`DriverConfig::disconnect_grace_ms`] to elapse. A transport
//! failure tears the connection down at once and reports
//! [`RobotEvent::UnexpectedDisconnect`] exactly once.

pub mod address;
pub mod events;
mod reader;

use std::{
    fmt,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

pub use address::{AddressError, RobotAddress};
pub use events::{RobotEvent, RobotListener};
use events::Listeners;
use thiserror::Error;
use tokio::{runtime::Handle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    command::{
        Command,
        MACRO_FLAG_MOTOR_CONTROL,
        Macro,
        MacroCommand,
        MacroMode,
        TEMPORARY_MACRO_ID,
    },
    config::{ConfigError, DriverConfig},
    correlation::{Correlator, FifoCorrelator, InFlight},
    dispatch::{Dispatcher, PendingSend, writer},
    macro_memory::{MacroError, MacroLimits, MacroSession, Progress},
    packet::MAX_COMMAND_DATA,
    scheduler::{ScheduledTask, Scheduler},
    shadow::DeviceShadow,
    transport::{BoxedChannel, Connector, TransportError},
};

/// Marker appended to every streamed macro chunk.
pub const MACRO_MARKER: MacroCommand = MacroCommand::Emit(1);

/// Errors surfaced by [`Robot`] operations.
#[derive(Debug, Error)]
pub enum RobotError {
    /// The robot address is malformed.
    #[error(transparent)]
    Address(#[from] AddressError),
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The transport could not be opened.
    #[error("connection initialisation failed: {0}")]
    ConnectFailed(#[source] TransportError),
    /// A macro cannot be uploaded.
    #[error(transparent)]
    Macro(#[from] MacroError),
}

/// Whether a connection is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection, or a graceful disconnect is in progress.
    #[default]
    Disconnected,
    /// Connected and accepting commands.
    Connected,
}

/// Recover the guard from a poisoned lock.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// State guarded together: response correlation and macro memory.
#[derive(Debug)]
struct Ledger {
    correlator: Box<dyn Correlator>,
    macros: MacroSession,
}

/// Handles of the live connection.
#[derive(Debug)]
struct Link {
    generation: u64,
    dispatcher: Dispatcher,
    scheduler: Scheduler,
    shutdown: CancellationToken,
    runtime: Handle,
}

impl Link {
    fn stop(&self) {
        self.scheduler.cancel();
        self.dispatcher.close();
        self.shutdown.cancel();
    }
}

#[derive(Debug, Default)]
struct Session {
    state: ConnectionState,
    link: Option<Link>,
    first_echo_seen: bool,
}

impl Session {
    /// Whether `generation` names the live link.
    fn is_current(&self, generation: u64) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.generation == generation)
    }
}

struct Shared {
    address: RobotAddress,
    connector: Arc<dyn Connector>,
    config: DriverConfig,
    session: Mutex<Session>,
    ledger: Mutex<Ledger>,
    shadow: Mutex<DeviceShadow>,
    name: Mutex<Option<String>>,
    listeners: Listeners,
    generations: AtomicU64,
}

impl Shared {
    fn state(&self) -> ConnectionState { lock(&self.session).state }

    fn dispatcher(&self) -> Option<Dispatcher> {
        lock(&self.session)
            .link
            .as_ref()
            .map(|link| link.dispatcher.clone())
    }

    fn scheduler(&self) -> Option<Scheduler> {
        lock(&self.session)
            .link
            .as_ref()
            .map(|link| link.scheduler.clone())
    }

    /// Move a written batch into the correlation queue. Batches from a
    /// writer whose connection has been replaced are dropped.
    fn register(&self, generation: u64, batch: Vec<PendingSend>) {
        let session = lock(&self.session);
        if !session.is_current(generation) {
            debug!(generation, commands = batch.len(), "dropping batch of a stale connection");
            return;
        }
        let mut ledger = lock(&self.ledger);
        for item in batch {
            let (command, system) = item.into_parts();
            ledger.correlator.register(InFlight::new(command, system));
        }
    }

    /// Queue the commands a macro step produced. Returns `true` when the
    /// macro finished.
    fn dispatch_progress(dispatcher: &Dispatcher, progress: Progress) -> bool {
        for upload in progress.uploads {
            dispatcher.enqueue(upload, true);
        }
        let Some(follow_up) = progress.finished else {
            return false;
        };
        for command in follow_up {
            dispatcher.enqueue(command, false);
        }
        true
    }

    /// Wire up a freshly opened channel. Returns `false` if another
    /// connection won the race.
    fn start(self: &Arc<Self>, channel: BoxedChannel) -> bool {
        let (source, sink) = tokio::io::split(channel);
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let shutdown = CancellationToken::new();
        let (dispatcher, rx) = Dispatcher::channel();
        let scheduler = Scheduler::new(dispatcher.clone(), &shutdown);
        let runtime = Handle::current();

        let mut session = lock(&self.session);
        if session.link.is_some() {
            warn!(generation, "connection already active; dropping new transport");
            return false;
        }
        {
            let mut ledger = lock(&self.ledger);
            ledger.correlator.clear();
            ledger.macros.clear();
        }
        let replay = {
            let mut shadow = lock(&self.shadow);
            shadow.reset();
            shadow.reset_sequence()
        };

        let shared = Arc::clone(self);
        let token = shutdown.clone();
        let max_batch_bytes = self.config.max_batch_bytes;
        runtime.spawn(async move {
            let registry = Arc::clone(&shared);
            let result = writer::run(rx, sink, max_batch_bytes, token, move |batch| {
                registry.register(generation, batch);
            })
            .await;
            if let Err(e) = result {
                shared.connection_lost(generation, &e);
            }
        });
        runtime.spawn(reader::run(
            Arc::clone(self),
            source,
            generation,
            shutdown.clone(),
        ));

        for command in replay {
            dispatcher.enqueue(command, true);
        }
        let ping = self.config.ping_interval();
        scheduler.periodic(Command::Ping, true, ping, ping);
        if let Some(timeout) = self.config.response_timeout() {
            self.spawn_timeout_sweep(&runtime, timeout, shutdown.clone());
        }

        session.state = ConnectionState::Connected;
        session.first_echo_seen = false;
        session.link = Some(Link {
            generation,
            dispatcher,
            scheduler,
            shutdown,
            runtime,
        });
        drop(session);

        info!(address = %self.address, generation, "connected");
        self.listeners.event(&RobotEvent::Connected);
        true
    }

    fn spawn_timeout_sweep(
        self: &Arc<Self>,
        runtime: &Handle,
        timeout: Duration,
        token: CancellationToken,
    ) {
        let shared = Arc::clone(self);
        runtime.spawn(async move {
            let mut ticks = tokio::time::interval(timeout);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticks.tick() => shared.expire_responses(timeout),
                }
            }
        });
    }

    fn expire_responses(&self, timeout: Duration) {
        let expired = lock(&self.ledger)
            .correlator
            .expire(tokio::time::Instant::now(), timeout);
        for entry in expired {
            warn!(command = %entry.command(), ?timeout, "no response before timeout");
            self.listeners
                .event(&RobotEvent::ResponseTimeout(entry.into_command()));
        }
    }

    /// Start a graceful disconnect. Returns the token that fires once the
    /// connection is torn down, or `None` if there was nothing to close.
    fn begin_disconnect(self: &Arc<Self>) -> Option<CancellationToken> {
        let (generation, done, runtime) = {
            let mut session = lock(&self.session);
            if session.state == ConnectionState::Disconnected {
                return None;
            }
            session.state = ConnectionState::Disconnected;
            session.first_echo_seen = false;
            let link = session.link.as_ref()?;
            link.scheduler.cancel();
            link.dispatcher.close();
            link.dispatcher.force(Command::Roll {
                heading: 0.0,
                velocity: 0.0,
                stop: true,
            });
            link.dispatcher.force(Command::FrontLed(0.0));
            (link.generation, link.shutdown.clone(), link.runtime.clone())
        };
        info!(generation, "disconnecting");

        let shared = Arc::clone(self);
        let grace = self.config.disconnect_grace();
        let token = done.clone();
        runtime.spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(grace) => {
                    warn!(generation, ?grace, "shutdown not confirmed in time");
                    shared.finish_disconnect(generation);
                }
            }
        });
        Some(done)
    }

    /// Complete a graceful disconnect. Returns `false` if that connection
    /// was already gone.
    fn finish_disconnect(&self, generation: u64) -> bool {
        let link = {
            let mut session = lock(&self.session);
            if session.state != ConnectionState::Disconnected || !session.is_current(generation) {
                return false;
            }
            lock(&self.ledger).correlator.clear();
            session.link.take()
        };
        if let Some(link) = link {
            link.stop();
        }
        info!(generation, "disconnected");
        self.listeners.event(&RobotEvent::Disconnected);
        true
    }

    /// Tear down after a transport failure. Safe to call from both tasks.
    fn connection_lost(&self, generation: u64, cause: &TransportError) {
        let (link, was_connected) = {
            let mut session = lock(&self.session);
            if !session.is_current(generation) {
                debug!(generation, error = %cause, "stale connection task stopped");
                return;
            }
            let was_connected = session.state == ConnectionState::Connected;
            session.state = ConnectionState::Disconnected;
            lock(&self.ledger).correlator.clear();
            (session.link.take(), was_connected)
        };
        if let Some(link) = link {
            link.stop();
        }
        if was_connected {
            error!(generation, error = %cause, "connection closed unexpectedly");
            self.listeners.event(&RobotEvent::UnexpectedDisconnect);
        } else {
            info!(generation, error = %cause, "transport closed during disconnect");
            self.listeners.event(&RobotEvent::Disconnected);
        }
    }
}

/// Handle to one robot.
///
/// Dropping the handle stops any live connection without the shutdown
/// handshake.
pub struct Robot {
    shared: Arc<Shared>,
}

impl Robot {
    /// Create a handle for the robot at `address`.
    ///
    /// # Errors
    /// Returns [`RobotError::Address`] for a malformed or foreign address and
    /// [`RobotError::Config`] for out-of-range configuration.
    pub fn new(
        address: &str,
        connector: Arc<dyn Connector>,
        config: DriverConfig,
    ) -> Result<Self, RobotError> {
        let address = RobotAddress::parse(address)?;
        config.validate()?;
        let macros = MacroSession::new(MacroLimits::default(), MACRO_MARKER)?;
        Ok(Self {
            shared: Arc::new(Shared {
                address,
                connector,
                config,
                session: Mutex::new(Session::default()),
                ledger: Mutex::new(Ledger {
                    correlator: Box::new(FifoCorrelator::new()),
                    macros,
                }),
                shadow: Mutex::new(DeviceShadow::default()),
                name: Mutex::new(None),
                listeners: Listeners::default(),
                generations: AtomicU64::new(0),
            }),
        })
    }

    /// Open the transport and start the connection.
    ///
    /// Returns `Ok(true)` once connected (or if already connected) and
    /// `Ok(false)` if the transport could not be opened.
    ///
    /// # Errors
    /// Returns [`RobotError::ConnectFailed`] instead of `Ok(false)` when
    /// [`DriverConfig::raise_on_connect_failure`] is set.
    pub async fn connect(&self) -> Result<bool, RobotError> {
        if self.is_connected() {
            debug!(address = %self.shared.address, "already connected");
            return Ok(true);
        }
        info!(address = %self.shared.address, "connecting");
        match self.shared.connector.open(self.shared.address.as_str()).await {
            Ok(channel) => Ok(self.shared.start(channel)),
            Err(e) => {
                error!(error = %e, address = %self.shared.address, "failed to open transport");
                self.shared.listeners.event(&RobotEvent::ConnectFailed);
                if self.shared.config.raise_on_connect_failure {
                    Err(RobotError::ConnectFailed(e))
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Disconnect gracefully and wait for teardown.
    ///
    /// Emits [`RobotEvent::NoConnection`] and returns `false` when there is
    /// no live connection.
    pub async fn disconnect(&self) -> bool {
        let Some(done) = self.shared.begin_disconnect() else {
            debug!("disconnect requested without a connection");
            self.shared.listeners.event(&RobotEvent::NoConnection);
            return false;
        };
        done.cancelled().await;
        true
    }

    /// Whether a connection is live.
    #[must_use]
    pub fn is_connected(&self) -> bool { self.state() == ConnectionState::Connected }

    /// Return the connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { self.shared.state() }

    /// Register a listener.
    pub fn add_listener(&self, listener: Arc<dyn RobotListener>) { self.shared.listeners.add(listener); }

    /// Unregister a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn RobotListener>) -> bool {
        self.shared.listeners.remove(listener)
    }

    /// Send a command now. Returns `false` if it was dropped.
    pub fn send_command(&self, command: Command) -> bool { self.send(command, false) }

    /// Send a command after `delay`.
    pub fn send_command_after(&self, command: Command, delay: Duration) -> Option<ScheduledTask> {
        self.shared
            .scheduler()
            .map(|scheduler| scheduler.after(command, false, delay))
    }

    /// Send a command after `initial`, then every `period` until cancelled
    /// or disconnected.
    pub fn send_periodic_command(
        &self,
        command: Command,
        initial: Duration,
        period: Duration,
    ) -> Option<ScheduledTask> {
        self.shared
            .scheduler()
            .map(|scheduler| scheduler.periodic(command, false, initial, period))
    }

    /// Send a command once the running streamed macro finishes.
    pub fn send_command_after_macro(&self, command: Command) {
        lock(&self.shared.ledger).macros.send_after(command);
    }

    /// Forget commands queued with [`Robot::send_command_after_macro`].
    pub fn cancel_commands_after_macro(&self) { lock(&self.shared.ledger).macros.clear_after(); }

    /// Upload and run a macro.
    ///
    /// Normal macros are stored in the temporary slot and run at once.
    /// Streamed macros replace any streamed macro already running. Returns
    /// `false` when the macro was dropped because there is no connection or
    /// streaming is disabled.
    ///
    /// # Errors
    /// Returns [`RobotError::Macro`] if the macro cannot be uploaded.
    pub fn play_macro(&self, mac: Macro) -> Result<bool, RobotError> {
        let Some(dispatcher) = self.shared.dispatcher() else {
            debug!("dropping macro: no connection");
            return Ok(false);
        };
        match mac.mode() {
            MacroMode::Normal => {
                let data = mac.to_bytes();
                // Flags byte shares the data block.
                if data.len() + 1 > MAX_COMMAND_DATA {
                    return Err(MacroError::MacroTooLong {
                        len: data.len(),
                        max: MAX_COMMAND_DATA - 1,
                    }
                    .into());
                }
                dispatcher.enqueue(
                    Command::SaveTemporaryMacro {
                        flags: MACRO_FLAG_MOTOR_CONTROL,
                        data,
                    },
                    true,
                );
                Ok(dispatcher.enqueue(Command::RunMacro(TEMPORARY_MACRO_ID), true))
            }
            MacroMode::Streaming => {
                if !self.shared.config.macro_streaming {
                    debug!("dropping macro: streaming disabled");
                    return Ok(false);
                }
                let finished = {
                    let mut ledger = lock(&self.shared.ledger);
                    let progress = ledger.macros.submit(mac.into_commands())?;
                    Shared::dispatch_progress(&dispatcher, progress)
                };
                if finished {
                    self.shared.listeners.event(&RobotEvent::MacroDone);
                }
                Ok(true)
            }
        }
    }

    /// Abort the running macro and discard the streaming backlog.
    pub fn stop_macro(&self) {
        let dispatcher = self.shared.dispatcher();
        let mut ledger = lock(&self.shared.ledger);
        let commands = ledger.macros.abort();
        if let Some(dispatcher) = dispatcher {
            for command in commands {
                dispatcher.enqueue(command, true);
            }
        }
    }

    /// Roll towards `heading` degrees at `velocity` (`0.0..=1.0`).
    pub fn roll(&self, heading: f32, velocity: f32) -> bool {
        self.send_command(Command::Roll {
            heading,
            velocity,
            stop: false,
        })
    }

    /// Stop the motors, keeping the current heading.
    pub fn stop_motors(&self) -> bool {
        let heading = self.shadow().movement().heading;
        self.send_command(Command::Roll {
            heading,
            velocity: 0.0,
            stop: true,
        })
    }

    /// Turn in place to `heading` degrees.
    pub fn rotate(&self, heading: f32) -> bool { self.roll(heading, 0.0) }

    /// Turn to `heading` and make it the new zero heading.
    pub fn calibrate(&self, heading: f32) -> bool {
        self.roll(heading, 0.0) && self.send_command(Command::Calibrate { heading })
    }

    /// Make the current direction the zero heading.
    pub fn reset_heading(&self) -> bool {
        let movement = *self.shadow().movement();
        self.send_command(Command::Roll {
            heading: 0.0,
            velocity: movement.velocity,
            stop: movement.stopped,
        }) && self.send_command(Command::Calibrate { heading: 0.0 })
    }

    /// Set the main LED colour.
    pub fn set_rgb_led(&self, red: u8, green: u8, blue: u8) -> bool {
        self.send_command(Command::RgbLed { red, green, blue })
    }

    /// Set the front LED brightness (`0.0..=1.0`).
    pub fn set_front_led(&self, brightness: f32) -> bool {
        self.send_command(Command::FrontLed(brightness))
    }

    /// Set the rotation rate (`0.0..=1.0`).
    pub fn set_rotation_rate(&self, rate: f32) -> bool {
        self.send_command(Command::RotationRate(rate))
    }

    /// Toggle stabilisation.
    pub fn stabilization(&self, on: bool) -> bool { self.send_command(Command::Stabilization(on)) }

    /// Change the advertised name.
    pub fn set_name(&self, name: &str) -> bool { self.send_command(Command::SetName(name.to_owned())) }

    /// Ask the robot for its Bluetooth name; the answer updates
    /// [`Robot::name`].
    pub fn refresh_name(&self) -> bool { self.send(Command::GetBluetoothInfo, true) }

    /// Put the robot to sleep for `seconds` (0 = until woken). The robot
    /// drops the connection once it accepts.
    pub fn sleep(&self, seconds: u16) -> bool {
        self.send_command(Command::Sleep {
            wakeup: seconds,
            macro_id: 0,
        })
    }

    /// Reboot into the bootloader. The robot drops the connection once it
    /// accepts.
    pub fn jump_to_bootloader(&self) -> bool { self.send_command(Command::JumpToBootloader) }

    /// Roll at full speed for `duration`, then restore the previous motion.
    pub fn boost(&self, duration: Duration) -> bool {
        let Some(scheduler) = self.shared.scheduler() else {
            return false;
        };
        let movement = *self.shadow().movement();
        let sent = scheduler.now(
            Command::Roll {
                heading: movement.heading,
                velocity: 1.0,
                stop: false,
            },
            true,
        );
        if sent {
            scheduler.after(
                Command::Roll {
                    heading: movement.heading,
                    velocity: movement.velocity,
                    stop: movement.stopped,
                },
                true,
                duration,
            );
        }
        sent
    }

    /// Return a copy of the device shadow.
    #[must_use]
    pub fn shadow(&self) -> DeviceShadow { *lock(&self.shared.shadow) }

    /// Return the robot name, once reported.
    #[must_use]
    pub fn name(&self) -> Option<String> { lock(&self.shared.name).clone() }

    /// Return the robot address.
    #[must_use]
    pub fn address(&self) -> &RobotAddress { &self.shared.address }

    /// Return the configuration.
    #[must_use]
    pub fn config(&self) -> &DriverConfig { &self.shared.config }

    fn send(&self, command: Command, system: bool) -> bool {
        self.shared
            .scheduler()
            .is_some_and(|scheduler| scheduler.now(command, system))
    }
}

impl fmt::Debug for Robot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Robot")
            .field("address", &self.shared.address)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for Robot {
    fn drop(&mut self) {
        let link = lock(&self.shared.session).link.take();
        if let Some(link) = link {
            debug!(generation = link.generation, "robot dropped; stopping connection");
            link.stop();
        }
    }
}
