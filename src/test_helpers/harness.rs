//! A robot wired to a [`FakeDevice`] and a [`ChannelListener`].

use std::{io, sync::Arc};

use tokio::sync::mpsc;

use super::device::{ChannelListener, FakeConnector, FakeDevice, Observed};
use crate::{
    command::Command,
    config::DriverConfig,
    robot::{Robot, RobotEvent},
};

/// Address accepted by [`Robot::new`].
pub const TEST_ADDRESS: &str = "00:06:66:4A:1B:2C";

/// Commands the robot sends right after connecting.
pub const RESET_SEQUENCE_LEN: usize = 5;

/// Connected robot plus both ends of its observation.
#[derive(Debug)]
pub struct Harness {
    /// The robot under test.
    pub robot: Robot,
    /// Device end of the current connection.
    pub device: FakeDevice,
    /// Everything the robot reported to listeners.
    pub observed: mpsc::UnboundedReceiver<Observed>,
    /// Connector the robot dials.
    pub connector: Arc<FakeConnector>,
    /// Devices opened by later connects.
    pub devices: mpsc::UnboundedReceiver<FakeDevice>,
}

impl Harness {
    /// Build a robot with a listener attached, without connecting.
    ///
    /// # Errors
    /// Returns an error if the robot rejects `config`.
    pub fn robot(
        config: DriverConfig,
    ) -> io::Result<(
        Robot,
        Arc<FakeConnector>,
        mpsc::UnboundedReceiver<FakeDevice>,
        mpsc::UnboundedReceiver<Observed>,
    )> {
        let (connector, devices) = FakeConnector::new();
        let robot = Robot::new(TEST_ADDRESS, connector.clone(), config).map_err(io::Error::other)?;
        let (listener, observed) = ChannelListener::new();
        robot.add_listener(listener);
        Ok((robot, connector, devices, observed))
    }

    /// Connect and acknowledge the reset sequence.
    ///
    /// The `Connected` event is consumed.
    ///
    /// # Errors
    /// Returns an error if connecting fails or the device pipe breaks.
    pub async fn connect(config: DriverConfig) -> io::Result<Self> {
        let (robot, connector, mut devices, observed) = Self::robot(config)?;
        if !robot.connect().await.map_err(io::Error::other)? {
            return Err(io::ErrorKind::NotConnected.into());
        }
        let mut device = devices
            .recv()
            .await
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        device.ack_many(RESET_SEQUENCE_LEN).await?;
        let mut harness = Self {
            robot,
            device,
            observed,
            connector,
            devices,
        };
        let seen = harness.sync().await?;
        if matches!(seen.as_slice(), [Observed::Event(RobotEvent::Connected)]) {
            Ok(harness)
        } else {
            Err(io::Error::other(format!("expected Connected, got {seen:?}")))
        }
    }

    /// Round-trip a user ping so every earlier response has been handled.
    ///
    /// Returns what was observed before the ping's response.
    ///
    /// # Errors
    /// Returns an error if the ping is dropped or the device pipe breaks.
    pub async fn sync(&mut self) -> io::Result<Vec<Observed>> {
        if !self.robot.send_command(Command::Ping) {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.device.ack_next().await?;
        let mut seen = Vec::new();
        while let Some(observed) = self.observed.recv().await {
            if matches!(observed, Observed::Response(_, Command::Ping)) {
                return Ok(seen);
            }
            seen.push(observed);
        }
        Err(io::ErrorKind::BrokenPipe.into())
    }

    /// Wait for the next event, skipping responses and information.
    pub async fn next_event(&mut self) -> Option<RobotEvent> { next_event(&mut self.observed).await }

    /// Drain whatever has been observed so far without waiting.
    pub fn drain_observed(&mut self) -> Vec<Observed> {
        let mut drained = Vec::new();
        while let Ok(observed) = self.observed.try_recv() {
            drained.push(observed);
        }
        drained
    }
}

/// Wait for the next event on `observed`, skipping other traffic.
pub async fn next_event(observed: &mut mpsc::UnboundedReceiver<Observed>) -> Option<RobotEvent> {
    while let Some(item) = observed.recv().await {
        if let Observed::Event(event) = item {
            return Some(event);
        }
    }
    None
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
