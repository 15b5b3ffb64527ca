//! In-memory robot for exercising a [`crate::Robot`] end to end.
//!
//! [`FakeConnector`] hands the driver one half of a `tokio::io::duplex`
//! pipe per connect and passes the other half, wrapped in a [`FakeDevice`],
//! to the test. The device speaks the wire protocol: it parses outbound
//! commands and writes responses and information packets.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    sync::mpsc,
};
use tracing::trace;

use crate::{
    command::{Command, CommandKind},
    packet::{
        COMMAND_HEADER_LEN,
        Information,
        InformationKind,
        RawPacket,
        Response,
        ResponseCode,
        START_OF_PACKET,
        checksum,
        header::{TYPE_INFORMATION, TYPE_RESPONSE},
    },
    robot::{RobotEvent, RobotListener},
    transport::{BoxedChannel, Connector, TransportError},
};

const PIPE_CAPACITY: usize = 64 * 1024;

/// A command as the robot received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedCommand {
    /// Device id byte.
    pub device_id: u8,
    /// Command id byte.
    pub command_id: u8,
    /// Sequence byte.
    pub sequence: u8,
    /// Data block, checksum excluded.
    pub data: Vec<u8>,
}

impl ReceivedCommand {
    /// Whether this is a command of `kind`.
    #[must_use]
    pub const fn is(&self, kind: CommandKind) -> bool {
        self.device_id == kind.device_id() && self.command_id == kind.command_id()
    }
}

/// Robot end of a fake connection.
#[derive(Debug)]
pub struct FakeDevice {
    stream: DuplexStream,
    buf: BytesMut,
}

impl FakeDevice {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    /// Read the next command.
    ///
    /// # Errors
    /// Returns an error if the driver closed the pipe or sent a malformed
    /// frame.
    pub async fn read_command(&mut self) -> io::Result<ReceivedCommand> {
        loop {
            if let Some(command) = self.parse_command()? {
                return Ok(command);
            }
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
        }
    }

    /// Read the next command and answer it with an OK response.
    ///
    /// # Errors
    /// Returns an error if reading or writing fails.
    pub async fn ack_next(&mut self) -> io::Result<ReceivedCommand> {
        let command = self.read_command().await?;
        self.respond(ResponseCode::Ok, &[]).await?;
        Ok(command)
    }

    /// Read `count` commands, answering each with an OK response.
    ///
    /// # Errors
    /// Returns an error if reading or writing fails.
    pub async fn ack_many(&mut self, count: usize) -> io::Result<Vec<ReceivedCommand>> {
        let mut commands = Vec::with_capacity(count);
        for _ in 0..count {
            commands.push(self.ack_next().await?);
        }
        Ok(commands)
    }

    /// Send a response packet.
    ///
    /// # Errors
    /// Returns an error if the payload is too long or the write fails.
    pub async fn respond(&mut self, code: ResponseCode, payload: &[u8]) -> io::Result<()> {
        self.send_packet(TYPE_RESPONSE, code.as_u8(), payload).await
    }

    /// Send an information packet.
    ///
    /// # Errors
    /// Returns an error if the payload is too long or the write fails.
    pub async fn inform(&mut self, kind: InformationKind, payload: &[u8]) -> io::Result<()> {
        self.send_packet(TYPE_INFORMATION, kind.as_u8(), payload).await
    }

    /// Write bytes verbatim.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    async fn send_packet(&mut self, ty: u8, code: u8, payload: &[u8]) -> io::Result<()> {
        let packet = RawPacket::build(ty, code, 0, payload).map_err(io::Error::other)?;
        self.write_raw(&packet.to_bytes()).await
    }

    fn parse_command(&mut self) -> io::Result<Option<ReceivedCommand>> {
        let Some(&dlen) = self.buf.get(COMMAND_HEADER_LEN - 1) else {
            return Ok(None);
        };
        if self.buf.len() < COMMAND_HEADER_LEN + usize::from(dlen) {
            return Ok(None);
        }
        let mut frame = self.buf.split_to(COMMAND_HEADER_LEN + usize::from(dlen));
        if frame.get_u8() != START_OF_PACKET || frame.get_u8() != START_OF_PACKET {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "missing start of packet"));
        }
        let device_id = frame.get_u8();
        let command_id = frame.get_u8();
        let sequence = frame.get_u8();
        frame.advance(1);
        let data = frame.split_to(usize::from(dlen).saturating_sub(1)).to_vec();
        if !frame.has_remaining() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "missing checksum"));
        }
        let header = [device_id, command_id, sequence, dlen];
        let expected = checksum([header.as_slice(), data.as_slice()]);
        if frame.get_u8() != expected {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad checksum"));
        }
        Ok(Some(ReceivedCommand {
            device_id,
            command_id,
            sequence,
            data,
        }))
    }
}

/// Connector that creates a [`FakeDevice`] per connect.
#[derive(Debug)]
pub struct FakeConnector {
    devices: mpsc::UnboundedSender<FakeDevice>,
    refuse: AtomicBool,
    opened: AtomicUsize,
}

impl FakeConnector {
    /// Create a connector and the stream of devices it opens.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeDevice>) {
        let (devices, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                devices,
                refuse: AtomicBool::new(false),
                opened: AtomicUsize::new(0),
            }),
            rx,
        )
    }

    /// Make later connects fail, or succeed again.
    pub fn refuse(&self, refuse: bool) { self.refuse.store(refuse, Ordering::SeqCst); }

    /// Number of channels opened so far.
    #[must_use]
    pub fn opened(&self) -> usize { self.opened.load(Ordering::SeqCst) }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, address: &str) -> Result<BoxedChannel, TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Open {
                address: address.to_owned(),
                source: io::ErrorKind::ConnectionRefused.into(),
            });
        }
        let (driver, device) = tokio::io::duplex(PIPE_CAPACITY);
        self.devices
            .send(FakeDevice::new(device))
            .map_err(|_| TransportError::Open {
                address: address.to_owned(),
                source: io::ErrorKind::NotConnected.into(),
            })?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(driver))
    }
}

/// Something a [`ChannelListener`] observed.
#[derive(Debug, Clone)]
pub enum Observed {
    /// A response to a user command.
    Response(Response, Command),
    /// An information packet.
    Information(Information),
    /// A lifecycle or protocol event.
    Event(RobotEvent),
}

/// Listener that forwards everything it sees into a channel.
#[derive(Debug)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<Observed>,
}

impl ChannelListener {
    /// Create a listener and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Observed>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn forward(&self, observed: Observed) {
        if self.tx.send(observed).is_err() {
            trace!("listener channel closed");
        }
    }
}

impl RobotListener for ChannelListener {
    fn on_response(&self, response: &Response, command: &Command) {
        self.forward(Observed::Response(response.clone(), command.clone()));
    }

    fn on_information(&self, information: &Information) {
        self.forward(Observed::Information(information.clone()));
    }

    fn on_event(&self, event: &RobotEvent) { self.forward(Observed::Event(event.clone())); }
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "test assertions")]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[tokio::test]
    async fn parses_commands_split_across_writes() {
        let (connector, mut devices) = FakeConnector::new();
        let mut channel = connector.open("000666000000").await.expect("open");
        let mut device = devices.recv().await.expect("device");

        let bytes = Command::RunMacro(0xFF).to_bytes();
        let (head, tail) = bytes.split_at(3);
        channel.write_all(head).await.expect("head");
        channel.write_all(tail).await.expect("tail");

        let received = device.read_command().await.expect("command");
        assert!(received.is(CommandKind::RunMacro));
        assert_eq!(received.data, vec![0xFF]);
        assert_eq!(connector.opened(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn refused_connector_reports_open_error() {
        let (connector, _devices) = FakeConnector::new();
        connector.refuse(true);
        let result = connector.open("000666000000").await;
        assert!(matches!(result, Err(TransportError::Open { .. })));
        assert_eq!(connector.opened(), 0);
    }
}
