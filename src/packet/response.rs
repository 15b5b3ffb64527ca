//! Typed views over framed inbound packets.
//!
//! A response is not self-describing: its payload shape depends on the
//! command it answers, so [`Response::decode`] takes the originating
//! [`CommandKind`]. Information packets carry their own id and decode on
//! their own.

use std::fmt;

use bytes::Bytes;

use super::{codec::RawPacket, errors::PacketError, header::PacketHeader};
use crate::command::CommandKind;

/// Length of the NUL-padded name field in a Bluetooth info reply.
const BLUETOOTH_NAME_LEN: usize = 16;
/// Length of the ASCII address field following the name.
const BLUETOOTH_ADDRESS_LEN: usize = 12;

/// Status code carried by a response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    /// Command succeeded.
    Ok,
    /// General, non-specific error.
    GeneralError,
    /// Received checksum failure.
    BadChecksum,
    /// Received command fragment.
    Fragmented,
    /// Unknown command id.
    UnknownCommand,
    /// Command currently unsupported.
    Unsupported,
    /// Bad message format.
    BadMessage,
    /// Parameter value invalid.
    BadParameter,
    /// Failed to execute command.
    ExecutionFailed,
    /// Unknown device id.
    UnknownDevice,
    /// Voltage too low for reflash operation.
    VoltageTooLow,
    /// Illegal page number provided.
    IllegalPage,
    /// Page did not reprogram correctly.
    FlashFailed,
    /// Main application corrupt.
    MainAppCorrupt,
    /// Message timed out on the device.
    Timeout,
    /// Code outside the documented table.
    Unknown(u8),
}

impl ResponseCode {
    /// Map a raw status byte.
    #[must_use]
    pub const fn from_u8(code: u8) -> Self {
        match code {
            0x00 => Self::Ok,
            0x01 => Self::GeneralError,
            0x02 => Self::BadChecksum,
            0x03 => Self::Fragmented,
            0x04 => Self::UnknownCommand,
            0x05 => Self::Unsupported,
            0x06 => Self::BadMessage,
            0x07 => Self::BadParameter,
            0x08 => Self::ExecutionFailed,
            0x09 => Self::UnknownDevice,
            0x31 => Self::VoltageTooLow,
            0x32 => Self::IllegalPage,
            0x33 => Self::FlashFailed,
            0x34 => Self::MainAppCorrupt,
            0x35 => Self::Timeout,
            other => Self::Unknown(other),
        }
    }

    /// Return the raw status byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Ok => 0x00,
            Self::GeneralError => 0x01,
            Self::BadChecksum => 0x02,
            Self::Fragmented => 0x03,
            Self::UnknownCommand => 0x04,
            Self::Unsupported => 0x05,
            Self::BadMessage => 0x06,
            Self::BadParameter => 0x07,
            Self::ExecutionFailed => 0x08,
            Self::UnknownDevice => 0x09,
            Self::VoltageTooLow => 0x31,
            Self::IllegalPage => 0x32,
            Self::FlashFailed => 0x33,
            Self::MainAppCorrupt => 0x34,
            Self::Timeout => 0x35,
            Self::Unknown(other) => other,
        }
    }

    /// Whether the device accepted the command.
    #[must_use]
    pub const fn is_ok(self) -> bool { matches!(self, Self::Ok) }
}

/// Kind-specific response content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// The reply carries no data.
    Empty,
    /// Data the driver does not interpret.
    Raw(Bytes),
    /// Reply to a Bluetooth info request.
    BluetoothInfo {
        /// Advertised robot name.
        name: String,
        /// Bluetooth address as reported by the robot.
        address: String,
    },
    /// The packet failed validation; its payload must not be used.
    Corrupt(PacketError),
}

/// A decoded response matched to the command it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    header: PacketHeader,
    code: ResponseCode,
    kind: CommandKind,
    body: ResponseBody,
}

impl Response {
    /// Decode a response for a command of the given kind.
    ///
    /// Corrupt packets still produce a [`Response`] so the caller can keep
    /// its correlation state in step; the body is [`ResponseBody::Corrupt`].
    #[must_use]
    pub fn decode(kind: CommandKind, packet: &RawPacket) -> Self {
        let header = *packet.header();
        let body = packet
            .verify()
            .and_then(|()| decode_body(kind, packet.payload()))
            .unwrap_or_else(ResponseBody::Corrupt);
        Self {
            header,
            code: ResponseCode::from_u8(header.code),
            kind,
            body,
        }
    }

    /// Return the packet header.
    #[must_use]
    pub const fn header(&self) -> &PacketHeader { &self.header }

    /// Return the status code.
    #[must_use]
    pub const fn code(&self) -> ResponseCode { self.code }

    /// Return the kind of command this response answers.
    #[must_use]
    pub const fn kind(&self) -> CommandKind { self.kind }

    /// Return the decoded body.
    #[must_use]
    pub const fn body(&self) -> &ResponseBody { &self.body }

    /// Whether the packet failed validation.
    #[must_use]
    pub const fn is_corrupt(&self) -> bool { matches!(self.body, ResponseBody::Corrupt(_)) }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} response ({:?})", self.kind, self.code)
    }
}

fn decode_body(kind: CommandKind, payload: &Bytes) -> Result<ResponseBody, PacketError> {
    match kind {
        CommandKind::GetBluetoothInfo => decode_bluetooth_info(payload),
        _ if payload.is_empty() => Ok(ResponseBody::Empty),
        _ => Ok(ResponseBody::Raw(payload.clone())),
    }
}

fn decode_bluetooth_info(payload: &[u8]) -> Result<ResponseBody, PacketError> {
    let malformed = || PacketError::MalformedPayload("bluetooth info");
    let name = payload.get(..BLUETOOTH_NAME_LEN).ok_or_else(malformed)?;
    let address = payload
        .get(BLUETOOTH_NAME_LEN..BLUETOOTH_NAME_LEN + BLUETOOTH_ADDRESS_LEN)
        .ok_or_else(malformed)?;
    let name = std::str::from_utf8(name).map_err(|_| malformed())?;
    let address = std::str::from_utf8(address).map_err(|_| malformed())?;
    Ok(ResponseBody::BluetoothInfo {
        name: name.trim_end_matches('\0').to_owned(),
        address: address.trim_end_matches('\0').to_owned(),
    })
}

/// Identifier of an asynchronous information packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InformationKind {
    /// Battery state change.
    PowerNotification,
    /// Level-one diagnostic text.
    Diagnostics,
    /// Streaming sensor data.
    SensorStreaming,
    /// Configuration block contents.
    ConfigBlock,
    /// The robot is about to sleep.
    PreSleepWarning,
    /// A macro synchronisation marker was reached.
    MacroMarker,
    /// Collision detected.
    Collision,
    /// Any id the driver does not know.
    Other(u8),
}

impl InformationKind {
    /// Map a raw information id.
    #[must_use]
    pub const fn from_u8(id: u8) -> Self {
        match id {
            0x01 => Self::PowerNotification,
            0x02 => Self::Diagnostics,
            0x03 => Self::SensorStreaming,
            0x04 => Self::ConfigBlock,
            0x05 => Self::PreSleepWarning,
            0x06 => Self::MacroMarker,
            0x07 => Self::Collision,
            other => Self::Other(other),
        }
    }

    /// Return the raw information id.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::PowerNotification => 0x01,
            Self::Diagnostics => 0x02,
            Self::SensorStreaming => 0x03,
            Self::ConfigBlock => 0x04,
            Self::PreSleepWarning => 0x05,
            Self::MacroMarker => 0x06,
            Self::Collision => 0x07,
            Self::Other(other) => other,
        }
    }
}

/// A decoded information packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Information {
    header: PacketHeader,
    kind: InformationKind,
    payload: Bytes,
}

impl Information {
    /// Decode an information packet.
    ///
    /// # Errors
    /// Returns [`PacketError::ChecksumMismatch`] if the packet is damaged.
    pub fn decode(packet: &RawPacket) -> Result<Self, PacketError> {
        packet.verify()?;
        let header = *packet.header();
        Ok(Self {
            header,
            kind: InformationKind::from_u8(header.code),
            payload: packet.payload().clone(),
        })
    }

    /// Return the packet header.
    #[must_use]
    pub const fn header(&self) -> &PacketHeader { &self.header }

    /// Return the information kind.
    #[must_use]
    pub const fn kind(&self) -> InformationKind { self.kind }

    /// Return the payload bytes.
    #[must_use]
    pub const fn payload(&self) -> &Bytes { &self.payload }

    /// Whether this packet acknowledges a macro synchronisation marker.
    #[must_use]
    pub const fn is_macro_marker(&self) -> bool { matches!(self.kind, InformationKind::MacroMarker) }
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "test assertions")]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::packet::header::{TYPE_INFORMATION, TYPE_RESPONSE};

    fn response_packet(code: u8, payload: &[u8]) -> RawPacket {
        RawPacket::build(TYPE_RESPONSE, code, 0, payload).expect("packet")
    }

    #[rstest]
    #[case(CommandKind::Ping, 0x00, ResponseCode::Ok)]
    #[case(CommandKind::Roll, 0x07, ResponseCode::BadParameter)]
    #[case(CommandKind::SaveMacro, 0x35, ResponseCode::Timeout)]
    #[case(CommandKind::AbortMacro, 0x42, ResponseCode::Unknown(0x42))]
    fn recovers_status_codes(
        #[case] kind: CommandKind,
        #[case] raw: u8,
        #[case] expected: ResponseCode,
    ) {
        let response = Response::decode(kind, &response_packet(raw, &[]));
        assert_eq!(response.code(), expected);
        assert_eq!(response.code().as_u8(), raw);
        assert_eq!(response.kind(), kind);
        assert_eq!(response.body(), &ResponseBody::Empty);
    }

    #[rstest]
    fn decodes_bluetooth_info() {
        let mut payload = b"Sphero-RGB".to_vec();
        payload.resize(BLUETOOTH_NAME_LEN, 0);
        payload.extend_from_slice(b"000666112233");
        payload.extend_from_slice(&[0x00, 0x42]);

        let response = Response::decode(
            CommandKind::GetBluetoothInfo,
            &response_packet(0x00, &payload),
        );

        assert_eq!(
            response.body(),
            &ResponseBody::BluetoothInfo {
                name: "Sphero-RGB".to_owned(),
                address: "000666112233".to_owned(),
            }
        );
    }

    #[rstest]
    fn short_bluetooth_info_is_corrupt() {
        let response = Response::decode(
            CommandKind::GetBluetoothInfo,
            &response_packet(0x00, b"short"),
        );
        assert!(response.is_corrupt());
    }

    #[rstest]
    fn damaged_response_is_corrupt_but_keeps_status() {
        let mut bytes = response_packet(0x00, &[1, 2]).to_bytes();
        if let Some(byte) = bytes.get_mut(5) {
            *byte ^= 0x01;
        }
        let packet = RawPacket::from_frame(Bytes::from(bytes)).expect("frame");

        let response = Response::decode(CommandKind::Ping, &packet);

        assert!(response.is_corrupt());
        assert!(response.code().is_ok());
    }

    #[rstest]
    fn decodes_macro_marker_information() {
        let packet = RawPacket::build(TYPE_INFORMATION, 0x06, 0, &[0x01]).expect("packet");
        let info = Information::decode(&packet).expect("decode");
        assert!(info.is_macro_marker());
        assert_eq!(info.payload().as_ref(), &[0x01]);
    }

    #[rstest]
    fn unknown_information_ids_are_preserved() {
        let packet = RawPacket::build(TYPE_INFORMATION, 0x0C, 0, &[]).expect("packet");
        let info = Information::decode(&packet).expect("decode");
        assert_eq!(info.kind(), InformationKind::Other(0x0C));
        assert!(!info.is_macro_marker());
    }
}
