//! Tokio codec adapters for the robot protocol.
//!
//! [`PacketDecoder`] implements Tokio's [`Decoder`] so the stream framer can
//! wrap the transport read half in [`tokio_util::codec::FramedRead`]. The
//! receive buffer is a single growable [`BytesMut`]; complete packets are
//! split off its front and any trailing partial packet stays buffered until
//! the next read supplies the rest.
//!
//! [`CommandEncoder`] implements [`Encoder`] for outbound [`Command`] values
//! and appends their wire form to a batch buffer.
//!
//! # Inbound frame format
//!
//! | Field    | Offset | Size | Description                                   |
//! |----------|--------|------|-----------------------------------------------|
//! | start    | 0      | 1    | Always `0xFF`                                 |
//! | type     | 1      | 1    | `0xFF` response, `0xFE` information           |
//! | code     | 2      | 1    | Status code or information id                 |
//! | seq      | 3      | 1    | Sequence byte                                 |
//! | length   | 4      | 1    | Payload length plus one checksum byte         |
//! | payload  | 5      | var  | `length - 1` bytes                            |
//! | checksum | end    | 1    | Inverted sum of bytes 2 up to the checksum    |

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::{
    COMMAND_HEADER_LEN,
    HEADER_LEN,
    LENGTH_INDEX,
    MAX_COMMAND_DATA,
    START_OF_PACKET,
    errors::PacketError,
    header::{PacketHeader, checksum},
};
use crate::command::{Command, CommandKind};

/// Sequence byte written into every command. Replies are matched by
/// position, so the device echo of this byte is never consulted.
const SEQUENCE: u8 = 0;

/// A framed but not yet interpreted inbound packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    header: PacketHeader,
    payload: Bytes,
    checksum: u8,
}

impl RawPacket {
    /// Split a complete frame into header, payload and checksum.
    ///
    /// # Errors
    /// Returns [`PacketError::ShortBuffer`] if `frame` is shorter than the
    /// header declares and [`PacketError::EmptyLength`] if the declared
    /// length leaves no room for the checksum.
    pub fn from_frame(mut frame: Bytes) -> Result<Self, PacketError> {
        let header = PacketHeader::new(&frame)?;
        if header.length == 0 {
            return Err(PacketError::EmptyLength(header.length));
        }
        if frame.len() < header.packet_len() {
            return Err(PacketError::ShortBuffer);
        }
        let mut body = frame.split_off(HEADER_LEN);
        let trailer = body.split_off(header.payload_len());
        let checksum = trailer.first().copied().ok_or(PacketError::ShortBuffer)?;
        Ok(Self {
            header,
            payload: body,
            checksum,
        })
    }

    /// Return the packet header.
    #[must_use]
    pub const fn header(&self) -> &PacketHeader { &self.header }

    /// Return the payload bytes, excluding the checksum.
    #[must_use]
    pub const fn payload(&self) -> &Bytes { &self.payload }

    /// Check the trailing checksum against the header and payload.
    ///
    /// # Errors
    /// Returns [`PacketError::ChecksumMismatch`] when the bytes were damaged
    /// in transit.
    pub fn verify(&self) -> Result<(), PacketError> {
        let covered = [self.header.code, self.header.seq, self.header.length];
        let expected = checksum([covered.as_slice(), self.payload.as_ref()]);
        if expected == self.checksum {
            Ok(())
        } else {
            Err(PacketError::ChecksumMismatch {
                expected,
                found: self.checksum,
            })
        }
    }

    /// Build a well-formed packet, computing the checksum.
    ///
    /// Used by device simulations and tests to produce inbound traffic.
    ///
    /// # Errors
    /// Returns [`PacketError::MalformedPayload`] if the payload does not fit
    /// the one-byte length field.
    pub fn build(ty: u8, code: u8, seq: u8, payload: &[u8]) -> Result<Self, PacketError> {
        let length = u8::try_from(payload.len() + 1)
            .map_err(|_| PacketError::MalformedPayload("oversized packet"))?;
        let header = PacketHeader {
            start: START_OF_PACKET,
            ty,
            code,
            seq,
            length,
        };
        let covered = [code, seq, length];
        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(payload),
            checksum: checksum([covered.as_slice(), payload]),
        })
    }

    /// Serialise the packet into its wire form.
    #[must_use = "use the serialised bytes"]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.header.packet_len());
        let mut hdr = [0u8; HEADER_LEN];
        self.header.write_bytes(&mut hdr);
        buf.extend_from_slice(&hdr);
        buf.extend_from_slice(&self.payload);
        buf.push(self.checksum);
        buf
    }
}

/// Stream framer for inbound robot packets.
///
/// The payload length is only known once the length byte has arrived; until
/// then the decoder treats the packet as header-only and waits for more data.
#[derive(Debug, Default)]
pub struct PacketDecoder;

impl PacketDecoder {
    /// Create a new packet decoder.
    #[must_use]
    pub const fn new() -> Self { Self }
}

impl Decoder for PacketDecoder {
    type Error = io::Error;
    type Item = RawPacket;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(&length) = src.get(LENGTH_INDEX) else {
                src.reserve(HEADER_LEN - src.len());
                return Ok(None);
            };

            if length == 0 {
                // No room for a checksum: drop the header and keep scanning.
                warn!(header = ?src.get(..HEADER_LEN), "skipping zero-length packet");
                src.advance(HEADER_LEN);
                continue;
            }

            let frame_len = HEADER_LEN + usize::from(length);
            if src.len() < frame_len {
                src.reserve(frame_len - src.len());
                return Ok(None);
            }

            let frame = src.split_to(frame_len).freeze();
            return RawPacket::from_frame(frame)
                .map(Some)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err));
        }
    }
}

/// Serialises outbound commands into a shared write buffer.
#[derive(Debug, Default)]
pub struct CommandEncoder;

impl CommandEncoder {
    /// Create a new command encoder.
    #[must_use]
    pub const fn new() -> Self { Self }
}

impl Encoder<&Command> for CommandEncoder {
    type Error = io::Error;

    fn encode(&mut self, item: &Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = item.data();
        if data.len() > MAX_COMMAND_DATA {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} carries {} data bytes", item.kind(), data.len()),
            ));
        }
        put_command(item.kind(), &data, dst);
        Ok(())
    }
}

/// Append one command packet to `dst`.
///
/// `data` must not exceed [`MAX_COMMAND_DATA`] bytes; longer blocks are cut
/// to fit the one-byte length field.
pub(crate) fn put_command(kind: CommandKind, data: &[u8], dst: &mut BytesMut) {
    let data = data.get(..MAX_COMMAND_DATA).unwrap_or(data);
    let length = u8::try_from(data.len() + 1).unwrap_or(u8::MAX);
    let covered = [kind.device_id(), kind.command_id(), SEQUENCE, length];

    dst.reserve(COMMAND_HEADER_LEN + data.len() + 1);
    dst.put_u8(START_OF_PACKET);
    dst.put_u8(START_OF_PACKET);
    dst.put_slice(&covered);
    dst.put_slice(data);
    dst.put_u8(checksum([covered.as_slice(), data]));
}
