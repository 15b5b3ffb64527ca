//! Packet codec for the robot's serial protocol.
//!
//! Every inbound packet starts with a [`PacketHeader`] of [`HEADER_LEN`]
//! bytes whose last byte declares how many bytes follow (payload plus a
//! one-byte checksum). [`PacketDecoder`] frames a raw byte stream into
//! [`RawPacket`] values; [`Response`] and [`Information`] give them meaning.
//! Outbound commands are serialised by [`CommandEncoder`].

pub mod codec;
pub mod errors;
pub mod header;
pub mod response;

pub use codec::{CommandEncoder, PacketDecoder, RawPacket};
pub use errors::PacketError;
pub use header::{PacketHeader, PacketType, checksum};
pub use response::{Information, InformationKind, Response, ResponseBody, ResponseCode};

/// Length of an inbound packet header in bytes.
pub const HEADER_LEN: usize = 5;
/// Offset of the length byte within the inbound header.
pub const LENGTH_INDEX: usize = 4;
/// First byte of every packet on the wire.
pub const START_OF_PACKET: u8 = 0xFF;
/// Length of an outbound command header (`SOP1 SOP2 DID CID SEQ DLEN`).
pub const COMMAND_HEADER_LEN: usize = 6;
/// Largest data block a single command can carry (`DLEN` is one byte and
/// includes the checksum).
pub const MAX_COMMAND_DATA: usize = u8::MAX as usize - 1;
