//! Error types for device packet framing and payload decoding.

use thiserror::Error;

/// Errors that can occur when decoding packets received from the robot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer is too short to contain the expected data.
    #[error("buffer too short")]
    ShortBuffer,
    /// The start-of-packet marker is not `0xFF`.
    #[error("invalid start of packet {0:#04x}")]
    InvalidStart(u8),
    /// The type discriminator names neither a response nor an information packet.
    #[error("unrecognised packet type {0:#04x}")]
    UnknownType(u8),
    /// The declared length cannot hold the trailing checksum byte.
    #[error("declared length {0} is shorter than the checksum")]
    EmptyLength(u8),
    /// The checksum does not match the packet contents.
    #[error("checksum mismatch: expected {expected:#04x}, found {found:#04x}")]
    ChecksumMismatch {
        /// Checksum computed over the received bytes.
        expected: u8,
        /// Checksum byte carried by the packet.
        found: u8,
    },
    /// The payload does not have the shape the originating command expects.
    #[error("malformed payload for {0}")]
    MalformedPayload(&'static str),
}
