//! Fixed five-byte header carried by every packet the robot sends.
//!
//! The header format is shared between synchronous responses and
//! asynchronous information packets; the type byte tells them apart.

use super::{HEADER_LEN, LENGTH_INDEX, START_OF_PACKET, errors::PacketError};

/// Type discriminator for a response to a previously sent command.
pub const TYPE_RESPONSE: u8 = 0xFF;
/// Type discriminator for an unsolicited information packet.
pub const TYPE_INFORMATION: u8 = 0xFE;

/// Packet classes the robot can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Answer to a specific command, matched in send order.
    Response,
    /// Asynchronous notice such as a macro marker echo.
    Information,
}

/// Parsed packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Start-of-packet marker (always `0xFF` on a healthy stream).
    pub start: u8,
    /// Packet type discriminator.
    pub ty: u8,
    /// Status code for responses, information id for information packets.
    pub code: u8,
    /// Sequence byte echoed by the device.
    pub seq: u8,
    /// Number of trailing bytes, payload plus checksum.
    pub length: u8,
}

impl PacketHeader {
    /// Parse a header from a five-byte buffer.
    #[must_use = "use the returned header"]
    pub const fn from_bytes(buf: &[u8; HEADER_LEN]) -> Self {
        Self {
            start: buf[0],
            ty: buf[1],
            code: buf[2],
            seq: buf[3],
            length: buf[LENGTH_INDEX],
        }
    }

    /// Parse a header from the start of a byte window.
    ///
    /// # Errors
    /// Returns [`PacketError::ShortBuffer`] if fewer than [`HEADER_LEN`] bytes
    /// are available.
    pub fn new(buf: &[u8]) -> Result<Self, PacketError> {
        let hdr: &[u8; HEADER_LEN] = buf
            .get(..HEADER_LEN)
            .and_then(|window| window.try_into().ok())
            .ok_or(PacketError::ShortBuffer)?;
        Ok(Self::from_bytes(hdr))
    }

    /// Write the header to a five-byte buffer.
    pub const fn write_bytes(&self, buf: &mut [u8; HEADER_LEN]) {
        buf[0] = self.start;
        buf[1] = self.ty;
        buf[2] = self.code;
        buf[3] = self.seq;
        buf[LENGTH_INDEX] = self.length;
    }

    /// Classify the packet.
    ///
    /// # Errors
    /// Returns [`PacketError::InvalidStart`] when the start marker is wrong and
    /// [`PacketError::UnknownType`] for unrecognised discriminators.
    pub const fn packet_type(&self) -> Result<PacketType, PacketError> {
        if self.start != START_OF_PACKET {
            return Err(PacketError::InvalidStart(self.start));
        }
        match self.ty {
            TYPE_RESPONSE => Ok(PacketType::Response),
            TYPE_INFORMATION => Ok(PacketType::Information),
            other => Err(PacketError::UnknownType(other)),
        }
    }

    /// Total packet size on the wire, header included.
    #[must_use]
    pub const fn packet_len(&self) -> usize { HEADER_LEN + self.length as usize }

    /// Size of the payload proper, excluding the checksum byte.
    #[must_use]
    pub const fn payload_len(&self) -> usize { (self.length as usize).saturating_sub(1) }
}

/// Compute the protocol checksum: the inverted low byte of the byte sum.
#[must_use]
pub fn checksum<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> u8 {
    let sum = parts
        .into_iter()
        .flatten()
        .fold(0u8, |acc, byte| acc.wrapping_add(*byte));
    !sum
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case([0xFF, 0xFF, 0x00, 0x00, 0x01], PacketType::Response)]
    #[case([0xFF, 0xFE, 0x06, 0x00, 0x02], PacketType::Information)]
    fn classifies_packets(#[case] bytes: [u8; HEADER_LEN], #[case] expected: PacketType) {
        let header = PacketHeader::from_bytes(&bytes);
        assert_eq!(header.packet_type(), Ok(expected));
    }

    #[rstest]
    #[case([0xFF, 0x10, 0x00, 0x00, 0x01], PacketError::UnknownType(0x10))]
    #[case([0x7F, 0xFF, 0x00, 0x00, 0x01], PacketError::InvalidStart(0x7F))]
    fn rejects_unknown_discriminators(
        #[case] bytes: [u8; HEADER_LEN],
        #[case] expected: PacketError,
    ) {
        let header = PacketHeader::from_bytes(&bytes);
        assert_eq!(header.packet_type(), Err(expected));
    }

    #[rstest]
    fn lengths_include_checksum() {
        let header = PacketHeader::from_bytes(&[0xFF, 0xFF, 0x00, 0x00, 0x04]);
        assert_eq!(header.packet_len(), 9);
        assert_eq!(header.payload_len(), 3);
    }

    #[rstest]
    fn short_window_is_rejected() {
        assert_eq!(PacketHeader::new(&[0xFF, 0xFF]), Err(PacketError::ShortBuffer));
    }

    #[rstest]
    fn write_bytes_mirrors_from_bytes() {
        let bytes = [0xFF, 0xFE, 0x06, 0x03, 0x02];
        let mut out = [0u8; HEADER_LEN];
        PacketHeader::from_bytes(&bytes).write_bytes(&mut out);
        assert_eq!(out, bytes);
    }

    #[rstest]
    fn checksum_inverts_byte_sum() {
        // 0x00 + 0x00 + 0x01 = 0x01 -> !0x01 = 0xFE
        assert_eq!(checksum([[0x00u8, 0x00, 0x01].as_slice()]), 0xFE);
        assert_eq!(checksum([[0xFFu8].as_slice(), [0x02u8].as_slice()]), !0x01);
    }
}
