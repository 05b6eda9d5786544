// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{connection::ConnectionId, packet::number::PacketNumberLen, varint::VarInt};
use aero_codec::{Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
//# Long Header Packet {
//#   Header Form (1) = 1,
//#   Fixed Bit (1) = 1,
//#   Long Packet Type (2),
//#   Type-Specific Bits (4),
//#   Version (32),
//#   Destination Connection ID Length (8),
//#   Destination Connection ID (0..160),
//#   Source Connection ID Length (8),
//#   Source Connection ID (0..160),
//#   Type-Specific Payload (..),
//# }

pub const FORM_BIT: u8 = 0b1000_0000;
pub const FIXED_BIT: u8 = 0b0100_0000;

/// The version this endpoint speaks
pub const VERSION: u32 = 0x0000_0001;

/// Long header packet kinds handled by the send path
///
/// Retry and 0-RTT are out of scope for this endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Initial,
    Handshake,
}

impl Kind {
    const INITIAL_BITS: u8 = 0b00 << 4;
    const HANDSHAKE_BITS: u8 = 0b10 << 4;

    #[inline]
    pub fn from_first_byte(byte: u8) -> Option<Self> {
        match byte & 0b0011_0000 {
            Self::INITIAL_BITS => Some(Self::Initial),
            Self::HANDSHAKE_BITS => Some(Self::Handshake),
            _ => None,
        }
    }

    #[inline]
    fn type_bits(self) -> u8 {
        match self {
            Self::Initial => Self::INITIAL_BITS,
            Self::Handshake => Self::HANDSHAKE_BITS,
        }
    }
}

/// Returns `true` if the first byte announces a long header packet
#[inline]
pub fn is_long_header(first_byte: u8) -> bool {
    first_byte & FORM_BIT == FORM_BIT
}

/// Encodes a long packet header up to, but not including, the Length field
///
/// The packet number length is announced in the first byte; the packet
/// number itself follows the Length field and is written by the caller.
#[inline]
pub fn encode_header<E: Encoder>(
    encoder: &mut E,
    kind: Kind,
    dcid: &ConnectionId,
    scid: &ConnectionId,
    packet_number_len: PacketNumberLen,
) {
    let first = FORM_BIT | FIXED_BIT | kind.type_bits() | packet_number_len.into_packet_tag_mask();
    encoder.encode(&first);
    encoder.encode(&VERSION);
    encoder.encode(&(dcid.len() as u8));
    encoder.write_slice(dcid.as_bytes());
    encoder.encode(&(scid.len() as u8));
    encoder.write_slice(scid.as_bytes());

    if let Kind::Initial = kind {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.2
        //# Token Length:  A variable-length integer specifying the length of
        //# the Token field, in bytes.
        // Retry and NEW_TOKEN tokens are not produced by this endpoint
        encoder.encode(&VarInt::ZERO);
    }
}

/// Returns the size of the header produced by [`encode_header`]
#[inline]
pub fn header_len(kind: Kind, dcid: &ConnectionId, scid: &ConnectionId) -> usize {
    let token_len = match kind {
        Kind::Initial => VarInt::ZERO.encoding_size(),
        Kind::Handshake => 0,
    };
    1 + 4 + 1 + dcid.len() + 1 + scid.len() + token_len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::number::PacketNumberSpace;
    use aero_codec::EncoderBuffer;

    #[test]
    fn header_len_matches_encoding_test() {
        let dcid = ConnectionId::try_from_slice(&[1, 2, 3, 4]).unwrap();
        let scid = ConnectionId::try_from_slice(&[5, 6]).unwrap();

        for kind in [Kind::Initial, Kind::Handshake] {
            let mut bytes = [0u8; 64];
            let mut encoder = EncoderBuffer::new(&mut bytes);
            let pn_len = PacketNumberLen::new(1, PacketNumberSpace::Initial);
            encode_header(&mut encoder, kind, &dcid, &scid, pn_len);
            assert_eq!(encoder.len(), header_len(kind, &dcid, &scid));

            let first = bytes[0];
            assert!(is_long_header(first));
            assert_eq!(Kind::from_first_byte(first), Some(kind));
        }
    }
}
