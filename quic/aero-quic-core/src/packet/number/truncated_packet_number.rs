// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    packet::number::{
        decode_packet_number, packet_number::PacketNumber, packet_number_len::PacketNumberLen,
        PacketNumberSpace,
    },
    varint::VarInt,
};
use aero_codec::{DecoderBuffer, DecoderResult, Encoder, EncoderValue};

/// A packet number reduced to the least significant bytes carried in a
/// packet header
///
/// The full value is recovered with [`TruncatedPacketNumber::expand`] once
/// the largest successfully processed packet number is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TruncatedPacketNumber {
    value: VarInt,
    len: PacketNumberLen,
}

impl TruncatedPacketNumber {
    #[inline]
    pub(crate) fn new(value: VarInt, len: PacketNumberLen) -> Self {
        debug_assert!(value.as_u64() < (1u64 << len.bitsize()));
        Self { value, len }
    }

    #[inline]
    pub fn space(self) -> PacketNumberSpace {
        self.len.space()
    }

    #[inline]
    pub fn len(self) -> PacketNumberLen {
        self.len
    }

    #[inline]
    pub fn bitsize(self) -> usize {
        self.len.bitsize()
    }

    #[inline]
    pub fn into_u64(self) -> u64 {
        self.value.as_u64()
    }

    /// Recovers the full packet number closest to `largest_pn + 1`
    #[inline]
    pub fn expand(self, largest_pn: PacketNumber) -> PacketNumber {
        decode_packet_number(largest_pn, self)
    }

    /// Decodes a truncated packet number of the given length
    #[inline]
    pub fn decode(buffer: DecoderBuffer, len: PacketNumberLen) -> DecoderResult<Self> {
        let (value, buffer) = match len.bytesize() {
            1 => {
                let (value, buffer) = buffer.decode::<u8>()?;
                (VarInt::from_u8(value), buffer)
            }
            2 => {
                let (value, buffer) = buffer.decode::<u16>()?;
                (VarInt::from_u16(value), buffer)
            }
            3 => {
                let (slice, buffer) = buffer.decode_slice(3)?;
                let value = ((slice[0] as u32) << 16) | ((slice[1] as u32) << 8) | slice[2] as u32;
                (VarInt::from_u32(value), buffer)
            }
            _ => {
                let (value, buffer) = buffer.decode::<u32>()?;
                (VarInt::from_u32(value), buffer)
            }
        };
        Ok((Self::new(value, len), buffer))
    }
}

impl EncoderValue for TruncatedPacketNumber {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let value = self.value.as_u64();
        match self.len.bytesize() {
            1 => encoder.encode(&(value as u8)),
            2 => encoder.encode(&(value as u16)),
            3 => encoder.write_sized(3, |buf| {
                buf[0] = (value >> 16) as u8;
                buf[1] = (value >> 8) as u8;
                buf[2] = value as u8;
            }),
            _ => encoder.encode(&(value as u32)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aero_codec::EncoderBuffer;

    #[test]
    fn encode_decode_round_trip_test() {
        let space = PacketNumberSpace::Handshake;
        for (bytesize, value) in [(1u8, 0xabu32), (2, 0xabcd), (3, 0xab_cdef), (4, 0xabcd_ef01)] {
            let len = PacketNumberLen::new(bytesize, space);
            let truncated = len.truncate_packet_number(VarInt::from_u32(value));

            let mut bytes = [0u8; 4];
            let mut encoder = EncoderBuffer::new(&mut bytes);
            encoder.encode(&truncated);
            assert_eq!(encoder.len(), bytesize as usize);

            let (decoded, _) =
                TruncatedPacketNumber::decode(DecoderBuffer::new(&bytes[..bytesize as usize]), len)
                    .unwrap();
            assert_eq!(decoded, truncated);
            assert_eq!(decoded.into_u64(), value as u64);
        }
    }
}
