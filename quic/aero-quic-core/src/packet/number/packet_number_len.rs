// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    packet::number::{
        truncated_packet_number::TruncatedPacketNumber, PacketNumberSpace, PACKET_NUMBER_LEN_MASK,
    },
    varint::VarInt,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.1
//# Packet numbers are integers in the range 0 to 2^62-1 (Section 12.3).
//# When present in long or short packet headers, they are encoded in 1
//# to 4 bytes.

/// The on-wire length of a truncated packet number, tied to its space
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketNumberLen {
    bytesize: u8,
    space: PacketNumberSpace,
}

impl PacketNumberLen {
    /// Header protection assumes the packet number occupies this many bytes
    pub const MAX_LEN: usize = 4;

    #[inline]
    pub(crate) fn new(bytesize: u8, space: PacketNumberSpace) -> Self {
        debug_assert!((1..=4).contains(&bytesize));
        Self { bytesize, space }
    }

    /// Derives the length from the low bits of an unprotected packet tag
    #[inline]
    pub fn from_packet_tag(tag: u8, space: PacketNumberSpace) -> Self {
        Self::new((tag & PACKET_NUMBER_LEN_MASK) + 1, space)
    }

    /// Returns the smallest length which can represent the given truncation
    /// window, or `None` if no length can
    #[inline]
    pub fn from_varint(window: VarInt, space: PacketNumberSpace) -> Option<Self> {
        let bytesize = match window.as_u64() {
            0..=0xff => 1,
            0x100..=0xffff => 2,
            0x1_0000..=0xff_ffff => 3,
            0x100_0000..=0xffff_ffff => 4,
            _ => return None,
        };
        Some(Self::new(bytesize, space))
    }

    /// Returns the bits used to announce the length in a packet tag
    #[inline]
    pub fn into_packet_tag_mask(self) -> u8 {
        self.bytesize - 1
    }

    /// Truncates a full packet number value down to this length
    #[inline]
    pub fn truncate_packet_number(self, packet_number: VarInt) -> TruncatedPacketNumber {
        let mask = u64::MAX >> (64 - self.bitsize());
        let value = VarInt::new(packet_number.as_u64() & mask).expect("masked value is in range");
        TruncatedPacketNumber::new(value, self)
    }

    #[inline]
    pub fn space(self) -> PacketNumberSpace {
        self.space
    }

    #[inline]
    pub fn bitsize(self) -> usize {
        self.bytesize() * 8
    }

    #[inline]
    pub fn bytesize(self) -> usize {
        self.bytesize as usize
    }
}
