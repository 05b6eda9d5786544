// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::packet::number::PacketNumber;

/// An inclusive range of packet numbers within a single space
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketNumberRange {
    start: PacketNumber,
    end: PacketNumber,
    exhausted: bool,
}

impl PacketNumberRange {
    /// Creates a new packet number range [start, end]
    #[inline]
    pub fn new(start: PacketNumber, end: PacketNumber) -> Self {
        start.space().assert_eq(end.space());
        assert!(start <= end, "start must not be greater than end");

        Self {
            start,
            end,
            exhausted: false,
        }
    }

    /// Returns the lowest packet number in the range
    #[inline]
    pub fn start(&self) -> PacketNumber {
        self.start
    }

    /// Returns the highest packet number in the range
    #[inline]
    pub fn end(&self) -> PacketNumber {
        self.end
    }

    /// Returns true if the range contains the given packet number
    #[inline]
    pub fn contains(&self, packet_number: PacketNumber) -> bool {
        self.start.space() == packet_number.space()
            && self.start <= packet_number
            && packet_number <= self.end
    }
}

impl Iterator for PacketNumberRange {
    type Item = PacketNumber;

    fn next(&mut self) -> Option<PacketNumber> {
        if self.exhausted || self.start > self.end {
            return None;
        }

        let current = self.start;
        if let Some(next) = self.start.next().filter(|next| *next <= self.end) {
            self.start = next;
        } else {
            // avoid overflowing past the end
            self.exhausted = true;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{packet::number::PacketNumberSpace, varint::VarInt};

    fn pn(value: u32) -> PacketNumber {
        PacketNumberSpace::Initial.new_packet_number(VarInt::from_u32(value))
    }

    #[test]
    fn iteration_test() {
        let values: Vec<u64> = PacketNumberRange::new(pn(3), pn(6))
            .map(|pn| pn.as_u64())
            .collect();
        assert_eq!(values, [3, 4, 5, 6]);
    }

    #[test]
    fn single_element_test() {
        let mut range = PacketNumberRange::new(pn(9), pn(9));
        assert_eq!(range.next().map(|pn| pn.as_u64()), Some(9));
        assert_eq!(range.next(), None);
        assert!(range.contains(pn(9)));
        assert!(!range.contains(pn(8)));
    }

    #[test]
    #[should_panic]
    fn invalid_range_test() {
        PacketNumberRange::new(pn(2), pn(1));
    }
}
