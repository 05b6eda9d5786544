// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::interval_set::{IntervalSet, RangeInclusiveIter};
use aero_quic_core::{
    frame::ack,
    packet::number::PacketNumber,
    varint::VarInt,
};
use core::{num::NonZeroUsize, ops::RangeInclusive};

pub const DEFAULT_ACK_RANGES_LIMIT: u8 = 10;

/// The set of received packet numbers for one space
///
/// Storage is bounded; when full, the lowest ranges are shed first since
/// the peer needs acknowledgement of recent packets to make progress.
#[derive(Clone, Debug)]
pub struct AckRanges(IntervalSet<PacketNumber>);

impl Default for AckRanges {
    fn default() -> Self {
        Self::new(DEFAULT_ACK_RANGES_LIMIT as usize)
    }
}

impl AckRanges {
    pub fn new(limit: usize) -> Self {
        let limit = NonZeroUsize::new(limit).expect("limit should be nonzero");
        Self(IntervalSet::with_limit(limit))
    }

    /// Inserts a packet number; dropping smaller values if needed
    pub fn insert_packet_number(
        &mut self,
        packet_number: PacketNumber,
    ) -> Result<(), AckRangesError> {
        if self.0.insert_value(packet_number).is_ok() {
            return Ok(());
        }

        // attempt to shed the lowest range to make room for larger values
        match self.0.pop_min() {
            Some(min) => {
                if min.start < packet_number {
                    self.0
                        .insert_value(packet_number)
                        .expect("a range was removed, so one can be inserted");
                    Err(AckRangesError::LowestRangeDropped {
                        min: min.start,
                        max: min.end,
                    })
                } else {
                    // the new value is below everything tracked; put the
                    // popped range back and refuse the insert
                    self.0.insert_front(min);
                    Err(AckRangesError::RangeInsertionFailed {
                        value: packet_number,
                    })
                }
            }
            None => unreachable!("a full set has at least one range"),
        }
    }

    #[inline]
    pub fn contains(&self, packet_number: &PacketNumber) -> bool {
        self.0.contains(packet_number)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn interval_len(&self) -> usize {
        self.0.interval_len()
    }

    /// The largest packet number seen so far
    #[inline]
    pub fn max_value(&self) -> Option<PacketNumber> {
        self.0.max_value()
    }

    #[inline]
    pub fn min_value(&self) -> Option<PacketNumber> {
        self.0.min_value()
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.4
    //# When a packet containing an ACK frame is acknowledged, the receiver can stop
    //# acknowledging packets less than or equal to the Largest Acknowledged
    //# field in the sent ACK frame.
    /// Stops tracking everything at or below `largest_acked`
    #[inline]
    pub fn prune(&mut self, largest_acked: PacketNumber) {
        self.0.remove_up_to(largest_acked);
    }
}

type AckRangesIter<'a> = core::iter::Map<
    core::iter::Rev<RangeInclusiveIter<'a, PacketNumber>>,
    fn(RangeInclusive<PacketNumber>) -> RangeInclusive<VarInt>,
>;

fn to_varint_range(range: RangeInclusive<PacketNumber>) -> RangeInclusive<VarInt> {
    let (start, end) = range.into_inner();
    PacketNumber::as_varint(start)..=PacketNumber::as_varint(end)
}

impl<'a> ack::AckRanges for &'a AckRanges {
    type Iter = AckRangesIter<'a>;

    /// Enumerates the tracked ranges in descending order, the order ACK
    /// frames are encoded in
    fn ack_ranges(&self) -> Self::Iter {
        self.0
            .inclusive_ranges()
            .rev()
            .map(to_varint_range as fn(RangeInclusive<PacketNumber>) -> RangeInclusive<VarInt>)
    }
}

/// Outcome of an insert which could not simply extend the set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckRangesError {
    /// The new value was rejected; it is lower than everything tracked
    RangeInsertionFailed { value: PacketNumber },
    /// The new value was recorded at the cost of the lowest range
    LowestRangeDropped {
        min: PacketNumber,
        max: PacketNumber,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use aero_quic_core::{frame::ack::AckRanges as _, packet::number::PacketNumberSpace};

    fn pn(value: u32) -> PacketNumber {
        PacketNumberSpace::Initial.new_packet_number(VarInt::from_u32(value))
    }

    #[test]
    fn insert_gap_limit_test() {
        let mut ack_ranges = AckRanges::new(3);

        // insert gaps up to the limit
        for value in [0, 2, 4] {
            assert!(ack_ranges.insert_packet_number(pn(value)).is_ok());
        }
        assert_eq!(ack_ranges.interval_len(), 3);

        // a new gap sheds the lowest range
        assert_eq!(
            ack_ranges.insert_packet_number(pn(6)),
            Err(AckRangesError::LowestRangeDropped {
                min: pn(0),
                max: pn(0)
            })
        );
        assert!(!ack_ranges.contains(&pn(0)));
        assert!(ack_ranges.contains(&pn(6)));

        // values below the tracked window are refused
        assert_eq!(
            ack_ranges.insert_packet_number(pn(0)),
            Err(AckRangesError::RangeInsertionFailed { value: pn(0) })
        );
        assert!(!ack_ranges.contains(&pn(0)));
    }

    #[test]
    fn descending_frame_ranges_test() {
        let mut ack_ranges = AckRanges::new(4);
        for value in [0, 1, 5, 6, 9] {
            ack_ranges.insert_packet_number(pn(value)).unwrap();
        }

        let ranges: Vec<_> = (&ack_ranges).ack_ranges().collect();
        assert_eq!(
            ranges,
            [
                VarInt::from_u8(9)..=VarInt::from_u8(9),
                VarInt::from_u8(5)..=VarInt::from_u8(6),
                VarInt::from_u8(0)..=VarInt::from_u8(1),
            ]
        );
        assert_eq!((&ack_ranges).largest_acknowledged(), VarInt::from_u8(9));
    }

    #[test]
    fn prune_test() {
        let mut ack_ranges = AckRanges::new(4);
        for value in [0, 1, 4, 5, 8] {
            ack_ranges.insert_packet_number(pn(value)).unwrap();
        }

        ack_ranges.prune(pn(4));
        assert!(!ack_ranges.contains(&pn(0)));
        assert!(!ack_ranges.contains(&pn(4)));
        assert!(ack_ranges.contains(&pn(5)));
        assert_eq!(ack_ranges.min_value(), Some(pn(5)));
        assert_eq!(ack_ranges.max_value(), Some(pn(8)));
    }
}
