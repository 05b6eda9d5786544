// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::Tag,
    packet::number::{PacketNumberRange, PacketNumberSpace},
    varint::VarInt,
};
use aero_codec::{DecoderBuffer, DecoderError, DecoderResult, Encoder, EncoderValue};
use core::ops::RangeInclusive;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
//# Receivers send ACK frames (types 0x02 and 0x03) to inform senders of
//# packets they have received and processed.  The ACK frame contains one
//# or more ACK Ranges.  ACK Ranges identify acknowledged packets.

pub const TAG: Tag = 0x02;
pub const TAG_W_ECN: Tag = 0x03;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
//# ACK Frame {
//#   Type (i) = 0x02..0x03,
//#   Largest Acknowledged (i),
//#   ACK Delay (i),
//#   ACK Range Count (i),
//#   First ACK Range (i),
//#   ACK Range (..) ...,
//#   [ECN Counts (..)],
//# }

#[derive(Clone, PartialEq, Eq)]
pub struct Ack<AckRanges> {
    /// The acknowledgement delay, already scaled by the sender's
    /// `ack_delay_exponent`
    pub ack_delay: VarInt,

    /// Contains the ranges of packets which are acknowledged, in
    /// descending packet number order
    pub ack_ranges: AckRanges,
}

impl<A> Ack<A> {
    pub const fn tag(&self) -> Tag {
        // ECN counts are consumed on receipt but never produced
        TAG
    }
}

impl<A: AckRanges> Ack<A> {
    #[inline]
    pub fn ack_delay(&self) -> VarInt {
        self.ack_delay
    }

    #[inline]
    pub fn ack_ranges(&self) -> A::Iter {
        self.ack_ranges.ack_ranges()
    }

    #[inline]
    pub fn largest_acknowledged(&self) -> VarInt {
        self.ack_ranges.largest_acknowledged()
    }

    /// Iterates the acknowledged ranges as `PacketNumberRange`s in the
    /// given space
    #[inline]
    pub fn pn_range_iter(
        &self,
        space: PacketNumberSpace,
    ) -> impl Iterator<Item = PacketNumberRange> + '_ {
        self.ack_ranges().map(move |ack_range| {
            let (start, end) = ack_range.into_inner();
            PacketNumberRange::new(space.new_packet_number(start), space.new_packet_number(end))
        })
    }
}

impl<A: core::fmt::Debug> core::fmt::Debug for Ack<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Ack")
            .field("ack_delay", &self.ack_delay)
            .field("ack_ranges", &self.ack_ranges)
            .finish()
    }
}

/// A source of acknowledged ranges, enumerated in descending order
pub trait AckRanges {
    type Iter: Iterator<Item = RangeInclusive<VarInt>> + ExactSizeIterator;

    fn ack_ranges(&self) -> Self::Iter;

    #[inline]
    fn largest_acknowledged(&self) -> VarInt {
        *self
            .ack_ranges()
            .next()
            .expect("at least one ack range is required")
            .end()
    }
}

impl<A: AckRanges> EncoderValue for Ack<A> {
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());

        let mut iter = self.ack_ranges.ack_ranges();

        let first_ack_range = iter.next().expect("at least one ack range is required");
        let (mut smallest, largest_acknowledged) = first_ack_range.into_inner();
        let first_ack_range = largest_acknowledged
            .checked_sub(smallest)
            .expect("ranges are ordered");

        let ack_range_count =
            VarInt::try_from(iter.len()).expect("ack range count cannot exceed VarInt::MAX");

        buffer.encode(&largest_acknowledged);
        buffer.encode(&self.ack_delay);
        buffer.encode(&ack_range_count);
        buffer.encode(&first_ack_range);

        for range in iter {
            smallest = encode_ack_range(range, smallest, buffer);
        }
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.1
//# Each ACK Range consists of alternating Gap and ACK Range Length
//# values in descending packet number order.
//#
//# Gap:  A variable-length integer indicating the number of contiguous
//# unacknowledged packets preceding the packet number one lower than
//# the smallest in the preceding ACK Range.
fn encode_ack_range<E: Encoder>(
    range: RangeInclusive<VarInt>,
    smallest: VarInt,
    buffer: &mut E,
) -> VarInt {
    let (start, end) = range.into_inner();
    let gap = smallest
        .checked_sub(end)
        .and_then(|value| value.checked_sub(VarInt::from_u8(2)))
        .expect("ranges are descending and separated by at least one gap");
    let len = end.checked_sub(start).expect("ranges are ordered");

    buffer.encode(&gap);
    buffer.encode(&len);

    start
}

/// The ACK Range fields of a received frame, validated at decode time
#[derive(Clone, Copy)]
pub struct AckRangesDecoder<'a> {
    largest_acknowledged: VarInt,
    ack_range_count: VarInt,
    range_buffer: DecoderBuffer<'a>,
}

impl<'a> AckRanges for AckRangesDecoder<'a> {
    type Iter = AckRangesIter<'a>;

    #[inline]
    fn ack_ranges(&self) -> Self::Iter {
        AckRangesIter {
            largest_acknowledged: self.largest_acknowledged,
            ack_range_count: self.ack_range_count.as_u64() as usize + 1,
            range_buffer: self.range_buffer,
        }
    }

    #[inline]
    fn largest_acknowledged(&self) -> VarInt {
        self.largest_acknowledged
    }
}

impl<'a> PartialEq for AckRangesDecoder<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.ack_ranges().eq(other.ack_ranges())
    }
}

impl<'a> core::fmt::Debug for AckRangesDecoder<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_list().entries(self.ack_ranges()).finish()
    }
}

/// Iterates the ranges of an [`AckRangesDecoder`] in descending order
pub struct AckRangesIter<'a> {
    largest_acknowledged: VarInt,
    ack_range_count: usize,
    range_buffer: DecoderBuffer<'a>,
}

impl<'a> Iterator for AckRangesIter<'a> {
    type Item = RangeInclusive<VarInt>;

    fn next(&mut self) -> Option<Self::Item> {
        self.ack_range_count = self.ack_range_count.checked_sub(1)?;

        let largest = self.largest_acknowledged;
        let (len, buffer) = self.range_buffer.decode::<VarInt>().ok()?;
        let start = largest.checked_sub(len)?;

        // prepare the next iteration
        if self.ack_range_count > 0 {
            let (gap, buffer) = buffer.decode::<VarInt>().ok()?;
            self.largest_acknowledged = start
                .checked_sub(gap)?
                .checked_sub(VarInt::from_u8(2))?;
            self.range_buffer = buffer;
        } else {
            self.range_buffer = buffer;
        }

        Some(start..=largest)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.ack_range_count, Some(self.ack_range_count))
    }
}

impl<'a> ExactSizeIterator for AckRangesIter<'a> {}

impl<'a> Ack<AckRangesDecoder<'a>> {
    /// Decodes an ACK frame body; `tag` selects whether ECN counts follow
    pub fn decode(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderResult<'a, Self> {
        let (largest_acknowledged, buffer) = buffer.decode::<VarInt>()?;
        let (ack_delay, buffer) = buffer.decode::<VarInt>()?;
        let (ack_range_count, buffer) = buffer.decode::<VarInt>()?;

        let range_buffer = buffer;

        // walk the ranges once so the iterator handed to consumers cannot
        // observe a malformed frame
        let mut buffer = buffer;
        let mut smallest = largest_acknowledged;
        for index in 0..=ack_range_count.as_u64() {
            if index != 0 {
                let (gap, remaining) = buffer.decode::<VarInt>()?;
                smallest = smallest
                    .checked_sub(gap)
                    .and_then(|value| value.checked_sub(VarInt::from_u8(2)))
                    .ok_or(DecoderError::InvariantViolation("invalid ACK range gap"))?;
                buffer = remaining;
            }
            let (len, remaining) = buffer.decode::<VarInt>()?;
            smallest = smallest
                .checked_sub(len)
                .ok_or(DecoderError::InvariantViolation("invalid ACK range length"))?;
            buffer = remaining;
        }

        let range_buffer = DecoderBuffer::new(
            &range_buffer.into_less_safe_slice()[..range_buffer.len() - buffer.len()],
        );

        if tag == TAG_W_ECN {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.2
            //# ECN Counts {
            //#   ECT0 Count (i),
            //#   ECT1 Count (i),
            //#   ECN-CE Count (i),
            //# }
            // validated but otherwise unused by this endpoint
            let (_ect0, remaining) = buffer.decode::<VarInt>()?;
            let (_ect1, remaining) = remaining.decode::<VarInt>()?;
            let (_ce, remaining) = remaining.decode::<VarInt>()?;
            buffer = remaining;
        }

        let frame = Ack {
            ack_delay,
            ack_ranges: AckRangesDecoder {
                largest_acknowledged,
                ack_range_count,
                range_buffer,
            },
        };

        Ok((frame, buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aero_codec::EncoderBuffer;

    /// An in-memory range source for tests and loopback encoding
    #[derive(Clone, Debug)]
    pub struct TestRanges(pub Vec<RangeInclusive<VarInt>>);

    impl AckRanges for TestRanges {
        type Iter = std::vec::IntoIter<RangeInclusive<VarInt>>;

        fn ack_ranges(&self) -> Self::Iter {
            self.0.clone().into_iter()
        }
    }

    fn v(value: u32) -> VarInt {
        VarInt::from_u32(value)
    }

    #[test]
    fn round_trip_test() {
        let ranges = TestRanges(vec![v(100)..=v(120), v(50)..=v(60), v(10)..=v(10)]);
        let frame = Ack {
            ack_delay: v(33),
            ack_ranges: ranges,
        };

        let mut bytes = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut bytes);
        encoder.encode(&frame);
        let len = encoder.len();

        let buffer = DecoderBuffer::new(&bytes[1..len]);
        let (decoded, remaining) = Ack::decode(bytes[0], buffer).unwrap();
        assert!(remaining.is_empty());

        assert_eq!(decoded.largest_acknowledged(), v(120));
        assert_eq!(decoded.ack_delay(), v(33));
        let decoded_ranges: Vec<_> = decoded.ack_ranges().collect();
        assert_eq!(
            decoded_ranges,
            vec![v(100)..=v(120), v(50)..=v(60), v(10)..=v(10)]
        );
    }

    #[test]
    fn single_range_test() {
        let frame = Ack {
            ack_delay: v(0),
            ack_ranges: TestRanges(vec![v(0)..=v(0)]),
        };

        let mut bytes = [0u8; 16];
        let mut encoder = EncoderBuffer::new(&mut bytes);
        encoder.encode(&frame);
        let len = encoder.len();
        // tag, largest=0, delay=0, count=0, first_range=0
        assert_eq!(&bytes[..len], &[0x02, 0, 0, 0, 0]);
    }

    #[test]
    fn invalid_range_test() {
        // largest=1, delay=0, count=0, first_range=5 underflows
        let bytes = [1u8, 0, 0, 5];
        assert!(Ack::decode(TAG, DecoderBuffer::new(&bytes)).is_err());
    }

    #[test]
    fn descending_iteration_test() {
        let ranges = TestRanges(vec![v(9)..=v(9), v(5)..=v(6), v(1)..=v(2)]);
        let frame = Ack {
            ack_delay: v(0),
            ack_ranges: ranges,
        };

        let mut bytes = [0u8; 32];
        let mut encoder = EncoderBuffer::new(&mut bytes);
        encoder.encode(&frame);
        let len = encoder.len();

        let (decoded, _) = Ack::decode(bytes[0], DecoderBuffer::new(&bytes[1..len])).unwrap();
        let mut prev_start = VarInt::MAX;
        for range in decoded.ack_ranges() {
            assert!(*range.end() < prev_start, "ranges must be descending");
            assert!(range.start() <= range.end());
            prev_start = *range.start();
        }
    }
}
