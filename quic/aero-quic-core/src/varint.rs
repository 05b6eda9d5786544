// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use aero_codec::{
    DecoderBuffer, DecoderError, DecoderResult, DecoderValue, Encoder, EncoderValue,
};
use core::{
    convert::{TryFrom, TryInto},
    fmt,
    ops::Deref,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-16
//# The QUIC variable-length integer encoding reserves the two most
//# significant bits of the first byte to encode the base 2 logarithm of
//# the integer encoding length in bytes.  The integer value is encoded
//# on the remaining bits, in network byte order.

pub const MAX_VARINT_VALUE: u64 = 4_611_686_018_427_387_903;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VarIntError;

impl fmt::Display for VarIntError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "varint range exceeded")
    }
}

impl std::error::Error for VarIntError {}

/// An integer in the range `0..=2^62-1`, as used by all QUIC wire formats
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarInt(u64);

impl VarInt {
    pub const MAX: Self = Self(MAX_VARINT_VALUE);
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn new(value: u64) -> Result<Self, VarIntError> {
        if value > MAX_VARINT_VALUE {
            return Err(VarIntError);
        }
        Ok(Self(value))
    }

    /// Creates a `VarInt` without validating the range
    ///
    /// # Safety
    ///
    /// Callers must ensure the value does not exceed [`MAX_VARINT_VALUE`]
    #[inline]
    pub const unsafe fn new_unchecked(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        Self(value as u64)
    }

    #[inline]
    pub const fn from_u16(value: u16) -> Self {
        Self(value as u64)
    }

    #[inline]
    pub const fn from_u32(value: u32) -> Self {
        Self(value as u64)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        Self::new(self.0.checked_add(rhs.0)?).ok()
    }

    #[inline]
    pub fn checked_add_usize(self, rhs: usize) -> Option<Self> {
        let rhs: Self = rhs.try_into().ok()?;
        self.checked_add(rhs)
    }

    #[inline]
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        Some(Self(self.0.checked_sub(rhs.0)?))
    }

    #[inline]
    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0).min(MAX_VARINT_VALUE))
    }

    /// Returns the number of bytes the value occupies on the wire
    #[inline]
    pub const fn encoding_size(self) -> usize {
        match self.0 {
            0..=0x3f => 1,
            0x40..=0x3fff => 2,
            0x4000..=0x3fff_ffff => 4,
            _ => 8,
        }
    }
}

impl fmt::Debug for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "VarInt({})", self.0)
    }
}

impl fmt::Display for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Deref for VarInt {
    type Target = u64;

    #[inline]
    fn deref(&self) -> &u64 {
        &self.0
    }
}

impl From<VarInt> for u64 {
    #[inline]
    fn from(value: VarInt) -> Self {
        value.0
    }
}

impl From<u8> for VarInt {
    #[inline]
    fn from(value: u8) -> Self {
        Self::from_u8(value)
    }
}

impl From<u16> for VarInt {
    #[inline]
    fn from(value: u16) -> Self {
        Self::from_u16(value)
    }
}

impl From<u32> for VarInt {
    #[inline]
    fn from(value: u32) -> Self {
        Self::from_u32(value)
    }
}

impl TryFrom<u64> for VarInt {
    type Error = VarIntError;

    #[inline]
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<usize> for VarInt {
    type Error = VarIntError;

    #[inline]
    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value as u64)
    }
}

impl TryFrom<u128> for VarInt {
    type Error = VarIntError;

    #[inline]
    fn try_from(value: u128) -> Result<Self, Self::Error> {
        let value: u64 = value.try_into().map_err(|_| VarIntError)?;
        Self::new(value)
    }
}

impl TryFrom<VarInt> for usize {
    type Error = core::num::TryFromIntError;

    #[inline]
    fn try_from(value: VarInt) -> Result<Self, Self::Error> {
        value.0.try_into()
    }
}

impl EncoderValue for VarInt {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let value = self.0;
        match VarInt::encoding_size(*self) {
            1 => encoder.encode(&(value as u8)),
            2 => encoder.encode(&(value as u16 | 0x4000)),
            4 => encoder.encode(&(value as u32 | 0x8000_0000)),
            _ => encoder.encode(&(value | 0xc000_0000_0000_0000)),
        }
    }
}

impl<'a> DecoderValue<'a> for VarInt {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderResult<'a, Self> {
        let header = buffer.peek_byte(0)?;

        Ok(match header >> 6 {
            0b00 => {
                let buffer = buffer.skip(1)?;
                (Self((header & 0x3f) as u64), buffer)
            }
            0b01 => {
                let (value, buffer) = buffer.decode::<u16>()?;
                (Self((value & 0x3fff) as u64), buffer)
            }
            0b10 => {
                let (value, buffer) = buffer.decode::<u32>()?;
                (Self((value & 0x3fff_ffff) as u64), buffer)
            }
            0b11 => {
                let (value, buffer) = buffer.decode::<u64>()?;
                (Self(value & MAX_VARINT_VALUE), buffer)
            }
            _ => return Err(DecoderError::InvariantViolation("invalid varint header")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aero_codec::EncoderBuffer;

    fn round_trip(value: u64, expected: &[u8]) {
        let value = VarInt::new(value).unwrap();
        let mut bytes = [0u8; 8];
        let mut encoder = EncoderBuffer::new(&mut bytes);
        encoder.encode(&value);
        let len = encoder.len();
        assert_eq!(&bytes[..len], expected);
        assert_eq!(value.encoding_size(), len);

        let (decoded, remaining) = DecoderBuffer::new(&bytes[..len]).decode::<VarInt>().unwrap();
        assert_eq!(decoded, value);
        assert!(remaining.is_empty());
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#appendix-A.1
    //= type=test
    //# For example, the eight-byte sequence 0xc2197c5eff14e88c decodes to
    //# the decimal value 151,288,809,941,952,652
    #[test]
    fn rfc_vector_test() {
        round_trip(
            151_288_809_941_952_652,
            &[0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c],
        );
        round_trip(494_878_333, &[0x9d, 0x7f, 0x3e, 0x7d]);
        round_trip(15_293, &[0x7b, 0xbd]);
        round_trip(37, &[0x25]);
    }

    #[test]
    fn boundary_test() {
        round_trip(0, &[0x00]);
        round_trip(63, &[0x3f]);
        round_trip(64, &[0x40, 0x40]);
        round_trip(16_383, &[0x7f, 0xff]);
        round_trip(16_384, &[0x80, 0x00, 0x40, 0x00]);
        assert!(VarInt::new(MAX_VARINT_VALUE).is_ok());
        assert!(VarInt::new(MAX_VARINT_VALUE + 1).is_err());
    }

    #[test]
    fn checked_math_test() {
        assert_eq!(
            VarInt::MAX.checked_add(VarInt::from_u8(1)),
            None,
            "additions past the maximum are rejected"
        );
        assert_eq!(
            VarInt::from_u8(1).checked_sub(VarInt::from_u8(2)),
            None,
            "subtractions below zero are rejected"
        );
        assert_eq!(VarInt::MAX.saturating_add(VarInt::MAX), VarInt::MAX);
    }
}
