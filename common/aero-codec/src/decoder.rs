// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use byteorder::{ByteOrder, NetworkEndian};
use core::{convert::TryInto, fmt, mem::size_of};

/// Error returned when a buffer cannot be parsed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderError {
    /// The buffer ended before the value was complete
    UnexpectedEof(usize),
    /// The bytes did not form a valid value
    InvariantViolation(&'static str),
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnexpectedEof(len) => write!(f, "unexpected eof: {len}"),
            Self::InvariantViolation(message) => write!(f, "{message}"),
        }
    }
}

pub type DecoderResult<'a, T> = Result<(T, DecoderBuffer<'a>), DecoderError>;

/// A value which can parse itself out of a [`DecoderBuffer`]
///
/// Decoding consumes the buffer and returns the remaining suffix, so a
/// sequence of values is parsed by threading the buffer through each call.
pub trait DecoderValue<'a>: Sized {
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderResult<'a, Self>;
}

/// An immutable view over a byte slice being parsed
#[derive(Clone, Copy, Debug)]
pub struct DecoderBuffer<'a> {
    bytes: &'a [u8],
}

impl<'a> DecoderBuffer<'a> {
    #[inline]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns the byte at `index` without consuming anything
    #[inline]
    pub fn peek_byte(&self, index: usize) -> Result<u8, DecoderError> {
        self.bytes
            .get(index)
            .copied()
            .ok_or(DecoderError::UnexpectedEof(index + 1))
    }

    /// Decodes a value of type `T` from the start of the buffer
    #[inline]
    pub fn decode<T: DecoderValue<'a>>(self) -> DecoderResult<'a, T> {
        T::decode(self)
    }

    /// Splits off `len` bytes from the start of the buffer
    #[inline]
    pub fn decode_slice(self, len: usize) -> DecoderResult<'a, &'a [u8]> {
        if len > self.bytes.len() {
            return Err(DecoderError::UnexpectedEof(len));
        }
        let (slice, remaining) = self.bytes.split_at(len);
        Ok((slice, Self::new(remaining)))
    }

    /// Decodes a `Len`-prefixed slice
    #[inline]
    pub fn decode_slice_with_len_prefix<Len>(self) -> DecoderResult<'a, &'a [u8]>
    where
        Len: DecoderValue<'a> + TryInto<usize>,
    {
        let (len, buffer) = self.decode::<Len>()?;
        let len = len
            .try_into()
            .map_err(|_| DecoderError::InvariantViolation("invalid length prefix"))?;
        buffer.decode_slice(len)
    }

    /// Skips `len` bytes
    #[inline]
    pub fn skip(self, len: usize) -> Result<Self, DecoderError> {
        let (_, remaining) = self.decode_slice(len)?;
        Ok(remaining)
    }

    /// Returns the underlying slice
    ///
    /// The name mirrors the fact that all parsing guarantees are dropped at
    /// this boundary.
    #[inline]
    pub fn into_less_safe_slice(self) -> &'a [u8] {
        self.bytes
    }
}

impl<'a> DecoderValue<'a> for u8 {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderResult<'a, Self> {
        let value = buffer.peek_byte(0)?;
        let buffer = buffer.skip(1)?;
        Ok((value, buffer))
    }
}

macro_rules! decoder_value_network_endian {
    ($call:ident, $ty:ty) => {
        impl<'a> DecoderValue<'a> for $ty {
            #[inline]
            fn decode(buffer: DecoderBuffer<'a>) -> DecoderResult<'a, Self> {
                let (slice, buffer) = buffer.decode_slice(size_of::<$ty>())?;
                Ok((NetworkEndian::$call(slice), buffer))
            }
        }
    };
}

decoder_value_network_endian!(read_u16, u16);
decoder_value_network_endian!(read_u32, u32);
decoder_value_network_endian!(read_u64, u64);
