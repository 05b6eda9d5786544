// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use byteorder::{ByteOrder, NetworkEndian};
use core::{convert::TryFrom, mem::size_of};

/// A sink for encoded values
pub trait Encoder: Sized {
    /// Encode the given `EncoderValue` into the buffer
    #[inline]
    fn encode<T: EncoderValue>(&mut self, value: &T) {
        value.encode(self)
    }

    /// Encode the given `EncoderValue` into the buffer with a prefix of `Len`
    #[inline]
    fn encode_with_len_prefix<Len: TryFrom<usize> + EncoderValue, T: EncoderValue>(
        &mut self,
        value: &T,
    ) where
        Len::Error: core::fmt::Debug,
    {
        value.encode_with_len_prefix::<Len, Self>(self)
    }

    /// Calls `write` with a slice of `len` bytes at the current write position
    fn write_sized<F: FnOnce(&mut [u8])>(&mut self, len: usize, write: F);

    /// Copies the slice into the buffer
    fn write_slice(&mut self, slice: &[u8]);

    /// Repeatedly write a byte `value` for a given `count`
    fn write_repeated(&mut self, count: usize, value: u8);

    /// Returns the total buffer capacity
    fn capacity(&self) -> usize;

    /// Returns the number of bytes written to the buffer
    fn len(&self) -> usize;

    /// Returns `true` if no bytes have been written
    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of available bytes in the buffer
    #[inline]
    fn remaining_capacity(&self) -> usize {
        self.capacity().saturating_sub(self.len())
    }
}

/// A value which can serialize itself into an [`Encoder`]
pub trait EncoderValue: Sized {
    /// Encodes the value into the encoder
    fn encode<E: Encoder>(&self, encoder: &mut E);

    /// Returns the encoding size with no buffer constraints
    #[inline]
    fn encoding_size(&self) -> usize {
        let mut estimator = EncoderLenEstimator::new(usize::MAX);
        self.encode(&mut estimator);
        estimator.len()
    }

    /// Returns the encoding size for the given encoder's remaining capacity
    #[inline]
    fn encoding_size_for_encoder<E: Encoder>(&self, encoder: &E) -> usize {
        let mut estimator = EncoderLenEstimator::new(encoder.remaining_capacity());
        self.encode(&mut estimator);
        estimator.len()
    }

    /// Encodes the value into the encoder with a prefix of `Len`
    #[inline]
    fn encode_with_len_prefix<Len: TryFrom<usize> + EncoderValue, E: Encoder>(&self, encoder: &mut E)
    where
        Len::Error: core::fmt::Debug,
    {
        let len = self.encoding_size();
        let len: Len = Len::try_from(len).expect("invalid length prefix conversion");
        len.encode(encoder);
        self.encode(encoder);
    }
}

macro_rules! encoder_value_byte {
    ($ty:ident) => {
        impl EncoderValue for $ty {
            #[inline]
            fn encode<E: Encoder>(&self, encoder: &mut E) {
                encoder.write_sized(size_of::<Self>(), |buf| {
                    buf[0] = *self as u8;
                })
            }
        }
    };
}

encoder_value_byte!(u8);
encoder_value_byte!(i8);

macro_rules! encoder_value_network_endian {
    ($call:ident, $ty:ty) => {
        impl EncoderValue for $ty {
            #[inline]
            fn encode<E: Encoder>(&self, encoder: &mut E) {
                encoder.write_sized(size_of::<Self>(), |buf| {
                    NetworkEndian::$call(buf, *self);
                })
            }
        }
    };
}

encoder_value_network_endian!(write_u16, u16);
encoder_value_network_endian!(write_u32, u32);
encoder_value_network_endian!(write_u64, u64);

impl EncoderValue for &[u8] {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(self)
    }
}

/// Encodes into a fixed byte slice, tracking the write position
#[derive(Debug)]
pub struct EncoderBuffer<'a> {
    bytes: &'a mut [u8],
    position: usize,
}

impl<'a> EncoderBuffer<'a> {
    /// Creates a new `EncoderBuffer` at position 0
    #[inline]
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    /// Sets the write position, e.g. to resume a previously started encoding
    /// or to roll a speculative write back.
    ///
    /// # Panics
    ///
    /// Panics when `position` exceeds the buffer capacity
    #[inline]
    pub fn set_position(&mut self, position: usize) {
        assert!(position <= self.bytes.len());
        self.position = position;
    }

    /// Advances the write position by `len` bytes
    #[inline]
    pub fn advance_position(&mut self, len: usize) {
        self.set_position(self.position + len)
    }

    /// Returns the written and unwritten halves of the buffer
    #[inline]
    pub fn split_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        self.bytes.split_at_mut(self.position)
    }

    /// Returns the bytes written so far
    #[inline]
    pub fn as_written_slice(&self) -> &[u8] {
        &self.bytes[..self.position]
    }

    #[inline]
    fn checked_range(&mut self, len: usize) -> &mut [u8] {
        let end = self
            .position
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .expect("write exceeds buffer capacity");
        &mut self.bytes[self.position..end]
    }
}

impl<'a> Encoder for EncoderBuffer<'a> {
    #[inline]
    fn write_sized<F: FnOnce(&mut [u8])>(&mut self, len: usize, write: F) {
        write(self.checked_range(len));
        self.position += len;
    }

    #[inline]
    fn write_slice(&mut self, slice: &[u8]) {
        self.checked_range(slice.len()).copy_from_slice(slice);
        self.position += slice.len();
    }

    #[inline]
    fn write_repeated(&mut self, count: usize, value: u8) {
        for byte in self.checked_range(count) {
            *byte = value;
        }
        self.position += count;
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    fn len(&self) -> usize {
        self.position
    }
}

/// Measures the encoding size of a value against a capacity without
/// writing any bytes
#[derive(Clone, Copy, Debug)]
pub struct EncoderLenEstimator {
    capacity: usize,
    len: usize,
}

impl EncoderLenEstimator {
    #[inline]
    pub fn new(capacity: usize) -> Self {
        Self { capacity, len: 0 }
    }

    /// Returns `true` if the estimated len exceeds the capacity
    #[inline]
    pub fn overflowed(&self) -> bool {
        self.len > self.capacity
    }
}

impl Encoder for EncoderLenEstimator {
    #[inline]
    fn write_sized<F: FnOnce(&mut [u8])>(&mut self, len: usize, _write: F) {
        self.len += len;
    }

    #[inline]
    fn write_slice(&mut self, slice: &[u8]) {
        self.len += slice.len();
    }

    #[inline]
    fn write_repeated(&mut self, count: usize, _value: u8) {
        self.len += count;
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn len(&self) -> usize {
        self.len
    }
}
