// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{FitError, Tag},
    varint::VarInt,
};
use aero_codec::{DecoderBuffer, DecoderResult, Encoder, EncoderValue};
use core::{convert::TryFrom, mem::size_of};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.6
//# A CRYPTO frame (type=0x06) is used to transmit cryptographic
//# handshake messages.

pub const TAG: Tag = 0x06;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.6
//# CRYPTO Frame {
//#   Type (i) = 0x06,
//#   Offset (i),
//#   Length (i),
//#   Crypto Data (..),
//# }

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Crypto<Data> {
    /// A variable-length integer specifying the byte offset in the stream
    /// for the data in this CRYPTO frame.
    pub offset: VarInt,

    /// The cryptographic message data.
    pub data: Data,
}

pub type CryptoRef<'a> = Crypto<&'a [u8]>;

impl<Data> Crypto<Data> {
    #[inline]
    pub const fn tag(&self) -> Tag {
        TAG
    }

    /// Converts the crypto data from one type to another
    #[inline]
    pub fn map_data<F: FnOnce(Data) -> Out, Out>(self, map: F) -> Crypto<Out> {
        Crypto {
            offset: self.offset,
            data: map(self.data),
        }
    }
}

impl<'a> CryptoRef<'a> {
    /// Computes how many payload bytes fit in `capacity`, accounting for the
    /// tag, offset and length prefix
    ///
    /// If ok, the fitted payload length is returned, otherwise the frame
    /// cannot fit at all.
    pub fn try_fit(offset: VarInt, data_len: usize, capacity: usize) -> Result<usize, FitError> {
        let mut fixed_len = 0;
        fixed_len += size_of::<Tag>();
        fixed_len += offset.encoding_size();

        let remaining_capacity = capacity.checked_sub(fixed_len).ok_or(FitError)?;

        let max_data_len = remaining_capacity.min(data_len);
        let len_prefix_size = VarInt::try_from(max_data_len)
            .map_err(|_| FitError)?
            .encoding_size();

        let prefixed_data_len = remaining_capacity
            .checked_sub(len_prefix_size)
            .ok_or(FitError)?;
        let data_len = prefixed_data_len.min(data_len);

        if data_len == 0 {
            return Err(FitError);
        }

        Ok(data_len)
    }

    pub fn decode(buffer: DecoderBuffer<'a>) -> DecoderResult<'a, Self> {
        let (offset, buffer) = buffer.decode::<VarInt>()?;
        let (data, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;
        Ok((Crypto { offset, data }, buffer))
    }
}

impl<'a> EncoderValue for CryptoRef<'a> {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&self.offset);
        buffer.encode_with_len_prefix::<VarInt, _>(&self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aero_codec::EncoderBuffer;

    #[test]
    fn round_trip_test() {
        let frame = Crypto {
            offset: VarInt::from_u16(300),
            data: [1u8, 2, 3, 4].as_slice(),
        };

        let mut bytes = [0u8; 32];
        let mut encoder = EncoderBuffer::new(&mut bytes);
        encoder.encode(&frame);
        let len = encoder.len();

        let (decoded, remaining) = Crypto::decode(DecoderBuffer::new(&bytes[1..len])).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn try_fit_test() {
        let offset = VarInt::from_u8(0);
        // tag + offset + len prefix consume 3 bytes
        assert_eq!(CryptoRef::try_fit(offset, 10, 13), Ok(10));
        assert_eq!(CryptoRef::try_fit(offset, 100, 13), Ok(10));
        assert_eq!(CryptoRef::try_fit(offset, 10, 3), Err(FitError));
        assert_eq!(CryptoRef::try_fit(offset, 10, 0), Err(FitError));
    }
}
