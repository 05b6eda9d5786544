// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, transport, varint::VarInt};
use aero_codec::{DecoderBuffer, DecoderResult, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.19
//# An endpoint sends a CONNECTION_CLOSE frame (type=0x1c or 0x1d) to
//# notify its peer that the connection is being closed.

pub const TAG: Tag = 0x1c;
pub const APPLICATION_TAG: Tag = 0x1d;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.19
//# CONNECTION_CLOSE Frame {
//#   Type (i) = 0x1c..0x1d,
//#   Error Code (i),
//#   [Frame Type (i)],
//#   Reason Phrase Length (i),
//#   Reason Phrase (..),
//# }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionClose<'a> {
    pub error_code: VarInt,

    /// The type of the frame that triggered the error; absent for
    /// application-initiated closes (type 0x1d)
    pub frame_type: Option<VarInt>,

    pub reason: &'a [u8],
}

impl<'a> ConnectionClose<'a> {
    #[inline]
    pub fn tag(&self) -> Tag {
        if self.frame_type.is_some() {
            TAG
        } else {
            APPLICATION_TAG
        }
    }

    pub fn decode(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderResult<'a, Self> {
        let (error_code, buffer) = buffer.decode::<VarInt>()?;

        let (frame_type, buffer) = if tag == TAG {
            let (frame_type, buffer) = buffer.decode::<VarInt>()?;
            (Some(frame_type), buffer)
        } else {
            (None, buffer)
        };

        let (reason, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;

        let frame = ConnectionClose {
            error_code,
            frame_type,
            reason,
        };

        Ok((frame, buffer))
    }
}

impl<'a> From<transport::Error> for ConnectionClose<'a> {
    fn from(error: transport::Error) -> Self {
        Self {
            error_code: error.code,
            frame_type: Some(error.frame_type.unwrap_or(VarInt::ZERO)),
            reason: error.reason.as_bytes(),
        }
    }
}

impl<'a> EncoderValue for ConnectionClose<'a> {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&self.error_code);
        if let Some(frame_type) = self.frame_type {
            buffer.encode(&frame_type);
        }
        buffer.encode_with_len_prefix::<VarInt, _>(&self.reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_test() {
        use aero_codec::EncoderBuffer;

        let frame: ConnectionClose = transport::Error::PROTOCOL_VIOLATION
            .with_reason("test")
            .into();

        let mut bytes = [0u8; 32];
        let mut encoder = EncoderBuffer::new(&mut bytes);
        encoder.encode(&frame);
        let len = encoder.len();

        let (decoded, remaining) =
            ConnectionClose::decode(bytes[0], DecoderBuffer::new(&bytes[1..len])).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(decoded, frame);
        assert_eq!(decoded.reason, b"test");
    }
}
