// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! QUIC frames used by the send path and the frames it must parse
//!
//! Stream, flow control and connection management frames are owned by
//! collaborators outside this endpoint core and are not modeled here.

use aero_codec::{DecoderBuffer, DecoderError, DecoderResult};

pub mod ack;
pub mod ack_elicitation;
pub mod connection_close;
pub mod crypto;
pub mod padding;
pub mod ping;

pub use ack::Ack;
pub use ack_elicitation::{AckElicitable, AckElicitation};
pub use connection_close::ConnectionClose;
pub use crypto::{Crypto, CryptoRef};
pub use padding::Padding;
pub use ping::Ping;

/// The type tag of a frame
///
/// All frame types produced or consumed by this endpoint fit in a single
/// byte; extension frames with multi-byte types are rejected as unknown.
pub type Tag = u8;

/// Returned when a frame does not fit the remaining packet capacity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FitError;

/// A parsed view of a single frame within a packet payload
#[derive(Debug)]
pub enum FrameRef<'a> {
    Padding(Padding),
    Ping(Ping),
    Ack(Ack<ack::AckRangesDecoder<'a>>),
    Crypto(CryptoRef<'a>),
    ConnectionClose(ConnectionClose<'a>),
}

impl<'a> FrameRef<'a> {
    /// Decodes the next frame in the payload
    pub fn decode(buffer: DecoderBuffer<'a>) -> DecoderResult<'a, FrameRef<'a>> {
        let tag = buffer.peek_byte(0)?;
        match tag {
            padding::TAG => {
                let (padding, buffer) = Padding::decode(buffer)?;
                Ok((FrameRef::Padding(padding), buffer))
            }
            ping::TAG => {
                let buffer = buffer.skip(1)?;
                Ok((FrameRef::Ping(Ping), buffer))
            }
            ack::TAG | ack::TAG_W_ECN => {
                let (ack, buffer) = Ack::decode(tag, buffer.skip(1)?)?;
                Ok((FrameRef::Ack(ack), buffer))
            }
            crypto::TAG => {
                let (crypto, buffer) = Crypto::decode(buffer.skip(1)?)?;
                Ok((FrameRef::Crypto(crypto), buffer))
            }
            connection_close::TAG | connection_close::APPLICATION_TAG => {
                let (close, buffer) = ConnectionClose::decode(tag, buffer.skip(1)?)?;
                Ok((FrameRef::ConnectionClose(close), buffer))
            }
            _ => Err(DecoderError::InvariantViolation("unknown frame type")),
        }
    }

    /// Returns the frame's type tag
    pub fn tag(&self) -> Tag {
        match self {
            Self::Padding(_) => padding::TAG,
            Self::Ping(_) => ping::TAG,
            Self::Ack(ack) => ack.tag(),
            Self::Crypto(_) => crypto::TAG,
            Self::ConnectionClose(close) => close.tag(),
        }
    }
}

impl<'a> AckElicitable for FrameRef<'a> {
    //= https://www.rfc-editor.org/rfc/rfc9002#section-2
    //# Ack-eliciting Frames:  All frames other than ACK, PADDING, and
    //#    CONNECTION_CLOSE are considered ack-eliciting.
    fn ack_elicitation(&self) -> AckElicitation {
        match self {
            Self::Padding(_) | Self::Ack(_) | Self::ConnectionClose(_) => {
                AckElicitation::NonEliciting
            }
            Self::Ping(_) | Self::Crypto(_) => AckElicitation::Eliciting,
        }
    }
}
