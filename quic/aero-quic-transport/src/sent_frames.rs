// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Compact replay records of the frames a sent packet carried
//!
//! The packet writer appends an entry per frame as it encodes; when the
//! packet's fate is decided the dispatcher replays the entries to release
//! or re-enqueue what the frames referenced. The record is a reduced
//! encoding rather than the wire bytes: an ACK frame is remembered only by
//! the largest number it covered, a CRYPTO frame by its offset and length.
//!
//! Entries are self-delimiting varint tuples keyed by the frame's wire tag,
//! so replay is linear and unambiguous. An unknown tag during replay is a
//! programming error; the writer and the replay loop must be kept in sync.

use aero_quic_core::{frame, packet::number::PacketNumber, varint::VarInt};
use aero_codec::{DecoderBuffer, DecoderValue};

/// The replayable content of one frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SentFrame {
    /// An ACK frame covering everything up to `largest_acked`
    Ack { largest_acked: VarInt },
    /// A CRYPTO frame carrying `len` bytes at `offset`
    Crypto { offset: VarInt, len: VarInt },
    /// A PING frame
    Ping,
}

/// The append-only frame record of a packet under construction
#[derive(Clone, Debug, Default)]
pub struct SentFrames {
    buffer: Vec<u8>,
}

impl SentFrames {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Forgets everything recorded past `mark`; pairs with [`Self::mark`]
    /// when a packet is abandoned
    #[inline]
    pub fn truncate(&mut self, mark: usize) {
        self.buffer.truncate(mark);
    }

    /// Returns a savepoint for [`Self::truncate`]
    #[inline]
    pub fn mark(&self) -> usize {
        self.buffer.len()
    }

    pub fn push_ack(&mut self, largest_acked: PacketNumber) {
        self.push_varint(VarInt::from_u8(frame::ack::TAG));
        self.push_varint(PacketNumber::as_varint(largest_acked));
    }

    pub fn push_crypto(&mut self, offset: VarInt, len: usize) {
        self.push_varint(VarInt::from_u8(frame::crypto::TAG));
        self.push_varint(offset);
        self.push_varint(VarInt::try_from(len).expect("frame lengths fit in a varint"));
    }

    pub fn push_ping(&mut self) {
        self.push_varint(VarInt::from_u8(frame::ping::TAG));
    }

    /// Consumes the record, replaying each entry in the order the frames
    /// were written
    ///
    /// # Panics
    ///
    /// Panics on an unknown tag or a truncated entry; both mean the writer
    /// and this replay loop have diverged.
    pub fn replay(self) -> impl Iterator<Item = SentFrame> {
        Replay {
            buffer: self.buffer,
            position: 0,
        }
    }

    fn push_varint(&mut self, value: VarInt) {
        use aero_codec::{Encoder, EncoderBuffer, EncoderValue};

        let start = self.buffer.len();
        self.buffer.resize(start + value.encoding_size(), 0);
        let mut encoder = EncoderBuffer::new(&mut self.buffer[start..]);
        encoder.encode(&value);
    }
}

struct Replay {
    buffer: Vec<u8>,
    position: usize,
}

impl Replay {
    fn next_varint(&mut self) -> VarInt {
        let buffer = DecoderBuffer::new(&self.buffer[self.position..]);
        let (value, remaining) = VarInt::decode(buffer).expect("BUG: truncated sent frame record");
        self.position = self.buffer.len() - remaining.len();
        value
    }
}

impl Iterator for Replay {
    type Item = SentFrame;

    fn next(&mut self) -> Option<SentFrame> {
        if self.position >= self.buffer.len() {
            return None;
        }

        const ACK: u64 = frame::ack::TAG as u64;
        const CRYPTO: u64 = frame::crypto::TAG as u64;
        const PING: u64 = frame::ping::TAG as u64;

        let tag = self.next_varint().as_u64();
        Some(match tag {
            ACK => SentFrame::Ack {
                largest_acked: self.next_varint(),
            },
            CRYPTO => SentFrame::Crypto {
                offset: self.next_varint(),
                len: self.next_varint(),
            },
            PING => SentFrame::Ping,
            tag => panic!("BUG: unhandled sent frame tag {tag:#x}"),
        })
    }
}
