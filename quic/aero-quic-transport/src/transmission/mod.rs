// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Speculative construction of one outgoing datagram
//!
//! Packets are begun without knowing whether anything useful will be
//! written into them. Frame appenders fill the payload; if nothing worth
//! sending accumulated, the packet is rolled back in place and the
//! datagram is unchanged. Up to one packet per packet number space can be
//! coalesced into the datagram, long header packets first.

use crate::{ack::AckRanges, recovery::SentPacketInfo, sent_frames::SentFrames};
use aero_codec::{Encoder, EncoderBuffer, EncoderValue};
use aero_quic_core::{
    connection::ConnectionId,
    crypto::{self, PacketProtection},
    frame::{self, ack::AckRanges as _, Padding, Ping},
    packet::{
        long,
        number::{PacketNumber, PacketNumberLen, TruncatedPacketNumber},
        short,
    },
    time::Timestamp,
    varint::VarInt,
};

/// The largest datagram the writer can assemble
const MAX_DATAGRAM_SIZE: usize = 1500;

/// A packet begun inside the datagram but not yet sealed
#[derive(Debug)]
struct InProgress {
    packet_number: PacketNumber,
    truncated_packet_number: TruncatedPacketNumber,
    /// Datagram offset of the first header byte
    start: usize,
    /// Datagram offset of the Length field, for long header packets
    length_cursor: Option<usize>,
    /// Datagram offset of the encoded packet number
    pn_offset: usize,
    /// Datagram offset of the first payload byte
    payload_start: usize,
    /// Tag length of the keys this packet will be sealed with
    tag_len: usize,
    sample_len: usize,
    ack_eliciting: bool,
    padded: bool,
    frames: SentFrames,
}

/// Builds one datagram of up to three coalesced packets
#[derive(Debug)]
pub struct PacketWriter {
    buffer: Vec<u8>,
    /// Bytes occupied by sealed packets
    datagram_len: usize,
    /// Bytes written including the packet under construction
    cursor: usize,
    /// The budget for this datagram
    max_len: usize,
    packet: Option<InProgress>,
}

impl Default for PacketWriter {
    fn default() -> Self {
        Self {
            buffer: vec![0; MAX_DATAGRAM_SIZE],
            datagram_len: 0,
            cursor: 0,
            max_len: 0,
            packet: None,
        }
    }
}

impl PacketWriter {
    /// Prepares a fresh datagram of at most `max_len` bytes
    pub fn reset(&mut self, max_len: usize) {
        debug_assert!(self.packet.is_none(), "a packet is still in progress");
        self.datagram_len = 0;
        self.cursor = 0;
        self.max_len = max_len.min(self.buffer.len());
        self.packet = None;
    }

    /// The assembled bytes across all sealed packets
    #[inline]
    pub fn datagram(&self) -> &[u8] {
        &self.buffer[..self.datagram_len]
    }

    #[inline]
    pub fn datagram_len(&self) -> usize {
        self.datagram_len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.datagram_len == 0
    }

    /// Returns `true` if the packet under construction elicits an ACK
    #[inline]
    pub fn is_ack_eliciting(&self) -> bool {
        self.packet
            .as_ref()
            .map_or(false, |packet| packet.ack_eliciting)
    }

    /// Returns `true` if the packet under construction has any payload
    #[inline]
    pub fn has_payload(&self) -> bool {
        self.packet
            .as_ref()
            .map_or(false, |packet| self.cursor > packet.payload_start)
    }

    /// Begins an Initial or Handshake packet in the current datagram
    pub fn start_long_packet(
        &mut self,
        kind: long::Kind,
        packet_number: PacketNumber,
        largest_acked: PacketNumber,
        dcid: &ConnectionId,
        scid: &ConnectionId,
        protection: &PacketProtection,
    ) -> bool {
        debug_assert!(self.packet.is_none(), "one packet at a time");

        let truncated_packet_number = match packet_number.truncate(largest_acked) {
            Some(truncated) => truncated,
            None => return false,
        };
        let pn_len = truncated_packet_number.len();

        let header_len = long::header_len(kind, dcid, scid);
        // the Length field is always encoded in 2 bytes
        let overhead = header_len + 2 + pn_len.bytesize() + protection.tag_len();
        if self.remaining_capacity() < overhead {
            return false;
        }

        let start = self.datagram_len;
        let mut encoder = self.encoder();
        long::encode_header(&mut encoder, kind, dcid, scid, pn_len);
        let length_cursor = encoder.len();
        // placeholder; patched when the packet is sealed
        encoder.encode(&0x4000u16);
        let pn_offset = encoder.len();
        encoder.encode(&truncated_packet_number);
        let payload_start = encoder.len();
        self.cursor = payload_start;

        self.packet = Some(InProgress {
            packet_number,
            truncated_packet_number,
            start,
            length_cursor: Some(length_cursor),
            pn_offset,
            payload_start,
            tag_len: protection.tag_len(),
            sample_len: protection.header_key.sample_len(),
            ack_eliciting: false,
            padded: false,
            frames: SentFrames::default(),
        });

        true
    }

    /// Begins the trailing 1-RTT packet; it extends to the end of the
    /// datagram and carries no Length field
    pub fn start_short_packet(
        &mut self,
        packet_number: PacketNumber,
        largest_acked: PacketNumber,
        dcid: &ConnectionId,
        protection: &PacketProtection,
    ) -> bool {
        debug_assert!(self.packet.is_none(), "one packet at a time");

        let truncated_packet_number = match packet_number.truncate(largest_acked) {
            Some(truncated) => truncated,
            None => return false,
        };
        let pn_len = truncated_packet_number.len();

        let overhead = short::header_len(dcid) + pn_len.bytesize() + protection.tag_len();
        if self.remaining_capacity() < overhead {
            return false;
        }

        let start = self.datagram_len;
        let mut encoder = self.encoder();
        short::encode_header(&mut encoder, dcid, pn_len);
        let pn_offset = encoder.len();
        encoder.encode(&truncated_packet_number);
        let payload_start = encoder.len();
        self.cursor = payload_start;

        self.packet = Some(InProgress {
            packet_number,
            truncated_packet_number,
            start,
            length_cursor: None,
            pn_offset,
            payload_start,
            tag_len: protection.tag_len(),
            sample_len: protection.header_key.sample_len(),
            ack_eliciting: false,
            padded: false,
            frames: SentFrames::default(),
        });

        true
    }

    /// Appends an ACK frame; does not make the packet ack-eliciting
    pub fn append_ack_frame(&mut self, ranges: &AckRanges, ack_delay: VarInt) -> bool {
        let largest_acked = match ranges.max_value() {
            Some(largest) => largest,
            None => return false,
        };

        let ack = frame::Ack {
            ack_delay,
            ack_ranges: ranges,
        };

        if !self.fits(ack.encoding_size()) {
            return false;
        }

        let mut encoder = self.frame_encoder();
        encoder.encode(&ack);
        self.cursor = encoder.len();

        let packet = self.packet.as_mut().expect("a packet is in progress");
        packet.frames.push_ack(largest_acked);
        true
    }

    /// Appends a PING frame, making the packet ack-eliciting
    pub fn append_ping_frame(&mut self) -> bool {
        if !self.fits(Ping.encoding_size()) {
            return false;
        }

        let mut encoder = self.frame_encoder();
        encoder.encode(&Ping);
        self.cursor = encoder.len();

        let packet = self.packet.as_mut().expect("a packet is in progress");
        packet.ack_eliciting = true;
        packet.frames.push_ping();
        true
    }

    /// Appends as much of `data` as fits into a CRYPTO frame at `offset`,
    /// returning the number of payload bytes written
    pub fn append_crypto_frame(&mut self, offset: VarInt, data: &[u8]) -> Option<usize> {
        let capacity = self.frame_capacity();
        let data_len = frame::CryptoRef::try_fit(offset, data.len(), capacity).ok()?;

        let crypto = frame::Crypto {
            offset,
            data: &data[..data_len],
        };

        let mut encoder = self.frame_encoder();
        encoder.encode(&crypto);
        self.cursor = encoder.len();

        let packet = self.packet.as_mut().expect("a packet is in progress");
        packet.ack_eliciting = true;
        packet.frames.push_crypto(offset, data_len);
        Some(data_len)
    }

    /// Appends a CONNECTION_CLOSE frame
    pub fn append_connection_close_frame(&mut self, close: &frame::ConnectionClose) -> bool {
        if !self.fits(close.encoding_size()) {
            return false;
        }

        let mut encoder = self.frame_encoder();
        encoder.encode(close);
        self.cursor = encoder.len();
        true
    }

    /// Pads the packet under construction so the datagram, once this
    /// packet is sealed, reaches `target_len` bytes
    pub fn append_padding_to(&mut self, target_len: usize) -> bool {
        let packet = self.packet.as_ref().expect("a packet is in progress");
        let sealed_len = self.cursor + packet.tag_len;
        let length = match target_len.checked_sub(sealed_len) {
            Some(0) | None => return true,
            Some(length) => length,
        };

        if !self.fits(length) {
            return false;
        }

        let mut encoder = self.frame_encoder();
        encoder.encode(&Padding { length });
        self.cursor = encoder.len();

        let packet = self.packet.as_mut().expect("a packet is in progress");
        packet.padded = true;
        true
    }

    /// Discards the packet under construction, restoring the datagram to
    /// its previous length. The consumed packet number is reusable.
    pub fn abandon_packet(&mut self) {
        let packet = self.packet.take().expect("a packet is in progress");
        self.cursor = packet.start;
        debug_assert_eq!(packet.start, self.datagram_len);
    }

    /// Seals the packet under construction: encrypts the payload, applies
    /// header protection and commits the bytes to the datagram.
    ///
    /// A packet without payload is abandoned instead, per the invariant
    /// that empty packets never reach the wire.
    pub fn finish_packet(
        &mut self,
        protection: &PacketProtection,
        now: Timestamp,
    ) -> Option<SentPacketInfo> {
        if !self.has_payload() {
            self.abandon_packet();
            return None;
        }

        //= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.2
        //# in sampling packet ciphertext for header protection,
        //# the Packet Number field is assumed to be 4 bytes long
        // grow the payload until the protection sample is guaranteed to
        // fall inside the packet
        {
            let packet = self.packet.as_ref().expect("a packet is in progress");
            let available = self.cursor + packet.tag_len - packet.pn_offset;
            let required = PacketNumberLen::MAX_LEN + packet.sample_len;
            if available < required {
                let length = required - available;
                if !self.fits(length) {
                    // too small to ever be protectable
                    self.abandon_packet();
                    return None;
                }
                let mut encoder = self.frame_encoder();
                encoder.encode(&Padding { length });
                self.cursor = encoder.len();
            }
        }

        let packet = self.packet.take().expect("a packet is in progress");
        let payload_end = self.cursor + packet.tag_len;

        // patch the Length field now that the payload size is known
        if let Some(length_cursor) = packet.length_cursor {
            let length = payload_end - packet.pn_offset;
            debug_assert!(length < 0x4000, "length always fits in 2 bytes");
            let mut encoder = EncoderBuffer::new(&mut self.buffer[..self.max_len]);
            encoder.set_position(length_cursor);
            encoder.encode(&(length as u16 | 0x4000));
        }

        // seal the payload; the tag space was reserved by the capacity
        // checks on every append
        self.buffer[self.cursor..payload_end].fill(0);
        let (header, payload) = self.buffer[packet.start..payload_end]
            .split_at_mut(packet.payload_start - packet.start);
        protection
            .key
            .encrypt(packet.packet_number.as_crypto_nonce(), header, payload)
            .expect("sealing never fails");

        crypto::protect(
            protection.header_key.as_ref(),
            &mut self.buffer[packet.start..payload_end],
            packet.pn_offset - packet.start,
            packet.truncated_packet_number.len().bytesize(),
        )
        .expect("the payload covers the protection sample");

        self.datagram_len = payload_end;
        self.cursor = payload_end;

        Some(SentPacketInfo {
            in_flight: packet.ack_eliciting || packet.padded,
            sent_bytes: (payload_end - packet.start) as u16,
            time_sent: now,
            ack_elicitation: if packet.ack_eliciting {
                frame::AckElicitation::Eliciting
            } else {
                frame::AckElicitation::NonEliciting
            },
            frames: packet.frames,
        })
    }

    /// Extends the datagram with zero bytes outside of any packet,
    /// returning how many were added
    ///
    /// The trailing bytes coalesce with the datagram as packets the peer
    /// will ignore; the caller accounts them to an already sealed packet.
    pub fn pad_datagram_to(&mut self, target_len: usize) -> usize {
        debug_assert!(self.packet.is_none(), "a packet is still in progress");
        let target_len = target_len.min(self.buffer.len());
        let added = target_len.saturating_sub(self.datagram_len);
        if added > 0 {
            self.buffer[self.datagram_len..target_len].fill(0);
            self.datagram_len = target_len;
            self.cursor = target_len;
        }
        added
    }

    #[inline]
    fn remaining_capacity(&self) -> usize {
        self.max_len.saturating_sub(self.cursor)
    }

    /// Capacity left for frame bytes in the packet under construction
    #[inline]
    fn frame_capacity(&self) -> usize {
        let tag_len = self
            .packet
            .as_ref()
            .map_or(0, |packet| packet.tag_len);
        self.remaining_capacity().saturating_sub(tag_len)
    }

    #[inline]
    fn fits(&self, len: usize) -> bool {
        len <= self.frame_capacity()
    }

    fn encoder(&mut self) -> EncoderBuffer<'_> {
        let mut encoder = EncoderBuffer::new(&mut self.buffer[..self.max_len]);
        encoder.set_position(self.datagram_len);
        encoder
    }

    fn frame_encoder(&mut self) -> EncoderBuffer<'_> {
        let cursor = self.cursor;
        let mut encoder = EncoderBuffer::new(&mut self.buffer[..self.max_len]);
        encoder.set_position(cursor);
        encoder
    }
}
