// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{connection::ConnectionId, packet::number::PacketNumberLen};
use aero_codec::Encoder;

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.3.1
//# 1-RTT Packet {
//#   Header Form (1) = 0,
//#   Fixed Bit (1) = 1,
//#   Spin Bit (1),
//#   Reserved Bits (2),
//#   Key Phase (1),
//#   Packet Number Length (2),
//#   Destination Connection ID (0..160),
//#   Packet Number (8..32),
//#   Packet Payload (8..),
//# }

pub const FIXED_BIT: u8 = 0b0100_0000;

/// Encodes a 1-RTT packet header; the packet number follows immediately and
/// is written by the caller. 1-RTT packets carry no Length field and extend
/// to the end of the datagram.
#[inline]
pub fn encode_header<E: Encoder>(
    encoder: &mut E,
    dcid: &ConnectionId,
    packet_number_len: PacketNumberLen,
) {
    // key phase is fixed at 0; key updates are out of scope
    let first = FIXED_BIT | packet_number_len.into_packet_tag_mask();
    encoder.encode(&first);
    encoder.write_slice(dcid.as_bytes());
}

/// Returns the size of the header produced by [`encode_header`]
#[inline]
pub fn header_len(dcid: &ConnectionId) -> usize {
    1 + dcid.len()
}
