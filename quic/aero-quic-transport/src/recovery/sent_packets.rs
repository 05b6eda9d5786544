// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::sent_frames::SentFrames;
use aero_quic_core::{
    frame::ack_elicitation::AckElicitation, packet::number::PacketNumber, time::Timestamp,
};
use std::collections::BTreeMap;

/// Everything retained about an in-flight packet until its fate resolves
#[derive(Debug)]
pub struct SentPacketInfo {
    /// Indicates whether the packet counts towards bytes in flight
    pub in_flight: bool,
    /// The number of bytes sent in the packet, not including UDP or IP
    /// overhead, but including QUIC framing overhead
    pub sent_bytes: u16,
    /// The time the packet was sent
    pub time_sent: Timestamp,
    /// Indicates whether the packet is ack-eliciting
    pub ack_elicitation: AckElicitation,
    /// The replayable record of the frames the packet carried
    ///
    /// Immutable from here on; consumed exactly once when the packet is
    /// acknowledged or declared lost.
    pub frames: SentFrames,
}

/// The per-space table of packets pending acknowledgement, ordered by
/// packet number
#[derive(Debug, Default)]
pub struct SentPackets {
    packets: BTreeMap<PacketNumber, SentPacketInfo>,
}

impl SentPackets {
    pub fn insert(&mut self, packet_number: PacketNumber, info: SentPacketInfo) {
        let replaced = self.packets.insert(packet_number, info);
        debug_assert!(replaced.is_none(), "packet numbers are never reused");
    }

    #[inline]
    pub fn remove(&mut self, packet_number: PacketNumber) -> Option<SentPacketInfo> {
        self.packets.remove(&packet_number)
    }

    #[inline]
    pub fn get(&self, packet_number: PacketNumber) -> Option<&SentPacketInfo> {
        self.packets.get(&packet_number)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Iterates in ascending packet number order
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&PacketNumber, &SentPacketInfo)> {
        self.packets.iter()
    }

    /// Removes and returns every tracked packet
    #[inline]
    pub fn drain(&mut self) -> impl Iterator<Item = (PacketNumber, SentPacketInfo)> {
        core::mem::take(&mut self.packets).into_iter()
    }
}
