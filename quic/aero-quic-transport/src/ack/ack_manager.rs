// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::ack::{AckRanges, AckRangesError};
use aero_quic_core::{
    ack::Settings,
    packet::number::{PacketNumber, PacketNumberSpace},
    time::{Timer, Timestamp},
    varint::VarInt,
};

/// Decides when ACK frames are emitted for one packet number space and
/// what they contain
///
/// The manager tracks received packet numbers for the lifetime of the
/// space's read keys. Emission follows two rules: every ack-eliciting
/// reception is acknowledged within `max_ack_delay`, and reordered or
/// gap-creating receptions are acknowledged immediately.
#[derive(Debug)]
pub struct AckManager {
    space: PacketNumberSpace,
    settings: Settings,
    ack_ranges: AckRanges,

    /// The largest received packet number and its arrival time; the
    /// baseline for the ACK Delay field
    largest_received: Option<(PacketNumber, Timestamp)>,

    /// Ack-eliciting receptions not yet covered by a sent ACK
    unreported_eliciting: u8,

    /// Armed at the first unreported ack-eliciting reception
    ack_delay_timer: Timer,

    /// Set when a reception requires an ACK at the next opportunity
    immediate_ack_required: bool,
}

impl AckManager {
    pub fn new(space: PacketNumberSpace, settings: Settings) -> Self {
        Self {
            space,
            settings,
            ack_ranges: AckRanges::new(settings.ack_ranges_limit as usize),
            largest_received: None,
            unreported_eliciting: 0,
            ack_delay_timer: Timer::default(),
            immediate_ack_required: false,
        }
    }

    #[inline]
    pub fn space(&self) -> PacketNumberSpace {
        self.space
    }

    /// The largest packet number received in this space, tracked alongside
    /// the send-side largest-acked
    #[inline]
    pub fn largest_received_packet_number(&self) -> Option<PacketNumber> {
        self.largest_received.map(|(packet_number, _)| packet_number)
    }

    /// Returns `true` if the packet number is still tracked as received;
    /// used to discard duplicate deliveries before processing
    #[inline]
    pub fn is_duplicate(&self, packet_number: PacketNumber) -> bool {
        self.ack_ranges.contains(&packet_number)
    }

    /// Decodes a peer-reported ACK Delay with this space's settings
    #[inline]
    pub fn decode_ack_delay(&self, delay: VarInt) -> core::time::Duration {
        self.settings.decode_ack_delay(delay)
    }

    /// Records a successfully processed packet
    pub fn on_packet_received(
        &mut self,
        packet_number: PacketNumber,
        ack_eliciting: bool,
        now: Timestamp,
    ) {
        if ack_eliciting {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.1
            //# Similarly, packets marked with the ECN Congestion Experienced (CE)
            //# codepoint in the IP header SHOULD be acknowledged immediately, to
            //# reduce the peer's response time to congestion events.
            //
            //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.1
            //# An endpoint SHOULD send an ACK frame immediately after receiving
            //# an ack-eliciting packet that is out of order
            let out_of_order = self.largest_received.map_or(false, |(largest, _)| {
                packet_number < largest
                    || largest
                        .next()
                        .map_or(false, |expected| packet_number > expected)
            });
            if out_of_order {
                self.immediate_ack_required = true;
            }

            self.unreported_eliciting = self.unreported_eliciting.saturating_add(1);
            if self.unreported_eliciting >= self.settings.ack_elicitation_interval {
                self.immediate_ack_required = true;
            }

            //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.1
            //# When the PADDING frame or any
            //# other ack-eliciting frame is received, the endpoint MUST
            //# acknowledge the packet within its advertised max_ack_delay
            if !self.ack_delay_timer.is_armed() {
                self.ack_delay_timer.set(now + self.settings.max_ack_delay);
            }
        }

        if let Err(AckRangesError::LowestRangeDropped { min, max }) =
            self.ack_ranges.insert_packet_number(packet_number)
        {
            tracing::debug!(space = ?self.space, ?min, ?max, "ack range shed");
        }

        if self
            .largest_received
            .map_or(true, |(largest, _)| packet_number > largest)
        {
            self.largest_received = Some((packet_number, now));
        }
    }

    /// Returns `true` when an ACK must go out now, rather than riding along
    /// with the next packet that happens to be sent
    pub fn should_send_ack(&self, now: Timestamp) -> bool {
        if self.unreported_eliciting == 0 {
            return false;
        }
        self.immediate_ack_required
            || self.settings.max_ack_delay.is_zero()
            || self.ack_delay_timer.is_expired(now)
    }

    /// The ranges to put in an ACK frame, and the encoded ACK Delay
    ///
    /// Returns `None` when nothing has been received yet. The ranges
    /// reflect the receive state at the moment of the call; packet builds
    /// never interleave with receptions.
    pub fn acks_to_send(&self, now: Timestamp) -> Option<(&AckRanges, VarInt)> {
        if self.ack_ranges.is_empty() {
            return None;
        }

        let (_, largest_received_time) = self.largest_received?;
        let delay = now.saturating_duration_since(largest_received_time);
        Some((&self.ack_ranges, self.settings.encode_ack_delay(delay)))
    }

    /// Called after an ACK frame was committed into a packet
    pub fn on_ack_sent(&mut self) {
        self.unreported_eliciting = 0;
        self.immediate_ack_required = false;
        self.ack_delay_timer.cancel();
    }

    /// Called when the peer acknowledges a packet that carried one of our
    /// ACK frames; everything at or below that frame's largest can stop
    /// being reported
    pub fn on_ack_frame_acked(&mut self, largest_acked: PacketNumber) {
        self.ack_ranges.prune(largest_acked);
    }

    /// The delayed-ack deadline, when armed
    pub fn timers(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.ack_delay_timer.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aero_quic_core::time::{Clock, NoopClock};
    use core::time::Duration;

    fn pn(value: u32) -> PacketNumber {
        PacketNumberSpace::ApplicationData.new_packet_number(VarInt::from_u32(value))
    }

    fn manager() -> AckManager {
        let settings = Settings {
            max_ack_delay: Duration::from_millis(25),
            ack_elicitation_interval: 10,
            ..Settings::RECOMMENDED
        };
        AckManager::new(PacketNumberSpace::ApplicationData, settings)
    }

    #[test]
    fn no_ack_without_receptions_test() {
        let now = NoopClock.get_time();
        let manager = manager();
        assert!(!manager.should_send_ack(now));
        assert!(manager.acks_to_send(now).is_none());
    }

    #[test]
    fn non_eliciting_receptions_do_not_force_acks_test() {
        let now = NoopClock.get_time();
        let mut manager = manager();
        manager.on_packet_received(pn(0), false, now);

        // the reception is tracked and reportable, but nothing demands
        // an ACK-only packet
        assert!(!manager.should_send_ack(now + Duration::from_secs(1)));
        assert!(manager.acks_to_send(now).is_some());
    }

    #[test]
    fn delayed_ack_test() {
        let now = NoopClock.get_time();
        let mut manager = manager();
        manager.on_packet_received(pn(0), true, now);

        // within max_ack_delay the ACK can wait
        assert!(!manager.should_send_ack(now));
        // once the delay elapses it must go out
        assert!(manager.should_send_ack(now + Duration::from_millis(25)));
        assert_eq!(manager.timers().next(), Some(now + Duration::from_millis(25)));
    }

    #[test]
    fn immediate_ack_in_early_spaces_test() {
        let now = NoopClock.get_time();
        let mut manager = AckManager::new(PacketNumberSpace::Initial, Settings::EARLY);
        manager.on_packet_received(
            PacketNumberSpace::Initial.new_packet_number(VarInt::from_u8(0)),
            true,
            now,
        );
        assert!(manager.should_send_ack(now));
    }

    #[test]
    fn out_of_order_reception_forces_ack_test() {
        let now = NoopClock.get_time();
        let mut manager = manager();
        manager.on_packet_received(pn(1), true, now);
        manager.on_ack_sent();

        // gap: 3 skips 2
        manager.on_packet_received(pn(3), true, now);
        assert!(manager.should_send_ack(now));
        manager.on_ack_sent();

        // late arrival below the largest
        manager.on_packet_received(pn(2), true, now);
        assert!(manager.should_send_ack(now));
    }

    #[test]
    fn ack_delay_encoding_test() {
        let now = NoopClock.get_time();
        let mut manager = manager();
        manager.on_packet_received(pn(7), true, now);

        let later = now + Duration::from_millis(8);
        let (ranges, delay) = manager.acks_to_send(later).unwrap();
        assert_eq!(ranges.max_value(), Some(pn(7)));
        // 8ms scaled down by the default exponent of 3
        assert_eq!(delay, VarInt::from_u32(1000));
    }

    #[test]
    fn sent_ack_resets_obligations_test() {
        let now = NoopClock.get_time();
        let mut manager = manager();
        manager.on_packet_received(pn(0), true, now);
        manager.on_ack_sent();

        assert!(!manager.should_send_ack(now + Duration::from_secs(1)));
        // the ranges stay reportable for bundling until pruned
        assert!(manager.acks_to_send(now).is_some());
    }

    #[test]
    fn prune_on_ack_frame_acked_test() {
        let now = NoopClock.get_time();
        let mut manager = manager();
        for value in [0, 1, 2, 5] {
            manager.on_packet_received(pn(value), true, now);
        }

        manager.on_ack_frame_acked(pn(2));
        let (ranges, _) = manager.acks_to_send(now).unwrap();
        assert!(!ranges.contains(&pn(1)));
        assert!(ranges.contains(&pn(5)));
    }
}
