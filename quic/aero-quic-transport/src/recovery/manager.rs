// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    path::Path,
    recovery::{Pto, SentPacketInfo, SentPackets, K_PACKET_THRESHOLD},
};
use aero_quic_core::{
    packet::number::{PacketNumber, PacketNumberRange, PacketNumberSpace},
    recovery::CongestionController,
    time::{Timer, Timestamp},
    transport,
    varint::VarInt,
};
use core::time::Duration;
use smallvec::SmallVec;

/// Initial capacity of the SmallVec used for keeping track of packets
/// acked in an ack frame
const ACKED_PACKETS_INITIAL_CAPACITY: usize = 10;

/// The final fate of a sent packet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketFate {
    Acked,
    Lost,
}

/// The callbacks a recovery manager issues while processing an event
///
/// Implemented per call site with borrows of the surrounding connection
/// state, never stored; verdicts carry the packet's frame record so the
/// implementation can replay it exactly once.
pub trait Context<CC: CongestionController> {
    fn is_handshake_confirmed(&self) -> bool;

    fn path(&self) -> &Path<CC>;

    fn path_mut(&mut self) -> &mut Path<CC>;

    /// A packet was acknowledged by the peer
    fn on_packet_acked(&mut self, packet_number: PacketNumber, info: SentPacketInfo);

    /// A packet was declared lost
    fn on_packet_lost(&mut self, packet_number: PacketNumber, info: SentPacketInfo);

    /// The path RTT estimate changed
    fn on_rtt_update(&mut self) {}
}

/// Loss recovery for one packet number space, per RFC 9002
///
/// Also owns the space's send-side packet number sequence: numbers are
/// allocated here and committed when the packet is recorded as sent.
#[derive(Debug)]
pub struct Manager {
    space: PacketNumberSpace,

    /// The next packet number to use in this space; strictly increasing
    next_packet_number: PacketNumber,

    /// The largest packet number acknowledged by the peer, and when the
    /// acknowledgement arrived
    largest_acked_packet: Option<PacketNumber>,

    /// Packets pending acknowledgement
    sent_packets: SentPackets,

    /// Set when packets may be declared lost at a time in the future
    loss_timer: Timer,

    /// Probe timeout state
    pto: Pto,

    /// The time the most recent ack-eliciting packet was sent
    time_of_last_ack_eliciting_packet: Option<Timestamp>,
}

impl Manager {
    pub fn new(space: PacketNumberSpace) -> Self {
        Self {
            space,
            next_packet_number: space.new_packet_number(VarInt::ZERO),
            largest_acked_packet: None,
            sent_packets: SentPackets::default(),
            loss_timer: Timer::default(),
            pto: Pto::default(),
            time_of_last_ack_eliciting_packet: None,
        }
    }

    #[inline]
    pub fn space(&self) -> PacketNumberSpace {
        self.space
    }

    /// The number the next packet in this space will use
    ///
    /// Construction is speculative: the number is only consumed when the
    /// packet is recorded by [`Manager::on_packet_sent`], so an abandoned
    /// packet leaves no gap.
    #[inline]
    pub fn next_packet_number(&self) -> PacketNumber {
        self.next_packet_number
    }

    /// The truncation baseline for outgoing packet numbers
    #[inline]
    pub fn largest_acked_packet(&self) -> PacketNumber {
        self.largest_acked_packet
            .unwrap_or_else(|| self.space.new_packet_number(VarInt::ZERO))
    }

    #[inline]
    pub fn has_packets_in_flight(&self) -> bool {
        !self.sent_packets.is_empty()
    }

    /// Returns `true` if the send loop owes this space an ack-eliciting
    /// probe packet
    #[inline]
    pub fn requires_probe(&self) -> bool {
        self.pto.requires_transmission()
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#appendix-A.5
    //# After a packet is sent, information about the packet is stored.
    pub fn on_packet_sent<CC: CongestionController, Ctx: Context<CC>>(
        &mut self,
        packet_number: PacketNumber,
        info: SentPacketInfo,
        now: Timestamp,
        context: &mut Ctx,
    ) {
        debug_assert_eq!(packet_number.space(), self.space);
        debug_assert!(
            packet_number >= self.next_packet_number,
            "packet numbers are allocated in order"
        );
        self.next_packet_number = packet_number
            .next()
            .expect("packet number overflowed the space");

        let in_flight = info.in_flight;
        let ack_eliciting = info.ack_elicitation.is_ack_eliciting();
        let sent_bytes = info.sent_bytes as usize;

        self.sent_packets.insert(packet_number, info);

        if ack_eliciting {
            self.time_of_last_ack_eliciting_packet = Some(now);
            // a pending probe is satisfied by any ack-eliciting packet
            self.pto.on_probe_packet_sent();
        }

        if in_flight {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-7
            //# Similar to TCP, packets containing only ACK frames do not count
            //# towards bytes in flight and are not congestion controlled.
            let is_handshake_confirmed = context.is_handshake_confirmed();
            let path = context.path_mut();
            path.congestion_controller.on_packet_sent(now, sent_bytes);
            self.update_pto_timer(path, now, is_handshake_confirmed);
        }
    }

    /// Processes the ranges of an ACK frame received for this space
    pub fn on_ack<CC, Ctx, Ranges>(
        &mut self,
        ranges: Ranges,
        ack_delay: Duration,
        now: Timestamp,
        context: &mut Ctx,
    ) -> Result<(), transport::Error>
    where
        CC: CongestionController,
        Ctx: Context<CC>,
        Ranges: Iterator<Item = PacketNumberRange>,
    {
        #[derive(Clone, Copy)]
        struct Acked {
            packet_number: PacketNumber,
            time_sent: Timestamp,
            sent_bytes: u16,
            in_flight: bool,
            ack_eliciting: bool,
        }

        let mut newly_acked: SmallVec<[Acked; ACKED_PACKETS_INITIAL_CAPACITY]> = SmallVec::new();
        let mut largest_acked_in_frame: Option<PacketNumber> = None;

        for range in ranges {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-13.1
            //# An endpoint SHOULD treat receipt of an acknowledgment for a packet it
            //# did not send as a connection error of type PROTOCOL_VIOLATION, if it
            //# is able to detect the condition.
            if range.end() >= self.next_packet_number {
                return Err(transport::Error::PROTOCOL_VIOLATION
                    .with_reason("received an ACK for a packet that was not sent"));
            }

            largest_acked_in_frame =
                Some(largest_acked_in_frame.map_or(range.end(), |max| max.max(range.end())));

            for packet_number in range {
                if let Some(info) = self.sent_packets.remove(packet_number) {
                    newly_acked.push(Acked {
                        packet_number,
                        time_sent: info.time_sent,
                        sent_bytes: info.sent_bytes,
                        in_flight: info.in_flight,
                        ack_eliciting: info.ack_elicitation.is_ack_eliciting(),
                    });
                    context.on_packet_acked(packet_number, info);
                }
            }
        }

        let largest_acked_in_frame =
            largest_acked_in_frame.expect("ACK frames carry at least one range");

        // Update the largest acked packet if this frame advanced it
        self.largest_acked_packet = Some(
            self.largest_acked_packet
                .map_or(largest_acked_in_frame, |pn| pn.max(largest_acked_in_frame)),
        );

        if newly_acked.is_empty() {
            // Everything in the frame was already accounted for
            return Ok(());
        }

        let largest_newly_acked = newly_acked
            .iter()
            .max_by_key(|acked| acked.packet_number)
            .copied()
            .expect("checked for empty above");

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.1
        //# An endpoint generates an RTT sample on receiving an ACK frame that
        //# meets the following two conditions:
        //#
        //# *  the largest acknowledged packet number is newly acknowledged, and
        //#
        //# *  at least one of the newly acknowledged packets was ack-eliciting.
        let should_update_rtt = largest_newly_acked.packet_number == largest_acked_in_frame
            && newly_acked.iter().any(|acked| acked.ack_eliciting);

        if should_update_rtt {
            let latest_rtt = now.saturating_duration_since(largest_newly_acked.time_sent);
            let path = context.path_mut();
            path.rtt_estimator
                .update_rtt(ack_delay, latest_rtt, now, self.space);
            path.congestion_controller
                .on_rtt_update(largest_newly_acked.time_sent, &path.rtt_estimator);
            context.on_rtt_update();
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
        //# Once a later packet within the same packet number space has been
        //# acknowledged, an endpoint SHOULD declare an earlier packet lost if it
        //# was sent a threshold amount of time in the past.
        self.detect_and_remove_lost_packets(now, context);

        {
            let path = context.path_mut();
            for acked in &newly_acked {
                if acked.in_flight {
                    path.congestion_controller.on_packet_ack(
                        acked.time_sent,
                        acked.sent_bytes as usize,
                        &path.rtt_estimator,
                        now,
                    );
                }
            }
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# The PTO backoff factor is reset when an acknowledgment is received,
        //# except in the following case.  A server might take longer to respond
        //# to packets during the handshake than otherwise.  To protect such a
        //# server from repeated client probes, the PTO backoff is not reset at a
        //# client that is not yet certain that the server has finished
        //# validating the client's address.
        if context.path().is_peer_validated() {
            context.path_mut().reset_pto_backoff();
        }

        let is_handshake_confirmed = context.is_handshake_confirmed();
        self.update_pto_timer(context.path_mut(), now, is_handshake_confirmed);

        Ok(())
    }

    /// Updates the PTO timer
    pub fn update_pto_timer<CC: CongestionController>(
        &mut self,
        path: &Path<CC>,
        now: Timestamp,
        is_handshake_confirmed: bool,
    ) {
        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.2.1
        //# If no additional data can be sent, the server's PTO timer MUST NOT be
        //# armed until datagrams have been received from the client, because
        //# packets sent on PTO count against the anti-amplification limit.
        if path.at_amplification_limit() {
            self.pto.cancel();
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.2.1
        //# it is the client's responsibility to send packets to unblock the server
        //# until it is certain that the server has finished its address validation
        if self.sent_packets.is_empty() && path.is_peer_validated() {
            // There is nothing to detect lost, so no timer is set.
            // However, the client needs to arm the timer if the
            // server might be blocked by the anti-amplification limit.
            self.pto.cancel();
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# The PTO timer MUST NOT be set if a timer is set for time threshold
        //# loss detection; see Section 6.1.2.
        if self.loss_timer.is_armed() {
            self.pto.cancel();
            return;
        }

        let ack_eliciting_packets_in_flight = self
            .sent_packets
            .iter()
            .any(|(_, info)| info.in_flight && info.ack_elicitation.is_ack_eliciting());

        let pto_base_timestamp = if ack_eliciting_packets_in_flight {
            self.time_of_last_ack_eliciting_packet
                .expect("there is at least one ack eliciting packet in flight")
        } else {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.2.1
            //# That is, the client MUST set the probe timer if the client has not
            //# received an acknowledgement for any of its Handshake packets and
            //# the handshake is not confirmed (see Section 4.1.2 of [QUIC-TLS]),
            //# even if there are no packets in flight.
            now
        };

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# An endpoint MUST NOT set its PTO timer for the Application Data
        //# packet number space until the handshake is confirmed.
        if self.space.is_application_data() && !is_handshake_confirmed {
            self.pto.cancel();
        } else {
            self.pto
                .update(pto_base_timestamp, path.pto_period(self.space));
        }
    }

    /// Called when the unified connection timer fires
    pub fn on_timeout<CC: CongestionController, Ctx: Context<CC>>(
        &mut self,
        now: Timestamp,
        context: &mut Ctx,
    ) {
        if self.loss_timer.is_armed() {
            if self.loss_timer.poll_expiration(now).is_ready() {
                self.detect_and_remove_lost_packets(now, context);
            }
        } else {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2
            //# A PTO timer expiration event does not indicate packet loss and MUST
            //# NOT cause prior unacknowledged packets to be marked as lost.
            let pto_expired = self
                .pto
                .on_timeout(!self.sent_packets.is_empty(), now);

            //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
            //# When a PTO timer expires, the PTO backoff MUST be increased,
            //# resulting in the PTO period being set to twice its current value.
            if pto_expired {
                // the timer is rearmed by the on_packet_sent call that
                // immediately follows the probe transmission
                context.path_mut().pto_backoff *= 2;
            }
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
    //# When Initial or Handshake keys are discarded, packets from the space
    //# are discarded and loss detection state is reset.
    /// Drops all state for the space; remaining packets meet no fate
    pub fn on_space_discarded<CC: CongestionController>(&mut self, path: &mut Path<CC>) {
        debug_assert_ne!(self.space, PacketNumberSpace::ApplicationData);

        //= https://www.rfc-editor.org/rfc/rfc9002#appendix-B.9
        //# When Initial or Handshake keys are discarded, packets sent in that
        //# space no longer count toward bytes in flight.
        for (_, info) in self.sent_packets.drain() {
            if info.in_flight {
                path.congestion_controller
                    .on_packet_discarded(info.sent_bytes as usize);
            }
        }

        self.loss_timer.cancel();
        self.pto.cancel();
        path.reset_pto_backoff();
    }

    /// Returns all of the component timers
    pub fn timers(&self) -> impl Iterator<Item = Timestamp> + '_ {
        let is_loss_timer_armed = self.loss_timer.is_armed();

        core::iter::empty()
            .chain(self.pto.timers().filter(move |_| !is_loss_timer_armed))
            .chain(self.loss_timer.iter())
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#appendix-A.10
    //# DetectAndRemoveLostPackets is called every time an ACK is received or
    //# the time threshold loss detection timer expires.
    fn detect_and_remove_lost_packets<CC: CongestionController, Ctx: Context<CC>>(
        &mut self,
        now: Timestamp,
        context: &mut Ctx,
    ) {
        // Cancel the loss timer. It will be armed again if any
        // unacknowledged packets are older than the largest acked packet,
        // but not old enough to be considered lost yet.
        self.loss_timer.cancel();

        let largest_acked_packet = match self.largest_acked_packet {
            Some(largest) => largest,
            // loss is only declared relative to acknowledged packets
            None => return,
        };

        let time_threshold = context.path().rtt_estimator.loss_time_threshold();
        // Packets sent before this time are deemed lost.
        let lost_send_time = now.checked_sub(time_threshold);

        let mut lost_packets: SmallVec<[PacketNumber; ACKED_PACKETS_INITIAL_CAPACITY]> =
            SmallVec::new();

        for (unacked_packet_number, unacked_info) in self.sent_packets.iter() {
            if *unacked_packet_number > largest_acked_packet {
                // sent_packets is ordered by packet number, so all
                // remaining packets are larger
                break;
            }

            //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1
            //# A packet is declared lost if it meets all of the following
            //# conditions:
            //#
            //# *  The packet is unacknowledged, in flight, and was sent prior to
            //#    an acknowledged packet.
            //#
            //# *  The packet was sent kPacketThreshold packets before an
            //#    acknowledged packet (Section 6.1.1), or it was sent long enough
            //#    in the past (Section 6.1.2).
            let time_threshold_exceeded = lost_send_time
                .map_or(false, |lost_send_time| unacked_info.time_sent <= lost_send_time);

            let packet_number_threshold_exceeded = largest_acked_packet
                .checked_distance(*unacked_packet_number)
                .expect("largest_acked_packet >= unacked_packet_number")
                >= K_PACKET_THRESHOLD;

            if time_threshold_exceeded || packet_number_threshold_exceeded {
                lost_packets.push(*unacked_packet_number);
            } else {
                //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
                //# If packets sent prior to the largest acknowledged packet cannot
                //# yet be declared lost, then a timer SHOULD be set for the
                //# remaining time.
                self.loss_timer.set(unacked_info.time_sent + time_threshold);
                self.pto.cancel();

                // all remaining packets have a larger number and later
                // send time, and are thus not lost either
                break;
            }
        }

        let mut lost_bytes = 0u32;
        let mut newest_lost_time_sent = None;

        for packet_number in lost_packets {
            let info = self
                .sent_packets
                .remove(packet_number)
                .expect("the packet was present during detection");
            if info.in_flight {
                lost_bytes += info.sent_bytes as u32;
                newest_lost_time_sent = Some(info.time_sent);
            }
            context.on_packet_lost(packet_number, info);
        }

        if lost_bytes > 0 {
            let path = context.path_mut();
            path.congestion_controller.on_packets_lost(
                lost_bytes,
                newest_lost_time_sent.expect("in-flight bytes imply a send time"),
                now,
            );
        }
    }
}
