// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The connection state machine
//!
//! A connection owns one path, up to three packet number spaces and one
//! packet writer. Sending is speculative: every tick builds packets for
//! each space with write keys, then keeps or abandons them depending on
//! whether they accumulated anything worth the bytes. Inbound datagrams,
//! acknowledgements and timeouts feed loss recovery, whose per-packet
//! verdicts are replayed from the packets' frame records.

use crate::{
    path::Path,
    recovery::{self, PacketFate, SentPacketInfo},
    sent_frames::SentFrame,
    space::{CryptoStream, PacketSpace, PacketSpaceManager},
    transmission::PacketWriter,
};
use aero_quic_core::{
    connection::ConnectionId,
    crypto::{self, PacketProtection},
    endpoint,
    frame::{self, FrameRef},
    packet::{
        long,
        number::{PacketNumber, PacketNumberSpace, TruncatedPacketNumber},
    },
    path::MINIMUM_INITIAL_DATAGRAM_LEN,
    recovery::CongestionController,
    time::{Timer, Timestamp},
    transmission::Constraint,
    transport,
    varint::VarInt,
};
use aero_codec::DecoderBuffer;
use core::time::Duration;
use std::net::SocketAddr;

mod limits;

pub use limits::Limits;

#[cfg(test)]
mod tests;

/// Where the connection is in its lifecycle
#[derive(Debug, PartialEq, Eq)]
enum State {
    /// Packets flow in both directions
    Active,
    /// A fatal error occurred locally; CONNECTION_CLOSE is owed to the peer
    Closing,
    /// The close was transmitted, or the peer closed; inbound is ignored
    /// until the drain period ends
    Draining,
    /// All state is released; the connection only reports that it is done
    Finished,
}

/// Writes a datagram towards the peer
///
/// Failures are logged and swallowed; the connection never fails on
/// egress errors and retries are the stack's concern, not ours.
pub trait DatagramSender {
    fn send_datagram(&mut self, payload: &[u8], remote_address: SocketAddr) -> std::io::Result<()>;
}

pub struct Connection<CC: CongestionController> {
    endpoint_type: endpoint::Type,
    local_id: ConnectionId,
    peer_id: ConnectionId,
    spaces: PacketSpaceManager,
    path: Path<CC>,
    writer: PacketWriter,
    limits: Limits,
    handshake_confirmed: bool,
    state: State,
    idle_timer: Timer,
    drain_timer: Timer,
    close_error: Option<transport::Error>,
}

impl<CC: CongestionController> Connection<CC> {
    pub fn new(
        endpoint_type: endpoint::Type,
        remote_address: SocketAddr,
        local_id: ConnectionId,
        peer_id: ConnectionId,
        congestion_controller: CC,
        limits: Limits,
        now: Timestamp,
    ) -> Self {
        let rtt_estimator =
            aero_quic_core::recovery::RttEstimator::new(limits.max_ack_delay);

        // A server treats the client address as implicitly validated by
        // its choice to connect; a client cannot consider the server
        // validated until the handshake confirms it (RFC 9002 A.6).
        let peer_validated = endpoint_type.is_server();

        let mut path = Path::new(remote_address, rtt_estimator, congestion_controller, peer_validated);
        if endpoint_type.is_client() {
            // amplification limits only bind servers
            path.on_validated();
        }

        let mut idle_timer = Timer::default();
        idle_timer.set(now + limits.max_idle_timeout);

        Self {
            endpoint_type,
            local_id,
            peer_id,
            spaces: PacketSpaceManager::default(),
            path,
            writer: PacketWriter::default(),
            limits,
            handshake_confirmed: false,
            state: State::Active,
            idle_timer,
            drain_timer: Timer::default(),
            close_error: None,
        }
    }

    #[inline]
    pub fn endpoint_type(&self) -> endpoint::Type {
        self.endpoint_type
    }

    #[inline]
    pub fn path(&self) -> &Path<CC> {
        &self.path
    }

    #[inline]
    pub fn path_mut(&mut self) -> &mut Path<CC> {
        &mut self.path
    }

    #[inline]
    pub fn spaces(&self) -> &PacketSpaceManager {
        &self.spaces
    }

    /// Returns `true` once the connection has fully terminated
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Returns `true` while the connection exchanges application packets
    #[inline]
    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }

    /// Installs key material for a space, creating the space on first use.
    /// This is the TLS collaborator's entry point for epoch changes.
    pub fn install_keys(
        &mut self,
        space: PacketNumberSpace,
        tx_protection: Option<PacketProtection>,
        rx_protection: Option<PacketProtection>,
    ) {
        self.spaces.install_keys(space, tx_protection, rx_protection);
    }

    /// Enqueues handshake bytes produced by the TLS collaborator
    pub fn write_crypto(&mut self, space: PacketNumberSpace, data: &[u8]) {
        self.spaces.install_keys(space, None, None);
        if let Some(space) = self.spaces.get_mut(space) {
            space.crypto.write(data);
        }
    }

    /// Hands assembled incoming CRYPTO bytes to the TLS collaborator
    pub fn read_crypto(&mut self, space: PacketNumberSpace) -> Option<Vec<u8>> {
        self.spaces.get_mut(space)?.crypto.take_assembled()
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#section-4.9.2
    //# An endpoint MUST discard its Handshake keys when the TLS handshake is
    //# confirmed (Section 4.1.2).
    /// Called by the TLS collaborator when the handshake is confirmed
    pub fn on_handshake_confirmed(&mut self) {
        self.handshake_confirmed = true;
        self.path.on_peer_validated();
        self.spaces.discard_handshake(&mut self.path);
    }

    /// Closes the connection with a locally detected error
    pub fn close(&mut self, error: transport::Error, now: Timestamp) {
        if self.state != State::Active {
            return;
        }

        tracing::debug!(?error, "connection closing");
        self.close_error = Some(error);
        self.state = State::Closing;
        self.idle_timer.cancel();
        self.arm_drain_timer(now);
    }

    /// The administrative exit path: all timers are invalidated and
    /// in-flight packets are dropped without dispatch
    pub fn exit(&mut self) {
        self.state = State::Finished;
        self.idle_timer.cancel();
        self.drain_timer.cancel();
    }

    /// The earliest deadline any component is waiting on
    pub fn next_timer_expiration(&self) -> Option<Timestamp> {
        match self.state {
            State::Finished => None,
            // only the end of the drain period matters once closed
            State::Closing | State::Draining => self.drain_timer.iter().next(),
            State::Active => core::iter::empty()
                .chain(self.idle_timer.iter())
                .chain(self.drain_timer.iter())
                .chain(self.spaces.timers())
                .min(),
        }
    }

    /// Advances every component whose timer has expired
    pub fn on_timeout(&mut self, now: Timestamp) {
        if self.state == State::Finished {
            return;
        }

        if self.drain_timer.poll_expiration(now).is_ready() {
            self.state = State::Finished;
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.1
        //# If a max_idle_timeout is specified by either endpoint in its
        //# transport parameters, the connection is silently closed and its
        //# state is discarded when it remains idle for longer than the minimum
        //# of the max_idle_timeout value advertised by both endpoints.
        if self.idle_timer.poll_expiration(now).is_ready() {
            tracing::debug!("idle timeout; connection discarded");
            self.state = State::Finished;
            return;
        }

        if self.state != State::Active {
            // loss recovery stops once the connection is closing
            return;
        }

        let Self {
            spaces,
            path,
            handshake_confirmed,
            ..
        } = self;

        for space_id in PacketNumberSpace::ALL {
            if let Some(space) = spaces.get_mut(space_id) {
                let PacketSpace {
                    ack_manager,
                    recovery,
                    crypto,
                    ..
                } = space;
                let mut context = RecoveryContext {
                    path: &mut *path,
                    ack_manager,
                    crypto,
                    handshake_confirmed: *handshake_confirmed,
                };
                recovery.on_timeout(now, &mut context);
            }
        }
    }
}

/// The recovery callback surface, borrowed fresh for every call into a
/// space's recovery manager
struct RecoveryContext<'a, CC: CongestionController> {
    path: &'a mut Path<CC>,
    ack_manager: &'a mut crate::ack::AckManager,
    crypto: &'a mut CryptoStream,
    handshake_confirmed: bool,
}

impl<'a, CC: CongestionController> recovery::Context<CC> for RecoveryContext<'a, CC> {
    fn is_handshake_confirmed(&self) -> bool {
        self.handshake_confirmed
    }

    fn path(&self) -> &Path<CC> {
        self.path
    }

    fn path_mut(&mut self) -> &mut Path<CC> {
        self.path
    }

    fn on_packet_acked(&mut self, _packet_number: PacketNumber, info: SentPacketInfo) {
        handle_packet_fate(self.ack_manager, self.crypto, info, PacketFate::Acked);
    }

    fn on_packet_lost(&mut self, packet_number: PacketNumber, info: SentPacketInfo) {
        tracing::debug!(packet_number = %packet_number, "packet declared lost");
        handle_packet_fate(self.ack_manager, self.crypto, info, PacketFate::Lost);
    }
}

/// Replays a resolved packet's frame record, releasing or re-enqueueing
/// whatever each frame referenced
///
/// Each record is consumed exactly once; the unknown-tag case inside the
/// replay iterator is a panic, not an error.
fn handle_packet_fate(
    ack_manager: &mut crate::ack::AckManager,
    crypto: &mut CryptoStream,
    info: SentPacketInfo,
    fate: PacketFate,
) {
    let space = ack_manager.space();

    for sent_frame in info.frames.replay() {
        match sent_frame {
            SentFrame::Ack { largest_acked } => {
                // A lost ACK frame is never retransmitted; ACKs are
                // regenerated from newer receive state. An acknowledged ACK
                // lets the manager stop reporting old ranges.
                if fate == PacketFate::Acked {
                    ack_manager.on_ack_frame_acked(space.new_packet_number(largest_acked));
                }
            }
            SentFrame::Crypto { offset, len } => {
                let len = len.as_u64() as usize;
                match fate {
                    PacketFate::Acked => crypto.on_frame_ack(offset, len),
                    PacketFate::Lost => crypto.on_frame_loss(offset, len),
                }
            }
            // a lost PING is simply forgotten; the probe either did its
            // job or the PTO fires again
            SentFrame::Ping => {}
        }
    }
}

impl<CC: CongestionController> Connection<CC> {
    /// The datagram budget for the next transmission
    fn max_send_size(&self) -> usize {
        self.path.clamp_mtu(self.path.mtu() as usize)
    }

    fn arm_drain_timer(&mut self, now: Timestamp) {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.2
        //# The closing and draining connection states exist to ensure that
        //# connections close cleanly and that delayed or reordered packets are
        //# properly discarded.  These states SHOULD persist for at least three
        //# times the current PTO interval as defined in [QUIC-RECOVERY].
        let pto = self.path.pto_period(PacketNumberSpace::ApplicationData);
        self.drain_timer.set(now + 3 * pto);
    }

    /// Builds and sends datagrams until a limit is hit or nothing is left
    /// to say; returns the next time sending may resume when limited
    pub fn on_transmit<Tx: DatagramSender>(
        &mut self,
        now: Timestamp,
        tx: &mut Tx,
    ) -> Option<Timestamp> {
        match self.state {
            State::Active => {}
            State::Closing => {
                self.transmit_close(now, tx);
                return None;
            }
            State::Draining | State::Finished => return None,
        }

        // Assumption: the congestion window is not underutilized. If
        // congestion control, pacing and anti-amplification all permit
        // sending, but no packet comes out of the writer, the assumption
        // is revised below.
        self.path.congestion_controller.set_underutilized(false);

        // Send one datagram per iteration until a limit is hit or there is
        // no data worth sending. Speculatively constructing packets means
        // there is no separate "do we have data?" code path that would
        // have to be kept in sync with the writers.
        loop {
            let (constraint, next_time) = self.path.transmission_constraint(now);
            if constraint.is_amplification_limited() {
                //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.2.1
                //# If no additional data can be sent, the server's PTO timer
                //# MUST NOT be armed until datagrams have been received from
                //# the client
                // nothing may leave, not even ACK-only packets
                return next_time;
            }

            let max_len = self.max_send_size();
            let Self {
                endpoint_type,
                local_id,
                peer_id,
                spaces,
                path,
                writer,
                handshake_confirmed,
                ..
            } = self;
            let endpoint_type = *endpoint_type;
            let handshake_confirmed = *handshake_confirmed;

            writer.reset(max_len);

            // Initial packet. Recording it with loss recovery is deferred
            // past the padding decision at the bottom of the loop.
            let mut pending_initial: Option<(PacketNumber, SentPacketInfo)> = None;
            let mut pad_datagram = false;
            if let Some(space) = spaces.initial_mut() {
                if space.can_send() {
                    let packet_number = space.recovery.next_packet_number();
                    if let Some(info) = build_long_packet(
                        writer,
                        long::Kind::Initial,
                        space,
                        packet_number,
                        peer_id,
                        local_id,
                        constraint,
                        now,
                    ) {
                        //= https://www.rfc-editor.org/rfc/rfc9000#section-14.1
                        //# Similarly, a server MUST expand the payload of all UDP
                        //# datagrams carrying ack-eliciting Initial packets to at
                        //# least the smallest allowed maximum datagram size of
                        //# 1200 bytes.
                        if endpoint_type.is_client()
                            || info.ack_elicitation.is_ack_eliciting()
                        {
                            pad_datagram = true;
                        }
                        pending_initial = Some((packet_number, info));
                    }
                }
            }

            // Handshake packet
            let mut sent_handshake = false;
            if let Some(space) = spaces.handshake_mut() {
                if space.can_send() {
                    let packet_number = space.recovery.next_packet_number();
                    if let Some(info) = build_long_packet(
                        writer,
                        long::Kind::Handshake,
                        space,
                        packet_number,
                        peer_id,
                        local_id,
                        constraint,
                        now,
                    ) {
                        let PacketSpace {
                            ack_manager,
                            recovery,
                            crypto,
                            ..
                        } = space;
                        let mut context = RecoveryContext {
                            path: &mut *path,
                            ack_manager,
                            crypto,
                            handshake_confirmed,
                        };
                        recovery.on_packet_sent(packet_number, info, now, &mut context);
                        sent_handshake = true;
                    }
                }
            }

            // 1-RTT packet
            if let Some(space) = spaces.application_mut() {
                if space.can_send() {
                    let packet_number = space.recovery.next_packet_number();
                    if let Some(info) = build_short_packet(
                        writer,
                        space,
                        packet_number,
                        peer_id,
                        constraint,
                        now,
                        // 1-RTT packets have no Length field and extend to
                        // the end of the datagram, so required padding has
                        // to land inside this packet's payload
                        pad_datagram.then_some(MINIMUM_INITIAL_DATAGRAM_LEN),
                    ) {
                        pad_datagram = false;
                        let PacketSpace {
                            ack_manager,
                            recovery,
                            crypto,
                            ..
                        } = space;
                        let mut context = RecoveryContext {
                            path: &mut *path,
                            ack_manager,
                            crypto,
                            handshake_confirmed,
                        };
                        recovery.on_packet_sent(packet_number, info, now, &mut context);
                    }
                }
            }

            if writer.is_empty() {
                if constraint.can_transmit() {
                    // We have nothing to send and nothing is blocking
                    // sending: the congestion window is underutilized.
                    path.congestion_controller.set_underutilized(true);
                }
                return next_time;
            }

            if let Some((packet_number, mut info)) = pending_initial.take() {
                if pad_datagram {
                    //= https://www.rfc-editor.org/rfc/rfc9000#section-14.1
                    //# Initial packets sent by a client MUST be sent in a UDP
                    //# datagram with a payload of at least 1200 bytes.
                    // The padding bytes coalesce after the Initial packet as
                    // data the peer will ignore, but they are accounted to
                    // the Initial packet for loss recovery and congestion.
                    let added = writer.pad_datagram_to(MINIMUM_INITIAL_DATAGRAM_LEN);
                    info.sent_bytes += added as u16;
                    if added > 0 {
                        info.in_flight = true;
                    }
                }

                // The space may have vanished between construction and
                // here; nothing is recorded for a discarded space.
                if let Some(space) = spaces.initial_mut() {
                    let PacketSpace {
                        ack_manager,
                        recovery,
                        crypto,
                        ..
                    } = space;
                    let mut context = RecoveryContext {
                        path: &mut *path,
                        ack_manager,
                        crypto,
                        handshake_confirmed,
                    };
                    recovery.on_packet_sent(packet_number, info, now, &mut context);
                }
            }

            //= https://www.rfc-editor.org/rfc/rfc9001#section-4.9.1
            //# Thus, a client MUST discard Initial keys when it first sends a
            //# Handshake packet
            if endpoint_type.is_client() && sent_handshake {
                spaces.discard_initial(path);
            }

            let datagram = writer.datagram();
            path.on_bytes_transmitted(datagram.len());
            if let Err(error) = tx.send_datagram(datagram, path.remote_address) {
                tracing::warn!(?error, "datagram send failed");
            }
        }
    }

    /// Sends the owed CONNECTION_CLOSE and enters the drain period
    fn transmit_close<Tx: DatagramSender>(&mut self, now: Timestamp, tx: &mut Tx) {
        debug_assert_eq!(self.state, State::Closing);

        let error = self.close_error.unwrap_or(transport::Error::INTERNAL_ERROR);
        let close_frame: frame::ConnectionClose = error.into();

        // the close is sent in the latest space with write keys, which is
        // the newest epoch the peer is known to be able to read
        let max_len = self.max_send_size();
        let Self {
            spaces,
            writer,
            peer_id,
            local_id,
            path,
            ..
        } = self;

        writer.reset(max_len);

        let sealed = if let Some(space) = spaces.application_mut().filter(|space| space.can_send()) {
            let protection = space.tx_protection.as_ref().expect("checked by can_send");
            writer.start_short_packet(
                space.recovery.next_packet_number(),
                space.recovery.largest_acked_packet(),
                peer_id,
                protection,
            ) && writer.append_connection_close_frame(&close_frame)
                && writer.finish_packet(protection, now).is_some()
        } else {
            // fall back to the newest long header space with write keys
            let space_and_kind = match spaces.handshake_mut().filter(|space| space.can_send()) {
                Some(space) => Some((space, long::Kind::Handshake)),
                None => spaces
                    .initial_mut()
                    .filter(|space| space.can_send())
                    .map(|space| (space, long::Kind::Initial)),
            };

            match space_and_kind {
                Some((space, kind)) => {
                    let protection = space.tx_protection.as_ref().expect("checked by can_send");
                    writer.start_long_packet(
                        kind,
                        space.recovery.next_packet_number(),
                        space.recovery.largest_acked_packet(),
                        peer_id,
                        local_id,
                        protection,
                    ) && writer.append_connection_close_frame(&close_frame)
                        && writer.finish_packet(protection, now).is_some()
                }
                None => false,
            }
        };

        if sealed && !writer.is_empty() {
            path.on_bytes_transmitted(writer.datagram_len());
            if let Err(error) = tx.send_datagram(writer.datagram(), path.remote_address) {
                tracing::warn!(?error, "connection close send failed");
            }
        }

        self.state = State::Draining;
    }
}

/// Fills a started packet per the send-tick ordering: ACK first, then
/// (re)transmitted CRYPTO data, then a probing PING when owed. Returns
/// `false` when the packet was abandoned because the speculative ACK was
/// not worth sending on its own.
fn append_frames(
    writer: &mut PacketWriter,
    space: &mut PacketSpace,
    constraint: Constraint,
    now: Timestamp,
) -> bool {
    let should_send_ack = space.ack_manager.should_send_ack(now);

    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.5
    //# Probe packets MUST NOT be blocked by the congestion controller.
    let constraint = if space.recovery.requires_probe() {
        Constraint::None
    } else {
        constraint
    };

    if !constraint.can_retransmit() {
        // ACKs are not limited by congestion control or pacing
        if should_send_ack {
            if let Some((ranges, ack_delay)) = space.ack_manager.acks_to_send(now) {
                if writer.append_ack_frame(ranges, ack_delay) {
                    space.ack_manager.on_ack_sent();
                }
            }
        }
        return true;
    }

    // We want to send an ACK frame if the ack manager wants one out now,
    // OR if this packet is leaving anyway and unreported ack-eliciting
    // receptions exist. The ACK is written speculatively in front so that
    // it never gets truncated; whether it was worth it is decided after
    // the other appenders ran.
    let mut ack_appended = false;
    if let Some((ranges, ack_delay)) = space.ack_manager.acks_to_send(now) {
        ack_appended = writer.append_ack_frame(ranges, ack_delay);
    }

    // Lost CRYPTO data first, then new data; the queue is offset ordered
    // so retransmissions naturally sort in front.
    loop {
        let next = if constraint.can_transmit() {
            space.crypto.next_transmission()
        } else {
            space.crypto.next_retransmission()
        };

        let Some((offset, data)) = next else { break };
        match writer.append_crypto_frame(offset, data) {
            Some(len) => space.crypto.on_data_sent(offset, len),
            None => break,
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.4
    //# When there is no data to send, the sender SHOULD send
    //# a PING or other ack-eliciting frame in a single packet, re-arming the
    //# PTO timer.
    if space.recovery.requires_probe() && !writer.is_ack_eliciting() {
        writer.append_ping_frame();
    }

    if ack_appended {
        if should_send_ack || writer.is_ack_eliciting() {
            // Either the ACK is due now, or other frames made this packet
            // worth sending and the ACK rides along.
            space.ack_manager.on_ack_sent();
        } else {
            // Nothing in this packet but the speculative ACK, and no ACK
            // is due. Abandoning means the ACK was encoded for nothing,
            // but encoding it was cheap.
            writer.abandon_packet();
            return false;
        }
    }

    true
}

fn build_long_packet(
    writer: &mut PacketWriter,
    kind: long::Kind,
    space: &mut PacketSpace,
    packet_number: PacketNumber,
    dcid: &ConnectionId,
    scid: &ConnectionId,
    constraint: Constraint,
    now: Timestamp,
) -> Option<SentPacketInfo> {
    {
        let protection = space.tx_protection.as_ref()?;
        if !writer.start_long_packet(
            kind,
            packet_number,
            space.recovery.largest_acked_packet(),
            dcid,
            scid,
            protection,
        ) {
            return None;
        }
    }

    if !append_frames(writer, space, constraint, now) {
        return None;
    }

    let protection = space.tx_protection.as_ref()?;
    writer.finish_packet(protection, now)
}

fn build_short_packet(
    writer: &mut PacketWriter,
    space: &mut PacketSpace,
    packet_number: PacketNumber,
    dcid: &ConnectionId,
    constraint: Constraint,
    now: Timestamp,
    pad_to: Option<usize>,
) -> Option<SentPacketInfo> {
    {
        let protection = space.tx_protection.as_ref()?;
        if !writer.start_short_packet(
            packet_number,
            space.recovery.largest_acked_packet(),
            dcid,
            protection,
        ) {
            return None;
        }
    }

    if !append_frames(writer, space, constraint, now) {
        return None;
    }

    if let Some(target_len) = pad_to {
        if writer.has_payload() {
            writer.append_padding_to(target_len);
        }
    }

    let protection = space.tx_protection.as_ref()?;
    writer.finish_packet(protection, now)
}

/// What processing one packet of a datagram yielded
struct PacketOutcome {
    /// Bytes consumed from the datagram, including undecryptable packets
    /// that were skipped over
    consumed: usize,
    /// `true` if the packet authenticated and its frames were processed
    processed: bool,
    /// `true` if the packet carried CONNECTION_CLOSE
    close_received: bool,
}

impl PacketOutcome {
    fn skipped(consumed: usize) -> Self {
        Self {
            consumed,
            processed: false,
            close_received: false,
        }
    }
}

/// The pre-protection fields of a long header packet
struct LongHeader {
    kind: long::Kind,
    pn_offset: usize,
    total_len: usize,
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-12.2
//# Senders can coalesce multiple QUIC packets into one UDP datagram.
/// Parses the length-delimited portion of a long header packet
///
/// Failures are not errors: a packet that cannot be parsed is dropped
/// without affecting the connection.
fn parse_long_header(packet: &[u8]) -> Option<LongHeader> {
    let buffer = DecoderBuffer::new(packet);
    let first = buffer.peek_byte(0).ok()?;
    let kind = long::Kind::from_first_byte(first)?;
    let buffer = buffer.skip(1).ok()?;

    let (version, buffer) = buffer.decode::<u32>().ok()?;
    if version != long::VERSION {
        return None;
    }

    let (dcid_len, buffer) = buffer.decode::<u8>().ok()?;
    let (_dcid, buffer) = buffer.decode_slice(dcid_len as usize).ok()?;
    let (scid_len, buffer) = buffer.decode::<u8>().ok()?;
    let (_scid, buffer) = buffer.decode_slice(scid_len as usize).ok()?;

    let buffer = if kind == long::Kind::Initial {
        let (_token, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>().ok()?;
        buffer
    } else {
        buffer
    };

    let (length, buffer) = buffer.decode::<VarInt>().ok()?;
    let pn_offset = packet.len() - buffer.len();
    let total_len = pn_offset.checked_add(length.as_u64() as usize)?;
    if total_len > packet.len() {
        return None;
    }

    Some(LongHeader {
        kind,
        pn_offset,
        total_len,
    })
}

impl<CC: CongestionController> Connection<CC> {
    /// Processes one received datagram of possibly coalesced packets
    pub fn on_datagram(&mut self, now: Timestamp, datagram: &mut [u8]) {
        if self.state != State::Active {
            // during the drain period inbound traffic is ignored entirely
            return;
        }

        let unblocked = self.path.on_bytes_received(datagram.len());
        if unblocked {
            tracing::debug!("anti-amplification window reopened");
        }

        let mut offset = 0;
        let mut processed_any = false;

        while offset < datagram.len() {
            let packet = &mut datagram[offset..];
            let result = if long::is_long_header(packet[0]) {
                self.process_long_packet(now, packet)
            } else {
                self.process_short_packet(now, packet)
            };

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(error) => {
                    //= https://www.rfc-editor.org/rfc/rfc9000#section-10.2
                    //# An endpoint that detects a lower layer error or a
                    //# protocol violation sends a CONNECTION_CLOSE frame
                    self.close(error, now);
                    return;
                }
            };

            processed_any |= outcome.processed;

            if outcome.close_received {
                //= https://www.rfc-editor.org/rfc/rfc9000#section-10.2.2
                //# An endpoint that receives a CONNECTION_CLOSE frame enters
                //# the draining state
                tracing::debug!("peer closed the connection");
                self.state = State::Draining;
                self.idle_timer.cancel();
                self.arm_drain_timer(now);
                return;
            }

            if outcome.consumed == 0 {
                break;
            }
            offset += outcome.consumed;
        }

        if processed_any {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-10.1
            //# An endpoint restarts its idle timer when a packet from its peer is
            //# received and processed successfully.
            self.idle_timer.set(now + self.limits.max_idle_timeout);
        }
    }

    fn process_long_packet(
        &mut self,
        now: Timestamp,
        packet: &mut [u8],
    ) -> Result<PacketOutcome, transport::Error> {
        let header = match parse_long_header(packet) {
            Some(header) => header,
            None => {
                // wire-parse failure: silently drop the rest of the datagram
                tracing::debug!("dropping unparsable long header packet");
                return Ok(PacketOutcome::skipped(packet.len()));
            }
        };

        let space_id = match header.kind {
            long::Kind::Initial => PacketNumberSpace::Initial,
            long::Kind::Handshake => PacketNumberSpace::Handshake,
        };

        self.process_protected_packet(
            now,
            space_id,
            &mut packet[..header.total_len],
            header.pn_offset,
        )
        .map(|mut outcome| {
            outcome.consumed = header.total_len;
            outcome
        })
    }

    fn process_short_packet(
        &mut self,
        now: Timestamp,
        packet: &mut [u8],
    ) -> Result<PacketOutcome, transport::Error> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-12.2
        //# A packet with a short header does not include a
        //# length, so it can only be the last packet included in a UDP
        //# datagram.
        let pn_offset = 1 + self.local_id.len();
        if packet.len() <= pn_offset {
            return Ok(PacketOutcome::skipped(packet.len()));
        }

        let total_len = packet.len();
        self.process_protected_packet(now, PacketNumberSpace::ApplicationData, packet, pn_offset)
            .map(|mut outcome| {
                outcome.consumed = total_len;
                outcome
            })
    }

    /// Removes protection, decodes the packet number, authenticates the
    /// payload and dispatches its frames
    fn process_protected_packet(
        &mut self,
        now: Timestamp,
        space_id: PacketNumberSpace,
        packet: &mut [u8],
        pn_offset: usize,
    ) -> Result<PacketOutcome, transport::Error> {
        let skipped = PacketOutcome::skipped(packet.len());

        let Self {
            endpoint_type,
            spaces,
            path,
            handshake_confirmed,
            ..
        } = self;
        let endpoint_type = *endpoint_type;
        let handshake_confirmed = *handshake_confirmed;

        let Some(space) = spaces.get_mut(space_id) else {
            // no keys for this epoch (not yet installed or discarded)
            return Ok(skipped);
        };
        let Some(protection) = space.rx_protection.as_ref() else {
            return Ok(skipped);
        };

        let Ok(pn_len) = crypto::unprotect(protection.header_key.as_ref(), packet, pn_offset)
        else {
            return Ok(skipped);
        };

        let packet_number_len = space_id.new_packet_number_len(packet[0]);
        debug_assert_eq!(packet_number_len.bytesize(), pn_len);

        let truncated = match TruncatedPacketNumber::decode(
            DecoderBuffer::new(&packet[pn_offset..pn_offset + pn_len]),
            packet_number_len,
        ) {
            Ok((truncated, _)) => truncated,
            Err(_) => return Ok(skipped),
        };

        let largest_received = space
            .ack_manager
            .largest_received_packet_number()
            .unwrap_or_else(|| space_id.new_packet_number(VarInt::ZERO));
        let packet_number = truncated.expand(largest_received);

        //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.3
        //# A receiver MUST retain an ACK Range unless it can ensure that it
        //# will not subsequently accept packets with numbers in that range.
        if space.ack_manager.is_duplicate(packet_number) {
            return Ok(skipped);
        }

        let tag_len = protection.key.tag_len();
        let (header, payload) = packet.split_at_mut(pn_offset + pn_len);
        if payload.len() < tag_len {
            return Ok(skipped);
        }

        if protection
            .key
            .decrypt(packet_number.as_u64(), header, payload)
            .is_err()
        {
            // decryption failure: drop without any state change
            tracing::debug!(space = ?space_id, "dropping undecryptable packet");
            return Ok(skipped);
        }

        let frames_len = payload.len() - tag_len;
        let frames = &payload[..frames_len];

        //= https://www.rfc-editor.org/rfc/rfc9000#section-12.4
        //# An endpoint MUST treat receipt of a packet containing no frames
        //# as a connection error of type PROTOCOL_VIOLATION.
        if frames.is_empty() {
            return Err(transport::Error::PROTOCOL_VIOLATION.with_reason("packet with no frames"));
        }

        let PacketSpace {
            ack_manager,
            recovery,
            crypto,
            ..
        } = space;

        let mut ack_eliciting = false;
        let mut close_received = false;
        let mut buffer = DecoderBuffer::new(frames);

        while !buffer.is_empty() {
            let (frame, remaining) = FrameRef::decode(buffer).map_err(|_| {
                transport::Error::FRAME_ENCODING_ERROR.with_reason("malformed frame")
            })?;

            match frame {
                FrameRef::Padding(_) => {}
                FrameRef::Ping(_) => {
                    ack_eliciting = true;
                }
                FrameRef::Ack(ack) => {
                    let ack_delay = ack_manager.decode_ack_delay(ack.ack_delay());
                    let mut context = RecoveryContext {
                        path: &mut *path,
                        ack_manager: &mut *ack_manager,
                        crypto: &mut *crypto,
                        handshake_confirmed,
                    };
                    recovery.on_ack(ack.pn_range_iter(space_id), ack_delay, now, &mut context)?;
                }
                FrameRef::Crypto(frame) => {
                    ack_eliciting = true;
                    crypto.on_crypto_frame(frame)?;
                }
                FrameRef::ConnectionClose(close) => {
                    //= https://www.rfc-editor.org/rfc/rfc9000#section-19.19
                    //# A CONNECTION_CLOSE frame of type 0x1d MUST be replaced
                    //# by a CONNECTION_CLOSE frame of type 0x1c when sent in an
                    //# Initial or Handshake packet.
                    if close.frame_type.is_none() && !space_id.is_application_data() {
                        return Err(transport::Error::PROTOCOL_VIOLATION
                            .with_reason("application close in a handshake packet")
                            .with_frame_type(VarInt::from_u8(0x1d)));
                    }
                    close_received = true;
                }
            }

            buffer = remaining;
        }

        ack_manager.on_packet_received(packet_number, ack_eliciting, now);

        //= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
        //# Once an endpoint has successfully processed a Handshake packet from
        //# the peer, it can consider the peer address to have been validated.
        if endpoint_type.is_server() && space_id.is_handshake() {
            path.on_validated();
        }

        Ok(PacketOutcome {
            consumed: packet.len(),
            processed: true,
            close_received,
        })
    }
}
