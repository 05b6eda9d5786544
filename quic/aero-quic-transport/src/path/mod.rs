// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The network path to the peer: address validation state, round trip
//! estimates, congestion control and pacing
//!
//! Path migration is out of scope; a connection owns exactly one path.

use aero_quic_core::{
    packet::number::PacketNumberSpace,
    path::{INITIAL_PTO_BACKOFF, MINIMUM_MTU},
    recovery::{CongestionController, Pacer, RttEstimator},
    time::Timestamp,
    transmission,
};
use core::time::Duration;
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    /// Path has no transmission limitations
    Validated,

    /// Path has not been validated and is subject to amplification limits
    AmplificationLimited { tx_bytes: u32, rx_bytes: u32 },
}

#[derive(Debug)]
pub struct Path<CC: CongestionController> {
    /// The peer's socket address
    pub remote_address: SocketAddr,
    /// The path owns the roundtrip between peers
    pub rtt_estimator: RttEstimator,
    /// The congestion controller for the path
    pub congestion_controller: CC,
    /// Probe timeout backoff multiplier
    pub pto_backoff: u32,
    /// Paces new in-flight bytes onto the wire
    pacer: Pacer,
    /// Tracks whether this path has passed address validation
    state: State,
    /// Maximum transmission unit of the path
    mtu: u16,
    /// True if the peer has proven ownership of its address to us
    peer_validated: bool,
}

impl<CC: CongestionController> Path<CC> {
    pub fn new(
        remote_address: SocketAddr,
        rtt_estimator: RttEstimator,
        congestion_controller: CC,
        peer_validated: bool,
    ) -> Self {
        let pacer = Pacer::new(
            rtt_estimator.smoothed_rtt(),
            congestion_controller.congestion_window() as u64,
            MINIMUM_MTU,
        );

        Self {
            remote_address,
            rtt_estimator,
            congestion_controller,
            pto_backoff: INITIAL_PTO_BACKOFF,
            pacer,
            //= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
            //# If the client IP address has changed, the server MUST
            //# adhere to the anti-amplification limits found in Section 8.1.
            // Start each path amplification limited until it is validated.
            state: State::AmplificationLimited {
                tx_bytes: 0,
                rx_bytes: 0,
            },
            mtu: MINIMUM_MTU,
            peer_validated,
        }
    }

    /// Called when bytes have been transmitted on this path
    pub fn on_bytes_transmitted(&mut self, bytes: usize) {
        if bytes == 0 {
            return;
        }

        debug_assert_ne!(
            self.clamp_mtu(bytes),
            0,
            "path should not transmit when amplification limited"
        );

        if let State::AmplificationLimited { tx_bytes, .. } = &mut self.state {
            *tx_bytes += bytes as u32;
        }

        self.pacer.on_transmit(bytes as u16);
    }

    /// Called when bytes have been received on this path.
    /// Returns true if receiving these bytes unblocked the path from being
    /// amplification limited.
    pub fn on_bytes_received(&mut self, bytes: usize) -> bool {
        let was_at_amplification_limit = self.at_amplification_limit();

        //= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
        //# For the purposes of
        //# avoiding amplification prior to address validation, servers MUST
        //# count all of the payload bytes received in datagrams that are
        //# uniquely attributed to a single connection.
        if let State::AmplificationLimited { rx_bytes, .. } = &mut self.state {
            *rx_bytes += bytes as u32;
        }

        was_at_amplification_limit && !self.at_amplification_limit()
    }

    /// Called when the path is validated
    pub fn on_validated(&mut self) {
        self.state = State::Validated;
    }

    /// Returns whether this path has passed address validation
    pub fn is_validated(&self) -> bool {
        self.state == State::Validated
    }

    /// Marks the path as peer validated
    pub fn on_peer_validated(&mut self) {
        self.peer_validated = true;
    }

    /// Returns whether this path has been validated by the peer
    pub fn is_peer_validated(&self) -> bool {
        self.peer_validated
    }

    /// Clamps a requested transmission size to what MTU and, before
    /// validation, the amplification window allow
    pub fn clamp_mtu(&self, requested_size: usize) -> usize {
        match self.state {
            State::Validated => requested_size.min(self.mtu as usize),

            //= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
            //# Prior to validating the client address, servers MUST NOT send more
            //# than three times as many bytes as the number of bytes they have
            //# received.
            State::AmplificationLimited { tx_bytes, rx_bytes } => {
                let limit = rx_bytes
                    .checked_mul(3)
                    .and_then(|v| v.checked_sub(tx_bytes))
                    .unwrap_or(0);
                requested_size.min(limit as usize).min(self.mtu as usize)
            }
        }
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Returns whether this path is blocked by connection establishment
    /// amplification limits
    pub fn at_amplification_limit(&self) -> bool {
        let mtu = self.mtu as usize;
        self.clamp_mtu(mtu) < mtu
    }

    /// Derives the current transmission constraint and, when constrained,
    /// the earliest time it may relax
    pub fn transmission_constraint(
        &mut self,
        now: Timestamp,
    ) -> (transmission::Constraint, Option<Timestamp>) {
        if self.at_amplification_limit() {
            // only receiving more bytes can unblock the path; there is no
            // timer to wait on
            return (transmission::Constraint::AmplificationLimited, None);
        }

        if self.congestion_controller.is_congestion_limited() {
            if self.congestion_controller.requires_fast_retransmission() {
                //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
                //# If the congestion window is reduced immediately, a
                //# single packet can be sent prior to reduction.  This speeds up loss
                //# recovery if the data in the lost packet is retransmitted.
                return (transmission::Constraint::RetransmissionOnly, None);
            }
            //= https://www.rfc-editor.org/rfc/rfc9002#section-7
            //# An endpoint MUST NOT send a packet if it would cause bytes_in_flight
            //# (see Appendix B.2) to be larger than the congestion window
            return (transmission::Constraint::CongestionLimited, None);
        }

        let smoothed_rtt = self.rtt_estimator.smoothed_rtt();
        let window = self.congestion_controller.congestion_window() as u64;
        if let Some(next) = self.pacer.earliest_departure_time(
            smoothed_rtt,
            self.mtu as u64,
            self.mtu,
            window.max(1),
            now,
        ) {
            // pacing withholds new bytes exactly like a full window does
            return (transmission::Constraint::CongestionLimited, Some(next));
        }

        (transmission::Constraint::None, None)
    }

    /// Returns the current PTO period
    pub fn pto_period(&self, space: PacketNumberSpace) -> Duration {
        self.rtt_estimator.pto_period(self.pto_backoff, space)
    }

    /// Resets the PTO backoff to the initial value
    pub fn reset_pto_backoff(&mut self) {
        self.pto_backoff = INITIAL_PTO_BACKOFF;
    }
}
