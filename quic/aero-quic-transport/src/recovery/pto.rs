// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use aero_quic_core::time::{Timer, Timestamp};
use core::time::Duration;

/// Manages the probe timeout calculation and probe packet accounting
#[derive(Debug, Default)]
pub struct Pto {
    pub(crate) timer: Timer,
    pub(crate) state: PtoState,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub enum PtoState {
    #[default]
    Idle,
    /// The timer fired; this many ack-eliciting probe packets are owed
    RequiresTransmission(u8),
}

impl Pto {
    /// Returns an iterator containing the probe timeout timestamp
    pub fn timers(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.timer.iter()
    }

    /// Called when a timeout has occurred. Returns true if the PTO timer
    /// had expired.
    pub fn on_timeout(&mut self, packets_in_flight: bool, timestamp: Timestamp) -> bool {
        if self.timer.poll_expiration(timestamp).is_ready() {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.4
            //# When a PTO timer expires, a sender MUST send at least one ack-
            //# eliciting packet in the packet number space as a probe.

            //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.4
            //# An endpoint MAY send up to two full-sized datagrams containing
            //# ack-eliciting packets to avoid an expensive consecutive PTO
            //# expiration due to a single lost datagram, or to transmit data
            //# from multiple packet number spaces.
            let transmission_count = if packets_in_flight { 2 } else { 1 };

            self.state = PtoState::RequiresTransmission(transmission_count);
            true
        } else {
            false
        }
    }

    /// Returns `true` while probe packets are owed
    pub fn requires_transmission(&self) -> bool {
        matches!(self.state, PtoState::RequiresTransmission(_))
    }

    /// Called when an ack-eliciting packet leaves while probes are owed
    pub fn on_probe_packet_sent(&mut self) {
        if let PtoState::RequiresTransmission(remaining) = self.state {
            self.state = match remaining - 1 {
                0 => PtoState::Idle,
                remaining => PtoState::RequiresTransmission(remaining),
            };
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
    //# A sender SHOULD restart its PTO timer every time an ack-eliciting
    //# packet is sent or acknowledged, when the handshake is confirmed
    //# (Section 4.1.2 of [QUIC-TLS]), or when Initial or Handshake keys are
    //# discarded (Section 4.9 of [QUIC-TLS]).
    pub fn update(&mut self, base_timestamp: Timestamp, pto_period: Duration) {
        self.timer.set(base_timestamp + pto_period);
    }

    /// Cancels the PTO timer
    pub fn cancel(&mut self) {
        self.timer.cancel();
    }
}
