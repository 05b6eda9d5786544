// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    path::MINIMUM_MTU,
    recovery::{CongestionController, RttEstimator},
    time::Timestamp,
};

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.2
//# Endpoints SHOULD use an initial congestion
//# window of ten times the maximum datagram size (max_datagram_size),
//# while limiting the window to the larger of 14,720 bytes or twice the
//# maximum datagram size.
fn initial_window(max_datagram_size: u16) -> u32 {
    let max_datagram_size = max_datagram_size as u32;
    (10 * max_datagram_size).min(14_720.max(2 * max_datagram_size))
}

/// A NewReno congestion controller, per RFC 9002 Section 7
#[derive(Clone, Debug)]
pub struct NewReno {
    max_datagram_size: u16,
    congestion_window: u32,
    bytes_in_flight: u32,
    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.1
    //# While a sender is in slow start, the congestion window increases by
    //# the number of bytes acknowledged when each acknowledgment is
    //# processed.
    slow_start_threshold: u32,
    /// Bytes acknowledged since the window last grew in congestion
    /// avoidance (RFC 3465 appropriate byte counting)
    bytes_acked: u32,
    /// The start of the current recovery period, if any. Packets sent
    /// before this time do not trigger another window reduction.
    recovery_start_time: Option<Timestamp>,
    /// Set when entering recovery; permits one fast retransmission packet
    fast_retransmission: bool,
    underutilized: bool,
}

impl NewReno {
    pub fn new(max_datagram_size: u16) -> Self {
        Self {
            max_datagram_size,
            congestion_window: initial_window(max_datagram_size),
            bytes_in_flight: 0,
            slow_start_threshold: u32::MAX,
            bytes_acked: 0,
            recovery_start_time: None,
            fast_retransmission: false,
            underutilized: false,
        }
    }

    fn minimum_window(&self) -> u32 {
        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.2
        //# The RECOMMENDED
        //# minimum congestion window is two times the maximum datagram size.
        2 * self.max_datagram_size as u32
    }

    fn is_in_recovery(&self, time_sent: Timestamp) -> bool {
        self.recovery_start_time
            .map_or(false, |recovery_start| time_sent <= recovery_start)
    }
}

impl CongestionController for NewReno {
    fn congestion_window(&self) -> u32 {
        self.congestion_window
    }

    fn bytes_in_flight(&self) -> u32 {
        self.bytes_in_flight
    }

    fn is_congestion_limited(&self) -> bool {
        let available = self.congestion_window.saturating_sub(self.bytes_in_flight);
        available < self.max_datagram_size as u32
    }

    fn requires_fast_retransmission(&self) -> bool {
        self.fast_retransmission
    }

    fn on_packet_sent(&mut self, _time_sent: Timestamp, sent_bytes: usize) {
        self.bytes_in_flight += sent_bytes as u32;
        self.fast_retransmission = false;
    }

    fn on_rtt_update(&mut self, _time_sent: Timestamp, _rtt_estimator: &RttEstimator) {}

    fn on_packet_ack(
        &mut self,
        newest_acked_time_sent: Timestamp,
        bytes_acknowledged: usize,
        _rtt_estimator: &RttEstimator,
        _ack_receive_time: Timestamp,
    ) {
        let bytes_acknowledged = bytes_acknowledged as u32;
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes_acknowledged);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
        //# A recovery period ends and the sender enters congestion avoidance
        //# when a packet sent during the recovery period is acknowledged.
        if self.is_in_recovery(newest_acked_time_sent) {
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.8
        //# When bytes in flight is smaller than the congestion window and
        //# sending is not pacing limited, the congestion window is
        //# underutilized.  When this occurs, the congestion window SHOULD NOT
        //# be increased in either slow start or congestion avoidance.
        if self.underutilized {
            return;
        }

        if self.congestion_window < self.slow_start_threshold {
            // Slow start
            self.congestion_window += bytes_acknowledged;

            if self.congestion_window >= self.slow_start_threshold {
                // Bytes over the threshold count towards congestion
                // avoidance regardless of where the window stood
                self.bytes_acked = self.congestion_window - self.slow_start_threshold;
            }
        } else {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.3
            //# a sender utilizes congestion avoidance to limit the
            //# increase of the congestion window to one maximum datagram size for
            //# each congestion window that is acknowledged.
            self.bytes_acked += bytes_acknowledged;

            if self.bytes_acked >= self.congestion_window {
                self.bytes_acked -= self.congestion_window;
                self.congestion_window += self.max_datagram_size as u32;
            }
        }
    }

    fn on_packets_lost(
        &mut self,
        lost_bytes: u32,
        newest_lost_time_sent: Timestamp,
        timestamp: Timestamp,
    ) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(lost_bytes);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
        //# A sender enters a recovery period when it detects the loss of a
        //# packet.  ...  Because the packet
        //# or ECN-CE marking already identifies a congestion event, entering
        //# recovery from a packet sent during an existing recovery period
        //# does not trigger another window reduction.
        if self.is_in_recovery(newest_lost_time_sent) {
            return;
        }

        self.recovery_start_time = Some(timestamp);
        self.fast_retransmission = true;

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
        //# On entering a recovery period, a sender MUST set the slow start
        //# threshold to half the value of the congestion window when loss is
        //# detected.
        self.congestion_window = (self.congestion_window / 2).max(self.minimum_window());
        self.slow_start_threshold = self.congestion_window;
        self.bytes_acked = 0;
    }

    fn on_packet_discarded(&mut self, bytes_sent: usize) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes_sent as u32);
    }

    fn set_underutilized(&mut self, underutilized: bool) {
        self.underutilized = underutilized;
    }

    fn is_underutilized(&self) -> bool {
        self.underutilized
    }
}
