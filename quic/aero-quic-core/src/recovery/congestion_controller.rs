// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{recovery::RttEstimator, time::Timestamp};
use core::fmt::Debug;

/// Congestion control for a path
///
/// Loss recovery reports sent, acknowledged, lost and discarded bytes; the
/// controller answers whether new in-flight bytes may be sent. Packets
/// containing only ACK frames are not reported.
pub trait CongestionController: 'static + Clone + Send + Debug {
    /// Returns the size of the current congestion window in bytes
    fn congestion_window(&self) -> u32;

    /// Returns the current bytes in flight
    fn bytes_in_flight(&self) -> u32;

    /// Returns `true` if the congestion window does not have sufficient
    /// space for a packet of `max_datagram_size` considering the current
    /// bytes in flight
    fn is_congestion_limited(&self) -> bool;

    /// Returns `true` if the current state of the congestion controller
    /// requires a packet to be transmitted without respecting the
    /// available congestion window
    fn requires_fast_retransmission(&self) -> bool;

    /// Invoked when a packet is sent
    fn on_packet_sent(&mut self, time_sent: Timestamp, sent_bytes: usize);

    /// Invoked each time the round trip time is updated, which is whenever
    /// the largest acknowledged packet in an ACK frame is newly acknowledged
    fn on_rtt_update(&mut self, time_sent: Timestamp, rtt_estimator: &RttEstimator);

    /// Invoked when an acknowledgement of one or more previously
    /// unacknowledged packets is received
    fn on_packet_ack(
        &mut self,
        newest_acked_time_sent: Timestamp,
        bytes_acknowledged: usize,
        rtt_estimator: &RttEstimator,
        ack_receive_time: Timestamp,
    );

    /// Invoked when packets are declared lost
    fn on_packets_lost(
        &mut self,
        lost_bytes: u32,
        newest_lost_time_sent: Timestamp,
        timestamp: Timestamp,
    );

    /// Invoked for each packet discarded when a packet number space is
    /// discarded; the bytes leave flight without counting as a loss event
    fn on_packet_discarded(&mut self, bytes_sent: usize);

    /// Records whether the connection had data to fill the window
    ///
    /// An underutilized window must not grow on acknowledgements, otherwise
    /// idle periods accumulate send credit that would be released in a
    /// burst.
    fn set_underutilized(&mut self, underutilized: bool);

    /// Returns the value last given to `set_underutilized`
    fn is_underutilized(&self) -> bool;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    pub mod unlimited {
        use crate::{recovery::RttEstimator, time::Timestamp};

        /// A controller that never limits sending; for tests that exercise
        /// everything except congestion behavior
        #[derive(Clone, Debug, Default)]
        pub struct CongestionController {
            pub bytes_in_flight: u32,
            pub underutilized: bool,
            pub lost_bytes: u32,
            pub discarded_bytes: u32,
        }

        impl super::super::CongestionController for CongestionController {
            fn congestion_window(&self) -> u32 {
                u32::MAX
            }

            fn bytes_in_flight(&self) -> u32 {
                self.bytes_in_flight
            }

            fn is_congestion_limited(&self) -> bool {
                false
            }

            fn requires_fast_retransmission(&self) -> bool {
                false
            }

            fn on_packet_sent(&mut self, _time_sent: Timestamp, sent_bytes: usize) {
                self.bytes_in_flight += sent_bytes as u32;
            }

            fn on_rtt_update(&mut self, _time_sent: Timestamp, _rtt_estimator: &RttEstimator) {}

            fn on_packet_ack(
                &mut self,
                _newest_acked_time_sent: Timestamp,
                bytes_acknowledged: usize,
                _rtt_estimator: &RttEstimator,
                _ack_receive_time: Timestamp,
            ) {
                self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes_acknowledged as u32);
            }

            fn on_packets_lost(
                &mut self,
                lost_bytes: u32,
                _newest_lost_time_sent: Timestamp,
                _timestamp: Timestamp,
            ) {
                self.bytes_in_flight = self.bytes_in_flight.saturating_sub(lost_bytes);
                self.lost_bytes += lost_bytes;
            }

            fn on_packet_discarded(&mut self, bytes_sent: usize) {
                self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes_sent as u32);
                self.discarded_bytes += bytes_sent as u32;
            }

            fn set_underutilized(&mut self, underutilized: bool) {
                self.underutilized = underutilized;
            }

            fn is_underutilized(&self) -> bool {
                self.underutilized
            }
        }
    }
}
