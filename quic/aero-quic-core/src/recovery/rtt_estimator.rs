// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{packet::number::PacketNumberSpace, recovery::K_GRANULARITY, time::Timestamp};
use core::{cmp::max, time::Duration};

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.2
//# When no previous RTT is available, the initial RTT
//# SHOULD be set to 333ms.
pub const DEFAULT_INITIAL_RTT: Duration = Duration::from_millis(333);

/// Round trip estimates for a path, per RFC 9002 Section 5
#[derive(Clone, Copy, Debug)]
pub struct RttEstimator {
    /// Latest RTT sample
    latest_rtt: Duration,
    /// The minimum value observed over the lifetime of the connection
    min_rtt: Duration,
    /// An exponentially-weighted moving average
    smoothed_rtt: Duration,
    /// The variance in the observed RTT samples
    rttvar: Duration,
    /// The maximum amount of time by which the peer may delay acknowledgments
    max_ack_delay: Duration,
    /// The time the first RTT sample was obtained
    first_rtt_sample: Option<Timestamp>,
}

impl RttEstimator {
    /// Creates a new RTT estimator with default settings, before any
    /// samples have been observed
    pub fn new(max_ack_delay: Duration) -> Self {
        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# smoothed_rtt = kInitialRtt
        //# rttvar = kInitialRtt / 2
        Self {
            latest_rtt: Duration::ZERO,
            min_rtt: Duration::ZERO,
            smoothed_rtt: DEFAULT_INITIAL_RTT,
            rttvar: DEFAULT_INITIAL_RTT / 2,
            max_ack_delay,
            first_rtt_sample: None,
        }
    }

    #[inline]
    pub fn latest_rtt(&self) -> Duration {
        self.latest_rtt
    }

    #[inline]
    pub fn min_rtt(&self) -> Duration {
        self.min_rtt
    }

    #[inline]
    pub fn smoothed_rtt(&self) -> Duration {
        self.smoothed_rtt
    }

    #[inline]
    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    /// Returns the timestamp of the first RTT sample, if one was observed
    #[inline]
    pub fn first_rtt_sample(&self) -> Option<Timestamp> {
        self.first_rtt_sample
    }

    /// Incorporates a new RTT sample
    pub fn update_rtt(
        &mut self,
        mut ack_delay: Duration,
        rtt_sample: Duration,
        timestamp: Timestamp,
        space: PacketNumberSpace,
    ) {
        self.latest_rtt = rtt_sample.max(K_GRANULARITY);

        if self.first_rtt_sample.is_none() {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
            //# min_rtt MUST be set to the latest_rtt on the first RTT sample.
            self.first_rtt_sample = Some(timestamp);
            self.min_rtt = self.latest_rtt;
            self.smoothed_rtt = self.latest_rtt;
            self.rttvar = self.latest_rtt / 2;
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.2
        //# min_rtt MUST be set to the lesser of min_rtt and latest_rtt
        //# (Section 5.1) on all other samples.
        self.min_rtt = self.min_rtt.min(self.latest_rtt);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# *  MUST ignore the acknowledgment delay for Initial packets, since
        //#    these acknowledgments are not delayed by the peer (Section 13.2.1
        //#    of [QUIC-TRANSPORT]);
        if space.is_initial() || space.is_handshake() {
            ack_delay = Duration::ZERO;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# *  SHOULD ignore the peer's max_ack_delay until the handshake is
        //#    confirmed;
        // the ApplicationData PTO timer is not armed until then, so clamping
        // unconditionally keeps the estimate conservative
        ack_delay = ack_delay.min(self.max_ack_delay);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# *  MUST NOT subtract the acknowledgment delay from the RTT sample if
        //#    the resulting value is smaller than the min_rtt.
        let mut adjusted_rtt = self.latest_rtt;
        if self.min_rtt + ack_delay < adjusted_rtt {
            adjusted_rtt -= ack_delay;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# smoothed_rtt = 7/8 * smoothed_rtt + 1/8 * adjusted_rtt
        //# rttvar_sample = abs(smoothed_rtt - adjusted_rtt)
        //# rttvar = 3/4 * rttvar + 1/4 * rttvar_sample
        let rttvar_sample = abs_difference(self.smoothed_rtt, adjusted_rtt);
        self.rttvar = 3 * self.rttvar / 4 + rttvar_sample / 4;
        self.smoothed_rtt = 7 * self.smoothed_rtt / 8 + adjusted_rtt / 8;
    }

    /// Returns the time threshold after which an unacknowledged packet sent
    /// before an acknowledged one is declared lost
    pub fn loss_time_threshold(&self) -> Duration {
        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
        //# The time threshold is:
        //#
        //# max(kTimeThreshold * max(smoothed_rtt, latest_rtt), kGranularity)
        //
        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
        //# The RECOMMENDED time threshold (kTimeThreshold), expressed as an
        //# RTT multiplier, is 9/8.
        let mut time_threshold = max(self.smoothed_rtt, self.latest_rtt);
        time_threshold += time_threshold / 8;
        max(time_threshold, K_GRANULARITY)
    }

    /// Returns the current probe timeout period
    pub fn pto_period(&self, pto_backoff: u32, space: PacketNumberSpace) -> Duration {
        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# PTO = smoothed_rtt + max(4*rttvar, kGranularity) + max_ack_delay
        let mut pto_period = self.smoothed_rtt;
        pto_period += max(4 * self.rttvar, K_GRANULARITY);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# When the PTO is armed for Initial or Handshake packet number spaces,
        //# the max_ack_delay in the PTO period computation is set to 0, since
        //# the peer is expected to not delay these packets intentionally; see
        //# Section 13.2.1 of [QUIC-TRANSPORT].
        if space.is_application_data() {
            pto_period += self.max_ack_delay;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# Even when multiple PTOs expire, a connection MUST NOT send more than
        //# two probe packets before the next expected acknowledgment. The
        //# PTO period MUST be set to twice its current value for each
        //# subsequent PTO.
        pto_period *= pto_backoff;

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# The PTO period MUST be at least kGranularity, to avoid the timer
        //# expiring immediately.
        max(pto_period, K_GRANULARITY)
    }
}

fn abs_difference(a: Duration, b: Duration) -> Duration {
    if a > b {
        a - b
    } else {
        b - a
    }
}
