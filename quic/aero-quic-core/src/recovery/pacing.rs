// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::time::Timestamp;
use core::time::Duration;

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.7
//# A perfectly paced sender spreads packets exactly evenly over time.  A
//# sender with a congestion window that has not been validated to be at
//# least the BDP can be paced at a rate slightly faster than the
//# congestion window over the RTT, making use of the congestion window
//# as it becomes available.
//#
//# rate = N * congestion_window / smoothed_rtt

/// The burst interval the bucket capacity is derived from; user-space
/// timers cannot reliably hit shorter intervals.
const BURST_INTERVAL: Duration = Duration::from_millis(2);

/// Small bursts waste wakeups, large bursts defeat the purpose of pacing
const MIN_BURST_PACKETS: u64 = 10;
const MAX_BURST_PACKETS: u64 = 256;

/// The N factor of the pacing rate, as 5/4
const RATE_NUMERATOR: u128 = 5;
const RATE_DENOMINATOR: u128 = 4;

/// A token-bucket pacer refilled at 5/4 of a congestion window per RTT
#[derive(Clone, Debug)]
pub struct Pacer {
    capacity: u64,
    last_window: u64,
    last_mtu: u16,
    tokens: u64,
    prev: Option<Timestamp>,
}

impl Pacer {
    pub fn new(smoothed_rtt: Duration, window: u64, mtu: u16) -> Self {
        let capacity = optimal_capacity(smoothed_rtt, window, mtu);
        Self {
            capacity,
            last_window: window,
            last_mtu: mtu,
            tokens: capacity,
            prev: None,
        }
    }

    /// Record that a packet has been transmitted
    pub fn on_transmit(&mut self, packet_length: u16) {
        self.tokens = self.tokens.saturating_sub(packet_length.into())
    }

    /// Returns how long to wait before sending `bytes_to_send`
    ///
    /// `None` means a packet may leave right away; otherwise the returned
    /// time is when this function should be consulted again.
    pub fn earliest_departure_time(
        &mut self,
        smoothed_rtt: Duration,
        bytes_to_send: u64,
        mtu: u16,
        window: u64,
        now: Timestamp,
    ) -> Option<Timestamp> {
        debug_assert_ne!(window, 0, "congestion windows cannot be empty");

        if window != self.last_window || mtu != self.last_mtu {
            self.capacity = optimal_capacity(smoothed_rtt, window, mtu);
            self.tokens = self.capacity.min(self.tokens);
            self.last_window = window;
            self.last_mtu = mtu;
        }

        if self.tokens >= bytes_to_send {
            return None;
        }

        if smoothed_rtt.is_zero() {
            return None;
        }

        // refill proportionally to the time elapsed since the last refill
        let prev = *self.prev.get_or_insert(now);
        let elapsed = now.saturating_duration_since(prev);
        if !elapsed.is_zero() {
            let new_tokens = (window as u128 * RATE_NUMERATOR * elapsed.as_nanos())
                / RATE_DENOMINATOR
                / smoothed_rtt.as_nanos().max(1);
            self.tokens = self
                .tokens
                .saturating_add(new_tokens.min(u64::MAX as u128) as u64)
                .min(self.capacity);
            self.prev = Some(now);
        }

        if self.tokens >= bytes_to_send {
            return None;
        }

        // the time at which the missing tokens will have accumulated
        let missing = bytes_to_send.max(self.capacity) - self.tokens;
        let delay_nanos = (missing as u128 * RATE_DENOMINATOR * smoothed_rtt.as_nanos())
            / RATE_NUMERATOR
            / (window as u128).max(1);
        let delay = Duration::from_nanos(delay_nanos.min(u64::MAX as u128) as u64);

        Some(now + delay)
    }
}

/// Derives a bucket capacity which drains in one burst interval
fn optimal_capacity(smoothed_rtt: Duration, window: u64, mtu: u16) -> u64 {
    let rtt = smoothed_rtt.as_nanos().max(1);
    let capacity = ((window as u128 * BURST_INTERVAL.as_nanos()) / rtt) as u64;
    capacity.clamp(MIN_BURST_PACKETS * mtu as u64, MAX_BURST_PACKETS * mtu as u64)
}
