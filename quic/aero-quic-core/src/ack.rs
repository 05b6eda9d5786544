// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::varint::VarInt;
use core::{convert::TryInto, time::Duration};

/// The number of packet number ranges an endpoint stores per space
const RECOMMENDED_RANGES_LIMIT: u8 = 10;

/// The number of ack-eliciting packets received before an ACK is sent
/// without waiting for the delay timer
const RECOMMENDED_ELICITATION_INTERVAL: u8 = 2;

/// Settings for ACK frames
#[derive(Clone, Copy, Debug)]
pub struct Settings {
    /// The maximum ACK delay indicates the maximum amount of time by which the
    /// endpoint will delay sending acknowledgments.
    pub max_ack_delay: Duration,

    //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
    //# ACK Delay:  A variable-length integer encoding the acknowledgement
    //#    delay in microseconds; see Section 13.2.5.  It is decoded by
    //#    multiplying the value in the field by 2 to the power of the
    //#    ack_delay_exponent transport parameter sent by the sender of the
    //#    ACK frame
    /// The exponent used to scale the ACK Delay field
    pub ack_delay_exponent: u8,

    /// The number of ack-eliciting packets received before sending an
    /// immediate ACK
    pub ack_elicitation_interval: u8,

    /// The number of packet number intervals an endpoint is willing to store
    pub ack_ranges_limit: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self::RECOMMENDED
    }
}

impl Settings {
    pub const RECOMMENDED: Self = Self {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
        //# If this value is absent, a default of 25 milliseconds is assumed.
        max_ack_delay: Duration::from_millis(25),
        //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
        //# If this value is absent, a default value of 3 is assumed (indicating
        //# a multiplier of 8).
        ack_delay_exponent: 3,
        ack_elicitation_interval: RECOMMENDED_ELICITATION_INTERVAL,
        ack_ranges_limit: RECOMMENDED_RANGES_LIMIT,
    };

    //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.1
    //# An endpoint MUST acknowledge all ack-eliciting Initial and Handshake
    //# packets immediately
    pub const EARLY: Self = Self {
        max_ack_delay: Duration::from_millis(0),
        ack_delay_exponent: 0,
        ack_elicitation_interval: 1,
        ack_ranges_limit: RECOMMENDED_RANGES_LIMIT,
    };

    /// Decodes the peer's `Ack Delay` field
    pub fn decode_ack_delay(&self, delay: VarInt) -> Duration {
        Duration::from_micros(*delay) * self.scale()
    }

    /// Encodes the local `Ack Delay` field
    pub fn encode_ack_delay(&self, delay: Duration) -> VarInt {
        let micros = delay.as_micros();
        let scale = self.scale() as u128;
        (micros / scale).try_into().unwrap_or(VarInt::MAX)
    }

    /// Computes the scale from the exponent
    fn scale(&self) -> u32 {
        2u32.pow(self.ack_delay_exponent as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_delay_round_trip_test() {
        for ack_delay_exponent in 0..=20 {
            let settings = Settings {
                ack_delay_exponent,
                ..Default::default()
            };
            // use an epsilon instead of comparing the values directly,
            // as there will be some precision loss
            let epsilon = settings.scale() as u128;

            for delay in (0..1000).map(|v| v * 100).map(Duration::from_micros) {
                let delay_varint = settings.encode_ack_delay(delay);
                let expected_us = delay.as_micros();
                let actual_us = settings.decode_ack_delay(delay_varint).as_micros();
                assert!(expected_us - actual_us < epsilon);
            }

            // ensure MAX values are handled correctly and don't overflow
            let delay = settings.decode_ack_delay(VarInt::MAX);
            let delay_varint = settings.encode_ack_delay(delay);
            assert_eq!(VarInt::MAX, delay_varint);
        }
    }
}
