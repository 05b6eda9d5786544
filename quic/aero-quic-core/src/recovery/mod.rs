// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

mod congestion_controller;
mod new_reno;
mod pacing;
mod rtt_estimator;

pub use congestion_controller::CongestionController;
pub use new_reno::NewReno;
pub use pacing::Pacer;
pub use rtt_estimator::RttEstimator;

#[cfg(any(test, feature = "testing"))]
pub use congestion_controller::testing;

use core::time::Duration;

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
//# The RECOMMENDED value of the
//# timer granularity (kGranularity) is 1 millisecond.
pub const K_GRANULARITY: Duration = Duration::from_millis(1);
