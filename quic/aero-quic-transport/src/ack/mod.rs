// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

mod ack_manager;
mod ack_ranges;

pub use ack_manager::AckManager;
pub use ack_ranges::{AckRanges, AckRangesError, DEFAULT_ACK_RANGES_LIMIT};
