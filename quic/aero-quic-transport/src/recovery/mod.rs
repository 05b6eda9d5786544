// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

mod manager;
mod pto;
mod sent_packets;

pub use manager::{Context, Manager, PacketFate};
pub use pto::{Pto, PtoState};
pub use sent_packets::{SentPacketInfo, SentPackets};

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.1
//# The RECOMMENDED initial value for the packet reordering threshold
//# (kPacketThreshold) is 3, based on best practices for TCP loss
//# detection.
pub const K_PACKET_THRESHOLD: u64 = 3;
