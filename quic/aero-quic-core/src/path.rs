// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//= https://www.rfc-editor.org/rfc/rfc9000#section-14.1
//# This implies that senders
//# must be able to send UDP datagrams of at least 1200 bytes.
pub const MINIMUM_MTU: u16 = 1200;

//= https://www.rfc-editor.org/rfc/rfc9000#section-14.1
//# Initial packets sent by a client MUST be sent in a UDP datagram with a
//# payload of at least 1200 bytes.
pub const MINIMUM_INITIAL_DATAGRAM_LEN: usize = 1200;

/// The PTO backoff multiplier starts at 1 and doubles per expiration
pub const INITIAL_PTO_BACKOFF: u32 = 1;
