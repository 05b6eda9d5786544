// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Encoding and decoding primitives shared by the aero-quic crates.
//!
//! Values implement [`EncoderValue`] to serialize themselves into any
//! [`Encoder`] and [`DecoderValue`] to parse themselves out of a
//! [`DecoderBuffer`]. Buffers carry their position so partially written or
//! partially parsed state can be handed around without extra bookkeeping.

pub mod decoder;
pub mod encoder;

pub use decoder::*;
pub use encoder::*;
