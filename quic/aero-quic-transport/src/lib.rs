// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The per-connection send path of a QUIC endpoint: speculative packet
//! construction, per-space acknowledgement control, loss recovery and the
//! single-threaded event loop that drives them.
//!
//! The TLS handshake, stream multiplexing and the UDP socket are
//! collaborators; their contracts are the traits and installation hooks on
//! [`connection::Connection`] and [`endpoint::ConnectionActor`].

pub mod ack;
pub mod connection;
pub mod endpoint;
pub mod interval_set;
pub mod path;
pub mod recovery;
pub mod sent_frames;
pub mod space;
pub mod transmission;
