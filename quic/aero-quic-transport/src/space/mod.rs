// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The packet number space multiplexer
//!
//! Each cryptographic epoch owns an independent packet number sequence,
//! acknowledgement state, loss recovery and CRYPTO stream. Spaces are
//! created when their keys are installed and dropped for good when the
//! epoch ends; a discarded space produces no further verdicts.

mod crypto_stream;

pub use crypto_stream::CryptoStream;

use crate::{ack::AckManager, path::Path, recovery};
use aero_quic_core::{
    ack::Settings,
    crypto::PacketProtection,
    packet::number::PacketNumberSpace,
    recovery::CongestionController,
    time::Timestamp,
};

/// The state of one packet number space
#[derive(Debug)]
pub struct PacketSpace {
    space: PacketNumberSpace,
    pub ack_manager: AckManager,
    pub recovery: recovery::Manager,
    pub crypto: CryptoStream,
    /// Send keys; the space is active for sending while these are set
    pub tx_protection: Option<PacketProtection>,
    /// Receive keys; inbound packets are dropped while these are absent
    pub rx_protection: Option<PacketProtection>,
}

impl PacketSpace {
    pub fn new(space: PacketNumberSpace, ack_settings: Settings) -> Self {
        Self {
            space,
            ack_manager: AckManager::new(space, ack_settings),
            recovery: recovery::Manager::new(space),
            crypto: CryptoStream::default(),
            tx_protection: None,
            rx_protection: None,
        }
    }

    #[inline]
    pub fn space(&self) -> PacketNumberSpace {
        self.space
    }

    /// Returns `true` when write keys are installed
    #[inline]
    pub fn can_send(&self) -> bool {
        self.tx_protection.is_some()
    }

    pub fn timers(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.recovery.timers().chain(self.ack_manager.timers())
    }
}

/// Holds the up to three concurrent packet number spaces
///
/// Initial and Handshake are discarded as the handshake progresses;
/// ApplicationData lives for the rest of the connection.
#[derive(Debug, Default)]
pub struct PacketSpaceManager {
    initial: Option<Box<PacketSpace>>,
    handshake: Option<Box<PacketSpace>>,
    application: Option<Box<PacketSpace>>,
}

macro_rules! packet_space_api {
    ($get:ident, $get_mut:ident $(, $discard:ident)?) => {
        pub fn $get(&self) -> Option<&PacketSpace> {
            self.$get.as_deref()
        }

        pub fn $get_mut(&mut self) -> Option<&mut PacketSpace> {
            self.$get.as_deref_mut()
        }

        $(
            /// Drops the space; in-flight packets are forgotten without
            /// a fate and the congestion controller releases their bytes
            pub fn $discard<CC: CongestionController>(&mut self, path: &mut Path<CC>) {
                if let Some(mut space) = self.$get.take() {
                    tracing::debug!(space = ?space.space(), "packet number space discarded");
                    space.recovery.on_space_discarded(path);
                }
            }
        )?
    };
}

impl PacketSpaceManager {
    packet_space_api!(initial, initial_mut, discard_initial);

    packet_space_api!(handshake, handshake_mut, discard_handshake);

    packet_space_api!(application, application_mut);

    /// Creates the space for `space` if it does not exist and installs the
    /// given key material; keys can arrive one direction at a time
    pub fn install_keys(
        &mut self,
        space: PacketNumberSpace,
        tx_protection: Option<PacketProtection>,
        rx_protection: Option<PacketProtection>,
    ) {
        let slot = match space {
            PacketNumberSpace::Initial => &mut self.initial,
            PacketNumberSpace::Handshake => &mut self.handshake,
            PacketNumberSpace::ApplicationData => &mut self.application,
        };

        let entry = slot.get_or_insert_with(|| {
            let settings = if space.is_application_data() {
                Settings::RECOMMENDED
            } else {
                //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.1
                //# An endpoint MUST acknowledge all ack-eliciting Initial and
                //# Handshake packets immediately
                Settings::EARLY
            };
            Box::new(PacketSpace::new(space, settings))
        });

        if tx_protection.is_some() {
            entry.tx_protection = tx_protection;
        }
        if rx_protection.is_some() {
            entry.rx_protection = rx_protection;
        }
    }

    pub fn get(&self, space: PacketNumberSpace) -> Option<&PacketSpace> {
        match space {
            PacketNumberSpace::Initial => self.initial(),
            PacketNumberSpace::Handshake => self.handshake(),
            PacketNumberSpace::ApplicationData => self.application(),
        }
    }

    pub fn get_mut(&mut self, space: PacketNumberSpace) -> Option<&mut PacketSpace> {
        match space {
            PacketNumberSpace::Initial => self.initial_mut(),
            PacketNumberSpace::Handshake => self.handshake_mut(),
            PacketNumberSpace::ApplicationData => self.application_mut(),
        }
    }

    /// Returns all of the component timers
    pub fn timers(&self) -> impl Iterator<Item = Timestamp> + '_ {
        core::iter::empty()
            .chain(self.initial.iter().flat_map(|space| space.timers()))
            .chain(self.handshake.iter().flat_map(|space| space.timers()))
            .chain(self.application.iter().flat_map(|space| space.timers()))
    }
}
