// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! AEAD and header protection interfaces
//!
//! Key derivation and the TLS handshake live in a collaborator; the send
//! path only observes installed key material through these traits.

use core::fmt;

mod protection;

pub use protection::{protect, unprotect};

/// Error returned on any AEAD or header protection failure
///
/// The cause is deliberately not reported; failed packets are dropped
/// without distinguishing forgeries from corruption.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CryptoError;

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "packet protection failure")
    }
}

impl std::error::Error for CryptoError {}

/// A directional AEAD key
pub trait Key: Send + fmt::Debug {
    /// Encrypts a payload in place
    ///
    /// The final `tag_len` bytes of `payload` are reserved by the caller and
    /// overwritten with the authentication tag.
    fn encrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<(), CryptoError>;

    /// Decrypts a payload in place; the trailing `tag_len` bytes are the tag
    fn decrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<(), CryptoError>;

    /// Length of the appended tag
    fn tag_len(&self) -> usize;
}

/// The mask applied to the first byte and packet number bytes of a header
pub type HeaderProtectionMask = [u8; 5];

/// A directional header protection key
pub trait HeaderKey: Send + fmt::Debug {
    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.1
    //# Header protection is applied after packet protection is applied (see
    //# Section 5.3).  The ciphertext of the packet is sampled and used as
    //# input to an encryption algorithm.
    fn protection_mask(&self, ciphertext_sample: &[u8]) -> HeaderProtectionMask;

    /// The number of ciphertext bytes sampled for the mask
    fn sample_len(&self) -> usize;
}

/// The key material installed for one direction of one packet number space
#[derive(Debug)]
pub struct PacketProtection {
    pub key: Box<dyn Key>,
    pub header_key: Box<dyn HeaderKey>,
}

impl PacketProtection {
    #[inline]
    pub fn tag_len(&self) -> usize {
        self.key.tag_len()
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::{CryptoError, HeaderProtectionMask, PacketProtection};

    /// A cipher that copies plaintext through and emits zero tags
    ///
    /// Only the framing around the AEAD is under test in this repository.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Key {
        pub fail_on_decrypt: bool,
    }

    pub const TAG_LEN: usize = 16;

    impl super::Key for Key {
        fn encrypt(
            &self,
            _packet_number: u64,
            _header: &[u8],
            payload: &mut [u8],
        ) -> Result<(), CryptoError> {
            let tag_start = payload.len() - TAG_LEN;
            payload[tag_start..].fill(0);
            Ok(())
        }

        fn decrypt(
            &self,
            _packet_number: u64,
            _header: &[u8],
            _payload: &mut [u8],
        ) -> Result<(), CryptoError> {
            if self.fail_on_decrypt {
                return Err(CryptoError);
            }
            Ok(())
        }

        fn tag_len(&self) -> usize {
            TAG_LEN
        }
    }

    impl super::HeaderKey for Key {
        fn protection_mask(&self, _ciphertext_sample: &[u8]) -> HeaderProtectionMask {
            Default::default()
        }

        fn sample_len(&self) -> usize {
            TAG_LEN
        }
    }

    /// Builds a `PacketProtection` around the null cipher
    pub fn null_protection() -> PacketProtection {
        PacketProtection {
            key: Box::new(Key::default()),
            header_key: Box::new(Key::default()),
        }
    }

    /// Builds a `PacketProtection` whose decrypt always fails
    pub fn failing_protection() -> PacketProtection {
        PacketProtection {
            key: Box::new(Key {
                fail_on_decrypt: true,
            }),
            header_key: Box::new(Key::default()),
        }
    }
}
