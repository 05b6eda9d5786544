// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::varint::VarInt;
use core::fmt;

//= https://www.rfc-editor.org/rfc/rfc9000#section-20.1
//# QUIC transport error codes and application error codes share a common
//# space of values.

/// A transport-level error, carried in CONNECTION_CLOSE frames
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Error {
    /// The error code in the QUIC transport range
    pub code: VarInt,
    /// A static description, transmitted as the reason phrase
    pub reason: &'static str,
    /// The frame type that triggered the error, if any
    pub frame_type: Option<VarInt>,
}

macro_rules! impl_errors {
    ($($(#[doc = $doc:expr])* $name:ident = $code:literal),* $(,)?) => {
        impl Error {
            $(
                $(#[doc = $doc])*
                pub const $name: Self = Self::new(VarInt::from_u8($code));
            )*

            fn description(&self) -> Option<&'static str> {
                match self.code.as_u64() {
                    $($code => Some(stringify!($name)),)*
                    _ => None,
                }
            }
        }
    };
}

impl_errors! {
    /// An endpoint uses this with CONNECTION_CLOSE to signal that the
    /// connection is being closed abruptly in the absence of any error
    NO_ERROR = 0x0,
    /// The endpoint encountered an internal error and cannot continue
    INTERNAL_ERROR = 0x1,
    /// An endpoint received a frame for a stream identifier that exceeded
    /// its advertised stream limit for the corresponding stream type
    STREAM_LIMIT_ERROR = 0x4,
    /// An endpoint detected an error with protocol compliance that was not
    /// covered by more specific error codes
    PROTOCOL_VIOLATION = 0xa,
    /// An endpoint received more data in CRYPTO frames than it can buffer
    CRYPTO_BUFFER_EXCEEDED = 0xd,
    /// An endpoint detected errors in performing key updates
    KEY_UPDATE_ERROR = 0xe,
    /// An endpoint received a frame that it could not parse
    FRAME_ENCODING_ERROR = 0x7,
}

impl Error {
    #[inline]
    pub const fn new(code: VarInt) -> Self {
        Self {
            code,
            reason: "",
            frame_type: None,
        }
    }

    /// Attaches a static reason phrase
    #[inline]
    pub const fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = reason;
        self
    }

    /// Records the frame type that triggered the error
    #[inline]
    pub const fn with_frame_type(mut self, frame_type: VarInt) -> Self {
        self.frame_type = Some(frame_type);
        self
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut d = f.debug_struct("transport::Error");
        if let Some(description) = self.description() {
            d.field("code", &description);
        } else {
            d.field("code", &self.code);
        }
        if !self.reason.is_empty() {
            d.field("reason", &self.reason);
        }
        if let Some(frame_type) = self.frame_type {
            d.field("frame_type", &frame_type);
        }
        d.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if !self.reason.is_empty() {
            return self.reason.fmt(f);
        }
        if let Some(description) = self.description() {
            return description.fmt(f);
        }
        write!(f, "error {}", self.code)
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_test() {
        assert_eq!(format!("{}", Error::PROTOCOL_VIOLATION), "PROTOCOL_VIOLATION");
        assert_eq!(
            format!("{}", Error::PROTOCOL_VIOLATION.with_reason("bad ack")),
            "bad ack"
        );
    }
}
