//! Error types

// Copyright (c) 2021-2025 The pivbox developers
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//   * Redistributions of source code must retain the above copyright
//     notice, this list of conditions and the following disclaimer.
//
//   * Redistributions in binary form must reproduce the above
//     copyright notice, this list of conditions and the following
//     disclaimer in the documentation and/or other materials provided
//     with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// OWNER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::fmt::{self, Display};

/// Result type with the `pivbox` crate's [`Error`] type.
pub type Result<T> = core::result::Result<T, Error>;

/// Kinds of errors.
///
/// Every fallible operation in this crate reports one of these. The
/// variants map onto the errno-style results the PIV protocol layer
/// produces, so the [`Error::name`] strings follow the classic spellings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// Transport failure talking to the reader or the resource manager.
    Io {
        /// Original PC/SC error, when the failure came from the PC/SC stack
        inner: Option<pcsc::Error>,
    },

    /// No such object, slot, file, or applet on the card.
    NotFound,

    /// The card lacks a capability, or returned a format this crate
    /// deliberately does not handle (e.g. compressed certificates).
    NotSupported,

    /// Malformed input, or an unexpected status word from the card.
    InvalidData,

    /// Security status not satisfied: a PIN or admin authentication is
    /// required before the operation is allowed.
    PermissionDenied,

    /// A presented PIN or admin key was rejected.
    AuthFailed {
        /// Remaining PIN attempts, when the card reported them
        retries: Option<u8>,
    },

    /// Too few PIN attempts remain to safely try the supplied PIN.
    TriesRemaining {
        /// Attempts the card reports as remaining
        tries: u8,
    },

    /// The card is out of storage for the object being written.
    Memory,

    /// Authenticated decryption failed: the envelope has been tampered
    /// with, or the wrong key was used.
    BadMessage,
}

impl Error {
    /// Name of the error.
    ///
    /// These names match the errno spellings the original PIV tooling
    /// reported, to assist in searching for relevant information.
    pub fn name(self) -> &'static str {
        match self {
            Error::Io { .. } => "EIO",
            Error::NotFound => "ENOENT",
            Error::NotSupported => "ENOTSUP",
            Error::InvalidData => "EINVAL",
            Error::PermissionDenied => "EPERM",
            Error::AuthFailed { .. } => "EACCES",
            Error::TriesRemaining { .. } => "EAGAIN",
            Error::Memory => "ENOMEM",
            Error::BadMessage => "EBADMSG",
        }
    }

    /// Error message
    pub fn msg(self) -> &'static str {
        match self {
            Error::Io { .. } => "card transport failure",
            Error::NotFound => "no such object on card",
            Error::NotSupported => "card capability missing or format unsupported",
            Error::InvalidData => "malformed data or unexpected status word",
            Error::PermissionDenied => "security status not satisfied",
            Error::AuthFailed { .. } => "PIN or admin key rejected",
            Error::TriesRemaining { .. } => "too few PIN attempts remain",
            Error::Memory => "card out of memory",
            Error::BadMessage => "authentication tag mismatch",
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AuthFailed {
                retries: Some(tries),
            } => write!(f, "{} ({} tries remaining)", self.msg(), tries),
            Error::TriesRemaining { tries } => write!(f, "{} ({} remaining)", self.msg(), tries),
            _ => f.write_str(self.msg()),
        }
    }
}

impl From<pcsc::Error> for Error {
    fn from(err: pcsc::Error) -> Error {
        Error::Io { inner: Some(err) }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            #[allow(trivial_casts)]
            Error::Io { inner } => inner
                .as_ref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}
