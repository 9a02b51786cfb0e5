//! Application Protocol Data Unit (APDU) framing.

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

use crate::consts::APDU_DATA_MAX;
use zeroize::{Zeroize, Zeroizing};

/// Application Protocol Data Unit (APDU).
///
/// One command frame exchanged with the card. Bodies are capped at 255
/// bytes; longer payloads go through command chaining in the transaction
/// layer rather than extended APDUs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Apdu {
    /// Instruction class; carries the chaining bit during multi-block
    /// commands
    cla: u8,

    /// Instruction code
    ins: Ins,

    /// Instruction parameter 1
    p1: u8,

    /// Instruction parameter 2
    p2: u8,

    /// Command data (`Lc` is derived from its length)
    data: Vec<u8>,
}

impl Apdu {
    /// Create a new APDU with the given instruction code.
    pub fn new(ins: impl Into<Ins>) -> Self {
        Self {
            cla: 0,
            ins: ins.into(),
            p1: 0,
            p2: 0,
            data: vec![],
        }
    }

    /// Set this APDU's class byte.
    pub fn cla(&mut self, value: u8) -> &mut Self {
        self.cla = value;
        self
    }

    /// Set both parameters for this APDU.
    pub fn params(&mut self, p1: u8, p2: u8) -> &mut Self {
        self.p1 = p1;
        self.p2 = p2;
        self
    }

    /// Set the command data for this APDU.
    ///
    /// Panics if the body exceeds one wire block; chaining is the
    /// transaction layer's job.
    pub fn data(&mut self, bytes: impl AsRef<[u8]>) -> &mut Self {
        assert!(self.data.is_empty(), "APDU command data already set");

        let bytes = bytes.as_ref();
        assert!(
            bytes.len() <= APDU_DATA_MAX,
            "APDU command data too long: {} (max: {})",
            bytes.len(),
            APDU_DATA_MAX
        );

        self.data.extend_from_slice(bytes);
        self
    }

    /// Serialize this APDU as a self-zeroizing byte buffer.
    ///
    /// `Lc` is omitted entirely when the body is empty.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut bytes = Vec::with_capacity(5 + self.data.len());
        bytes.push(self.cla);
        bytes.push(self.ins.code());
        bytes.push(self.p1);
        bytes.push(self.p2);
        if !self.data.is_empty() {
            bytes.push(self.data.len() as u8);
            bytes.extend_from_slice(&self.data);
        }
        Zeroizing::new(bytes)
    }
}

impl Drop for Apdu {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl Zeroize for Apdu {
    fn zeroize(&mut self) {
        // Only `data` may contain secrets
        self.data.zeroize();
    }
}

/// APDU instruction codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Ins {
    /// Verify (PIN presentation)
    Verify,

    /// Change reference data (PIN change)
    ChangeReference,

    /// Generate asymmetric key pair
    GenerateAsymmetric,

    /// General authenticate: sign, ECDH, and admin challenge-response
    Authenticate,

    /// Get data object
    GetData,

    /// Put data object
    PutData,

    /// Select application
    SelectApplication,

    /// Get response (continuation of a chained reply)
    GetResponse,

    /// Get firmware version (Yubico vendor extension)
    GetVersion,

    /// Other/unrecognized instruction codes
    Other(u8),
}

impl Ins {
    /// Get the code that corresponds to this instruction.
    pub fn code(self) -> u8 {
        match self {
            Ins::Verify => 0x20,
            Ins::ChangeReference => 0x24,
            Ins::GenerateAsymmetric => 0x47,
            Ins::Authenticate => 0x87,
            Ins::GetData => 0xcb,
            Ins::PutData => 0xdb,
            Ins::SelectApplication => 0xa4,
            Ins::GetResponse => 0xc0,
            Ins::GetVersion => 0xfd,
            Ins::Other(code) => code,
        }
    }
}

impl From<u8> for Ins {
    fn from(code: u8) -> Self {
        match code {
            0x20 => Ins::Verify,
            0x24 => Ins::ChangeReference,
            0x47 => Ins::GenerateAsymmetric,
            0x87 => Ins::Authenticate,
            0xcb => Ins::GetData,
            0xdb => Ins::PutData,
            0xa4 => Ins::SelectApplication,
            0xc0 => Ins::GetResponse,
            0xfd => Ins::GetVersion,
            code => Ins::Other(code),
        }
    }
}

impl From<Ins> for u8 {
    fn from(ins: Ins) -> u8 {
        ins.code()
    }
}

/// A card reply: body plus parsed status word.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Response {
    status_words: StatusWords,
    data: Vec<u8>,
}

impl Response {
    /// Create a response from parts (used when reassembling chains).
    pub fn new(status_words: StatusWords, data: Vec<u8>) -> Response {
        Response { status_words, data }
    }

    /// Status words for this response.
    pub fn status_words(&self) -> StatusWords {
        self.status_words
    }

    /// Raw status-word code.
    pub fn code(&self) -> u16 {
        self.status_words.code()
    }

    /// Do the status words indicate success?
    pub fn is_success(&self) -> bool {
        self.status_words.is_success()
    }

    /// Borrow the response body.
    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl From<Vec<u8>> for Response {
    fn from(mut bytes: Vec<u8>) -> Self {
        if bytes.len() < 2 {
            return Response {
                status_words: StatusWords::None,
                data: bytes,
            };
        }

        let sw = StatusWords::from(
            (u16::from(bytes[bytes.len() - 2]) << 8) | u16::from(bytes[bytes.len() - 1]),
        );

        let len = bytes.len() - 2;
        bytes.truncate(len);

        Response {
            status_words: sw,
            data: bytes,
        }
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl Zeroize for Response {
    fn zeroize(&mut self) {
        // Reply bodies can carry signatures and ECDH shared secrets
        self.data.zeroize();
    }
}

/// Status Words (SW): the 2-byte result code trailing every card reply.
///
/// See NIST SP 800-73-4, section 5.6 for the PIV-relevant values.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum StatusWords {
    /// No status words present in response
    None,

    /// Successful execution
    Success,

    /// More response data is waiting to be fetched with GET RESPONSE
    BytesRemaining {
        /// Bytes remaining as indicated by the card (0 = 256 or more)
        len: u8,
    },

    /// PIN verification failed
    VerifyFail {
        /// Remaining verification attempts
        tries: u8,
    },

    /// Security status not satisfied
    SecurityStatus,

    /// Wrong data in command field
    WrongData,

    /// Function not supported
    FuncNotSupported,

    /// File or application not found
    FileNotFound,

    /// Not enough storage on the card
    NoSpace,

    /// Incorrect P1/P2 parameters
    IncorrectP1P2,

    /// Other/unrecognized status words
    Other(u16),
}

impl StatusWords {
    /// Numerical code for these status words.
    pub fn code(self) -> u16 {
        match self {
            StatusWords::None => 0,
            StatusWords::Success => 0x9000,
            StatusWords::BytesRemaining { len } => 0x6100 | u16::from(len),
            StatusWords::VerifyFail { tries } => 0x63c0 | u16::from(tries),
            StatusWords::SecurityStatus => 0x6982,
            StatusWords::WrongData => 0x6a80,
            StatusWords::FuncNotSupported => 0x6a81,
            StatusWords::FileNotFound => 0x6a82,
            StatusWords::NoSpace => 0x6a84,
            StatusWords::IncorrectP1P2 => 0x6a86,
            StatusWords::Other(sw) => sw,
        }
    }

    /// Do these status words indicate success?
    pub fn is_success(self) -> bool {
        self == StatusWords::Success
    }

    /// High byte of the code; chaining decisions key off this.
    pub fn high_byte(self) -> u8 {
        (self.code() >> 8) as u8
    }
}

impl From<u16> for StatusWords {
    fn from(sw: u16) -> Self {
        match sw {
            0x0000 => StatusWords::None,
            0x9000 => StatusWords::Success,
            sw if sw & 0xff00 == 0x6100 => StatusWords::BytesRemaining {
                len: (sw & 0x00ff) as u8,
            },
            sw if sw & 0xfff0 == 0x63c0 => StatusWords::VerifyFail {
                tries: (sw & 0x000f) as u8,
            },
            0x6982 => StatusWords::SecurityStatus,
            0x6a80 => StatusWords::WrongData,
            0x6a81 => StatusWords::FuncNotSupported,
            0x6a82 => StatusWords::FileNotFound,
            0x6a84 => StatusWords::NoSpace,
            0x6a86 => StatusWords::IncorrectP1P2,
            _ => StatusWords::Other(sw),
        }
    }
}

impl From<StatusWords> for u16 {
    fn from(sw: StatusWords) -> u16 {
        sw.code()
    }
}
