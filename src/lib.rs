//! PIV smart-card client with sealed ECDH envelopes.
//!
//! This crate speaks the [PIV][1] (Personal Identity Verification)
//! application protocol to smart cards over a PC/SC reader stack, and
//! implements a portable sealed-envelope format (the "[box][`EcdhBox`]")
//! that encrypts data to a card-held public key such that only the card
//! holding the matching private key — with the PIN presented — can
//! decrypt it.
//!
//! Three layers make up the crate:
//!
//! - **APDU transport**: ISO 7816-4 framing with multi-block command
//!   chaining and response continuation, over an injected reader
//!   backend (see [`card`]; the PC/SC implementation is in [`readers`]).
//! - **PIV application**: applet selection, CHUID and certificate
//!   reads, key generation, PIN and card-admin authentication, signing,
//!   and ECDH, all bracketed by an exclusive card [`Transaction`].
//! - **ECDH box**: ephemeral-static ECDH, a hash KDF, and an AEAD
//!   envelope in a versioned, self-describing binary container.
//!
//! ```no_run
//! use pivbox::{enumerate, readers::Context, EcdhBox, SlotId};
//!
//! # fn main() -> pivbox::Result<()> {
//! let mut ctx = Context::open()?;
//! let mut tokens = enumerate(&mut ctx)?;
//! let token = tokens.first_mut().expect("a PIV card");
//!
//! {
//!     let mut txn = token.begin_transaction()?;
//!     txn.read_cert(SlotId::KeyManagement)?;
//! }
//!
//! let mut envelope = EcdhBox::new();
//! envelope.set_data(b"the key material to protect");
//! envelope.seal(token, SlotId::KeyManagement)?;
//! let bytes = envelope.to_binary()?;
//! # let _ = bytes;
//! # Ok(())
//! # }
//! ```
//!
//! Supported algorithms: RSA 1024/2048 (PKCS#1 v1.5 signatures), ECDSA
//! and ECDH on NIST P-256/P-384, 3DES card-admin authentication, and
//! ChaCha20-Poly1305 or AES-256-GCM envelopes.
//!
//! [1]: https://nvlpubs.nist.gov/nistpubs/SpecialPublications/NIST.SP.800-73-4.pdf

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

#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unused_lifetimes,
    unused_qualifications
)]

mod admin;
mod apdu;
pub mod card;
mod certificate;
pub mod consts;
mod ecdh_box;
mod encoding;
pub mod error;
mod piv;
pub mod readers;
mod tlv;
mod token;
mod transaction;

pub use crate::{
    admin::AdminKey,
    certificate::PublicKeyInfo,
    ecdh_box::{BoxCipher, BoxKdf, EcdhBox},
    error::{Error, Result},
    piv::{AlgorithmId, HashAlgo, SlotId},
    tlv::{TlvReader, TlvWriter},
    token::{enumerate, Slot, Token, Version},
    transaction::Transaction,
};

use zeroize::Zeroizing;

/// A byte buffer that is wiped when dropped; used for everything that may
/// hold key material, PINs, or plaintext.
pub type Buffer = Zeroizing<Vec<u8>>;
