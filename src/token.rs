//! Connected PIV cards ("tokens") and reader enumeration.

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

use crate::{
    card::{CardBackend, Protocol, ReaderContext},
    certificate::PublicKeyInfo,
    piv::{AlgorithmId, SlotId},
    transaction::Transaction,
    Error, Result,
};
use log::debug;
use std::fmt;
use uuid::Uuid;

/// Firmware version triple reported by the Yubico GET VERSION extension.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Version {
    /// Major version component
    pub major: u8,

    /// Minor version component
    pub minor: u8,

    /// Patch version component
    pub patch: u8,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Cached certificate and public key for one PIV key slot.
#[derive(Clone, Debug)]
pub struct Slot {
    pub(crate) id: SlotId,
    pub(crate) algorithm: AlgorithmId,
    pub(crate) cert_der: Vec<u8>,
    pub(crate) subject: String,
    pub(crate) pubkey: PublicKeyInfo,
}

impl Slot {
    /// Slot identifier.
    pub fn id(&self) -> SlotId {
        self.id
    }

    /// Algorithm of the key in this slot, inferred from its certificate.
    pub fn algorithm(&self) -> AlgorithmId {
        self.algorithm
    }

    /// DER bytes of the slot certificate.
    pub fn certificate(&self) -> &[u8] {
        &self.cert_der
    }

    /// Subject name of the slot certificate.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Public key of the slot certificate.
    pub fn public_key(&self) -> &PublicKeyInfo {
        &self.pubkey
    }
}

/// Everything about a token except its card handle. Split out so a
/// transaction can borrow the handle and the state independently.
pub(crate) struct TokenState {
    pub(crate) reader: String,
    pub(crate) protocol: Protocol,
    pub(crate) guid: [u8; 16],
    pub(crate) no_chuid: bool,
    pub(crate) algorithms: Vec<u8>,
    pub(crate) ykpiv_version: Option<Version>,
    pub(crate) slots: Vec<Slot>,
}

impl TokenState {
    pub(crate) fn slot(&self, id: SlotId) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.id == id)
    }
}

/// One connected PIV card.
///
/// All card traffic happens inside the exclusive transaction returned by
/// [`Token::begin_transaction`]; the borrow it holds makes nested
/// transactions and release-while-in-transaction impossible. Dropping a
/// token disconnects from the reader, leaving the card powered.
pub struct Token {
    backend: Box<dyn CardBackend>,
    pub(crate) state: TokenState,
}

impl Token {
    /// Build a token on top of a connected card.
    ///
    /// This is the injection seam for alternative reader stacks; normal
    /// use goes through [`enumerate`].
    pub fn new(reader: impl Into<String>, backend: Box<dyn CardBackend>) -> Self {
        let protocol = backend.protocol();
        Token {
            backend,
            state: TokenState {
                reader: reader.into(),
                protocol,
                guid: [0u8; 16],
                no_chuid: false,
                algorithms: Vec::new(),
                ykpiv_version: None,
                slots: Vec::new(),
            },
        }
    }

    /// Begin an exclusive card transaction.
    pub fn begin_transaction(&mut self) -> Result<Transaction<'_>> {
        let Token { backend, state } = self;
        let inner = backend.begin()?;
        Ok(Transaction::new(inner, state))
    }

    /// Name of the reader this token was found in.
    pub fn reader(&self) -> &str {
        &self.state.reader
    }

    /// Active transmission protocol.
    pub fn protocol(&self) -> Protocol {
        self.state.protocol
    }

    /// Card GUID from the CHUID (all zeroes when the card has none).
    pub fn guid(&self) -> &[u8; 16] {
        &self.state.guid
    }

    /// Card GUID as a UUID.
    pub fn uuid(&self) -> Uuid {
        Uuid::from_bytes(self.state.guid)
    }

    /// Whether the card carries a CHUID object.
    pub fn has_chuid(&self) -> bool {
        !self.state.no_chuid
    }

    /// Algorithm identifiers the card advertised in its application
    /// property template, raw as seen on the wire.
    pub fn algorithms(&self) -> &[u8] {
        &self.state.algorithms
    }

    /// Whether the card answered the Yubico version probe.
    pub fn is_yubico(&self) -> bool {
        self.state.ykpiv_version.is_some()
    }

    /// Firmware version, when the card is a YubiKey.
    pub fn yubico_version(&self) -> Option<Version> {
        self.state.ykpiv_version
    }

    /// Cached slot entry, populated by a prior certificate read.
    pub fn get_slot(&self, id: SlotId) -> Option<&Slot> {
        self.state.slot(id)
    }

    /// All cached slot entries.
    pub fn slots(&self) -> &[Slot] {
        &self.state.slots
    }

    pub(crate) fn disconnect(&mut self, reset: bool) {
        self.backend.disconnect(reset);
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        // Leave the card powered; security state was already handled by
        // the reset disposition at transaction end.
        self.disconnect(false);
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("reader", &self.state.reader)
            .field("protocol", &self.state.protocol)
            .field("guid", &self.uuid())
            .field("yubico", &self.is_yubico())
            .finish()
    }
}

/// Walk all attached readers and build a token for every card that
/// carries the PIV applet.
///
/// For each reader the card is probed inside a transaction: applet
/// selection, then the CHUID read (a card without one is kept, with
/// [`Token::has_chuid`] false), then the Yubico version probe (rejection
/// means "not a YubiKey", not an error). Cards failing any other way are
/// disconnected with reset and skipped. Tokens come back
/// most-recently-opened first.
pub fn enumerate(ctx: &mut dyn ReaderContext) -> Result<Vec<Token>> {
    let mut tokens: Vec<Token> = Vec::new();

    for reader in ctx.list_readers()? {
        let backend = match ctx.connect(&reader) {
            Ok(backend) => backend,
            Err(err) => {
                debug!("could not connect to reader '{}': {}", reader, err);
                continue;
            }
        };

        let mut token = Token::new(reader, backend);
        match probe(&mut token) {
            Ok(()) => tokens.insert(0, token),
            Err(err) => {
                debug!(
                    "reader '{}' does not hold a usable PIV card: {}",
                    token.reader(),
                    err
                );
                token.disconnect(true);
            }
        }
    }

    Ok(tokens)
}

fn probe(token: &mut Token) -> Result<()> {
    let mut txn = token.begin_transaction()?;

    txn.select()?;

    match txn.read_chuid() {
        Ok(()) | Err(Error::NotFound) => (),
        Err(err) => return Err(err),
    }

    match txn.probe_version() {
        Ok(_) | Err(Error::NotSupported) => (),
        Err(err) => return Err(err),
    }

    Ok(())
}
