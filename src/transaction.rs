//! Exclusive card transactions: APDU transport, chaining, and the PIV
//! application state machine.
//!
//! All card traffic runs through a [`Transaction`], which holds the
//! exclusive PC/SC transaction for its whole lifetime. Operations that
//! change the card's security state (PIN presentation, admin
//! authentication) flag the transaction so the card is reset when the
//! guard drops, keeping that state from leaking into the next session.

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
    admin::AdminKey,
    apdu::{Apdu, Ins, Response, StatusWords},
    card::CardTransaction,
    consts::*,
    error::{Error, Result},
    tlv::{TlvReader, TlvWriter},
    token::{TokenState, Version},
};
use log::{debug, trace, warn};
use zeroize::Zeroizing;

/// Exclusive transaction on a token's card.
///
/// Returned by [`crate::Token::begin_transaction`]; ending the
/// transaction (by drop) passes the reset disposition when an operation
/// in between altered the card's security state.
pub struct Transaction<'a> {
    inner: Box<dyn CardTransaction + 'a>,
    pub(crate) state: &'a mut TokenState,
    reset: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(inner: Box<dyn CardTransaction + 'a>, state: &'a mut TokenState) -> Self {
        Transaction {
            inner,
            state,
            reset: false,
        }
    }

    /// Reader name, for log context.
    fn reader(&self) -> &str {
        &self.state.reader
    }

    /// Mark the card for reset when this transaction ends.
    pub(crate) fn set_reset(&mut self) {
        self.reset = true;
    }

    /// Transmit one APDU and split the status word off the reply.
    pub(crate) fn transceive(&mut self, apdu: &Apdu) -> Result<Response> {
        let wire = apdu.to_bytes();
        trace!(">> {} byte command", wire.len());

        let raw = self.inner.transmit(&wire, MAX_APDU_SIZE)?;
        let response = Response::from(raw);
        trace!(
            "<< {} byte reply, sw {:04x}",
            response.data().len(),
            response.code()
        );
        Ok(response)
    }

    /// Transmit a command of any length, chaining in both directions.
    ///
    /// Bodies beyond one wire block go out in 255-byte blocks with the
    /// CLA chain bit set on all but the last; `61xx` replies are drained
    /// with GET RESPONSE into one contiguous buffer.
    pub(crate) fn transceive_chain(
        &mut self,
        ins: Ins,
        p1: u8,
        p2: u8,
        data: &[u8],
    ) -> Result<Response> {
        let mut offset = 0;
        let mut reply: Vec<u8> = Vec::new();
        let mut sw;

        loop {
            let remaining = data.len() - offset;
            let block_len = remaining.min(APDU_DATA_MAX);

            let mut apdu = Apdu::new(ins);
            apdu.params(p1, p2);
            if remaining > APDU_DATA_MAX {
                apdu.cla(CLA_CHAIN);
            }
            if block_len > 0 {
                apdu.data(&data[offset..offset + block_len]);
            }

            let response = self.transceive(&apdu)?;
            sw = response.status_words();

            match sw.high_byte() {
                // no-error, bytes-remaining, and the warning classes all
                // continue the chain
                0x90 | 0x61 | 0x62 | 0x63 => (),
                _ => return Ok(response),
            }

            self.append_reply(&mut reply, response.data())?;

            offset += block_len;
            if offset >= data.len() {
                break;
            }
        }

        while sw.high_byte() == 0x61 {
            trace!("card holds {} more reply bytes", sw.code() & 0xff);

            let response = self.transceive(&Apdu::new(Ins::GetResponse))?;
            sw = response.status_words();
            self.append_reply(&mut reply, response.data())?;
        }

        Ok(Response::new(sw, reply))
    }

    fn append_reply(&self, reply: &mut Vec<u8>, block: &[u8]) -> Result<()> {
        if reply.len() + block.len() > MAX_APDU_SIZE {
            debug!(
                "reply overflows reassembly buffer: {} + {} bytes",
                reply.len(),
                block.len()
            );
            return Err(Error::Memory);
        }
        reply.extend_from_slice(block);
        Ok(())
    }

    /// Select the PIV applet and record the algorithms the card
    /// advertises.
    pub fn select(&mut self) -> Result<()> {
        let mut apdu = Apdu::new(Ins::SelectApplication);
        apdu.params(0x04, 0x00).data(PIV_AID);

        let response = self.transceive(&apdu)?;
        if !response.is_success() {
            debug!(
                "card in '{}' did not accept SELECT for the PIV applet: {:04x}",
                self.reader(),
                response.code()
            );
            return Err(Error::NotFound);
        }

        self.parse_apt(response.data())
    }

    fn parse_apt(&mut self, data: &[u8]) -> Result<()> {
        let mut tlv = TlvReader::new(data);

        if tlv.read_tag().map_err(|_| Error::NotSupported)? != TAG_APT {
            debug!("invalid outer tag in SELECT response");
            return Err(Error::NotSupported);
        }

        while !tlv.at_end() {
            match tlv.read_tag().map_err(|_| Error::NotSupported)? {
                TAG_APT_AID | TAG_APT_AUTHORITY | TAG_APT_APP_LABEL | TAG_APT_URI => tlv.skip(),
                TAG_APT_ALGS => {
                    if !self.state.algorithms.is_empty() {
                        tlv.skip();
                        continue;
                    }
                    while !tlv.at_end() {
                        match tlv.read_tag().map_err(|_| Error::NotSupported)? {
                            0x80 => {
                                let alg = tlv.read_uint().map_err(|_| Error::NotSupported)?;
                                self.state.algorithms.push(alg as u8);
                                tlv.end().map_err(|_| Error::NotSupported)?;
                            }
                            0x06 => tlv.skip(),
                            _ => return Err(Error::NotSupported),
                        }
                    }
                    tlv.end().map_err(|_| Error::NotSupported)?;
                }
                tag => {
                    debug!(
                        "card returned unknown tag {:#x} in SELECT response",
                        tag
                    );
                    return Err(Error::NotSupported);
                }
            }
        }
        tlv.end().map_err(|_| Error::NotSupported)
    }

    /// Read the CHUID and store the card GUID on the token.
    ///
    /// A card without a CHUID yields [`Error::NotFound`] and leaves the
    /// token marked accordingly; enumeration treats that as acceptable.
    pub fn read_chuid(&mut self) -> Result<()> {
        let mut tlv = TlvWriter::new();
        tlv.push(TAG_OBJ_ID);
        tlv.write_uint(OBJ_CHUID);
        tlv.pop();

        let mut apdu = Apdu::new(Ins::GetData);
        apdu.params(0x3f, 0xff).data(tlv.as_bytes());

        let response = self.transceive(&apdu)?;
        match response.status_words() {
            StatusWords::Success => (),
            StatusWords::FileNotFound => {
                self.state.no_chuid = true;
                return Err(Error::NotFound);
            }
            sw => {
                debug!(
                    "card in '{}' did not accept GET DATA for the CHUID: {:04x}",
                    self.reader(),
                    sw.code()
                );
                return Err(Error::InvalidData);
            }
        }

        let mut guid = [0u8; 16];
        let mut tlv = TlvReader::new(response.data());

        if tlv.read_tag().map_err(|_| Error::NotSupported)? != TAG_OBJ_DATA {
            debug!("invalid outer tag in CHUID response");
            return Err(Error::NotSupported);
        }
        while !tlv.at_end() {
            match tlv.read_tag().map_err(|_| Error::NotSupported)? {
                TAG_CHUID_GUID => {
                    if tlv.remaining() != guid.len() {
                        return Err(Error::NotSupported);
                    }
                    tlv.read(&mut guid);
                    tlv.end().map_err(|_| Error::NotSupported)?;
                }
                // buffer length, FASC-N, org ident, DUNS, expiration,
                // cardholder UUID, signature, CRC
                0xee | 0x30 | 0x32 | 0x33 | 0x35 | 0x36 | 0x3e | 0xfe => tlv.skip(),
                tag => {
                    debug!("card returned unknown tag {:#x} in CHUID", tag);
                    return Err(Error::NotSupported);
                }
            }
        }
        tlv.end().map_err(|_| Error::NotSupported)?;

        self.state.guid = guid;
        self.state.no_chuid = false;
        Ok(())
    }

    /// Probe the Yubico GET VERSION extension.
    ///
    /// Cards that reject it are simply not YubiKeys; callers treat
    /// [`Error::NotSupported`] as that answer.
    pub fn probe_version(&mut self) -> Result<Version> {
        let response = self.transceive(&Apdu::new(Ins::GetVersion))?;

        if !response.is_success() {
            return Err(Error::NotSupported);
        }

        let data = response.data();
        if data.len() < 3 {
            return Err(Error::NotSupported);
        }

        let version = Version {
            major: data[0],
            minor: data[1],
            patch: data[2],
        };
        self.state.ykpiv_version = Some(version);
        Ok(version)
    }

    /// Present the cardholder PIN.
    ///
    /// When `retries` points at a non-zero count, an empty VERIFY first
    /// probes how many attempts remain without consuming one: if the card
    /// reports no more than `*retries` attempts left, the PIN is not sent
    /// and [`Error::TriesRemaining`] comes back. A probe reply that is not
    /// a retry count does not stop the verification attempt.
    ///
    /// On a wrong PIN the card's remaining count is written through
    /// `retries`.
    pub fn verify_pin(&mut self, pin: &[u8], mut retries: Option<&mut u8>) -> Result<()> {
        let wire = pin_wire(pin)?;

        if let Some(floor) = retries.as_deref().copied() {
            if floor > 0 {
                let mut apdu = Apdu::new(Ins::Verify);
                apdu.params(0x00, 0x80);

                let response = self.transceive(&apdu)?;
                if let StatusWords::VerifyFail { tries } = response.status_words() {
                    if tries <= floor {
                        return Err(Error::TriesRemaining { tries });
                    }
                }
            }
        }

        let mut apdu = Apdu::new(Ins::Verify);
        apdu.params(0x00, 0x80).data(wire.as_ref());

        let response = self.transceive(&apdu)?;
        match response.status_words() {
            StatusWords::Success => {
                self.set_reset();
                Ok(())
            }
            StatusWords::VerifyFail { tries } => {
                if let Some(retries) = retries.as_deref_mut() {
                    *retries = tries;
                }
                Err(Error::AuthFailed {
                    retries: Some(tries),
                })
            }
            sw => {
                debug!(
                    "card in '{}' did not accept VERIFY: {:04x}",
                    self.reader(),
                    sw.code()
                );
                Err(Error::InvalidData)
            }
        }
    }

    /// Change the cardholder PIN.
    pub fn change_pin(&mut self, current_pin: &[u8], new_pin: &[u8]) -> Result<()> {
        let mut body = Zeroizing::new([0xffu8; 16]);
        body[..8].copy_from_slice(pin_wire(current_pin)?.as_ref());
        body[8..].copy_from_slice(pin_wire(new_pin)?.as_ref());

        let mut apdu = Apdu::new(Ins::ChangeReference);
        apdu.params(0x00, 0x80).data(body.as_ref());

        let response = self.transceive(&apdu)?;
        match response.status_words() {
            StatusWords::Success => {
                self.set_reset();
                Ok(())
            }
            StatusWords::VerifyFail { tries } => Err(Error::AuthFailed {
                retries: Some(tries),
            }),
            sw => {
                debug!(
                    "card in '{}' did not accept CHANGE REFERENCE DATA: {:04x}",
                    self.reader(),
                    sw.code()
                );
                Err(Error::InvalidData)
            }
        }
    }

    /// Authenticate as the card admin (slot 9B) with a 3DES
    /// challenge-response.
    ///
    /// Admin state persists on the card until reset, so the transaction
    /// is flagged for reset-on-end.
    pub fn auth_admin(&mut self, key: &AdminKey) -> Result<()> {
        // ask for a challenge: an empty CHALLENGE element
        let mut tlv = TlvWriter::new();
        tlv.push(TAG_DYN_AUTH);
        tlv.push(GA_TAG_CHALLENGE);
        tlv.pop();
        tlv.pop();

        let mut apdu = Apdu::new(Ins::Authenticate);
        apdu.params(ALG_3DES, SLOT_ADMIN).data(tlv.as_bytes());

        let response = self.transceive(&apdu)?;
        if !response.is_success() {
            debug!(
                "card in '{}' did not return an admin challenge: {:04x}",
                self.reader(),
                response.code()
            );
            return Err(Error::InvalidData);
        }

        let mut challenge = Zeroizing::new([0u8; 8]);
        let mut have_challenge = false;

        let mut tlv = TlvReader::new(response.data());
        if tlv.read_tag().map_err(|_| Error::NotSupported)? != TAG_DYN_AUTH {
            debug!("invalid outer tag in admin challenge response");
            return Err(Error::NotSupported);
        }
        while !tlv.at_end() {
            match tlv.read_tag().map_err(|_| Error::NotSupported)? {
                GA_TAG_CHALLENGE => {
                    if tlv.remaining() != challenge.len() {
                        return Err(Error::NotSupported);
                    }
                    tlv.read(challenge.as_mut());
                    have_challenge = true;
                    tlv.end().map_err(|_| Error::NotSupported)?;
                }
                _ => tlv.skip(),
            }
        }
        tlv.end().map_err(|_| Error::NotSupported)?;

        if !have_challenge {
            return Err(Error::NotSupported);
        }

        let challenge_response = key.encrypt_challenge(&challenge);

        let mut tlv = TlvWriter::new();
        tlv.push(TAG_DYN_AUTH);
        tlv.push(GA_TAG_RESPONSE);
        tlv.write(challenge_response.as_ref());
        tlv.pop();
        tlv.pop();
        let body = Zeroizing::new(tlv.into_vec());

        // Whatever the outcome, security state may have changed
        self.set_reset();

        let mut apdu = Apdu::new(Ins::Authenticate);
        apdu.params(ALG_3DES, SLOT_ADMIN).data(body.as_slice());

        let response = self.transceive(&apdu)?;
        match response.status_words() {
            StatusWords::Success => Ok(()),
            StatusWords::IncorrectP1P2 => Err(Error::NotFound),
            StatusWords::WrongData => Err(Error::AuthFailed { retries: None }),
            sw => {
                debug!(
                    "card in '{}' rejected admin response: {:04x}",
                    self.reader(),
                    sw.code()
                );
                Err(Error::InvalidData)
            }
        }
    }

    /// Write one PIV data object via PUT DATA, chaining as needed.
    pub fn write_file(&mut self, object_tag: u32, data: &[u8]) -> Result<()> {
        let mut tlv = TlvWriter::new();
        tlv.push(TAG_OBJ_ID);
        tlv.write_uint(object_tag);
        tlv.pop();
        tlv.push_long(TAG_OBJ_DATA, data.len() + 8);
        tlv.write(data);
        tlv.pop();

        let response = self.transceive_chain(Ins::PutData, 0x3f, 0xff, tlv.as_bytes())?;
        match response.status_words() {
            StatusWords::Success => Ok(()),
            StatusWords::NoSpace => Err(Error::Memory),
            StatusWords::SecurityStatus => Err(Error::PermissionDenied),
            StatusWords::FuncNotSupported => Err(Error::NotFound),
            sw => {
                warn!(
                    "card in '{}' did not accept PUT DATA for {:#x}: {:04x}",
                    self.reader(),
                    object_tag,
                    sw.code()
                );
                Err(Error::InvalidData)
            }
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.inner.end(self.reset) {
            warn!(
                "failed ending card transaction on '{}': {}",
                self.state.reader, err
            );
        }
    }
}

/// Fixed 8-byte PIN wire form, right-padded with `0xff`.
fn pin_wire(pin: &[u8]) -> Result<Zeroizing<[u8; PIN_WIRE_LEN]>> {
    if pin.len() > PIN_WIRE_LEN {
        return Err(Error::InvalidData);
    }

    let mut wire = Zeroizing::new([0xffu8; PIN_WIRE_LEN]);
    wire[..pin.len()].copy_from_slice(pin);
    Ok(wire)
}
