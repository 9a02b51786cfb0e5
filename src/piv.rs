//! PIV key slots and the cryptographic operations performed against them.

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
    apdu::{Ins, StatusWords},
    certificate::{parse_certificate, PublicKeyInfo},
    consts::*,
    error::{Error, Result},
    tlv::{TlvReader, TlvWriter},
    token::Slot,
    transaction::Transaction,
    Buffer,
};
use elliptic_curve::sec1::ToEncodedPoint;
use log::{debug, trace, warn};
use rsa::{BigUint, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384};
use std::fmt::{self, Display};
use zeroize::Zeroizing;

/// Key slot identifiers.
///
/// The four standard PIV key slots; the admin key reference (9B) is not a
/// key slot and is addressed only by [`Transaction::auth_admin`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub enum SlotId {
    /// 9A: card/cardholder authentication, e.g. system login.
    Authentication,

    /// 9C: digital signatures.
    Signature,

    /// 9D: key management, i.e. encryption for confidentiality.
    KeyManagement,

    /// 9E: card authentication without cardholder consent (PIN-less).
    CardAuthentication,
}

impl TryFrom<u8> for SlotId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x9a => Ok(SlotId::Authentication),
            0x9c => Ok(SlotId::Signature),
            0x9d => Ok(SlotId::KeyManagement),
            0x9e => Ok(SlotId::CardAuthentication),
            _ => Err(Error::InvalidData),
        }
    }
}

impl From<SlotId> for u8 {
    fn from(slot: SlotId) -> u8 {
        match slot {
            SlotId::Authentication => 0x9a,
            SlotId::Signature => 0x9c,
            SlotId::KeyManagement => 0x9d,
            SlotId::CardAuthentication => 0x9e,
        }
    }
}

impl Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:2x}", u8::from(*self))
    }
}

impl SlotId {
    /// Data object holding this slot's certificate.
    pub(crate) fn cert_object(self) -> u32 {
        match self {
            SlotId::Authentication => OBJ_CERT_9A,
            SlotId::Signature => OBJ_CERT_9C,
            SlotId::KeyManagement => OBJ_CERT_9D,
            SlotId::CardAuthentication => OBJ_CERT_9E,
        }
    }
}

/// Asymmetric algorithm identifiers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AlgorithmId {
    /// 1024-bit RSA
    Rsa1024,

    /// 2048-bit RSA
    Rsa2048,

    /// ECDSA/ECDH with NIST P-256
    EccP256,

    /// ECDSA/ECDH with NIST P-384
    EccP384,
}

impl TryFrom<u8> for AlgorithmId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            ALG_RSA1024 => Ok(AlgorithmId::Rsa1024),
            ALG_RSA2048 => Ok(AlgorithmId::Rsa2048),
            ALG_ECCP256 => Ok(AlgorithmId::EccP256),
            ALG_ECCP384 => Ok(AlgorithmId::EccP384),
            _ => Err(Error::NotSupported),
        }
    }
}

impl From<AlgorithmId> for u8 {
    fn from(id: AlgorithmId) -> u8 {
        match id {
            AlgorithmId::Rsa1024 => ALG_RSA1024,
            AlgorithmId::Rsa2048 => ALG_RSA2048,
            AlgorithmId::EccP256 => ALG_ECCP256,
            AlgorithmId::EccP384 => ALG_ECCP384,
        }
    }
}

/// Hash algorithms used for signing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HashAlgo {
    /// SHA-1 (honored for RSA and P-256 when explicitly requested)
    Sha1,

    /// SHA-256
    Sha256,

    /// SHA-384 (forced for P-384 slots)
    Sha384,
}

impl HashAlgo {
    fn digest_len(self) -> usize {
        match self {
            HashAlgo::Sha1 => 20,
            HashAlgo::Sha256 => 32,
            HashAlgo::Sha384 => 48,
        }
    }

    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgo::Sha1 => Sha1::digest(data).to_vec(),
            HashAlgo::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgo::Sha384 => Sha384::digest(data).to_vec(),
        }
    }
}

impl<'a> Transaction<'a> {
    /// Read a slot's certificate object and cache the parsed result on
    /// the token.
    pub fn read_cert(&mut self, slot: SlotId) -> Result<()> {
        let mut tlv = TlvWriter::new();
        tlv.push(TAG_OBJ_ID);
        tlv.write_uint(slot.cert_object());
        tlv.pop();

        let response = self.transceive_chain(Ins::GetData, 0x3f, 0xff, tlv.as_bytes())?;
        match response.status_words() {
            StatusWords::Success => (),
            StatusWords::FileNotFound => return Err(Error::NotFound),
            sw => {
                debug!(
                    "card did not accept GET DATA for slot {} certificate: {:04x}",
                    slot,
                    sw.code()
                );
                return Err(Error::InvalidData);
            }
        }

        let mut certinfo = 0u8;
        let mut cert_der: Option<&[u8]> = None;

        let mut tlv = TlvReader::new(response.data());
        if tlv.read_tag().map_err(|_| Error::NotSupported)? != TAG_OBJ_DATA {
            debug!("invalid outer tag in certificate object for slot {}", slot);
            return Err(Error::NotSupported);
        }
        while !tlv.at_end() {
            match tlv.read_tag().map_err(|_| Error::NotSupported)? {
                TAG_CERT_INFO => {
                    certinfo = tlv.read_byte().map_err(|_| Error::NotSupported)?;
                    tlv.end().map_err(|_| Error::NotSupported)?;
                }
                TAG_CERT => {
                    cert_der = Some(tlv.ptr());
                    tlv.skip();
                }
                _ => tlv.skip(),
            }
        }
        tlv.end().map_err(|_| Error::NotSupported)?;

        // Per NIST this bit is always zero; a set bit means the object is
        // not an X.509 certificate at all.
        if certinfo & PIV_CI_X509 != 0 {
            debug!("slot {} certinfo has the X.509 bit set", slot);
            return Err(Error::NotSupported);
        }

        if certinfo & PIV_CI_COMPTYPE != PIV_COMP_NONE {
            warn!("slot {} holds a compressed certificate", slot);
            return Err(Error::NotSupported);
        }

        let cert_der = cert_der.ok_or(Error::NotSupported)?;
        let (subject, pubkey) = parse_certificate(cert_der)?;
        let algorithm = pubkey.algorithm();

        let entry = Slot {
            id: slot,
            algorithm,
            cert_der: cert_der.to_vec(),
            subject,
            pubkey,
        };
        match self.state.slots.iter_mut().find(|s| s.id == slot) {
            Some(existing) => *existing = entry,
            None => self.state.slots.push(entry),
        }

        Ok(())
    }

    /// Read certificates for all standard slots.
    ///
    /// Empty and unsupported slots are skipped; only transport and
    /// protocol errors propagate.
    pub fn read_all_certs(&mut self) -> Result<()> {
        for slot in [
            SlotId::CardAuthentication,
            SlotId::Authentication,
            SlotId::Signature,
            SlotId::KeyManagement,
        ] {
            match self.read_cert(slot) {
                Ok(()) | Err(Error::NotFound) | Err(Error::NotSupported) => (),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Write a certificate into a slot's data object.
    ///
    /// `certinfo` is the raw info byte; pass 0 for an uncompressed
    /// certificate or [`crate::consts::CERTINFO_GZIP`] when storing one
    /// that is already gzip-compressed (such certificates can be written
    /// for other clients, but this crate refuses to read them back).
    pub fn write_cert(&mut self, slot: SlotId, cert_der: &[u8], certinfo: u8) -> Result<()> {
        let mut tlv = TlvWriter::new();
        tlv.push_long(TAG_CERT, cert_der.len() + 3);
        tlv.write(cert_der);
        tlv.pop();
        tlv.push(TAG_CERT_INFO);
        tlv.write_byte(certinfo);
        tlv.pop();

        self.write_file(slot.cert_object(), tlv.as_bytes())
    }

    /// Generate a key pair on the card, returning the new public key.
    ///
    /// Requires admin authentication.
    pub fn generate(&mut self, slot: SlotId, algorithm: AlgorithmId) -> Result<PublicKeyInfo> {
        let mut tlv = TlvWriter::new();
        tlv.push(TAG_GEN_TEMPLATE);
        tlv.push(0x80);
        tlv.write_uint(u32::from(u8::from(algorithm)));
        tlv.pop();
        tlv.pop();

        let response =
            self.transceive_chain(Ins::GenerateAsymmetric, 0x00, slot.into(), tlv.as_bytes())?;
        match response.status_words() {
            StatusWords::Success => (),
            StatusWords::SecurityStatus => return Err(Error::PermissionDenied),
            sw => {
                debug!(
                    "card did not accept GENERATE ASYMMETRIC for slot {}: {:04x}",
                    slot,
                    sw.code()
                );
                return Err(Error::InvalidData);
            }
        }

        let mut tlv = TlvReader::new(response.data());
        if tlv.read_tag().map_err(|_| Error::NotSupported)? != TAG_GEN_RESPONSE {
            debug!("invalid outer tag in GENERATE ASYMMETRIC response");
            return Err(Error::NotSupported);
        }

        let pubkey = match algorithm {
            AlgorithmId::Rsa1024 | AlgorithmId::Rsa2048 => {
                let mut modulus: Option<Vec<u8>> = None;
                let mut exponent: Option<Vec<u8>> = None;

                while !tlv.at_end() {
                    match tlv.read_tag().map_err(|_| Error::NotSupported)? {
                        TAG_GEN_RSA_MODULUS => {
                            modulus = Some(tlv.ptr().to_vec());
                            tlv.skip();
                        }
                        TAG_GEN_RSA_EXP => {
                            exponent = Some(tlv.ptr().to_vec());
                            tlv.skip();
                        }
                        _ => return Err(Error::NotSupported),
                    }
                }
                tlv.end().map_err(|_| Error::NotSupported)?;

                let (n, e) = modulus.zip(exponent).ok_or(Error::NotSupported)?;
                let pubkey =
                    RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
                        .map_err(|_| Error::InvalidData)?;
                PublicKeyInfo::Rsa { algorithm, pubkey }
            }
            AlgorithmId::EccP256 | AlgorithmId::EccP384 => {
                let mut point: Option<Vec<u8>> = None;

                while !tlv.at_end() {
                    match tlv.read_tag().map_err(|_| Error::NotSupported)? {
                        TAG_GEN_ECC_POINT => {
                            point = Some(tlv.ptr().to_vec());
                            tlv.skip();
                        }
                        _ => return Err(Error::NotSupported),
                    }
                }
                tlv.end().map_err(|_| Error::NotSupported)?;

                // from_sec1_bytes rejects points that are not on the curve
                let point = point.ok_or(Error::NotSupported)?;
                if algorithm == AlgorithmId::EccP256 {
                    p256::PublicKey::from_sec1_bytes(&point)
                        .map(PublicKeyInfo::EcP256)
                        .map_err(|_| Error::InvalidData)?
                } else {
                    p384::PublicKey::from_sec1_bytes(&point)
                        .map(PublicKeyInfo::EcP384)
                        .map_err(|_| Error::InvalidData)?
                }
            }
        };

        Ok(pubkey)
    }

    /// Sign a message with a slot key, hashing it first.
    ///
    /// The hash is chosen per the slot algorithm: SHA-256 by default,
    /// SHA-1 honored for RSA and P-256 slots when requested, SHA-384
    /// forced for P-384. When the card itself advertises hash-on-card for
    /// P-256 the raw message goes to the card under the specialized
    /// algorithm identifier instead.
    ///
    /// Returns the signature and the hash that was actually used.
    pub fn sign(
        &mut self,
        slot: SlotId,
        data: &[u8],
        hash: Option<HashAlgo>,
    ) -> Result<(Buffer, HashAlgo)> {
        let slot_alg = self.state.slot(slot).ok_or(Error::NotFound)?.algorithm;

        let mut card_hash_alg = None;
        let (hash, input_len) = match slot_alg {
            AlgorithmId::Rsa1024 | AlgorithmId::Rsa2048 => {
                let hash = match hash {
                    Some(HashAlgo::Sha1) => HashAlgo::Sha1,
                    _ => HashAlgo::Sha256,
                };
                let input_len = if slot_alg == AlgorithmId::Rsa1024 {
                    128
                } else {
                    256
                };
                (hash, input_len)
            }
            AlgorithmId::EccP256 => {
                let hash = match hash {
                    Some(HashAlgo::Sha1) => HashAlgo::Sha1,
                    _ => HashAlgo::Sha256,
                };
                for &alg in &self.state.algorithms {
                    if alg == ALG_ECCP256_SHA1 && hash == HashAlgo::Sha1
                        || alg == ALG_ECCP256_SHA256 && hash == HashAlgo::Sha256
                    {
                        card_hash_alg = Some(alg);
                    }
                }
                (hash, hash.digest_len())
            }
            AlgorithmId::EccP384 => (HashAlgo::Sha384, 48),
        };

        let (wire_alg, input): (u8, Zeroizing<Vec<u8>>) = match card_hash_alg {
            Some(alg) => {
                // the slot keeps its normal algorithm; only this exchange
                // uses the specialized identifier
                trace!("hashing on card");
                (alg, Zeroizing::new(data.to_vec()))
            }
            None => {
                let digest = hash.digest(data);
                let input = match slot_alg {
                    AlgorithmId::Rsa1024 | AlgorithmId::Rsa2048 => {
                        pkcs1_v15_pad(&digest, input_len)?
                    }
                    _ => Zeroizing::new(digest),
                };
                (slot_alg.into(), input)
            }
        };

        let signature = self.general_authenticate(slot, wire_alg, GA_TAG_CHALLENGE, &input)?;
        Ok((signature, hash))
    }

    /// Sign an already-hashed (and, for RSA, already-padded) input.
    pub fn sign_prehash(&mut self, slot: SlotId, hashed: &[u8]) -> Result<Buffer> {
        let alg = self.state.slot(slot).ok_or(Error::NotFound)?.algorithm;
        self.general_authenticate(slot, alg.into(), GA_TAG_CHALLENGE, hashed)
    }

    /// Perform ECDH between a slot key and a peer public key, returning
    /// the raw X coordinate of the shared point.
    ///
    /// Requires the security status for the slot (PIN), like signing.
    pub fn ecdh(&mut self, slot: SlotId, peer: &PublicKeyInfo) -> Result<Buffer> {
        let alg = self.state.slot(slot).ok_or(Error::NotFound)?.algorithm;

        let point = match peer {
            PublicKeyInfo::EcP256(key) => key.to_encoded_point(false).as_bytes().to_vec(),
            PublicKeyInfo::EcP384(key) => key.to_encoded_point(false).as_bytes().to_vec(),
            PublicKeyInfo::Rsa { .. } => return Err(Error::InvalidData),
        };

        self.general_authenticate(slot, alg.into(), GA_TAG_EXP, &point)
    }

    /// GENERAL AUTHENTICATE with an empty RESPONSE element and the given
    /// input element; shared by signing and ECDH.
    fn general_authenticate(
        &mut self,
        slot: SlotId,
        wire_alg: u8,
        input_tag: u16,
        input: &[u8],
    ) -> Result<Buffer> {
        let mut tlv = TlvWriter::new();
        tlv.push_long(TAG_DYN_AUTH, input.len() + 16);
        tlv.push(GA_TAG_RESPONSE);
        tlv.pop();
        tlv.push_long(input_tag, input.len());
        tlv.write(input);
        tlv.pop();
        tlv.pop();
        let body = Zeroizing::new(tlv.into_vec());

        let response =
            self.transceive_chain(Ins::Authenticate, wire_alg, slot.into(), &body)?;
        match response.status_words() {
            StatusWords::Success => (),
            StatusWords::SecurityStatus => return Err(Error::PermissionDenied),
            sw => {
                debug!(
                    "card did not accept GENERAL AUTHENTICATE for slot {}: {:04x}",
                    slot,
                    sw.code()
                );
                return Err(Error::InvalidData);
            }
        }

        let mut tlv = TlvReader::new(response.data());
        if tlv.read_tag().map_err(|_| Error::NotSupported)? != TAG_DYN_AUTH {
            debug!("invalid outer tag in GENERAL AUTHENTICATE response");
            return Err(Error::NotSupported);
        }
        if tlv.read_tag().map_err(|_| Error::NotSupported)? != GA_TAG_RESPONSE {
            return Err(Error::NotSupported);
        }

        Ok(Zeroizing::new(tlv.ptr().to_vec()))
    }
}

/// Build the PKCS#1 v1.5 signing block `00 01 FF…FF 00 DigestInfo`,
/// left-padded to the key modulus size.
///
/// The DigestInfo hash OID stays pinned to SHA-256 regardless of the hash
/// actually used; deployed verifiers interoperate with this encoding and
/// changing it would alter every signature emitted under SHA-1.
fn pkcs1_v15_pad(digest: &[u8], input_len: usize) -> Result<Zeroizing<Vec<u8>>> {
    const OID_SHA256: [u8; 9] = [0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];

    let mut di = TlvWriter::new();
    di.push(0x30);
    di.push(0x30);
    di.push(0x06);
    di.write(&OID_SHA256);
    di.pop();
    di.push(0x05);
    di.pop();
    di.pop();
    di.push(0x04);
    di.write(digest);
    di.pop();
    di.pop();
    let digest_info = di.into_vec();

    // at minimum: 00 01, eight 0xff bytes, 00
    if digest_info.len() + 11 > input_len {
        return Err(Error::InvalidData);
    }

    let mut block = Zeroizing::new(vec![0xffu8; input_len]);
    block[0] = 0x00;
    block[1] = 0x01;
    let offset = input_len - digest_info.len();
    block[offset - 1] = 0x00;
    block[offset..].copy_from_slice(&digest_info);
    Ok(block)
}
