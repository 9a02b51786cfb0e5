//! X.509 certificate parsing for slot cache entries.
//!
//! Cards hand back DER certificates; the slot cache keeps the subject
//! name and a parsed copy of the SubjectPublicKeyInfo so signing and
//! envelope operations can dispatch on the key type without re-parsing.

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

use crate::{piv::AlgorithmId, Error, Result};
use log::error;
use rsa::{pkcs1::DecodeRsaPublicKey, traits::PublicKeyParts, RsaPublicKey};
use std::fmt;
use x509_parser::prelude::*;

const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_NIST_P256: &str = "1.2.840.10045.3.1.7";
const OID_NIST_P384: &str = "1.3.132.0.34";

/// A public key extracted from a certificate (or a key-generation
/// response).
#[derive(Clone, PartialEq)]
pub enum PublicKeyInfo {
    /// RSA keys
    Rsa {
        /// Inferred algorithm (1024- or 2048-bit)
        algorithm: AlgorithmId,

        /// Public key
        pubkey: RsaPublicKey,
    },

    /// EC P-256 keys
    EcP256(p256::PublicKey),

    /// EC P-384 keys
    EcP384(p384::PublicKey),
}

impl fmt::Debug for PublicKeyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyInfo({:?})", self.algorithm())
    }
}

impl PublicKeyInfo {
    /// The PIV algorithm this key is used with.
    pub fn algorithm(&self) -> AlgorithmId {
        match self {
            PublicKeyInfo::Rsa { algorithm, .. } => *algorithm,
            PublicKeyInfo::EcP256(_) => AlgorithmId::EccP256,
            PublicKeyInfo::EcP384(_) => AlgorithmId::EccP384,
        }
    }

    fn parse(spki: &SubjectPublicKeyInfo<'_>) -> Result<Self> {
        let key_bytes: &[u8] = &spki.subject_public_key.data;

        match spki.algorithm.algorithm.to_id_string().as_str() {
            OID_RSA_ENCRYPTION => {
                let pubkey =
                    RsaPublicKey::from_pkcs1_der(key_bytes).map_err(|_| Error::InvalidData)?;

                let algorithm = match pubkey.n().bits() {
                    1024 => AlgorithmId::Rsa1024,
                    2048 => AlgorithmId::Rsa2048,
                    bits => {
                        error!("unsupported RSA modulus size: {} bits", bits);
                        return Err(Error::NotSupported);
                    }
                };

                Ok(PublicKeyInfo::Rsa { algorithm, pubkey })
            }
            OID_EC_PUBLIC_KEY => {
                let curve_oid = spki
                    .algorithm
                    .parameters
                    .as_ref()
                    .and_then(|params| params.as_oid().ok())
                    .ok_or(Error::InvalidData)?;

                match curve_oid.to_id_string().as_str() {
                    OID_NIST_P256 => p256::PublicKey::from_sec1_bytes(key_bytes)
                        .map(PublicKeyInfo::EcP256)
                        .map_err(|_| Error::InvalidData),
                    OID_NIST_P384 => p384::PublicKey::from_sec1_bytes(key_bytes)
                        .map(PublicKeyInfo::EcP384)
                        .map_err(|_| Error::InvalidData),
                    oid => {
                        error!("unsupported EC curve: {}", oid);
                        Err(Error::NotSupported)
                    }
                }
            }
            oid => {
                error!("unsupported public key algorithm: {}", oid);
                Err(Error::NotSupported)
            }
        }
    }
}

/// Parse a DER certificate into the subject name and public key the slot
/// cache carries.
pub(crate) fn parse_certificate(der: &[u8]) -> Result<(String, PublicKeyInfo)> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|_| Error::InvalidData)?;

    let subject = cert.tbs_certificate.subject.to_string();
    let pubkey = PublicKeyInfo::parse(&cert.tbs_certificate.subject_pki)?;

    Ok((subject, pubkey))
}
