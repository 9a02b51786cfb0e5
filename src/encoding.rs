//! SSH wire-format primitives for the sealed-envelope container.
//!
//! The envelope embeds its public keys as standard SSH ECDSA public-key
//! blobs (`string type, string curve, string point`) and frames every
//! variable-length field with a `u32` big-endian length prefix.

use crate::{certificate::PublicKeyInfo, Error, Result};
use elliptic_curve::sec1::ToEncodedPoint;

const ECDSA_P256_TYPE: &[u8] = b"ecdsa-sha2-nistp256";
const ECDSA_P384_TYPE: &[u8] = b"ecdsa-sha2-nistp384";

pub(crate) fn put_u8(buf: &mut Vec<u8>, value: u8) {
    buf.push(value);
}

pub(crate) fn put_string(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

pub(crate) fn get_u8(input: &mut &[u8]) -> Result<u8> {
    let (&first, rest) = input.split_first().ok_or(Error::InvalidData)?;
    *input = rest;
    Ok(first)
}

pub(crate) fn get_string<'a>(input: &mut &'a [u8]) -> Result<&'a [u8]> {
    if input.len() < 4 {
        return Err(Error::InvalidData);
    }
    let len = u32::from_be_bytes([input[0], input[1], input[2], input[3]]) as usize;
    if input.len() - 4 < len {
        return Err(Error::InvalidData);
    }
    let (string, rest) = input[4..].split_at(len);
    *input = rest;
    Ok(string)
}

/// Encode an ECDSA public key as an SSH public-key blob.
pub(crate) fn encode_public_key(key: &PublicKeyInfo) -> Result<Vec<u8>> {
    let (key_type, curve, point) = match key {
        PublicKeyInfo::EcP256(key) => (
            ECDSA_P256_TYPE,
            &b"nistp256"[..],
            key.to_encoded_point(false).as_bytes().to_vec(),
        ),
        PublicKeyInfo::EcP384(key) => (
            ECDSA_P384_TYPE,
            &b"nistp384"[..],
            key.to_encoded_point(false).as_bytes().to_vec(),
        ),
        PublicKeyInfo::Rsa { .. } => return Err(Error::NotSupported),
    };

    let mut blob = Vec::new();
    put_string(&mut blob, key_type);
    put_string(&mut blob, curve);
    put_string(&mut blob, &point);
    Ok(blob)
}

/// Decode an SSH public-key blob into an ECDSA public key.
pub(crate) fn decode_public_key(blob: &[u8]) -> Result<PublicKeyInfo> {
    let mut input = blob;
    let key_type = get_string(&mut input)?;
    let curve = get_string(&mut input)?;
    let point = get_string(&mut input)?;
    if !input.is_empty() {
        return Err(Error::InvalidData);
    }

    match (key_type, curve) {
        (b"ecdsa-sha2-nistp256", b"nistp256") => p256::PublicKey::from_sec1_bytes(point)
            .map(PublicKeyInfo::EcP256)
            .map_err(|_| Error::InvalidData),
        (b"ecdsa-sha2-nistp384", b"nistp384") => p384::PublicKey::from_sec1_bytes(point)
            .map(PublicKeyInfo::EcP384)
            .map_err(|_| Error::InvalidData),
        _ => Err(Error::InvalidData),
    }
}
