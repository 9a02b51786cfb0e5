//! Card-admin (management) key for authenticating to slot 9B.

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
    consts::ADMIN_KEY_LEN,
    error::{Error, Result},
};
use cipher::{generic_array::GenericArray, BlockEncrypt, Key, KeyInit};
use des::TdesEde3;
use zeroize::{Zeroize, Zeroizing};

/// Default admin key cards ship with (three repeats of `01..08`).
const DEFAULT_ADMIN_KEY: [u8; ADMIN_KEY_LEN] = [
    1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8,
];

/// 3DES key for card-admin challenge-response authentication.
///
/// Wiped on drop.
#[derive(Clone)]
pub struct AdminKey([u8; ADMIN_KEY_LEN]);

impl AdminKey {
    /// Parse an admin key from raw bytes; must be exactly 24 bytes.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Result<Self> {
        let bytes = bytes.as_ref();
        if bytes.len() != ADMIN_KEY_LEN {
            return Err(Error::InvalidData);
        }

        let mut key = [0u8; ADMIN_KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(AdminKey(key))
    }

    /// Encrypt one 8-byte card challenge.
    ///
    /// The admin protocol runs 3DES-CBC with a zero IV over exactly one
    /// block, which is a single raw block encryption.
    pub(crate) fn encrypt_challenge(&self, challenge: &[u8; 8]) -> Zeroizing<[u8; 8]> {
        let cipher = TdesEde3::new(Key::<TdesEde3>::from_slice(&self.0));

        let mut block = GenericArray::clone_from_slice(challenge);
        cipher.encrypt_block(&mut block);

        let mut response = Zeroizing::new([0u8; 8]);
        response.copy_from_slice(&block);
        block.zeroize();
        response
    }
}

impl Default for AdminKey {
    fn default() -> Self {
        AdminKey(DEFAULT_ADMIN_KEY)
    }
}

impl Drop for AdminKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}
