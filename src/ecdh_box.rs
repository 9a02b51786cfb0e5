//! Sealed ECDH envelopes ("boxes").
//!
//! A box encrypts data to a card-held P-256 public key with an
//! ephemeral-static ECDH agreement: the shared secret is hashed into an
//! AEAD key, the plaintext is padded and encrypted, and the envelope
//! records everything needed to decrypt it later — on the card holding
//! the private key (after PIN presentation), or offline with the raw
//! private key. The serialized form is self-describing and versioned, so
//! boxes can be stored and shipped around as opaque bytes.

use crate::{
    certificate::PublicKeyInfo,
    encoding,
    error::{Error, Result},
    piv::SlotId,
    token::Token,
    transaction::Transaction,
    Buffer,
};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305,
};
use cipher::generic_array::GenericArray;
use log::debug;
use p256::ecdh::EphemeralSecret;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

/// AEAD ciphers a box can use.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BoxCipher {
    /// ChaCha20-Poly1305 (the default)
    Chacha20Poly1305,

    /// AES-256-GCM
    Aes256Gcm,
}

impl BoxCipher {
    /// Name stored in the serialized envelope.
    pub fn name(self) -> &'static str {
        match self {
            BoxCipher::Chacha20Poly1305 => "chacha20-poly1305",
            BoxCipher::Aes256Gcm => "aes256-gcm",
        }
    }

    fn from_name(name: &[u8]) -> Result<Self> {
        match name {
            b"chacha20-poly1305" => Ok(BoxCipher::Chacha20Poly1305),
            b"aes256-gcm" => Ok(BoxCipher::Aes256Gcm),
            _ => Err(Error::NotSupported),
        }
    }

    fn key_len(self) -> usize {
        32
    }

    fn iv_len(self) -> usize {
        12
    }

    fn auth_len(self) -> usize {
        16
    }

    /// Plaintexts are padded to a multiple of this before encryption.
    fn block_size(self) -> usize {
        match self {
            BoxCipher::Chacha20Poly1305 => 8,
            BoxCipher::Aes256Gcm => 16,
        }
    }

    fn encrypt(self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        match self {
            BoxCipher::Chacha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
                .map_err(|_| Error::InvalidData)?
                .encrypt(GenericArray::from_slice(iv), plaintext)
                .map_err(|_| Error::InvalidData),
            BoxCipher::Aes256Gcm => Aes256Gcm::new_from_slice(key)
                .map_err(|_| Error::InvalidData)?
                .encrypt(GenericArray::from_slice(iv), plaintext)
                .map_err(|_| Error::InvalidData),
        }
    }

    fn decrypt(self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Buffer> {
        match self {
            BoxCipher::Chacha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
                .map_err(|_| Error::InvalidData)?
                .decrypt(GenericArray::from_slice(iv), ciphertext)
                .map(Zeroizing::new)
                .map_err(|_| Error::BadMessage),
            BoxCipher::Aes256Gcm => Aes256Gcm::new_from_slice(key)
                .map_err(|_| Error::InvalidData)?
                .decrypt(GenericArray::from_slice(iv), ciphertext)
                .map(Zeroizing::new)
                .map_err(|_| Error::BadMessage),
        }
    }
}

/// Key derivation functions a box can use: a plain hash of the ECDH
/// shared secret, truncated to the cipher key length.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BoxKdf {
    /// SHA-512 (the default)
    Sha512,

    /// SHA-256
    Sha256,
}

impl BoxKdf {
    /// Name stored in the serialized envelope.
    pub fn name(self) -> &'static str {
        match self {
            BoxKdf::Sha512 => "sha512",
            BoxKdf::Sha256 => "sha256",
        }
    }

    fn from_name(name: &[u8]) -> Result<Self> {
        match name {
            b"sha512" => Ok(BoxKdf::Sha512),
            b"sha256" => Ok(BoxKdf::Sha256),
            _ => Err(Error::NotSupported),
        }
    }

    fn derive(self, shared: &[u8], key_len: usize) -> Result<Buffer> {
        let mut key = Zeroizing::new(match self {
            BoxKdf::Sha512 => Sha512::digest(shared).to_vec(),
            BoxKdf::Sha256 => Sha256::digest(shared).to_vec(),
        });
        if key.len() < key_len {
            return Err(Error::NotSupported);
        }
        key.truncate(key_len);
        Ok(key)
    }
}

/// A sealed (or about-to-be-sealed) ECDH envelope.
///
/// In-memory plaintext lives in a zeroizing buffer and is wiped whenever
/// it is replaced, consumed by sealing, or the box is dropped.
#[derive(Debug)]
pub struct EcdhBox {
    guid: [u8; 16],
    slot: u8,
    ephemeral_pub: Option<PublicKeyInfo>,
    target_pub: Option<PublicKeyInfo>,
    cipher: Option<BoxCipher>,
    kdf: Option<BoxKdf>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    plaintext: Option<Buffer>,
}

impl Default for EcdhBox {
    fn default() -> Self {
        Self::new()
    }
}

impl EcdhBox {
    /// An empty box. Stage plaintext with [`EcdhBox::set_data`] and seal
    /// it with [`EcdhBox::seal`] or [`EcdhBox::seal_offline`].
    pub fn new() -> Self {
        EcdhBox {
            guid: [0u8; 16],
            slot: 0,
            ephemeral_pub: None,
            target_pub: None,
            cipher: None,
            kdf: None,
            iv: Vec::new(),
            ciphertext: Vec::new(),
            plaintext: None,
        }
    }

    /// Choose the AEAD cipher (default: ChaCha20-Poly1305).
    pub fn set_cipher(&mut self, cipher: BoxCipher) {
        self.cipher = Some(cipher);
    }

    /// Choose the KDF (default: SHA-512).
    pub fn set_kdf(&mut self, kdf: BoxKdf) {
        self.kdf = Some(kdf);
    }

    /// Stage plaintext to be sealed, replacing (and wiping) any previous
    /// staged or recovered plaintext.
    pub fn set_data(&mut self, data: &[u8]) {
        self.plaintext = Some(Zeroizing::new(data.to_vec()));
    }

    /// Take the recovered (or staged) plaintext out of the box.
    ///
    /// The returned buffer still includes any trailing padding added at
    /// seal time; the caller knows its own framing and trims.
    pub fn take_data(&mut self) -> Result<Buffer> {
        self.plaintext.take().ok_or(Error::InvalidData)
    }

    /// GUID of the token this box was sealed to (zeroes for an offline
    /// seal).
    pub fn guid(&self) -> &[u8; 16] {
        &self.guid
    }

    /// Raw slot id this box was sealed to; 0 or 0xff mean "unspecified".
    pub fn slot(&self) -> u8 {
        self.slot
    }

    /// Ephemeral public key recorded at seal time.
    pub fn ephemeral_public_key(&self) -> Option<&PublicKeyInfo> {
        self.ephemeral_pub.as_ref()
    }

    /// Public key this box is sealed to.
    pub fn target_public_key(&self) -> Option<&PublicKeyInfo> {
        self.target_pub.as_ref()
    }

    /// Seal the staged plaintext to a public key.
    ///
    /// Generates a fresh P-256 ephemeral pair, derives the AEAD key from
    /// the ECDH shared secret, pads the plaintext to the cipher block
    /// size with `1, 2, 3, …` and encrypts. The staged plaintext, the
    /// ephemeral private key, the shared secret, and the derived key are
    /// all wiped before return.
    pub fn seal_offline(&mut self, target: &PublicKeyInfo) -> Result<()> {
        let target_key = match target {
            PublicKeyInfo::EcP256(key) => *key,
            _ => return Err(Error::NotSupported),
        };

        let mut padded = self.plaintext.take().ok_or(Error::InvalidData)?;
        if padded.is_empty() {
            return Err(Error::InvalidData);
        }

        let cipher = *self.cipher.get_or_insert(BoxCipher::Chacha20Poly1305);
        let kdf = *self.kdf.get_or_insert(BoxKdf::Sha512);

        let ephemeral = EphemeralSecret::random(&mut OsRng);
        let ephemeral_pub = ephemeral.public_key();

        let key = {
            let shared = ephemeral.diffie_hellman(&target_key);
            kdf.derive(shared.raw_secret_bytes().as_slice(), cipher.key_len())?
        };

        let mut iv = vec![0u8; cipher.iv_len()];
        OsRng.fill_bytes(&mut iv);

        let block = cipher.block_size();
        let mut pad_byte = 0u8;
        while padded.len() % block != 0 {
            pad_byte = pad_byte.wrapping_add(1);
            padded.push(pad_byte);
        }

        self.ciphertext = cipher.encrypt(&key, &iv, &padded)?;
        self.iv = iv;
        self.ephemeral_pub = Some(PublicKeyInfo::EcP256(ephemeral_pub));
        self.target_pub = Some(target.clone());
        Ok(())
    }

    /// Seal the staged plaintext to a token's slot key, stamping the box
    /// with the token GUID and slot id so it can be found again.
    pub fn seal(&mut self, token: &Token, slot: SlotId) -> Result<()> {
        let entry = token.get_slot(slot).ok_or(Error::NotFound)?;
        self.seal_offline(entry.public_key())?;

        self.guid = *token.guid();
        self.slot = slot.into();
        Ok(())
    }

    /// Open the box against a card, using the slot key for the ECDH
    /// half.
    ///
    /// The transaction must already carry the required security status
    /// (PIN); [`Error::PermissionDenied`] from the card propagates. A
    /// failed authentication tag yields [`Error::BadMessage`].
    pub fn open(&mut self, txn: &mut Transaction<'_>, slot: SlotId) -> Result<()> {
        let ephemeral = self.ephemeral_pub.clone().ok_or(Error::InvalidData)?;
        let shared = txn.ecdh(slot, &ephemeral)?;

        let (cipher, key) = self.derive_key(&shared)?;
        self.decrypt_into_plaintext(cipher, &key)
    }

    /// Open the box offline with the raw private key.
    ///
    /// No padding verification is performed; the recovered buffer is
    /// exactly `ciphertext_len - auth_len` bytes.
    pub fn open_offline(&mut self, private_key: &p256::SecretKey) -> Result<()> {
        let shared = {
            let ephemeral = match self.ephemeral_pub.as_ref().ok_or(Error::InvalidData)? {
                PublicKeyInfo::EcP256(key) => key,
                _ => return Err(Error::NotSupported),
            };
            p256::ecdh::diffie_hellman(private_key.to_nonzero_scalar(), ephemeral.as_affine())
        };

        let (cipher, key) = self.derive_key(shared.raw_secret_bytes().as_slice())?;
        self.decrypt_into_plaintext(cipher, &key)
    }

    fn derive_key(&self, shared: &[u8]) -> Result<(BoxCipher, Buffer)> {
        let cipher = self.cipher.ok_or(Error::InvalidData)?;
        let kdf = self.kdf.ok_or(Error::InvalidData)?;
        let key = kdf.derive(shared, cipher.key_len())?;
        Ok((cipher, key))
    }

    fn decrypt_into_plaintext(&mut self, cipher: BoxCipher, key: &[u8]) -> Result<()> {
        if self.iv.len() != cipher.iv_len() {
            return Err(Error::InvalidData);
        }
        if self.ciphertext.len() < cipher.auth_len() + cipher.block_size() {
            return Err(Error::InvalidData);
        }

        self.plaintext = Some(cipher.decrypt(key, &self.iv, &self.ciphertext)?);
        Ok(())
    }

    /// Locate the token (and slot) this box can be opened with.
    ///
    /// Matches by GUID first, reading the slot certificate if it is not
    /// cached yet. When no GUID matches, every token is scanned at the
    /// box's slot — remapped to key management (9D) when the box carries
    /// the 0 or 0xff "unspecified" sentinel — comparing cached public
    /// keys against the box target. Only certificate reads are issued;
    /// the ECDH itself is left to [`EcdhBox::open`].
    pub fn find_token<'a>(&self, tokens: &'a mut [Token]) -> Result<(&'a mut Token, SlotId)> {
        let target = self.target_pub.as_ref().ok_or(Error::InvalidData)?;

        if let Some(index) = tokens.iter().position(|token| token.guid() == &self.guid) {
            let slot = SlotId::try_from(self.slot)?;

            let token = &mut tokens[index];
            ensure_slot_cached(token, slot)?;
            match token.get_slot(slot) {
                Some(entry) if entry.public_key() == target => (),
                _ => return Err(Error::NotFound),
            }

            return Ok((&mut tokens[index], slot));
        }

        let slot = match self.slot {
            0 | 0xff => SlotId::KeyManagement,
            raw => SlotId::try_from(raw)?,
        };

        let mut found = None;
        for (index, token) in tokens.iter_mut().enumerate() {
            if ensure_slot_cached(token, slot).is_err() {
                continue;
            }
            if let Some(entry) = token.get_slot(slot) {
                if entry.public_key() == target {
                    found = Some(index);
                    break;
                }
            }
        }

        match found {
            Some(index) => Ok((&mut tokens[index], slot)),
            None => Err(Error::NotFound),
        }
    }

    /// Serialize the sealed box (version 1).
    pub fn to_binary(&self) -> Result<Vec<u8>> {
        let ephemeral = self.ephemeral_pub.as_ref().ok_or(Error::InvalidData)?;
        let target = self.target_pub.as_ref().ok_or(Error::InvalidData)?;
        let cipher = self.cipher.ok_or(Error::InvalidData)?;
        let kdf = self.kdf.ok_or(Error::InvalidData)?;

        let mut buf = Vec::new();
        encoding::put_u8(&mut buf, 1);
        encoding::put_string(&mut buf, &self.guid);
        encoding::put_u8(&mut buf, self.slot);
        encoding::put_string(&mut buf, &encoding::encode_public_key(ephemeral)?);
        encoding::put_string(&mut buf, &encoding::encode_public_key(target)?);
        encoding::put_string(&mut buf, cipher.name().as_bytes());
        encoding::put_string(&mut buf, kdf.name().as_bytes());
        encoding::put_string(&mut buf, &self.iv);
        encoding::put_string(&mut buf, &self.ciphertext);
        Ok(buf)
    }

    /// Parse a serialized box.
    pub fn from_binary(bytes: &[u8]) -> Result<EcdhBox> {
        let mut input = bytes;

        let version = encoding::get_u8(&mut input)?;
        if version != 1 {
            debug!("unsupported box version {}", version);
            return Err(Error::NotSupported);
        }

        let guid_bytes = encoding::get_string(&mut input)?;
        let guid: [u8; 16] = guid_bytes.try_into().map_err(|_| Error::InvalidData)?;

        let slot = encoding::get_u8(&mut input)?;
        let ephemeral_pub = encoding::decode_public_key(encoding::get_string(&mut input)?)?;
        let target_pub = encoding::decode_public_key(encoding::get_string(&mut input)?)?;
        let cipher = BoxCipher::from_name(encoding::get_string(&mut input)?)?;
        let kdf = BoxKdf::from_name(encoding::get_string(&mut input)?)?;
        let iv = encoding::get_string(&mut input)?.to_vec();
        let ciphertext = encoding::get_string(&mut input)?.to_vec();

        Ok(EcdhBox {
            guid,
            slot,
            ephemeral_pub: Some(ephemeral_pub),
            target_pub: Some(target_pub),
            cipher: Some(cipher),
            kdf: Some(kdf),
            iv,
            ciphertext,
            plaintext: None,
        })
    }
}

fn ensure_slot_cached(token: &mut Token, slot: SlotId) -> Result<()> {
    if token.get_slot(slot).is_some() {
        return Ok(());
    }

    let mut txn = token.begin_transaction()?;
    txn.read_cert(slot)
}
