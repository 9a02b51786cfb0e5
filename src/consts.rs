//! Protocol constants: application identifiers, data-object tags, and
//! status-word values from NIST SP 800-73-4 plus the Yubico extensions this
//! crate understands.

/// PIV application identifier (NIST SP 800-73-4, part 2)
pub const PIV_AID: [u8; 11] = [
    0xa0, 0x00, 0x00, 0x03, 0x08, 0x00, 0x00, 0x10, 0x00, 0x01, 0x00,
];

/// Largest reassembled reply this crate will buffer for a single
/// (possibly chained) APDU exchange.
pub const MAX_APDU_SIZE: usize = 16384 * 4 + 8;

/// Command data bytes per wire APDU block; extended APDUs are not used.
pub(crate) const APDU_DATA_MAX: usize = 0xff;

/// CLA bit indicating another command block follows (ISO 7816-4 chaining)
pub(crate) const CLA_CHAIN: u8 = 0x10;

/// CHUID data object
pub(crate) const OBJ_CHUID: u32 = 0x005f_c102;

/// Certificate data objects for the four standard key slots
pub(crate) const OBJ_CERT_9A: u32 = 0x005f_c105;
pub(crate) const OBJ_CERT_9C: u32 = 0x005f_c10a;
pub(crate) const OBJ_CERT_9D: u32 = 0x005f_c10b;
pub(crate) const OBJ_CERT_9E: u32 = 0x005f_c101;

/// Application property template, returned by SELECT
pub(crate) const TAG_APT: u16 = 0x61;
pub(crate) const TAG_APT_AID: u16 = 0x4f;
pub(crate) const TAG_APT_AUTHORITY: u16 = 0x79;
pub(crate) const TAG_APT_APP_LABEL: u16 = 0x50;
pub(crate) const TAG_APT_URI: u16 = 0x5f50;
pub(crate) const TAG_APT_ALGS: u16 = 0xac;

/// Outer tag wrapping every PIV data object body
pub(crate) const TAG_OBJ_DATA: u16 = 0x53;

/// Object-id selector tag inside GET/PUT DATA commands
pub(crate) const TAG_OBJ_ID: u16 = 0x5c;

/// Card GUID entry within the CHUID
pub(crate) const TAG_CHUID_GUID: u16 = 0x34;

/// Certificate and certinfo entries within a certificate object
pub(crate) const TAG_CERT: u16 = 0x70;
pub(crate) const TAG_CERT_INFO: u16 = 0x71;

/// Asymmetric keypair template (GENERATE ASYMMETRIC)
pub(crate) const TAG_GEN_TEMPLATE: u16 = 0xac;
pub(crate) const TAG_GEN_RESPONSE: u16 = 0x7f49;
pub(crate) const TAG_GEN_RSA_MODULUS: u16 = 0x81;
pub(crate) const TAG_GEN_RSA_EXP: u16 = 0x82;
pub(crate) const TAG_GEN_ECC_POINT: u16 = 0x86;

/// GENERAL AUTHENTICATE dynamic authentication template
pub(crate) const TAG_DYN_AUTH: u16 = 0x7c;
pub(crate) const GA_TAG_CHALLENGE: u16 = 0x81;
pub(crate) const GA_TAG_RESPONSE: u16 = 0x82;
pub(crate) const GA_TAG_EXP: u16 = 0x85;

/// Certinfo byte: compression-type bits and the reserved X.509 bit that
/// NIST requires to be zero.
pub(crate) const PIV_CI_COMPTYPE: u8 = 0x03;
pub(crate) const PIV_CI_X509: u8 = 0x04;
pub(crate) const PIV_COMP_NONE: u8 = 0x00;

/// Certinfo value marking a gzip-compressed certificate. Writable for
/// interoperability; reads of compressed certificates are rejected.
pub const CERTINFO_GZIP: u8 = 0x01;

/// Card-admin key reference (slot 9B)
pub(crate) const SLOT_ADMIN: u8 = 0x9b;

/// Raw algorithm identifiers as they appear on the wire
pub(crate) const ALG_3DES: u8 = 0x03;
pub(crate) const ALG_RSA1024: u8 = 0x06;
pub(crate) const ALG_RSA2048: u8 = 0x07;
pub(crate) const ALG_ECCP256: u8 = 0x11;
pub(crate) const ALG_ECCP384: u8 = 0x14;

/// Extended algorithm identifiers some cards advertise for on-card
/// hashing with P-256 keys
pub(crate) const ALG_ECCP256_SHA1: u8 = 0xf0;
pub(crate) const ALG_ECCP256_SHA256: u8 = 0xf1;

/// Wire size of a PIN: always 8 bytes, right-padded with 0xff
pub(crate) const PIN_WIRE_LEN: usize = 8;

/// 3DES admin key length
pub(crate) const ADMIN_KEY_LEN: usize = 24;
