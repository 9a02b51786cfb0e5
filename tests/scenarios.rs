//! Protocol scenarios against the scripted card simulator.

mod common;

use cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use common::{SimCard, SimContext};
use des::TdesEde3;
use elliptic_curve::sec1::ToEncodedPoint;
use pivbox::{
    enumerate, AdminKey, AlgorithmId, EcdhBox, Error, HashAlgo, PublicKeyInfo, SlotId, TlvWriter,
    Token,
};
use rand_core::OsRng;

const GUID: [u8; 16] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee,
    0xff,
];

fn p256_fixture(cn: &str) -> (p256::SecretKey, PublicKeyInfo, Vec<u8>) {
    let secret = p256::SecretKey::random(&mut OsRng);
    let public = secret.public_key();
    let der = common::ec_cert(cn, public.to_encoded_point(false).as_bytes(), false);
    (secret, PublicKeyInfo::EcP256(public), der)
}

fn verify_cmd(padded_pin: &[u8; 8]) -> Vec<u8> {
    let mut cmd = vec![0x00, 0x20, 0x00, 0x80, 0x08];
    cmd.extend_from_slice(padded_pin);
    cmd
}

#[test]
fn enumerate_no_readers() {
    let mut ctx = SimContext::new();
    let tokens = enumerate(&mut ctx).unwrap();
    assert!(tokens.is_empty());
}

#[test]
fn enumerate_one_card() {
    common::init_logging();

    let (card, state) = SimCard::scripted(common::probe_script(
        &GUID,
        &[0x11],
        common::with_sw(vec![], 0x6d00),
    ));

    let mut ctx = SimContext::new();
    ctx.add_reader("Sim Reader 0", card);

    let tokens = enumerate(&mut ctx).unwrap();
    assert_eq!(tokens.len(), 1);

    let token = &tokens[0];
    assert_eq!(token.reader(), "Sim Reader 0");
    assert_eq!(token.guid(), &GUID);
    assert!(token.has_chuid());
    assert!(!token.is_yubico());
    assert_eq!(token.algorithms(), &[0x11]);

    let state = state.borrow();
    assert!(!state.in_transaction);
    assert_eq!(state.transactions, 1);
    assert_eq!(state.resets, 0);
}

#[test]
fn enumerate_reads_yubico_version() {
    let (card, _) = SimCard::scripted(common::probe_script(
        &GUID,
        &[],
        common::with_sw(vec![5, 4, 3], 0x9000),
    ));

    let mut ctx = SimContext::new();
    ctx.add_reader("Sim Reader 0", card);

    let tokens = enumerate(&mut ctx).unwrap();
    assert!(tokens[0].is_yubico());
    assert_eq!(tokens[0].yubico_version().unwrap().to_string(), "5.4.3");
}

#[test]
fn enumerate_returns_most_recently_opened_first() {
    let (card_a, _) = SimCard::scripted(common::probe_script(
        &[0xaa; 16],
        &[],
        common::with_sw(vec![], 0x6d00),
    ));
    let (card_b, _) = SimCard::scripted(common::probe_script(
        &[0xbb; 16],
        &[],
        common::with_sw(vec![], 0x6d00),
    ));

    let mut ctx = SimContext::new();
    ctx.add_reader("Reader A", card_a);
    ctx.add_reader("Reader B", card_b);

    let tokens = enumerate(&mut ctx).unwrap();
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens[0].reader(), "Reader B");
    assert_eq!(tokens[1].reader(), "Reader A");
}

#[test]
fn enumerate_resets_and_skips_non_piv_cards() {
    let (card, state) = SimCard::scripted(vec![(
        common::select_cmd(),
        common::with_sw(vec![], 0x6a82),
    )]);

    let mut ctx = SimContext::new();
    ctx.add_reader("Sim Reader 0", card);

    let tokens = enumerate(&mut ctx).unwrap();
    assert!(tokens.is_empty());
    assert_eq!(state.borrow().disconnected, Some(true));
}

#[test]
fn enumerate_keeps_cards_without_chuid() {
    let script = vec![
        (common::select_cmd(), common::apt_reply(&[])),
        (
            common::get_data_cmd(&[0x5f, 0xc1, 0x02]),
            common::with_sw(vec![], 0x6a82),
        ),
        (vec![0x00, 0xfd, 0x00, 0x00], common::with_sw(vec![], 0x6d00)),
    ];
    let (card, _) = SimCard::scripted(script);

    let mut ctx = SimContext::new();
    ctx.add_reader("Sim Reader 0", card);

    let tokens = enumerate(&mut ctx).unwrap();
    assert_eq!(tokens.len(), 1);
    assert!(!tokens[0].has_chuid());
    assert_eq!(tokens[0].guid(), &[0u8; 16]);
}

#[test]
fn read_cert_populates_slot_cache() {
    let (secret, _public, der) = p256_fixture("test");

    let (card, _) = SimCard::scripted(vec![(
        common::get_data_cmd(&[0x5f, 0xc1, 0x01]),
        common::cert_object_reply(&der),
    )]);
    let mut token = Token::new("sim", card);

    {
        let mut txn = token.begin_transaction().unwrap();
        txn.read_cert(SlotId::CardAuthentication).unwrap();
    }

    let slot = token.get_slot(SlotId::CardAuthentication).unwrap();
    assert_eq!(slot.id(), SlotId::CardAuthentication);
    assert_eq!(slot.algorithm(), AlgorithmId::EccP256);
    assert_eq!(slot.subject(), "CN=test");
    assert_eq!(slot.certificate(), der.as_slice());
    assert_eq!(
        slot.public_key(),
        &PublicKeyInfo::EcP256(secret.public_key())
    );
}

#[test]
fn read_cert_maps_missing_file_to_not_found() {
    let (card, _) = SimCard::scripted(vec![(
        common::get_data_cmd(&[0x5f, 0xc1, 0x05]),
        common::with_sw(vec![], 0x6a82),
    )]);
    let mut token = Token::new("sim", card);

    let mut txn = token.begin_transaction().unwrap();
    assert_eq!(
        txn.read_cert(SlotId::Authentication).unwrap_err(),
        Error::NotFound
    );
}

#[test]
fn read_cert_rejects_compressed_certificates() {
    let (_, _, der) = p256_fixture("test");

    // certinfo byte 0x01 marks a gzip-compressed certificate
    let mut tlv = TlvWriter::new();
    tlv.push(0x53);
    tlv.push(0x71);
    tlv.write_byte(0x01);
    tlv.pop();
    tlv.push_long(0x70, der.len());
    tlv.write(&der);
    tlv.pop();
    tlv.pop();

    let (card, _) = SimCard::scripted(vec![(
        common::get_data_cmd(&[0x5f, 0xc1, 0x01]),
        common::with_sw(tlv.into_vec(), 0x9000),
    )]);
    let mut token = Token::new("sim", card);

    let mut txn = token.begin_transaction().unwrap();
    assert_eq!(
        txn.read_cert(SlotId::CardAuthentication).unwrap_err(),
        Error::NotSupported
    );
}

#[test]
fn admin_auth_challenge_response() {
    let challenge = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let key_bytes: Vec<u8> = (1..=24).collect();

    // the response the card must see: one 3DES block over the challenge
    let tdes = TdesEde3::new_from_slice(&key_bytes).unwrap();
    let mut expected = GenericArray::clone_from_slice(&challenge);
    tdes.encrypt_block(&mut expected);

    let mut chal_reply = TlvWriter::new();
    chal_reply.push(0x7c);
    chal_reply.push(0x81);
    chal_reply.write(&challenge);
    chal_reply.pop();
    chal_reply.pop();

    let mut response_cmd = vec![0x00, 0x87, 0x03, 0x9b, 0x0c, 0x7c, 0x0a, 0x82, 0x08];
    response_cmd.extend_from_slice(&expected);

    let (card, state) = SimCard::scripted(vec![
        (
            vec![0x00, 0x87, 0x03, 0x9b, 0x04, 0x7c, 0x02, 0x81, 0x00],
            common::with_sw(chal_reply.into_vec(), 0x9000),
        ),
        (response_cmd, common::with_sw(vec![], 0x9000)),
    ]);
    let mut token = Token::new("sim", card);

    {
        let mut txn = token.begin_transaction().unwrap();
        txn.auth_admin(&AdminKey::from_bytes(&key_bytes).unwrap())
            .unwrap();
    }

    // admin auth must reset the card when the transaction ends
    assert_eq!(state.borrow().resets, 1);
}

#[test]
fn admin_auth_wrong_key() {
    let challenge = [8u8, 7, 6, 5, 4, 3, 2, 1];
    let key = AdminKey::default();

    let mut chal_reply = TlvWriter::new();
    chal_reply.push(0x7c);
    chal_reply.push(0x81);
    chal_reply.write(&challenge);
    chal_reply.pop();
    chal_reply.pop();

    let tdes = TdesEde3::new_from_slice(&[
        1u8, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8,
    ])
    .unwrap();
    let mut response = GenericArray::clone_from_slice(&challenge);
    tdes.encrypt_block(&mut response);

    let mut response_cmd = vec![0x00, 0x87, 0x03, 0x9b, 0x0c, 0x7c, 0x0a, 0x82, 0x08];
    response_cmd.extend_from_slice(&response);

    let (card, state) = SimCard::scripted(vec![
        (
            vec![0x00, 0x87, 0x03, 0x9b, 0x04, 0x7c, 0x02, 0x81, 0x00],
            common::with_sw(chal_reply.into_vec(), 0x9000),
        ),
        (response_cmd, common::with_sw(vec![], 0x6a80)),
    ]);
    let mut token = Token::new("sim", card);

    {
        let mut txn = token.begin_transaction().unwrap();
        assert_eq!(
            txn.auth_admin(&key).unwrap_err(),
            Error::AuthFailed { retries: None }
        );
    }

    // even a failed attempt may have altered security state
    assert_eq!(state.borrow().resets, 1);
}

#[test]
fn verify_pin_wire_format() {
    let (card, state) = SimCard::scripted(vec![(
        verify_cmd(&[0x31, 0x32, 0x33, 0x34, 0xff, 0xff, 0xff, 0xff]),
        common::with_sw(vec![], 0x9000),
    )]);
    let mut token = Token::new("sim", card);

    {
        let mut txn = token.begin_transaction().unwrap();
        txn.verify_pin(b"1234", None).unwrap();
    }

    assert_eq!(state.borrow().resets, 1);
}

#[test]
fn verify_pin_retries_guard_stops_early() {
    // card reports 2 attempts remaining; caller demands more than 2
    let (card, state) = SimCard::scripted(vec![(
        vec![0x00, 0x20, 0x00, 0x80],
        common::with_sw(vec![], 0x63c2),
    )]);
    let mut token = Token::new("sim", card);

    let mut retries = 2u8;
    {
        let mut txn = token.begin_transaction().unwrap();
        assert_eq!(
            txn.verify_pin(b"1234", Some(&mut retries)).unwrap_err(),
            Error::TriesRemaining { tries: 2 }
        );
    }

    // the PIN itself was never sent
    assert_eq!(state.borrow().sent.len(), 1);
    assert_eq!(state.borrow().resets, 0);
}

#[test]
fn verify_pin_retries_guard_proceeds_when_enough_remain() {
    let (card, _) = SimCard::scripted(vec![
        (
            vec![0x00, 0x20, 0x00, 0x80],
            common::with_sw(vec![], 0x63c3),
        ),
        (
            verify_cmd(&[0x31, 0x32, 0x33, 0x34, 0xff, 0xff, 0xff, 0xff]),
            common::with_sw(vec![], 0x9000),
        ),
    ]);
    let mut token = Token::new("sim", card);

    let mut retries = 2u8;
    let mut txn = token.begin_transaction().unwrap();
    txn.verify_pin(b"1234", Some(&mut retries)).unwrap();
}

#[test]
fn verify_pin_probe_tolerates_unexpected_status() {
    // a probe answer that is not a retry count does not stop the attempt
    let (card, _) = SimCard::scripted(vec![
        (
            vec![0x00, 0x20, 0x00, 0x80],
            common::with_sw(vec![], 0x9000),
        ),
        (
            verify_cmd(&[0x31, 0x32, 0x33, 0x34, 0xff, 0xff, 0xff, 0xff]),
            common::with_sw(vec![], 0x9000),
        ),
    ]);
    let mut token = Token::new("sim", card);

    let mut retries = 3u8;
    let mut txn = token.begin_transaction().unwrap();
    txn.verify_pin(b"1234", Some(&mut retries)).unwrap();
}

#[test]
fn verify_pin_reports_remaining_tries() {
    let (card, state) = SimCard::scripted(vec![(
        verify_cmd(&[0x39, 0x39, 0x39, 0x39, 0xff, 0xff, 0xff, 0xff]),
        common::with_sw(vec![], 0x63c1),
    )]);
    let mut token = Token::new("sim", card);

    let mut retries = 0u8;
    {
        let mut txn = token.begin_transaction().unwrap();
        assert_eq!(
            txn.verify_pin(b"9999", Some(&mut retries)).unwrap_err(),
            Error::AuthFailed { retries: Some(1) }
        );
    }

    assert_eq!(retries, 1);
    assert_eq!(state.borrow().resets, 0);
}

#[test]
fn change_pin_pads_both_halves() {
    let mut cmd = vec![0x00, 0x24, 0x00, 0x80, 0x10];
    cmd.extend_from_slice(&[0x31, 0x32, 0x33, 0x34, 0xff, 0xff, 0xff, 0xff]);
    cmd.extend_from_slice(&[0x35, 0x36, 0x37, 0x38, 0x39, 0x30, 0xff, 0xff]);

    let (card, state) = SimCard::scripted(vec![(cmd, common::with_sw(vec![], 0x9000))]);
    let mut token = Token::new("sim", card);

    {
        let mut txn = token.begin_transaction().unwrap();
        txn.change_pin(b"1234", b"567890").unwrap();
    }

    assert_eq!(state.borrow().resets, 1);
}

#[test]
fn sign_uses_card_side_hash_when_advertised() {
    let (_, _, der) = p256_fixture("signer");

    let mut sign_cmd = vec![0x00, 0x87, 0xf1, 0x9a, 0x0b];
    sign_cmd.extend_from_slice(&[0x7c, 0x09, 0x82, 0x00, 0x81, 0x05]);
    sign_cmd.extend_from_slice(b"hello");

    let mut sign_reply = TlvWriter::new();
    sign_reply.push(0x7c);
    sign_reply.push(0x82);
    sign_reply.write(b"SIG-BYTES");
    sign_reply.pop();
    sign_reply.pop();

    let script = vec![
        (common::select_cmd(), common::apt_reply(&[0x11, 0xf1])),
        (
            common::get_data_cmd(&[0x5f, 0xc1, 0x05]),
            common::cert_object_reply(&der),
        ),
        (sign_cmd, common::with_sw(sign_reply.into_vec(), 0x9000)),
    ];
    let (card, state) = SimCard::scripted(script);
    let mut token = Token::new("sim", card);

    {
        let mut txn = token.begin_transaction().unwrap();
        txn.select().unwrap();
        txn.read_cert(SlotId::Authentication).unwrap();

        let (signature, hash) = txn
            .sign(SlotId::Authentication, b"hello", Some(HashAlgo::Sha256))
            .unwrap();
        assert_eq!(signature.as_slice(), b"SIG-BYTES");
        assert_eq!(hash, HashAlgo::Sha256);
    }

    // the specialized algorithm id went on the wire...
    assert_eq!(state.borrow().sent.last().unwrap()[2], 0xf1);
    // ...but the slot algorithm is unchanged
    assert_eq!(
        token.get_slot(SlotId::Authentication).unwrap().algorithm(),
        AlgorithmId::EccP256
    );
}

#[test]
fn sign_hashes_in_software_by_default() {
    use sha2::{Digest, Sha256};

    let (_, _, der) = p256_fixture("signer");
    let digest = Sha256::digest(b"hello");

    let mut sign_cmd = vec![0x00, 0x87, 0x11, 0x9a, 0x26];
    sign_cmd.extend_from_slice(&[0x7c, 0x24, 0x82, 0x00, 0x81, 0x20]);
    sign_cmd.extend_from_slice(&digest);

    let mut sign_reply = TlvWriter::new();
    sign_reply.push(0x7c);
    sign_reply.push(0x82);
    sign_reply.write(b"SIG-BYTES");
    sign_reply.pop();
    sign_reply.pop();

    let script = vec![
        (common::select_cmd(), common::apt_reply(&[0x11])),
        (
            common::get_data_cmd(&[0x5f, 0xc1, 0x05]),
            common::cert_object_reply(&der),
        ),
        (sign_cmd, common::with_sw(sign_reply.into_vec(), 0x9000)),
    ];
    let (card, _) = SimCard::scripted(script);
    let mut token = Token::new("sim", card);

    let mut txn = token.begin_transaction().unwrap();
    txn.select().unwrap();
    txn.read_cert(SlotId::Authentication).unwrap();

    let (signature, hash) = txn.sign(SlotId::Authentication, b"hello", None).unwrap();
    assert_eq!(signature.as_slice(), b"SIG-BYTES");
    assert_eq!(hash, HashAlgo::Sha256);
}

#[test]
fn sign_requires_security_status() {
    let (_, _, der) = p256_fixture("signer");

    let script = vec![
        (
            common::get_data_cmd(&[0x5f, 0xc1, 0x05]),
            common::cert_object_reply(&der),
        ),
        (
            {
                let digest = {
                    use sha2::{Digest, Sha256};
                    Sha256::digest(b"msg").to_vec()
                };
                let mut cmd = vec![0x00, 0x87, 0x11, 0x9a, 0x26];
                cmd.extend_from_slice(&[0x7c, 0x24, 0x82, 0x00, 0x81, 0x20]);
                cmd.extend_from_slice(&digest);
                cmd
            },
            common::with_sw(vec![], 0x6982),
        ),
    ];
    let (card, _) = SimCard::scripted(script);
    let mut token = Token::new("sim", card);

    let mut txn = token.begin_transaction().unwrap();
    txn.read_cert(SlotId::Authentication).unwrap();
    assert_eq!(
        txn.sign(SlotId::Authentication, b"msg", None).unwrap_err(),
        Error::PermissionDenied
    );
}

#[test]
fn generate_parses_ecc_public_key() {
    let secret = p256::SecretKey::random(&mut OsRng);
    let point = secret.public_key().to_encoded_point(false);

    let mut gen_reply = TlvWriter::new();
    gen_reply.push(0x7f49);
    gen_reply.push(0x86);
    gen_reply.write(point.as_bytes());
    gen_reply.pop();
    gen_reply.pop();

    let (card, _) = SimCard::scripted(vec![(
        vec![0x00, 0x47, 0x00, 0x9a, 0x05, 0xac, 0x03, 0x80, 0x01, 0x11],
        common::with_sw(gen_reply.into_vec(), 0x9000),
    )]);
    let mut token = Token::new("sim", card);

    let mut txn = token.begin_transaction().unwrap();
    let pubkey = txn
        .generate(SlotId::Authentication, AlgorithmId::EccP256)
        .unwrap();
    assert_eq!(pubkey, PublicKeyInfo::EcP256(secret.public_key()));
}

#[test]
fn generate_requires_admin() {
    let (card, _) = SimCard::scripted(vec![(
        vec![0x00, 0x47, 0x00, 0x9d, 0x05, 0xac, 0x03, 0x80, 0x01, 0x11],
        common::with_sw(vec![], 0x6982),
    )]);
    let mut token = Token::new("sim", card);

    let mut txn = token.begin_transaction().unwrap();
    assert_eq!(
        txn.generate(SlotId::KeyManagement, AlgorithmId::EccP256)
            .unwrap_err(),
        Error::PermissionDenied
    );
}

#[test]
fn write_cert_builds_certificate_object() {
    let der = vec![0x30, 0x03, 0x02, 0x01, 0x01];

    let mut body = TlvWriter::new();
    body.push(0x5c);
    body.write(&[0x5f, 0xc1, 0x05]);
    body.pop();
    body.push(0x53);
    body.push(0x70);
    body.write(&der);
    body.pop();
    body.push(0x71);
    body.write_byte(0x00);
    body.pop();
    body.pop();
    let body = body.into_vec();

    let mut cmd = vec![0x00, 0xdb, 0x3f, 0xff, body.len() as u8];
    cmd.extend_from_slice(&body);

    let (card, _) = SimCard::scripted(vec![(cmd, common::with_sw(vec![], 0x9000))]);
    let mut token = Token::new("sim", card);

    let mut txn = token.begin_transaction().unwrap();
    txn.write_cert(SlotId::Authentication, &der, 0x00).unwrap();
}

#[test]
fn write_file_maps_out_of_memory() {
    let (card, _) = SimCard::scripted(vec![(
        {
            let mut cmd = vec![0x00, 0xdb, 0x3f, 0xff, 0x09];
            cmd.extend_from_slice(&[0x5c, 0x03, 0x5f, 0xc1, 0x05, 0x53, 0x02, 0xab, 0xcd]);
            cmd
        },
        common::with_sw(vec![], 0x6a84),
    )]);
    let mut token = Token::new("sim", card);

    let mut txn = token.begin_transaction().unwrap();
    assert_eq!(
        txn.write_file(0x005f_c105, &[0xab, 0xcd]).unwrap_err(),
        Error::Memory
    );
}

#[test]
fn box_opens_against_card() {
    let target = p256::SecretKey::random(&mut OsRng);
    let der = common::ec_cert(
        "km",
        target.public_key().to_encoded_point(false).as_bytes(),
        false,
    );

    let handler_key = target.clone();
    let handler_der = der.clone();
    let (card, _) = SimCard::with_handler(move |cmd: &[u8]| match cmd[1] {
        0xcb => common::cert_object_reply(&handler_der),
        0x87 => {
            // body ends with the peer's uncompressed SEC1 point
            let point = &cmd[cmd.len() - 65..];
            let peer = p256::PublicKey::from_sec1_bytes(point).unwrap();
            let shared =
                p256::ecdh::diffie_hellman(handler_key.to_nonzero_scalar(), peer.as_affine());

            let mut tlv = TlvWriter::new();
            tlv.push(0x7c);
            tlv.push(0x82);
            tlv.write(shared.raw_secret_bytes().as_slice());
            tlv.pop();
            tlv.pop();
            common::with_sw(tlv.into_vec(), 0x9000)
        }
        ins => panic!("unexpected instruction {:#x}", ins),
    });
    let mut token = Token::new("sim", card);

    {
        let mut txn = token.begin_transaction().unwrap();
        txn.read_cert(SlotId::KeyManagement).unwrap();
    }

    let mut envelope = EcdhBox::new();
    envelope.set_data(b"kek material");
    envelope.seal(&token, SlotId::KeyManagement).unwrap();
    assert_eq!(envelope.slot(), 0x9d);

    let bytes = envelope.to_binary().unwrap();
    let mut parsed = EcdhBox::from_binary(&bytes).unwrap();

    let mut tokens = vec![token];
    let (found, slot) = parsed.find_token(&mut tokens).unwrap();
    assert_eq!(slot, SlotId::KeyManagement);

    {
        let mut txn = found.begin_transaction().unwrap();
        parsed.open(&mut txn, slot).unwrap();
    }

    let plaintext = parsed.take_data().unwrap();
    assert_eq!(&plaintext[..12], b"kek material");
    // chacha20-poly1305 pads to 8-byte blocks with 1, 2, 3, ...
    assert_eq!(&plaintext[12..], &[1, 2, 3, 4]);
}

#[test]
fn box_on_wrong_token_is_not_found() {
    // token A holds the box target key
    let (_, _, der_a) = p256_fixture("box-target");
    let guid_a = [0xaa; 16];

    let mut script_a = common::probe_script(&guid_a, &[], common::with_sw(vec![], 0x6d00));
    script_a.push((
        common::get_data_cmd(&[0x5f, 0xc1, 0x0b]),
        common::cert_object_reply(&der_a),
    ));
    let (card_a, _) = SimCard::scripted(script_a);
    let mut token_a = Token::new("reader-a", card_a);
    {
        let mut txn = token_a.begin_transaction().unwrap();
        txn.select().unwrap();
        txn.read_chuid().unwrap();
        txn.read_cert(SlotId::KeyManagement).unwrap();
    }

    let mut envelope = EcdhBox::new();
    envelope.set_data(b"for token A only");
    envelope.seal(&token_a, SlotId::KeyManagement).unwrap();
    assert_eq!(envelope.guid(), &guid_a);

    // token B: different GUID, different key, slot 9D already cached
    let (_, _, der_b) = p256_fixture("other");
    let guid_b = [0xbb; 16];

    let mut script_b = common::probe_script(&guid_b, &[], common::with_sw(vec![], 0x6d00));
    script_b.push((
        common::get_data_cmd(&[0x5f, 0xc1, 0x0b]),
        common::cert_object_reply(&der_b),
    ));
    let (card_b, state_b) = SimCard::scripted(script_b);
    let mut token_b = Token::new("reader-b", card_b);
    {
        let mut txn = token_b.begin_transaction().unwrap();
        txn.select().unwrap();
        txn.read_chuid().unwrap();
        txn.read_cert(SlotId::KeyManagement).unwrap();
    }

    let sent_before = state_b.borrow().sent.len();

    let mut tokens = vec![token_b];
    assert_eq!(
        envelope.find_token(&mut tokens).unwrap_err(),
        Error::NotFound
    );

    // discovery compared cached keys only; no APDU reached token B
    assert_eq!(state_b.borrow().sent.len(), sent_before);
}
