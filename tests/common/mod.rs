//! Scripted card simulator and fixtures shared by the protocol tests.

#![allow(dead_code)]

use pivbox::{
    card::{CardBackend, CardTransaction, Protocol, ReaderContext},
    consts::PIV_AID,
    Error, Result, TlvWriter,
};
use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    rc::Rc,
};

/// Show logs for a test run when `RUST_LOG` is set.
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = env_logger::builder()
            .format_timestamp(None)
            .is_test(true)
            .try_init();
    }
}

/// One scripted exchange: the exact command expected on the wire and the
/// canned reply (body plus status word).
pub type Exchange = (Vec<u8>, Vec<u8>);

/// Dynamic reply logic for tests that cannot enumerate every frame up
/// front (e.g. chaining).
pub type Handler = Box<dyn FnMut(&[u8]) -> Vec<u8>>;

/// Observable simulator state, shared with the test body.
pub struct SimState {
    pub script: VecDeque<Exchange>,
    pub handler: Option<Handler>,
    pub sent: Vec<Vec<u8>>,
    pub in_transaction: bool,
    pub transactions: usize,
    pub resets: usize,
    pub disconnected: Option<bool>,
}

impl Default for SimState {
    fn default() -> Self {
        SimState {
            script: VecDeque::new(),
            handler: None,
            sent: Vec::new(),
            in_transaction: false,
            transactions: 0,
            resets: 0,
            disconnected: None,
        }
    }
}

/// A simulated card with a fixed script or a dynamic handler.
pub struct SimCard {
    state: Rc<RefCell<SimState>>,
}

impl SimCard {
    /// Card that expects exactly the scripted exchanges, in order.
    pub fn scripted(script: Vec<Exchange>) -> (Box<dyn CardBackend>, Rc<RefCell<SimState>>) {
        let state = Rc::new(RefCell::new(SimState {
            script: script.into(),
            ..SimState::default()
        }));
        (
            Box::new(SimCard {
                state: Rc::clone(&state),
            }),
            state,
        )
    }

    /// Card that computes every reply through `handler`.
    pub fn with_handler(
        handler: impl FnMut(&[u8]) -> Vec<u8> + 'static,
    ) -> (Box<dyn CardBackend>, Rc<RefCell<SimState>>) {
        let state = Rc::new(RefCell::new(SimState {
            handler: Some(Box::new(handler)),
            ..SimState::default()
        }));
        (
            Box::new(SimCard {
                state: Rc::clone(&state),
            }),
            state,
        )
    }
}

impl CardBackend for SimCard {
    fn begin(&mut self) -> Result<Box<dyn CardTransaction + '_>> {
        {
            let mut state = self.state.borrow_mut();
            assert!(!state.in_transaction, "nested card transaction");
            state.in_transaction = true;
            state.transactions += 1;
        }
        Ok(Box::new(SimTransaction {
            state: Rc::clone(&self.state),
        }))
    }

    fn protocol(&self) -> Protocol {
        Protocol::T1
    }

    fn disconnect(&mut self, reset: bool) {
        let mut state = self.state.borrow_mut();
        if state.disconnected.is_none() {
            state.disconnected = Some(reset);
        }
    }
}

struct SimTransaction {
    state: Rc<RefCell<SimState>>,
}

impl CardTransaction for SimTransaction {
    fn transmit(&mut self, send: &[u8], _recv_len: usize) -> Result<Vec<u8>> {
        let handler = {
            let mut state = self.state.borrow_mut();
            state.sent.push(send.to_vec());
            state.handler.take()
        };

        if let Some(mut handler) = handler {
            let reply = handler(send);
            self.state.borrow_mut().handler = Some(handler);
            return Ok(reply);
        }

        let (expect, reply) = self
            .state
            .borrow_mut()
            .script
            .pop_front()
            .expect("script exhausted: unexpected APDU");
        assert_eq!(
            hex::encode(send),
            hex::encode(&expect),
            "unexpected APDU on the wire"
        );
        Ok(reply)
    }

    fn end(&mut self, reset: bool) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.in_transaction = false;
        if reset {
            state.resets += 1;
        }
        Ok(())
    }
}

/// Reader context over a set of simulated cards.
#[derive(Default)]
pub struct SimContext {
    readers: Vec<String>,
    cards: HashMap<String, Box<dyn CardBackend>>,
}

impl SimContext {
    pub fn new() -> Self {
        SimContext::default()
    }

    pub fn add_reader(&mut self, name: &str, card: Box<dyn CardBackend>) {
        self.readers.push(name.to_string());
        self.cards.insert(name.to_string(), card);
    }
}

impl ReaderContext for SimContext {
    fn list_readers(&mut self) -> Result<Vec<String>> {
        Ok(self.readers.clone())
    }

    fn connect(&mut self, reader: &str) -> Result<Box<dyn CardBackend>> {
        self.cards.remove(reader).ok_or(Error::Io { inner: None })
    }
}

//
// Wire fixtures
//

/// Append a status word to a reply body.
pub fn with_sw(mut body: Vec<u8>, sw: u16) -> Vec<u8> {
    body.extend_from_slice(&sw.to_be_bytes());
    body
}

/// `SELECT` for the PIV applet.
pub fn select_cmd() -> Vec<u8> {
    let mut cmd = vec![0x00, 0xa4, 0x04, 0x00, PIV_AID.len() as u8];
    cmd.extend_from_slice(&PIV_AID);
    cmd
}

/// Application property template advertising the given algorithms.
pub fn apt_reply(algs: &[u8]) -> Vec<u8> {
    let mut tlv = TlvWriter::new();
    tlv.push(0x61);
    tlv.push(0x4f);
    tlv.write(&PIV_AID[..5]);
    tlv.pop();
    if !algs.is_empty() {
        tlv.push(0xac);
        for &alg in algs {
            tlv.push(0x80);
            tlv.write_byte(alg);
            tlv.pop();
        }
        tlv.pop();
    }
    tlv.pop();
    with_sw(tlv.into_vec(), 0x9000)
}

/// `GET DATA` for a data object, e.g. `[0x5f, 0xc1, 0x02]`.
pub fn get_data_cmd(object: &[u8]) -> Vec<u8> {
    let mut tlv = TlvWriter::new();
    tlv.push(0x5c);
    tlv.write(object);
    tlv.pop();
    let body = tlv.into_vec();

    let mut cmd = vec![0x00, 0xcb, 0x3f, 0xff, body.len() as u8];
    cmd.extend_from_slice(&body);
    cmd
}

/// A well-formed CHUID object carrying the given GUID.
pub fn chuid_reply(guid: &[u8; 16]) -> Vec<u8> {
    let mut tlv = TlvWriter::new();
    tlv.push(0x53);
    tlv.push(0x30);
    tlv.write(&[0xd4; 25]);
    tlv.pop();
    tlv.push(0x34);
    tlv.write(guid);
    tlv.pop();
    tlv.push(0x35);
    tlv.write(b"20400101");
    tlv.pop();
    tlv.push(0x3e);
    tlv.pop();
    tlv.push(0xfe);
    tlv.pop();
    tlv.pop();
    with_sw(tlv.into_vec(), 0x9000)
}

/// A certificate data object wrapping the given DER, uncompressed.
pub fn cert_object_reply(der: &[u8]) -> Vec<u8> {
    let mut tlv = TlvWriter::new();
    tlv.push(0x53);
    tlv.push(0x71);
    tlv.write_byte(0x00);
    tlv.pop();
    tlv.push_long(0x70, der.len());
    tlv.write(der);
    tlv.pop();
    tlv.pop();
    with_sw(tlv.into_vec(), 0x9000)
}

/// The standard probe script: SELECT, CHUID read, Yubico version probe.
pub fn probe_script(guid: &[u8; 16], algs: &[u8], version_reply: Vec<u8>) -> Vec<Exchange> {
    vec![
        (select_cmd(), apt_reply(algs)),
        (get_data_cmd(&[0x5f, 0xc1, 0x02]), chuid_reply(guid)),
        (vec![0x00, 0xfd, 0x00, 0x00], version_reply),
    ]
}

//
// Certificate fixture
//

const OID_EC_PUBLIC_KEY: [u8; 7] = [0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];
const OID_P256: [u8; 8] = [0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];
const OID_P384: [u8; 5] = [0x2b, 0x81, 0x04, 0x00, 0x22];
const OID_ECDSA_SHA256: [u8; 8] = [0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02];
const OID_COMMON_NAME: [u8; 3] = [0x55, 0x04, 0x03];

fn write_name(tlv: &mut TlvWriter, cn: &str) {
    tlv.push(0x30);
    tlv.push(0x31);
    tlv.push(0x30);
    tlv.push(0x06);
    tlv.write(&OID_COMMON_NAME);
    tlv.pop();
    tlv.push(0x0c);
    tlv.write(cn.as_bytes());
    tlv.pop();
    tlv.pop();
    tlv.pop();
    tlv.pop();
}

/// Build a minimal DER certificate for an EC public key. The signature
/// is a dummy; nothing in the crate verifies it.
pub fn ec_cert(cn: &str, sec1_point: &[u8], p384: bool) -> Vec<u8> {
    let curve_oid: &[u8] = if p384 { &OID_P384 } else { &OID_P256 };

    let mut tlv = TlvWriter::new();
    tlv.push(0x30); // Certificate
    tlv.push(0x30); // TBSCertificate

    tlv.push(0xa0); // [0] version: v3
    tlv.push(0x02);
    tlv.write_byte(0x02);
    tlv.pop();
    tlv.pop();

    tlv.push(0x02); // serialNumber
    tlv.write_byte(0x01);
    tlv.pop();

    tlv.push(0x30); // signature algorithm
    tlv.push(0x06);
    tlv.write(&OID_ECDSA_SHA256);
    tlv.pop();
    tlv.pop();

    write_name(&mut tlv, cn); // issuer

    tlv.push(0x30); // validity
    tlv.push(0x17);
    tlv.write(b"200101000000Z");
    tlv.pop();
    tlv.push(0x17);
    tlv.write(b"400101000000Z");
    tlv.pop();
    tlv.pop();

    write_name(&mut tlv, cn); // subject

    tlv.push(0x30); // SubjectPublicKeyInfo
    tlv.push(0x30);
    tlv.push(0x06);
    tlv.write(&OID_EC_PUBLIC_KEY);
    tlv.pop();
    tlv.push(0x06);
    tlv.write(curve_oid);
    tlv.pop();
    tlv.pop();
    tlv.push(0x03); // BIT STRING
    tlv.write_byte(0x00);
    tlv.write(sec1_point);
    tlv.pop();
    tlv.pop();

    tlv.pop(); // end TBS

    tlv.push(0x30); // signatureAlgorithm
    tlv.push(0x06);
    tlv.write(&OID_ECDSA_SHA256);
    tlv.pop();
    tlv.pop();

    tlv.push(0x03); // signatureValue
    tlv.write(&[0x00, 0x01]);
    tlv.pop();

    tlv.pop();
    tlv.into_vec()
}
