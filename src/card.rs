//! Narrow interfaces onto the card reader resource manager.
//!
//! The PIV layer never talks to PC/SC directly; it goes through these
//! traits so the reader stack can be swapped out (the scripted card
//! simulator in the test suite implements them too). The production
//! implementation lives in [`crate::readers`].

use crate::Result;
use std::fmt;

/// Active transmission protocol negotiated with a card.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Protocol {
    /// Character-oriented T=0
    T0,

    /// Block-oriented T=1
    T1,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::T0 => f.write_str("T=0"),
            Protocol::T1 => f.write_str("T=1"),
        }
    }
}

/// An exclusive transaction held on a connected card.
///
/// All APDU traffic happens inside one of these; ending the transaction
/// optionally resets the card, which wipes its security state.
pub trait CardTransaction {
    /// Transmit one serialized APDU and return the raw reply, including
    /// the trailing status word. `recv_len` bounds the reply size.
    fn transmit(&mut self, send: &[u8], recv_len: usize) -> Result<Vec<u8>>;

    /// End the transaction, resetting the card if asked. Called exactly
    /// once, by the owning guard.
    fn end(&mut self, reset: bool) -> Result<()>;
}

/// A connected card.
pub trait CardBackend {
    /// Begin an exclusive transaction.
    fn begin(&mut self) -> Result<Box<dyn CardTransaction + '_>>;

    /// The active protocol for this connection.
    fn protocol(&self) -> Protocol;

    /// Disconnect from the card, resetting it if asked. Idempotent.
    fn disconnect(&mut self, reset: bool);
}

/// A handle onto the reader resource manager.
pub trait ReaderContext {
    /// Names of the currently attached readers.
    fn list_readers(&mut self) -> Result<Vec<String>>;

    /// Connect to the card in the named reader.
    fn connect(&mut self, reader: &str) -> Result<Box<dyn CardBackend>>;
}
