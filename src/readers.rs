//! PC/SC-backed reader context.
//!
//! Implements the [`crate::card`] traits on top of the system PC/SC
//! resource manager.

use crate::{
    card::{CardBackend, CardTransaction, Protocol, ReaderContext},
    Error, Result,
};
use log::error;
use std::ffi::CString;

/// PC/SC resource-manager context, used to enumerate readers and connect
/// to cards.
pub struct Context {
    ctx: pcsc::Context,
}

impl Context {
    /// Open a PC/SC context with system scope.
    pub fn open() -> Result<Self> {
        Ok(Self {
            ctx: pcsc::Context::establish(pcsc::Scope::System)?,
        })
    }
}

impl ReaderContext for Context {
    fn list_readers(&mut self) -> Result<Vec<String>> {
        self.ctx.is_valid()?;

        let mut name_buf = vec![0u8; self.ctx.list_readers_len()?];
        Ok(self
            .ctx
            .list_readers(&mut name_buf)?
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    fn connect(&mut self, reader: &str) -> Result<Box<dyn CardBackend>> {
        let name = CString::new(reader).map_err(|_| Error::InvalidData)?;
        let card = self.ctx.connect(
            &name,
            pcsc::ShareMode::Shared,
            pcsc::Protocols::T0 | pcsc::Protocols::T1,
        )?;

        // The resource manager picked T=0 or T=1 at connect time; recover
        // which one so the token can report it.
        let protocol = match card.status2_owned().ok().and_then(|st| st.protocol2()) {
            Some(pcsc::Protocol::T0) => Protocol::T0,
            _ => Protocol::T1,
        };

        Ok(Box::new(PcscCard {
            card: Some(card),
            protocol,
        }))
    }
}

/// One connected PC/SC card.
struct PcscCard {
    card: Option<pcsc::Card>,
    protocol: Protocol,
}

impl CardBackend for PcscCard {
    fn begin(&mut self) -> Result<Box<dyn CardTransaction + '_>> {
        let card = self.card.as_mut().ok_or(Error::Io { inner: None })?;
        Ok(Box::new(PcscTransaction {
            txn: Some(card.transaction()?),
        }))
    }

    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn disconnect(&mut self, reset: bool) {
        if let Some(card) = self.card.take() {
            let disposition = if reset {
                pcsc::Disposition::ResetCard
            } else {
                pcsc::Disposition::LeaveCard
            };

            if let Err((_, err)) = card.disconnect(disposition) {
                error!("failed disconnecting card: {}", err);
            }
        }
    }
}

impl Drop for PcscCard {
    fn drop(&mut self) {
        self.disconnect(false);
    }
}

/// Exclusive transaction on a PC/SC card.
struct PcscTransaction<'tx> {
    txn: Option<pcsc::Transaction<'tx>>,
}

impl CardTransaction for PcscTransaction<'_> {
    fn transmit(&mut self, send: &[u8], recv_len: usize) -> Result<Vec<u8>> {
        let txn = self.txn.as_ref().ok_or(Error::Io { inner: None })?;

        let mut recv_buf = vec![0u8; recv_len];
        let len = txn.transmit(send, &mut recv_buf)?.len();
        recv_buf.truncate(len);
        Ok(recv_buf)
    }

    fn end(&mut self, reset: bool) -> Result<()> {
        if let Some(txn) = self.txn.take() {
            let disposition = if reset {
                pcsc::Disposition::ResetCard
            } else {
                pcsc::Disposition::LeaveCard
            };

            txn.end(disposition).map_err(|(_, err)| Error::from(err))?;
        }
        Ok(())
    }
}
