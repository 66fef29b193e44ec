//! Transport abstraction for talking to a Ledger device.
//!
//! The [`Transport`] trait abstracts over the way APDUs reach the device
//! (WebHID, WebUSB, native HID, a speculos emulator socket), so the same app
//! protocol works everywhere. A [`TransportFactory`] opens a fresh exclusive
//! transport for each session.

use async_trait::async_trait;
use thiserror::Error;
use tracing::trace;

use super::apdu::{Apdu, ApduResponse};
use crate::error;

/// Failure below the device protocol: the link itself, not an app status.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// No device could be found or opened.
    #[error("no Ledger device found")]
    DeviceNotFound,

    /// The device went away in the middle of an exchange.
    #[error("Ledger device disconnected")]
    Disconnected,

    /// The transport was used after being closed.
    #[error("transport is closed")]
    Closed,

    /// Any other failure reported by the underlying link.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if this failure is how the device reports its screen saver.
    ///
    /// Some transport stacks surface the screen saver only as a message. This
    /// string check is a heuristic; status words are classified before it.
    #[must_use]
    pub fn is_screen_saver(&self) -> bool {
        match self {
            Self::Other(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("screen saver") || message.contains("21781")
            }
            _ => false,
        }
    }
}

/// An exclusive, open link to a Ledger device.
#[async_trait]
pub trait Transport: Send {
    /// Sends one APDU and returns the device's answer.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the exchange did not complete. A
    /// completed exchange with a failing status word is still `Ok`.
    async fn exchange(&mut self, apdu: &Apdu) -> Result<ApduResponse, TransportError>;

    /// Closes the link.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the link could not be released.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transports for new sessions.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Opens a new exclusive transport.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if no device could be opened.
    async fn open(&self) -> Result<Box<dyn Transport>, TransportError>;
}

/// Exchanges one APDU and fails on any status other than success.
pub(crate) async fn send(transport: &mut dyn Transport, apdu: &Apdu) -> error::Result<Vec<u8>> {
    let response = transport.exchange(apdu).await?;
    trace!(
        cla = apdu.cla(),
        ins = apdu.ins(),
        p1 = apdu.p1(),
        status = response.status_word(),
        "apdu exchanged"
    );
    response.check()?;
    Ok(response.into_data())
}
