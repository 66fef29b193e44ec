//! Ledger hardware signing.
//!
//! A [`Ledger`] owns one exclusive transport and exactly one app persona,
//! Cosmos or Ethereum. Its lifecycle:
//!
//! ```text
//! Uninitialized ──open──▶ TransportOpen ──probe──▶ PersonaSelected ──▶ Ready
//!        │                      │                        │              │
//!        └──────────────────────┴────────────────────────┴──────────────┴──▶ Closed
//! ```
//!
//! [`Ledger::init`] walks the first three steps and only hands out a ready
//! session. On any failure along the way the transport is closed before the
//! classified error is returned.
//!
//! # Error classification
//!
//! Device status words are classified first (see [`apdu::status_message`]).
//! Some transport stacks only report a screen saver through an error message,
//! so a message naming the screen saver (or status `21781`) is treated as a
//! locked device. That check is a heuristic.
//!
//! # Example
//!
//! ```ignore
//! use wallet_background_core::config::LedgerConfig;
//! use wallet_background_core::ledger::{Ledger, LedgerApp};
//! use wallet_background_core::ledger::path::{Bip44Fields, DerivationPath};
//!
//! let mut ledger = Ledger::init(&factory, LedgerApp::Cosmos, &LedgerConfig::default()).await?;
//! let key = ledger
//!     .get_public_key(LedgerApp::Cosmos, &DerivationPath::cosmos(Bip44Fields::default()))
//!     .await?;
//! ledger.close().await?;
//! ```

pub mod apdu;
pub mod cosmos;
pub mod ethereum;
pub mod path;
pub mod transport;

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use self::apdu::{Apdu, ApduResponse};
pub use self::transport::{Transport, TransportError, TransportFactory};
use self::cosmos::{AppVersion, CosmosApp};
use self::ethereum::EthereumApp;
use self::path::{Bip44Fields, DerivationPath};
use crate::config::LedgerConfig;
use crate::crypto;
use crate::eip712::TypedData;
use crate::error::{Error, Result};
use crate::transaction::Transaction;

/// The app persona a session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerApp {
    /// The Cosmos app, or a Cosmos-SDK app speaking the same protocol.
    Cosmos,
    /// The Ethereum app.
    Ethereum,
}

impl fmt::Display for LedgerApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cosmos => f.write_str("Cosmos"),
            Self::Ethereum => f.write_str("Ethereum"),
        }
    }
}

/// What an Ethereum signing request signs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EthSignType {
    /// A personal message.
    Message,
    /// A JSON transaction.
    Transaction,
    /// JSON EIP-712 typed data.
    Eip712,
}

impl FromStr for EthSignType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "message" => Ok(Self::Message),
            "transaction" => Ok(Self::Transaction),
            "eip712" => Ok(Self::Eip712),
            other => Err(Error::UnknownSignType(other.to_string())),
        }
    }
}

/// The observable state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerState {
    /// The persona is selected and the device answers.
    Ready(LedgerApp),
    /// The transport has been released.
    Closed,
}

enum Persona {
    Cosmos(CosmosApp),
    Ethereum(EthereumApp),
}

impl Persona {
    const fn app(&self) -> LedgerApp {
        match self {
            Self::Cosmos(_) => LedgerApp::Cosmos,
            Self::Ethereum(_) => LedgerApp::Ethereum,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::Cosmos(app) => app.close().await,
            Self::Ethereum(app) => app.close().await,
        }
    }
}

/// A session with a Ledger device.
///
/// Every operation takes `&mut self`, so a session runs one device exchange
/// at a time.
///
/// [`Ledger::close`] must be called when done. Dropping an open session
/// does not release the transport; it only logs a warning.
pub struct Ledger {
    persona: Option<Persona>,
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("state", &self.state())
            .finish()
    }
}

impl Ledger {
    /// Opens a transport and selects the persona for `app`.
    ///
    /// # Errors
    ///
    /// - [`Error::FailedInit`] if no transport could be opened
    /// - [`Error::DeviceLocked`] if the device is locked or on its screen saver
    /// - [`Error::UnsupportedApp`] if another Cosmos-like app is open
    /// - [`Error::AppNotInitialised`] for any other probe failure
    pub async fn init(
        factory: &dyn TransportFactory,
        app: LedgerApp,
        config: &LedgerConfig,
    ) -> Result<Self> {
        let transport = factory.open().await.map_err(|e| {
            warn!(%app, error = %e, "failed to open Ledger transport");
            Error::FailedInit(e.to_string())
        })?;
        debug!(%app, "Ledger transport open");

        let mut persona = match app {
            LedgerApp::Cosmos => Persona::Cosmos(CosmosApp::new(
                transport,
                &config.cosmos_app_name,
                &config.bech32_prefix,
            )),
            LedgerApp::Ethereum => Persona::Ethereum(EthereumApp::new(transport)),
        };

        let (probe, app_name) = match &mut persona {
            Persona::Cosmos(cosmos) => (probe_cosmos(cosmos).await, cosmos.app_name().to_string()),
            Persona::Ethereum(ethereum) => (probe_ethereum(ethereum).await, app.to_string()),
        };

        if let Err(err) = probe {
            if let Err(close_err) = persona.close().await {
                warn!(error = %close_err, "failed to close Ledger transport after init failure");
            }
            let err = classify_probe_error(err, &app_name);
            warn!(%app, error = %err, "Ledger init failed");
            return Err(err);
        }

        info!(%app, "Ledger session ready");
        Ok(Self {
            persona: Some(persona),
        })
    }

    /// Returns the session state.
    #[must_use]
    pub fn state(&self) -> LedgerState {
        self.persona
            .as_ref()
            .map_or(LedgerState::Closed, |p| LedgerState::Ready(p.app()))
    }

    /// Reads the Cosmos app version.
    ///
    /// # Errors
    ///
    /// [`Error::AppNotInitialised`] outside the Cosmos persona,
    /// [`Error::FailedGetVersion`] if the device reports an error.
    pub async fn get_version(&mut self) -> Result<AppVersion> {
        let cosmos = self.cosmos()?;
        cosmos
            .get_version()
            .await
            .map_err(|e| device_failure(e, Error::FailedGetVersion))
    }

    /// Returns the 33-byte compressed public key for `path`.
    ///
    /// # Errors
    ///
    /// [`Error::AppNotInitialised`] if `app` is not the open persona,
    /// [`Error::FailedGetPublicKey`] if the device reports an error.
    pub async fn get_public_key(
        &mut self,
        app: LedgerApp,
        path: &DerivationPath,
    ) -> Result<[u8; 33]> {
        match app {
            LedgerApp::Cosmos => {
                let cosmos = self.cosmos()?;
                let key = cosmos
                    .get_public_key(path)
                    .await
                    .map_err(|e| device_failure(e, Error::FailedGetPublicKey))?;
                debug!(%path, address = %key.address, "exported Cosmos public key");
                Ok(key.compressed)
            }
            LedgerApp::Ethereum => {
                let ethereum = self.ethereum()?;
                let key = ethereum
                    .get_address(path)
                    .await
                    .map_err(|e| device_failure(e, Error::FailedGetPublicKey))?;
                debug!(%path, address = %key.address, "exported Ethereum public key");
                crypto::compress_public_key(&key.uncompressed)
            }
        }
    }

    /// Signs a Cosmos sign doc and returns the compact `r || s` signature.
    ///
    /// # Errors
    ///
    /// [`Error::AppNotInitialised`] outside the Cosmos persona,
    /// [`Error::SignRejected`] if the user declines on the device,
    /// [`Error::FailedSign`] for other device errors.
    pub async fn sign(&mut self, path: &DerivationPath, message: &[u8]) -> Result<[u8; 64]> {
        let cosmos = self.cosmos()?;
        let der = cosmos
            .sign(path, message)
            .await
            .map_err(|e| device_failure(e, Error::FailedSign))?;
        debug!(%path, len = message.len(), "Cosmos sign doc signed");
        crypto::der_to_compact(&der)
    }

    /// Signs with the Ethereum app.
    ///
    /// - [`EthSignType::Message`] returns the 65-byte `r || s || v` signature.
    /// - [`EthSignType::Transaction`] parses the JSON transaction and returns
    ///   the raw signed transaction.
    /// - [`EthSignType::Eip712`] validates the JSON typed data, signs its two
    ///   hashes and returns `r || s || v`.
    ///
    /// # Errors
    ///
    /// [`Error::AppNotInitialised`] outside the Ethereum persona,
    /// [`Error::InvalidTransaction`] or [`Error::InvalidTypedData`] for bad
    /// input, [`Error::SignRejected`] if the user declines,
    /// [`Error::FailedSign`] for other device errors.
    pub async fn sign_ethereum(
        &mut self,
        sign_type: EthSignType,
        path: &DerivationPath,
        message: &[u8],
    ) -> Result<Vec<u8>> {
        let ethereum = self.ethereum()?;
        let fail = |e| device_failure(e, Error::FailedSign);

        let signed = match sign_type {
            EthSignType::Message => ethereum
                .sign_personal_message(path, message)
                .await
                .map_err(fail)?
                .to_bytes()
                .to_vec(),
            EthSignType::Transaction => {
                let tx = Transaction::from_json(message)?;
                let signature = ethereum
                    .sign_transaction(path, &tx.unsigned_rlp())
                    .await
                    .map_err(fail)?;
                tx.signed_rlp(&signature)
            }
            EthSignType::Eip712 => {
                let typed_data = TypedData::from_json(message)?;
                typed_data.validate()?;
                let domain_separator = typed_data.domain.separator_hash()?;
                let message_hash = typed_data.message_hash()?;
                ethereum
                    .sign_eip712_hashed(path, &domain_separator.0, &message_hash.0)
                    .await
                    .map_err(fail)?
                    .to_bytes()
                    .to_vec()
            }
        };

        debug!(%path, ?sign_type, "Ethereum payload signed");
        Ok(signed)
    }

    /// Releases the transport. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the link could not be released. The
    /// session counts as closed either way.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut persona) = self.persona.take() {
            debug!(app = %persona.app(), "closing Ledger session");
            persona.close().await?;
        }
        Ok(())
    }

    fn cosmos(&mut self) -> Result<&mut CosmosApp> {
        match &mut self.persona {
            Some(Persona::Cosmos(app)) => Ok(app),
            Some(Persona::Ethereum(_)) => Err(Error::AppNotInitialised(LedgerApp::Cosmos.to_string())),
            None => Err(Error::SessionClosed),
        }
    }

    fn ethereum(&mut self) -> Result<&mut EthereumApp> {
        match &mut self.persona {
            Some(Persona::Ethereum(app)) => Ok(app),
            Some(Persona::Cosmos(_)) => {
                Err(Error::AppNotInitialised(LedgerApp::Ethereum.to_string()))
            }
            None => Err(Error::SessionClosed),
        }
    }
}

impl Drop for Ledger {
    fn drop(&mut self) {
        if let Some(persona) = &self.persona {
            warn!(app = %persona.app(), "Ledger session dropped without close()");
        }
    }
}

async fn probe_cosmos(app: &mut CosmosApp) -> Result<()> {
    let version = app.get_version().await?;
    if version.device_locked {
        return Err(Error::DeviceLocked);
    }
    debug!(%version, "Cosmos app version");

    let info = app.app_info().await?;
    if info.name != app.app_name() {
        return Err(Error::UnsupportedApp {
            expected: app.app_name().to_string(),
            actual: info.name,
        });
    }
    Ok(())
}

/// Reads an address at a fixed path, which also wakes the device from its
/// screen saver.
async fn probe_ethereum(app: &mut EthereumApp) -> Result<()> {
    let path = DerivationPath::ethereum(Bip44Fields::default());
    app.get_address(&path).await.map(|_| ())
}

fn classify_probe_error(err: Error, app_name: &str) -> Error {
    match err {
        Error::DeviceLocked | Error::UnsupportedApp { .. } => err,
        Error::Transport(ref transport) if transport.is_screen_saver() => Error::DeviceLocked,
        ref other if other.to_string().to_ascii_lowercase().contains("screen saver") => {
            Error::DeviceLocked
        }
        _ => Error::AppNotInitialised(app_name.to_string()),
    }
}

/// Wraps device-level failures of an operation, keeping the outcomes callers
/// act on distinct.
fn device_failure(err: Error, wrap: fn(String) -> Error) -> Error {
    match err {
        Error::DeviceLocked
        | Error::SignRejected
        | Error::InvalidSignature(_)
        | Error::SessionClosed
        | Error::AppNotInitialised(_) => err,
        Error::Device { message, .. } => wrap(message),
        other => wrap(other.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::{Apdu, ApduResponse, Transport, TransportError, TransportFactory};

    /// Appends the success status word.
    pub(crate) fn ok(data: &[u8]) -> Vec<u8> {
        let mut bytes = data.to_vec();
        bytes.extend_from_slice(&[0x90, 0x00]);
        bytes
    }

    #[derive(Clone, Default)]
    pub(crate) struct MockHandle {
        sent: Arc<Mutex<Vec<Apdu>>>,
        closes: Arc<AtomicUsize>,
    }

    impl MockHandle {
        pub(crate) fn sent(&self) -> Vec<Apdu> {
            self.sent.lock().clone()
        }

        pub(crate) fn close_count(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    /// Replays scripted device answers and records what was sent.
    pub(crate) struct MockTransport {
        replies: VecDeque<Result<Vec<u8>, TransportError>>,
        handle: MockHandle,
    }

    impl MockTransport {
        pub(crate) fn new(replies: Vec<Vec<u8>>) -> (Self, MockHandle) {
            Self::scripted(replies.into_iter().map(Ok).collect())
        }

        pub(crate) fn scripted(replies: Vec<Result<Vec<u8>, TransportError>>) -> (Self, MockHandle) {
            let handle = MockHandle::default();
            let transport = Self {
                replies: replies.into(),
                handle: handle.clone(),
            };
            (transport, handle)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn exchange(&mut self, apdu: &Apdu) -> Result<ApduResponse, TransportError> {
            self.handle.sent.lock().push(apdu.clone());
            match self.replies.pop_front() {
                Some(Ok(bytes)) => ApduResponse::from_bytes(&bytes)
                    .map_err(|e| TransportError::Other(e.to_string())),
                Some(Err(err)) => Err(err),
                None => Err(TransportError::Disconnected),
            }
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.handle.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Hands out one prepared transport, or fails when there is none.
    pub(crate) struct MockFactory {
        transport: Mutex<Option<MockTransport>>,
    }

    impl MockFactory {
        pub(crate) fn new(transport: MockTransport) -> Self {
            Self {
                transport: Mutex::new(Some(transport)),
            }
        }

        pub(crate) fn unavailable() -> Self {
            Self {
                transport: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl TransportFactory for MockFactory {
        async fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
            match self.transport.lock().take() {
                Some(transport) => Ok(Box::new(transport)),
                None => Err(TransportError::DeviceNotFound),
            }
        }
    }
}
