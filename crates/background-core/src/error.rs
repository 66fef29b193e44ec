//! Error types for the wallet background core.
//!
//! This module provides the single tagged error type [`enum@Error`] surfaced by
//! every component. Each variant belongs to a module (`ledger`, `interaction`,
//! `messaging`, ...) and carries a stable numeric code, so that the router can
//! hand a caller an [`ErrorReport`] instead of a bare string.
//!
//! # Error Categories
//!
//! - **Ledger errors**: initialisation, lock state, app selection, device status
//! - **Interaction errors**: request validation, rejection, timeouts
//! - **Messaging errors**: derived-key crypto and counterparty key lookup
//! - **Ethereum errors**: signatures, transactions, EIP-712 typed data
//!
//! Hardware errors render as remediation hints, not raw device messages:
//!
//! ```
//! use wallet_background_core::Error;
//!
//! let err = Error::DeviceLocked;
//! assert_eq!(err.module(), "ledger");
//! assert_eq!(err.to_string(), "Unlock your Ledger device and try again");
//! ```

use core::result::Result as CoreResult;

use base64::DecodeError;
use hex::FromHexError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

use crate::ledger::TransportError;

/// The error type shared by every component of the background core.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Ledger Errors
    // =========================================================================
    /// The persona needed for the operation is not the one opened on the session.
    #[error("{0} app is not initialised. Open the {0} app on Ledger and try again")]
    AppNotInitialised(String),

    /// The transport to the device could not be opened.
    #[error("Failed to init transport. Connect and unlock your Ledger device: {0}")]
    FailedInit(String),

    /// The device reported an error while reading its version.
    #[error("Failed to get version from Ledger: {0}")]
    FailedGetVersion(String),

    /// The device reported an error while exporting a public key.
    #[error("Failed to get public key from Ledger: {0}")]
    FailedGetPublicKey(String),

    /// The device reported an error while signing.
    #[error("Failed to sign on Ledger: {0}")]
    FailedSign(String),

    /// The user rejected the request on the device.
    #[error("Signing request was rejected on the Ledger device")]
    SignRejected,

    /// The app opened on the device is not the one that was asked for.
    #[error("Unsupported app {actual:?}. Open the {expected} app on Ledger and try again")]
    UnsupportedApp {
        /// The app name the caller asked for.
        expected: String,
        /// The app name the device reported.
        actual: String,
    },

    /// The device is locked or showing its screen saver.
    #[error("Unlock your Ledger device and try again")]
    DeviceLocked,

    /// A device status word with no dedicated classification.
    #[error("Ledger device error {status:#06x}: {message}")]
    Device {
        /// The raw status word.
        status: u16,
        /// The status message from the device status table.
        message: String,
    },

    /// The session has already been closed.
    #[error("Ledger session is closed")]
    SessionClosed,

    /// A BIP-44 path did not have exactly five segments.
    #[error("invalid length of path: expected 5, got {0}")]
    InvalidPathLength(usize),

    /// The device response could not be parsed.
    #[error("malformed device response: {0}")]
    MalformedResponse(String),

    /// The transport failed below the device protocol.
    #[error(transparent)]
    Transport(#[from] TransportError),

    // =========================================================================
    // Interaction Errors
    // =========================================================================
    /// An interaction or event was requested with an empty type.
    #[error("interaction type is empty")]
    EmptyInteractionType,

    /// A freshly generated interaction id was already waiting.
    #[error("interaction id {0} is already pending")]
    DuplicateInteractionId(String),

    /// The user rejected the interaction.
    #[error("Request rejected")]
    Rejected,

    /// No decision arrived before the configured timeout.
    #[error("interaction {0} timed out")]
    InteractionTimedOut(String),

    /// The registry went away before the interaction was resolved.
    #[error("interaction {0} was abandoned")]
    InteractionAbandoned(String),

    /// An Ethereum sign type outside `message`, `transaction` and `eip712`.
    #[error("unknown sign type: {0}")]
    UnknownSignType(String),

    // =========================================================================
    // Messaging Errors
    // =========================================================================
    /// A counterparty key was not cached and no remote resolver is configured.
    #[error("public key lookup for {0} is not implemented")]
    PublicKeyLookupNotImplemented(String),

    /// The public key is invalid or malformed.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Derived key material is not a valid secp256k1 scalar.
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// ECIES encryption or decryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// The keyring collaborator failed. The message is passed through untouched.
    #[error("{0}")]
    Keyring(String),

    /// Failed to decode base64 data.
    #[error("base64 decoding failed: {0}")]
    Base64DecodeFailed(String),

    // =========================================================================
    // Ethereum Errors
    // =========================================================================
    /// The signature is invalid or malformed.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Failed to derive the Ethereum address from the public key.
    #[error("address derivation failed: {0}")]
    AddressDerivationFailed(String),

    /// The transaction data is invalid.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// The EIP-712 typed data is invalid.
    #[error("invalid EIP-712 typed data: {0}")]
    InvalidTypedData(String),

    /// A type referenced in the typed data is not defined.
    #[error("undefined type in EIP-712 data: {0}")]
    UndefinedType(String),

    // =========================================================================
    // Router and Configuration Errors
    // =========================================================================
    /// The request came from a context that may not issue it.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),

    // =========================================================================
    // Serialization Errors
    // =========================================================================
    /// Failed to parse hex data.
    #[error("hex decoding failed: {0}")]
    HexDecodeFailed(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    JsonError(String),
}

impl Error {
    /// Returns the module tag this error belongs to.
    #[must_use]
    pub const fn module(&self) -> &'static str {
        match self {
            Self::AppNotInitialised(_)
            | Self::FailedInit(_)
            | Self::FailedGetVersion(_)
            | Self::FailedGetPublicKey(_)
            | Self::FailedSign(_)
            | Self::SignRejected
            | Self::UnsupportedApp { .. }
            | Self::DeviceLocked
            | Self::Device { .. }
            | Self::SessionClosed
            | Self::InvalidPathLength(_)
            | Self::MalformedResponse(_) => "ledger",
            Self::Transport(_) => "transport",
            Self::EmptyInteractionType
            | Self::DuplicateInteractionId(_)
            | Self::Rejected
            | Self::InteractionTimedOut(_)
            | Self::InteractionAbandoned(_)
            | Self::UnknownSignType(_) => "interaction",
            Self::PublicKeyLookupNotImplemented(_)
            | Self::InvalidPublicKey(_)
            | Self::InvalidPrivateKey(_)
            | Self::Encryption(_)
            | Self::Keyring(_)
            | Self::Base64DecodeFailed(_) => "messaging",
            Self::InvalidSignature(_)
            | Self::AddressDerivationFailed(_)
            | Self::InvalidTransaction(_)
            | Self::InvalidTypedData(_)
            | Self::UndefinedType(_) => "ethereum",
            Self::PermissionDenied(_) => "router",
            Self::Config(_) => "config",
            Self::HexDecodeFailed(_) | Self::JsonError(_) => "encoding",
        }
    }

    /// Returns the stable numeric code of this error within its module.
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            Self::AppNotInitialised(_) => 100,
            Self::SessionClosed => 101,
            Self::FailedInit(_) => 102,
            Self::FailedGetVersion(_) => 103,
            Self::FailedGetPublicKey(_) => 104,
            Self::FailedSign(_) => 105,
            Self::SignRejected => 106,
            Self::InvalidPathLength(_) => 107,
            Self::MalformedResponse(_) => 108,
            Self::Device { .. } => 109,
            Self::UnsupportedApp { .. } => 110,
            Self::DeviceLocked => 111,
            Self::Transport(_) => 120,
            Self::EmptyInteractionType => 200,
            Self::DuplicateInteractionId(_) => 201,
            Self::Rejected => 202,
            Self::InteractionTimedOut(_) => 203,
            Self::InteractionAbandoned(_) => 204,
            Self::UnknownSignType(_) => 205,
            Self::PublicKeyLookupNotImplemented(_) => 300,
            Self::InvalidPublicKey(_) => 301,
            Self::InvalidPrivateKey(_) => 302,
            Self::Encryption(_) => 303,
            Self::Keyring(_) => 304,
            Self::Base64DecodeFailed(_) => 305,
            Self::InvalidSignature(_) => 400,
            Self::AddressDerivationFailed(_) => 401,
            Self::InvalidTransaction(_) => 402,
            Self::InvalidTypedData(_) => 404,
            Self::UndefinedType(_) => 405,
            Self::PermissionDenied(_) => 500,
            Self::Config(_) => 600,
            Self::HexDecodeFailed(_) => 700,
            Self::JsonError(_) => 701,
        }
    }

    /// Builds the serializable report handed back across the router boundary.
    #[must_use]
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            module: self.module().to_string(),
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// The wire form of an [`enum@Error`]: module tag, code and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// The module the error originated in.
    pub module: String,
    /// The code of the error within its module.
    pub code: u16,
    /// The human-readable message.
    pub message: String,
}

impl From<FromHexError> for Error {
    fn from(err: FromHexError) -> Self {
        Error::HexDecodeFailed(err.to_string())
    }
}

impl From<SerdeJsonError> for Error {
    fn from(err: SerdeJsonError) -> Self {
        Error::JsonError(err.to_string())
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Error::Base64DecodeFailed(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// A specialized [`Result`] type for background core operations.
pub type Result<T> = CoreResult<T, Error>;
