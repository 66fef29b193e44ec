//! Wallet Background Core Library
//!
//! This crate provides the background side of a multi-chain browser wallet:
//! the part that correlates "please approve this" requests with the decisions
//! a user makes in another window, and then performs the cryptographic work,
//! either on a Ledger device or with keys derived from the wallet's keyring.
//!
//! # Overview
//!
//! - **Interactions**: pending approvals keyed by random ids, resolved exactly
//!   once by approve or reject
//! - **Ledger**: Cosmos and Ethereum app sessions over an injected transport,
//!   with classified device errors
//! - **Messaging**: per-chain derived keys for ECIES encryption and signing
//! - **Ethereum types**: transactions, EIP-712 typed data, signatures and
//!   addresses used by the Ledger Ethereum app
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Router                               │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │     InteractionService       │      MessagingService        │
//! │  ┌──────────┐ ┌───────────┐  │  ┌─────────┐ ┌────────────┐  │
//! │  │ Id Gen   │ │ Foreground│  │  │  ECIES  │ │  Keyring   │  │
//! │  │          │ │ Dispatcher│  │  │         │ │  (trait)   │  │
//! │  └──────────┘ └───────────┘  │  └─────────┘ └────────────┘  │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │                          Ledger                              │
//! │  ┌─────────┐  ┌─────────┐  ┌──────────┐  ┌────────────────┐ │
//! │  │  Path   │  │  APDU   │  │  Cosmos/ │  │   Transport    │ │
//! │  │         │  │ Encode  │  │ Ethereum │  │  Abstraction   │ │
//! │  └─────────┘  └─────────┘  └──────────┘  └────────────────┘ │
//! ├─────────────────────────────────────────────────────────────┤
//! │            Transport Layer (WebHID / WebUSB / HID)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ## Waiting for an Approval
//!
//! ```rust
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use wallet_background_core::id::RandomIdGenerator;
//! use wallet_background_core::interaction::{ChannelDispatcher, InteractionService};
//!
//! let dispatcher = Arc::new(ChannelDispatcher::new());
//! let _popup = dispatcher.register("popup");
//! let service = Arc::new(InteractionService::new(RandomIdGenerator::default(), dispatcher));
//!
//! let pending = service
//!     .request_interaction("popup", "request-sign", false, json!({"chainId": "cosmoshub-4"}), || {})
//!     .unwrap();
//!
//! // Normally the popup answers from another task
//! service.reject(pending.id());
//! assert!(pending.wait().await.is_err());
//! # });
//! ```
//!
//! ## Derivation Paths
//!
//! ```rust
//! use wallet_background_core::ledger::path::{create_path, path_to_string, Bip44Fields};
//!
//! let path = create_path(118, Bip44Fields::default());
//! assert_eq!(path_to_string(&path).unwrap(), "m/44'/118'/0'/0/0");
//! ```
//!
//! ## Signing on a Ledger
//!
//! Implement [`ledger::Transport`] and [`ledger::TransportFactory`] for your
//! platform, then:
//!
//! ```ignore
//! use wallet_background_core::config::LedgerConfig;
//! use wallet_background_core::ledger::{EthSignType, Ledger, LedgerApp};
//! use wallet_background_core::ledger::path::{Bip44Fields, DerivationPath};
//!
//! let mut ledger = Ledger::init(&factory, LedgerApp::Ethereum, &LedgerConfig::default()).await?;
//! let raw_tx = ledger
//!     .sign_ethereum(
//!         EthSignType::Transaction,
//!         &DerivationPath::ethereum(Bip44Fields::default()),
//!         tx_json.as_bytes(),
//!     )
//!     .await?;
//! ledger.close().await?;
//! ```
//!
//! # Security Considerations
//!
//! - Ledger private keys never leave the device
//! - Derived messaging keys are zeroized when dropped and never logged
//! - Device signatures are normalized to low-S form to prevent malleability

// Modules
pub mod address;
pub mod config;
pub mod crypto;
pub mod eip712;
pub mod env;
pub mod error;
pub mod id;
pub mod interaction;
pub mod ledger;
pub mod logging;
pub mod messaging;
pub mod router;
pub mod signature;
pub mod transaction;

// Re-exports for convenience
pub use address::Address;
pub use config::Config;
pub use eip712::{Eip712Domain, TypedData};
pub use env::RequestEnv;
pub use error::{Error, ErrorReport, Result};
pub use interaction::InteractionService;
pub use ledger::{EthSignType, Ledger, LedgerApp};
pub use messaging::MessagingService;
pub use router::{BackgroundRequest, BackgroundResponse, Router};
pub use signature::Signature;
pub use transaction::{AccessListEntry, Eip1559Transaction, LegacyTransaction, Transaction};

// Re-export commonly used alloy types
pub use alloy_primitives::{B256, U256};
