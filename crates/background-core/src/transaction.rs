//! Ethereum transactions as the Ledger Ethereum app consumes them.
//!
//! A dapp hands the wallet a JSON transaction. The device signs the unsigned
//! RLP payload and answers with `v ‖ r ‖ s`, which is folded back into the
//! broadcastable signed encoding.
//!
//! Two envelopes are accepted: EIP-155 legacy transactions and EIP-1559
//! (type 2) transactions.
//!
//! ```
//! use wallet_background_core::{Address, Eip1559Transaction, Transaction};
//! use alloy_primitives::{Bytes, U256};
//!
//! let tx = Transaction::Eip1559(Eip1559Transaction {
//!     chain_id: 1,
//!     nonce: 0,
//!     max_priority_fee_per_gas: U256::from(1_000_000_000u64),
//!     max_fee_per_gas: U256::from(100_000_000_000u64),
//!     gas_limit: 21000,
//!     to: Some(Address::zero()),
//!     value: U256::from(1_000_000_000_000_000_000u128),
//!     data: Bytes::new(),
//!     access_list: vec![],
//! });
//!
//! assert_eq!(tx.unsigned_rlp()[0], 0x02);
//! ```

use alloy_primitives::{B256, Bytes, U256};
use alloy_rlp::{Encodable, Header, RlpEncodable};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{Error, Result};
use crate::signature::Signature;

/// One `[address, [storageKey, ...]]` item of an access list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, RlpEncodable)]
#[serde(rename_all = "camelCase")]
pub struct AccessListEntry {
    pub address: alloy_primitives::Address,
    pub storage_keys: Vec<B256>,
}

/// A pre-typed-envelope transaction with EIP-155 replay protection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    /// `None` deploys a contract.
    #[serde(default)]
    pub to: Option<Address>,
    pub value: U256,
    #[serde(default)]
    pub data: Bytes,
}

impl LegacyTransaction {
    fn write_body(&self, list: &mut RlpList) {
        list.uint(self.nonce)
            .u256(&self.gas_price)
            .uint(self.gas_limit)
            .recipient(self.to.as_ref())
            .u256(&self.value)
            .bytes(&self.data);
    }

    /// `rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0])`
    #[must_use]
    pub fn unsigned_rlp(&self) -> Vec<u8> {
        let mut list = RlpList::default();
        self.write_body(&mut list);
        list.uint(self.chain_id).uint(0).uint(0);
        list.finish(None)
    }

    /// The app truncates `v` to a byte, so only its parity is trusted and
    /// `chainId * 2 + 35 + parity` is recomputed.
    #[must_use]
    pub fn signed_rlp(&self, signature: &Signature) -> Vec<u8> {
        let v = self.chain_id * 2 + 35 + u64::from(signature.y_parity());

        let mut list = RlpList::default();
        self.write_body(&mut list);
        list.uint(v).signature_rs(signature);
        list.finish(None)
    }
}

/// A type 2 transaction with a priority fee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip1559Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
    pub gas_limit: u64,
    /// `None` deploys a contract.
    #[serde(default)]
    pub to: Option<Address>,
    pub value: U256,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default)]
    pub access_list: Vec<AccessListEntry>,
}

impl Eip1559Transaction {
    /// Envelope type byte.
    pub const TX_TYPE: u8 = 0x02;

    fn write_body(&self, list: &mut RlpList) {
        list.uint(self.chain_id)
            .uint(self.nonce)
            .u256(&self.max_priority_fee_per_gas)
            .u256(&self.max_fee_per_gas)
            .uint(self.gas_limit)
            .recipient(self.to.as_ref())
            .u256(&self.value)
            .bytes(&self.data)
            .raw(&access_list_rlp(&self.access_list));
    }

    /// `0x02 ‖ rlp([chainId, nonce, maxPriorityFeePerGas, maxFeePerGas,
    /// gasLimit, to, value, data, accessList])`
    #[must_use]
    pub fn unsigned_rlp(&self) -> Vec<u8> {
        let mut list = RlpList::default();
        self.write_body(&mut list);
        list.finish(Some(Self::TX_TYPE))
    }

    /// `v` may arrive as `0/1` or `27/28`; both encode the same parity.
    #[must_use]
    pub fn signed_rlp(&self, signature: &Signature) -> Vec<u8> {
        let mut list = RlpList::default();
        self.write_body(&mut list);
        list.uint(u64::from(signature.y_parity()))
            .signature_rs(signature);
        list.finish(Some(Self::TX_TYPE))
    }
}

/// Accumulates list items, then prepends the list header.
#[derive(Debug, Default)]
struct RlpList {
    payload: Vec<u8>,
}

impl RlpList {
    fn uint(&mut self, value: u64) -> &mut Self {
        value.encode(&mut self.payload);
        self
    }

    fn u256(&mut self, value: &U256) -> &mut Self {
        self.be_scalar(&value.to_be_bytes::<32>())
    }

    /// Big-endian scalar with leading zeros stripped; zero is the empty string.
    fn be_scalar(&mut self, bytes: &[u8; 32]) -> &mut Self {
        let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        bytes[first..].encode(&mut self.payload);
        self
    }

    fn bytes(&mut self, data: &[u8]) -> &mut Self {
        data.encode(&mut self.payload);
        self
    }

    fn recipient(&mut self, to: Option<&Address>) -> &mut Self {
        match to {
            Some(address) => address.inner().encode(&mut self.payload),
            None => self.payload.push(alloy_rlp::EMPTY_STRING_CODE),
        }
        self
    }

    fn signature_rs(&mut self, signature: &Signature) -> &mut Self {
        self.be_scalar(signature.r()).be_scalar(signature.s())
    }

    fn raw(&mut self, encoded: &[u8]) -> &mut Self {
        self.payload.extend_from_slice(encoded);
        self
    }

    fn finish(&self, envelope: Option<u8>) -> Vec<u8> {
        let header = Header {
            list: true,
            payload_length: self.payload.len(),
        };
        let mut out = Vec::with_capacity(1 + header.length() + self.payload.len());
        out.extend(envelope);
        header.encode(&mut out);
        out.extend_from_slice(&self.payload);
        out
    }
}

fn access_list_rlp(entries: &[AccessListEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    entries.to_vec().encode(&mut out);
    out
}

/// Any transaction the Ledger Ethereum path accepts, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Transaction {
    #[serde(rename = "legacy")]
    Legacy(LegacyTransaction),
    #[serde(rename = "eip1559")]
    Eip1559(Eip1559Transaction),
}

impl Transaction {
    /// What gets streamed to the device.
    #[must_use]
    pub fn unsigned_rlp(&self) -> Vec<u8> {
        match self {
            Self::Legacy(tx) => tx.unsigned_rlp(),
            Self::Eip1559(tx) => tx.unsigned_rlp(),
        }
    }

    #[must_use]
    pub const fn chain_id(&self) -> u64 {
        match self {
            Self::Legacy(tx) => tx.chain_id,
            Self::Eip1559(tx) => tx.chain_id,
        }
    }

    /// The raw transaction ready for `eth_sendRawTransaction`.
    #[must_use]
    pub fn signed_rlp(&self, signature: &Signature) -> Vec<u8> {
        match self {
            Self::Legacy(tx) => tx.signed_rlp(signature),
            Self::Eip1559(tx) => tx.signed_rlp(signature),
        }
    }

    /// Parses the JSON a dapp submits.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransaction`] when the JSON is not a supported
    /// transaction.
    pub fn from_json(json: &[u8]) -> Result<Self> {
        serde_json::from_slice(json).map_err(|e| Error::InvalidTransaction(e.to_string()))
    }
}
