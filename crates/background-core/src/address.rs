//! Ethereum addresses and their derivation from secp256k1 keys.
//!
//! An address is the low 20 bytes of `keccak256(x ‖ y)` over the
//! uncompressed point. The Ledger Ethereum app reports an address next to
//! each public key, and the adapter re-derives it here to check the device.
//!
//! ```
//! use wallet_background_core::Address;
//!
//! let addr = Address::from_hex("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
//! assert_eq!(addr.to_string(), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
//! ```

use core::fmt;

use alloy_primitives::{Address as AlloyAddress, keccak256};
use k256::PublicKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::{Error, Result};

/// 20-byte account address. Displays with the EIP-55 checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(AlloyAddress);

impl Address {
    pub const BYTE_LEN: usize = 20;

    #[must_use]
    pub const fn new(bytes: [u8; Self::BYTE_LEN]) -> Self {
        Self(AlloyAddress::new(bytes))
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(AlloyAddress::ZERO)
    }

    #[must_use]
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let point = public_key.to_encoded_point(false);
        let digest = keccak256(&point.as_bytes()[1..]);
        Self(AlloyAddress::from_slice(&digest[12..]))
    }

    /// Accepts SEC1 compressed (33) or uncompressed (65) keys, and the bare
    /// 64-byte `x ‖ y` some firmware returns.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPublicKey`] when the bytes are not a curve point.
    pub fn from_public_key_bytes(bytes: &[u8]) -> Result<Self> {
        let key = match bytes.len() {
            64 => crypto::parse_public_key(&[[0x04u8].as_slice(), bytes].concat())?,
            _ => crypto::parse_public_key(bytes)?,
        };
        Ok(Self::from_public_key(&key))
    }

    /// Parses hex with or without `0x`. Checksum casing is not enforced.
    ///
    /// # Errors
    ///
    /// [`Error::HexDecodeFailed`] for bad hex, [`Error::AddressDerivationFailed`]
    /// when the result is not 20 bytes.
    pub fn from_hex(text: &str) -> Result<Self> {
        let raw = hex::decode(text.strip_prefix("0x").unwrap_or(text))?;
        let bytes: [u8; Self::BYTE_LEN] = raw.as_slice().try_into().map_err(|_| {
            Error::AddressDerivationFailed(format!("address has {} bytes", raw.len()))
        })?;
        Ok(Self::new(bytes))
    }

    /// EIP-55 form, as shown to users.
    #[must_use]
    pub fn to_checksum_hex(&self) -> String {
        self.0.to_checksum(None)
    }

    /// Lowercase `0x` form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    #[must_use]
    pub const fn inner(&self) -> AlloyAddress {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum_hex())
    }
}
