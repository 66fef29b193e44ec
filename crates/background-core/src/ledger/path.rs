//! BIP-44 derivation paths as understood by the Ledger apps.
//!
//! Every path this crate sends to a device has exactly five segments:
//!
//! | Index | Segment         | Hardened |
//! |-------|-----------------|----------|
//! | 0     | purpose (`44`)  | yes      |
//! | 1     | coin type       | yes      |
//! | 2     | account         | yes      |
//! | 3     | change          | no       |
//! | 4     | address index   | no       |
//!
//! # Example
//!
//! ```
//! use wallet_background_core::ledger::path::{Bip44Fields, create_path, path_to_string};
//!
//! let path = create_path(118, Bip44Fields::default());
//! assert_eq!(path_to_string(&path).unwrap(), "m/44'/118'/0'/0/0");
//! ```

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The BIP-44 purpose segment.
pub const PURPOSE: u32 = 44;

/// Coin type of the Cosmos Hub.
pub const COSMOS_COIN_TYPE: u32 = 118;

/// Coin type of Ethereum.
pub const ETHEREUM_COIN_TYPE: u32 = 60;

/// Number of segments in a BIP-44 path.
pub const PATH_LEN: usize = 5;

/// Flag marking a hardened segment.
const HARDENED: u32 = 0x8000_0000;

/// The caller-chosen part of a BIP-44 path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bip44Fields {
    /// Account index (hardened).
    pub account: u32,

    /// Change index, `0` for external addresses.
    pub change: u32,

    /// Address index.
    pub address_index: u32,
}

/// Builds the raw five-segment path `[44, coin_type, account, change, address_index]`.
#[must_use]
pub const fn create_path(coin_type: u32, fields: Bip44Fields) -> [u32; PATH_LEN] {
    [
        PURPOSE,
        coin_type,
        fields.account,
        fields.change,
        fields.address_index,
    ]
}

/// Renders a raw path as `m/44'/coin'/account'/change/index`.
///
/// # Errors
///
/// Returns [`Error::InvalidPathLength`] if the path does not have five segments.
pub fn path_to_string(path: &[u32]) -> Result<String> {
    if path.len() != PATH_LEN {
        return Err(Error::InvalidPathLength(path.len()));
    }

    let mut out = String::from("m");
    for (i, segment) in path.iter().enumerate() {
        out.push('/');
        out.push_str(&segment.to_string());
        if i <= 2 {
            out.push('\'');
        }
    }
    Ok(out)
}

/// A complete BIP-44 derivation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivationPath {
    /// The registered coin type.
    pub coin_type: u32,

    /// The account, change and address index.
    #[serde(flatten)]
    pub fields: Bip44Fields,
}

impl DerivationPath {
    /// Creates a path for the given coin type.
    #[must_use]
    pub const fn new(coin_type: u32, fields: Bip44Fields) -> Self {
        Self { coin_type, fields }
    }

    /// Creates a Cosmos Hub path (`coin_type = 118`).
    #[must_use]
    pub const fn cosmos(fields: Bip44Fields) -> Self {
        Self::new(COSMOS_COIN_TYPE, fields)
    }

    /// Creates an Ethereum path (`coin_type = 60`).
    #[must_use]
    pub const fn ethereum(fields: Bip44Fields) -> Self {
        Self::new(ETHEREUM_COIN_TYPE, fields)
    }

    /// Returns the raw segments.
    #[must_use]
    pub const fn segments(&self) -> [u32; PATH_LEN] {
        create_path(self.coin_type, self.fields)
    }

    /// Serializes the path the way the Cosmos app expects it: five
    /// little-endian `u32`s, the first three with the hardened flag set.
    #[must_use]
    pub fn to_cosmos_bytes(&self) -> [u8; 4 * PATH_LEN] {
        let mut out = [0u8; 4 * PATH_LEN];
        for (i, segment) in self.segments().iter().enumerate() {
            let value = if i <= 2 { segment | HARDENED } else { *segment };
            out[4 * i..4 * i + 4].copy_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Serializes the path the way the Ethereum app expects it: a segment count
    /// followed by big-endian `u32`s, the first three hardened.
    #[must_use]
    pub fn to_ethereum_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 4 * PATH_LEN);
        out.push(PATH_LEN as u8);
        for (i, segment) in self.segments().iter().enumerate() {
            let value = if i <= 2 { segment | HARDENED } else { *segment };
            out.extend_from_slice(&value.to_be_bytes());
        }
        out
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [purpose, coin, account, change, index] = self.segments();
        write!(f, "m/{purpose}'/{coin}'/{account}'/{change}/{index}")
    }
}

impl FromStr for DerivationPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix("m/")
            .ok_or_else(|| Error::MalformedResponse(format!("path must start with m/: {s}")))?;

        let segments = rest
            .split('/')
            .enumerate()
            .map(|(i, part)| {
                let (digits, hardened) = match part.strip_suffix('\'') {
                    Some(digits) => (digits, true),
                    None => (part, false),
                };
                if hardened != (i <= 2) {
                    return Err(Error::MalformedResponse(format!(
                        "segment {i} of {s} has the wrong hardening"
                    )));
                }
                digits
                    .parse::<u32>()
                    .map_err(|e| Error::MalformedResponse(format!("invalid segment {part}: {e}")))
            })
            .collect::<Result<Vec<u32>>>()?;

        let [purpose, coin_type, account, change, address_index] = segments[..] else {
            return Err(Error::InvalidPathLength(segments.len()));
        };
        if purpose != PURPOSE {
            return Err(Error::MalformedResponse(format!(
                "unsupported purpose {purpose}"
            )));
        }

        Ok(Self::new(
            coin_type,
            Bip44Fields {
                account,
                change,
                address_index,
            },
        ))
    }
}
