//! Recoverable secp256k1 signatures from the Ledger Ethereum app.
//!
//! The app replies `v ‖ r ‖ s`. Everything above the ledger layer works with
//! the `r ‖ s ‖ v` packing that wallets and dapps expect.
//!
//! ```
//! use wallet_background_core::Signature;
//!
//! let sig = Signature::from_parts(&[1u8; 32], &[2u8; 32], 27).unwrap();
//! assert_eq!(sig.to_bytes()[64], 27);
//! ```

use crate::error::{Error, Result};

/// `r`, `s` and the recovery byte exactly as the device reported it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    r: [u8; 32],
    s: [u8; 32],
    v: u8,
}

fn scalar(name: &str, bytes: &[u8]) -> Result<[u8; 32]> {
    bytes.try_into().map_err(|_| {
        Error::InvalidSignature(format!("{name} must be 32 bytes, got {}", bytes.len()))
    })
}

impl Signature {
    /// Length of both the device reply and the `r ‖ s ‖ v` packing.
    pub const BYTE_LEN: usize = 65;

    #[must_use]
    pub const fn new(r: [u8; 32], s: [u8; 32], v: u8) -> Self {
        Self { r, s, v }
    }

    /// # Errors
    ///
    /// [`Error::InvalidSignature`] if `r` or `s` is not 32 bytes.
    pub fn from_parts(r: &[u8], s: &[u8], v: u8) -> Result<Self> {
        Ok(Self::new(scalar("r", r)?, scalar("s", s)?, v))
    }

    /// Splits a device reply. Trailing bytes past the first 65 are ignored.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSignature`] if the reply is shorter than 65 bytes.
    pub fn from_vrs(reply: &[u8]) -> Result<Self> {
        match reply {
            [v, rest @ ..] if rest.len() >= 64 => Self::from_parts(&rest[..32], &rest[32..64], *v),
            _ => Err(Error::InvalidSignature(format!(
                "device reply has {} bytes, need {}",
                reply.len(),
                Self::BYTE_LEN
            ))),
        }
    }

    /// `r ‖ s ‖ v`
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut packed = [0u8; Self::BYTE_LEN];
        let (rs, v) = packed.split_at_mut(64);
        rs[..32].copy_from_slice(&self.r);
        rs[32..].copy_from_slice(&self.s);
        v[0] = self.v;
        packed
    }

    #[must_use]
    pub const fn r(&self) -> &[u8; 32] {
        &self.r
    }

    #[must_use]
    pub const fn s(&self) -> &[u8; 32] {
        &self.s
    }

    #[must_use]
    pub const fn v(&self) -> u8 {
        self.v
    }

    /// Odd y. Understands `0/1`, `27/28` and EIP-155 values
    /// (`chainId * 2 + 35 + parity`, possibly truncated to a byte).
    #[must_use]
    pub const fn y_parity(&self) -> bool {
        match self.v {
            0 | 27 => false,
            1 | 28 => true,
            v => v % 2 == 0,
        }
    }
}
