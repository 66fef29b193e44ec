//! secp256k1 helpers shared by the Ledger adapter and the messaging keys.
//!
//! The Ledger Cosmos app answers a sign request with a DER signature:
//!
//! ```text
//! 30 len 02 r_len r 02 s_len s
//! ```
//!
//! Cosmos SDK chains want the 64-byte `r ‖ s` form with a low S, which is
//! what [`der_to_compact`] returns.
//!
//! ```
//! use wallet_background_core::crypto::parse_der_signature;
//!
//! let (r, s) = parse_der_signature(&[0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x02]).unwrap();
//! assert_eq!((r[31], s[31]), (1, 2));
//! ```

use k256::PublicKey;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{Signature as K256Signature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;

use crate::error::{Error, Result};

fn der_error(what: &str) -> Error {
    Error::InvalidSignature(format!("DER signature: {what}"))
}

/// Reads one `02 len bytes` INTEGER and returns it with the remaining input.
fn der_integer<'a>(input: &'a [u8], name: &str) -> Result<(&'a [u8], &'a [u8])> {
    let [0x02, len, rest @ ..] = input else {
        return Err(der_error(&format!("missing {name} integer")));
    };
    let len = usize::from(*len);
    if rest.len() < len {
        return Err(der_error(&format!("{name} overruns the buffer")));
    }
    Ok(rest.split_at(len))
}

/// Right-aligns a DER integer, dropping its sign-padding zero.
fn left_pad(integer: &[u8], name: &str) -> Result<[u8; 32]> {
    let integer = match integer {
        [0x00, tail @ ..] => tail,
        other => other,
    };
    let offset = 32usize
        .checked_sub(integer.len())
        .ok_or_else(|| der_error(&format!("{name} wider than 32 bytes")))?;

    let mut out = [0u8; 32];
    out[offset..].copy_from_slice(integer);
    Ok(out)
}

/// Splits a DER ECDSA signature into `(r, s)`.
///
/// Parsing is lenient about the outer length byte; only the two INTEGERs
/// must be well formed.
///
/// # Errors
///
/// [`Error::InvalidSignature`] when the encoding is malformed.
pub fn parse_der_signature(der: &[u8]) -> Result<([u8; 32], [u8; 32])> {
    let [0x30, _, body @ ..] = der else {
        return Err(der_error("not a SEQUENCE"));
    };
    let (r, body) = der_integer(body, "r")?;
    let (s, _) = der_integer(body, "s")?;
    Ok((left_pad(r, "r")?, left_pad(s, "s")?))
}

/// DER from the device to compact `r ‖ s` with S in the lower half of the
/// group order.
///
/// # Errors
///
/// [`Error::InvalidSignature`] when the DER is malformed or a scalar is out
/// of range.
pub fn der_to_compact(der: &[u8]) -> Result<[u8; 64]> {
    let (r, s) = parse_der_signature(der)?;
    let signature = K256Signature::from_scalars(r, s)
        .map_err(|_| Error::InvalidSignature("scalar out of range".to_string()))?;
    let signature = signature.normalize_s().unwrap_or(signature);

    let mut compact = [0u8; 64];
    compact.copy_from_slice(&signature.to_bytes());
    Ok(compact)
}

/// # Errors
///
/// [`Error::InvalidPublicKey`] when the bytes are not a SEC1 point on the curve.
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey> {
    PublicKey::from_sec1_bytes(bytes).map_err(|_| {
        Error::InvalidPublicKey(format!("{} bytes are not a secp256k1 point", bytes.len()))
    })
}

/// SEC1 compressed form of any valid encoding.
///
/// # Errors
///
/// [`Error::InvalidPublicKey`] when the bytes are not a SEC1 point on the curve.
pub fn compress_public_key(bytes: &[u8]) -> Result<[u8; 33]> {
    let mut out = [0u8; 33];
    out.copy_from_slice(parse_public_key(bytes)?.to_encoded_point(true).as_bytes());
    Ok(out)
}

/// Checks a compact signature against a 32-byte digest. Any malformed input
/// is simply a failed verification.
#[must_use]
pub fn verify_prehash(public_key: &[u8], prehash: &[u8; 32], compact: &[u8; 64]) -> bool {
    let (Ok(key), Ok(signature)) = (
        VerifyingKey::from_sec1_bytes(public_key),
        K256Signature::from_slice(compact),
    ) else {
        return false;
    };
    key.verify_prehash(prehash, &signature).is_ok()
}
