//! Collaborators the messaging service reaches through traits.

use async_trait::async_trait;
use serde_json::json;

use crate::env::RequestEnv;
use crate::error::Result;

/// Signs with the wallet's keyring. The key itself never leaves the keyring.
#[async_trait]
pub trait KeyringSigner: Send + Sync {
    /// Signs `sign_doc` with the key selected for `chain_id`.
    ///
    /// # Errors
    ///
    /// Whatever the keyring reports. The messaging service passes it through
    /// untouched.
    async fn sign(&self, env: &RequestEnv, chain_id: &str, sign_doc: &[u8]) -> Result<Vec<u8>>;
}

/// Fetches counterparty messaging keys from a remote registry.
#[async_trait]
pub trait PublicKeyResolver: Send + Sync {
    /// Returns the base64 compressed public key registered for `address`.
    ///
    /// # Errors
    ///
    /// Returns the lookup failure.
    async fn fetch_public_key(&self, chain_id: &str, address: &str) -> Result<String>;
}

/// Builds the zero-value sign doc whose signature seeds the messaging key of
/// `chain_id`.
///
/// Keys are sorted, so the bytes are canonical and the derived key is stable.
///
/// # Errors
///
/// Returns [`crate::Error::JsonError`] if serialization fails.
pub fn key_derivation_sign_doc(chain_id: &str, memo: &str) -> Result<Vec<u8>> {
    let doc = json!({
        "account_number": "0",
        "chain_id": chain_id,
        "fee": {
            "amount": [],
            "gas": "0",
        },
        "memo": memo,
        "msgs": [],
        "sequence": "0",
    });
    Ok(serde_json::to_vec(&doc)?)
}
