//! The Ledger Ethereum app protocol.
//!
//! Every signing instruction streams its payload in 255-byte chunks, the path
//! in front, and the device answers the final chunk with
//! `v (1) || r (32) || s (32)`.

use core::fmt;

use tracing::warn;

use super::apdu::Apdu;
use super::path::DerivationPath;
use super::transport::{Transport, send};
use crate::address::Address;
use crate::error::{Error, Result};
use crate::signature::Signature;

/// Class byte of the Ethereum app.
const CLA: u8 = 0xE0;

/// Maximum data bytes per APDU.
const CHUNK_SIZE: usize = Apdu::MAX_DATA;

mod ins {
    pub(super) const GET_ADDRESS: u8 = 0x02;
    pub(super) const SIGN_TX: u8 = 0x04;
    pub(super) const SIGN_PERSONAL_MESSAGE: u8 = 0x08;
    pub(super) const SIGN_EIP712_HASHED: u8 = 0x0C;
}

/// P1 values of chunked instructions.
mod p1 {
    pub(super) const FIRST: u8 = 0x00;
    pub(super) const MORE: u8 = 0x80;
}

/// A key exported by the Ethereum app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthereumPublicKey {
    /// The 65-byte uncompressed secp256k1 key.
    pub uncompressed: Vec<u8>,
    /// The address the device derived for the key.
    pub address: Address,
}

/// An open session with the Ethereum app.
pub struct EthereumApp {
    transport: Box<dyn Transport>,
}

impl fmt::Debug for EthereumApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EthereumApp").finish_non_exhaustive()
    }
}

impl EthereumApp {
    /// Wraps an open transport.
    #[must_use]
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Exports the public key and address for `path`.
    ///
    /// The reported address is checked against the Keccak-derived address of
    /// the returned key.
    ///
    /// # Errors
    ///
    /// Returns the classified device or transport error, or
    /// [`Error::MalformedResponse`] if the response does not parse or the two
    /// addresses disagree.
    pub async fn get_address(&mut self, path: &DerivationPath) -> Result<EthereumPublicKey> {
        let apdu = Apdu::new(CLA, ins::GET_ADDRESS, 0, 0, path.to_ethereum_bytes());
        let data = send(self.transport.as_mut(), &apdu).await?;

        let malformed = || Error::MalformedResponse("truncated address response".to_string());

        let pk_len = *data.first().ok_or_else(malformed)? as usize;
        let uncompressed = data.get(1..1 + pk_len).ok_or_else(malformed)?.to_vec();
        let addr_len = *data.get(1 + pk_len).ok_or_else(malformed)? as usize;
        let addr_ascii = data
            .get(2 + pk_len..2 + pk_len + addr_len)
            .ok_or_else(malformed)?;

        let reported = Address::from_hex(&String::from_utf8_lossy(addr_ascii))?;
        let derived = Address::from_public_key_bytes(&uncompressed)?;
        if reported != derived {
            warn!(%reported, %derived, "device address does not match its public key");
            return Err(Error::MalformedResponse(format!(
                "device reported {reported} for a key that derives {derived}"
            )));
        }

        Ok(EthereumPublicKey {
            uncompressed,
            address: derived,
        })
    }

    /// Signs a personal message (`personal_sign`).
    ///
    /// # Errors
    ///
    /// Returns the classified device or transport error.
    pub async fn sign_personal_message(
        &mut self,
        path: &DerivationPath,
        message: &[u8],
    ) -> Result<Signature> {
        let mut payload = path.to_ethereum_bytes();
        payload.extend_from_slice(&(message.len() as u32).to_be_bytes());
        payload.extend_from_slice(message);

        self.send_chunked(ins::SIGN_PERSONAL_MESSAGE, &payload).await
    }

    /// Signs an unsigned RLP-encoded transaction.
    ///
    /// # Errors
    ///
    /// Returns the classified device or transport error.
    pub async fn sign_transaction(
        &mut self,
        path: &DerivationPath,
        unsigned_rlp: &[u8],
    ) -> Result<Signature> {
        let mut payload = path.to_ethereum_bytes();
        payload.extend_from_slice(unsigned_rlp);

        self.send_chunked(ins::SIGN_TX, &payload).await
    }

    /// Signs EIP-712 typed data given as its domain separator and message hash.
    ///
    /// # Errors
    ///
    /// Returns the classified device or transport error.
    pub async fn sign_eip712_hashed(
        &mut self,
        path: &DerivationPath,
        domain_separator: &[u8; 32],
        message_hash: &[u8; 32],
    ) -> Result<Signature> {
        let mut payload = path.to_ethereum_bytes();
        payload.extend_from_slice(domain_separator);
        payload.extend_from_slice(message_hash);

        let apdu = Apdu::new(CLA, ins::SIGN_EIP712_HASHED, 0, 0, payload);
        let data = send(self.transport.as_mut(), &apdu).await?;
        Signature::from_vrs(&data)
    }

    async fn send_chunked(&mut self, ins: u8, payload: &[u8]) -> Result<Signature> {
        let mut response = Vec::new();
        for (i, chunk) in payload.chunks(CHUNK_SIZE).enumerate() {
            let p1 = if i == 0 { p1::FIRST } else { p1::MORE };
            let apdu = Apdu::new(CLA, ins, p1, 0, chunk.to_vec());
            response = send(self.transport.as_mut(), &apdu).await?;
        }
        Signature::from_vrs(&response)
    }

    /// Releases the transport.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the link could not be released.
    pub async fn close(&mut self) -> Result<()> {
        Ok(self.transport.close().await?)
    }
}

#[cfg(test)]
mod tests {
    use k256::SecretKey;
    use k256::elliptic_curve::sec1::ToEncodedPoint;

    use super::super::mock::{MockTransport, ok};
    use super::super::path::Bip44Fields;
    use super::*;

    fn address_response(address_hex: &str) -> Vec<u8> {
        let mut scalar = [0u8; 32];
        scalar[31] = 1;
        let point = SecretKey::from_slice(&scalar)
            .unwrap()
            .public_key()
            .to_encoded_point(false);

        let mut data = vec![65];
        data.extend_from_slice(point.as_bytes());
        data.push(40);
        data.extend_from_slice(address_hex.as_bytes());
        ok(&data)
    }

    fn vrs(v: u8) -> Vec<u8> {
        let mut data = vec![v];
        data.extend_from_slice(&[0x11; 32]);
        data.extend_from_slice(&[0x22; 32]);
        ok(&data)
    }

    #[tokio::test]
    async fn get_address_cross_checks_the_key() {
        let (transport, handle) = MockTransport::new(vec![address_response(
            "7E5F4552091A69125d5DfCb7b8C2659029395Bdf",
        )]);
        let mut app = EthereumApp::new(Box::new(transport));

        let key = app
            .get_address(&DerivationPath::ethereum(Bip44Fields::default()))
            .await
            .unwrap();

        assert_eq!(key.uncompressed.len(), 65);
        assert_eq!(key.address.to_hex(), "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf");
        assert_eq!(handle.sent()[0].data()[0], 5);
    }

    #[tokio::test]
    async fn get_address_rejects_mismatched_address() {
        let (transport, _) = MockTransport::new(vec![address_response(
            "0000000000000000000000000000000000000001",
        )]);
        let mut app = EthereumApp::new(Box::new(transport));

        let result = app
            .get_address(&DerivationPath::ethereum(Bip44Fields::default()))
            .await;

        assert!(matches!(result, Err(Error::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn personal_message_is_length_prefixed_and_chunked() {
        let (transport, handle) = MockTransport::new(vec![ok(&[]), vrs(28)]);
        let mut app = EthereumApp::new(Box::new(transport));

        let sig = app
            .sign_personal_message(&DerivationPath::ethereum(Bip44Fields::default()), &[0xAB; 300])
            .await
            .unwrap();

        assert_eq!(sig.v(), 28);
        assert_eq!(sig.r(), &[0x11; 32]);

        let sent = handle.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].p1(), p1::FIRST);
        assert_eq!(sent[1].p1(), p1::MORE);
        assert_eq!(&sent[0].data()[21..25], &300u32.to_be_bytes());
        assert_eq!(sent[0].data().len() + sent[1].data().len(), 21 + 4 + 300);
    }

    #[tokio::test]
    async fn eip712_hashes_follow_the_path() {
        let (transport, handle) = MockTransport::new(vec![vrs(27)]);
        let mut app = EthereumApp::new(Box::new(transport));

        app.sign_eip712_hashed(
            &DerivationPath::ethereum(Bip44Fields::default()),
            &[0x01; 32],
            &[0x02; 32],
        )
        .await
        .unwrap();

        let sent = handle.sent();
        assert_eq!(sent[0].ins(), ins::SIGN_EIP712_HASHED);
        assert_eq!(&sent[0].data()[21..53], &[0x01; 32]);
        assert_eq!(&sent[0].data()[53..85], &[0x02; 32]);
    }

    #[tokio::test]
    async fn user_denial_is_sign_rejected() {
        let (transport, _) = MockTransport::new(vec![vec![0x69, 0x85]]);
        let mut app = EthereumApp::new(Box::new(transport));

        let result = app
            .sign_transaction(&DerivationPath::ethereum(Bip44Fields::default()), &[0xC0])
            .await;

        assert!(matches!(result, Err(Error::SignRejected)));
    }

    #[tokio::test]
    async fn short_signature_is_invalid() {
        let (transport, _) = MockTransport::new(vec![ok(&[27, 0x11, 0x22])]);
        let mut app = EthereumApp::new(Box::new(transport));

        let result = app
            .sign_transaction(&DerivationPath::ethereum(Bip44Fields::default()), &[0xC0])
            .await;

        assert!(matches!(result, Err(Error::InvalidSignature(_))));
    }
}
