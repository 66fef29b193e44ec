//! ECIES over secp256k1.
//!
//! An ephemeral key agrees on a shared secret with the recipient key (ECDH).
//! HKDF-SHA256, salted with the ephemeral public key, expands the secret into
//! an AES-256-GCM key. The output layout is:
//!
//! ```text
//! | ephemeral public key | nonce | ciphertext + tag |
//! | 65B (uncompressed)   | 12B   | var + 16B        |
//! ```

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use k256::ecdh::diffie_hellman;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

const HKDF_INFO: &[u8] = b"wallet-background-core/messaging/aes-256-gcm";

const PUBLIC_KEY_LEN: usize = 65;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Bytes added to every plaintext.
pub const OVERHEAD: usize = PUBLIC_KEY_LEN + NONCE_LEN + TAG_LEN;

/// Encrypts `plaintext` to `recipient`.
///
/// # Errors
///
/// Returns [`Error::Encryption`] if the cipher fails.
pub fn encrypt<R: RngCore + CryptoRng>(
    rng: &mut R,
    recipient: &PublicKey,
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let ephemeral = SecretKey::random(&mut *rng);
    let ephemeral_public = ephemeral.public_key().to_encoded_point(false);
    let cipher = cipher(&ephemeral, recipient, ephemeral_public.as_bytes())?;

    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| Error::Encryption("AES-GCM encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(OVERHEAD + plaintext.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts `data` produced by [`encrypt`] for the key `secret`.
///
/// # Errors
///
/// - [`Error::Encryption`] if the data is truncated or fails authentication
/// - [`Error::InvalidPublicKey`] if the ephemeral key is not a curve point
pub fn decrypt(secret: &SecretKey, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < OVERHEAD {
        return Err(Error::Encryption(format!(
            "ciphertext has {} bytes, expected at least {OVERHEAD}",
            data.len()
        )));
    }

    let (ephemeral_bytes, rest) = data.split_at(PUBLIC_KEY_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let ephemeral = PublicKey::from_sec1_bytes(ephemeral_bytes)
        .map_err(|_| Error::InvalidPublicKey("ephemeral key is not a secp256k1 point".to_string()))?;
    let cipher = cipher(secret, &ephemeral, ephemeral_bytes)?;

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Encryption("ciphertext failed authentication".to_string()))
}

fn cipher(secret: &SecretKey, public: &PublicKey, salt: &[u8]) -> Result<Aes256Gcm> {
    let shared = diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    let hkdf = Hkdf::<Sha256>::new(Some(salt), shared.raw_secret_bytes().as_slice());

    let mut key = Zeroizing::new([0u8; 32]);
    hkdf.expand(HKDF_INFO, &mut key[..])
        .map_err(|_| Error::Encryption("key expansion failed".to_string()))?;

    Aes256Gcm::new_from_slice(&key[..])
        .map_err(|_| Error::Encryption("invalid AES key length".to_string()))
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn key(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).unwrap()
    }

    #[test]
    fn round_trip() {
        let mut rng = StdRng::seed_from_u64(7);
        let recipient = key(9);

        let sealed = encrypt(&mut rng, &recipient.public_key(), b"hello bob").unwrap();
        assert_eq!(sealed.len(), OVERHEAD + 9);
        assert_eq!(sealed[0], 0x04);

        assert_eq!(decrypt(&recipient, &sealed).unwrap(), b"hello bob");
    }

    #[test]
    fn fresh_ephemeral_key_per_message() {
        let mut rng = StdRng::seed_from_u64(7);
        let recipient = key(9).public_key();

        let a = encrypt(&mut rng, &recipient, b"same").unwrap();
        let b = encrypt(&mut rng, &recipient, b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let mut rng = StdRng::seed_from_u64(7);
        let sealed = encrypt(&mut rng, &key(9).public_key(), b"secret").unwrap();

        assert!(matches!(decrypt(&key(8), &sealed), Err(Error::Encryption(_))));
    }

    #[test]
    fn tampering_fails() {
        let mut rng = StdRng::seed_from_u64(7);
        let recipient = key(9);
        let mut sealed = encrypt(&mut rng, &recipient.public_key(), b"secret").unwrap();

        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(decrypt(&recipient, &sealed), Err(Error::Encryption(_))));
    }

    #[test]
    fn truncated_input_fails() {
        assert!(matches!(
            decrypt(&key(9), &[0x04; OVERHEAD - 1]),
            Err(Error::Encryption(_))
        ));
    }

    #[test]
    fn empty_plaintext() {
        let mut rng = StdRng::seed_from_u64(1);
        let recipient = key(3);
        let sealed = encrypt(&mut rng, &recipient.public_key(), &[]).unwrap();
        assert_eq!(decrypt(&recipient, &sealed).unwrap(), Vec::<u8>::new());
    }
}
