//! Derived-key messaging.
//!
//! Each chain gets a messaging key derived from the wallet's keyring without
//! exporting the keyring secret. The keyring signs a fixed zero-value sign doc
//! (see [`keyring::key_derivation_sign_doc`]) and the SHA-256 of that signature
//! becomes the secp256k1 private key. The same keyring always yields the same
//! key, so ciphertexts survive restarts.
//!
//! Keys are derived once per chain and cached for the lifetime of the
//! service. There is no eviction.
//!
//! Payloads cross the API as base64, matching what the UI sends.

pub mod ecies;
pub mod keyring;

use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{Signature as K256Signature, SigningKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

pub use self::keyring::{KeyringSigner, PublicKeyResolver};
use crate::config::MessagingConfig;
use crate::crypto;
use crate::env::RequestEnv;
use crate::error::{Error, Result};

/// Memo of the sign doc that seeds messaging keys.
pub const KEY_DERIVATION_MEMO: &str = "Signing this message derives your encrypted messaging key. \
     It is not a transaction and costs no fees.";

/// Sign, encrypt and decrypt with per-chain derived keys.
pub struct MessagingService {
    keyring: Arc<dyn KeyringSigner>,
    resolver: Option<Arc<dyn PublicKeyResolver>>,
    memo: String,
    private_keys: Mutex<HashMap<String, Zeroizing<[u8; 32]>>>,
    public_keys: RwLock<HashMap<String, PublicKey>>,
}

impl fmt::Debug for MessagingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingService")
            .field("has_resolver", &self.resolver.is_some())
            .field("known_public_keys", &self.public_keys.read().len())
            .finish_non_exhaustive()
    }
}

impl MessagingService {
    /// Creates a service without a remote key resolver.
    pub fn new(keyring: Arc<dyn KeyringSigner>, config: &MessagingConfig) -> Self {
        Self {
            keyring,
            resolver: None,
            memo: config.memo.clone(),
            private_keys: Mutex::default(),
            public_keys: RwLock::default(),
        }
    }

    /// Sets the resolver consulted when a counterparty key is not cached.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn PublicKeyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Returns the base64 compressed public key of the chain's messaging key.
    ///
    /// # Errors
    ///
    /// Keyring failures, or [`Error::InvalidPrivateKey`].
    pub async fn get_public_key(&self, env: &RequestEnv, chain_id: &str) -> Result<String> {
        let secret = self.secret_key(env, chain_id).await?;
        let point = secret.public_key().to_encoded_point(true);
        Ok(BASE64.encode(point.as_bytes()))
    }

    /// Returns the chain's 32-byte messaging key, deriving it on first use.
    ///
    /// The cache lock is held across the keyring call, so concurrent callers
    /// for one chain ask the keyring once.
    pub(crate) async fn get_private_key(
        &self,
        env: &RequestEnv,
        chain_id: &str,
    ) -> Result<Zeroizing<[u8; 32]>> {
        let mut keys = self.private_keys.lock().await;
        if let Some(key) = keys.get(chain_id) {
            return Ok(key.clone());
        }

        let sign_doc = keyring::key_derivation_sign_doc(chain_id, &self.memo)?;
        let signature = Zeroizing::new(self.keyring.sign(env, chain_id, &sign_doc).await?);
        let key = Zeroizing::new(<[u8; 32]>::from(Sha256::digest(signature.as_slice())));

        SecretKey::from_slice(&key[..]).map_err(|_| {
            Error::InvalidPrivateKey("derived key is not a valid secp256k1 scalar".to_string())
        })?;

        keys.insert(chain_id.to_string(), key.clone());
        info!(chain_id, "derived messaging key");
        Ok(key)
    }

    /// Decrypts a base64 ciphertext addressed to the chain's messaging key and
    /// returns the plaintext as base64.
    ///
    /// # Errors
    ///
    /// [`Error::Base64DecodeFailed`], [`Error::Encryption`] or keyring failures.
    pub async fn decrypt_message(
        &self,
        env: &RequestEnv,
        chain_id: &str,
        ciphertext: &str,
    ) -> Result<String> {
        let data = BASE64.decode(ciphertext)?;
        let secret = self.secret_key(env, chain_id).await?;
        let plaintext = Zeroizing::new(ecies::decrypt(&secret, &data)?);
        debug!(chain_id, len = plaintext.len(), "decrypted message");
        Ok(BASE64.encode(plaintext.as_slice()))
    }

    /// Encrypts a base64 message to the messaging key of `target_address` and
    /// returns the ciphertext as base64.
    ///
    /// # Errors
    ///
    /// [`Error::PublicKeyLookupNotImplemented`] if the target key is unknown
    /// and no resolver is set, [`Error::Base64DecodeFailed`] for bad input.
    pub async fn encrypt_message(
        &self,
        env: &RequestEnv,
        chain_id: &str,
        target_address: &str,
        message: &str,
    ) -> Result<String> {
        let plaintext = Zeroizing::new(BASE64.decode(message)?);
        let recipient = self.lookup_public_key(chain_id, target_address).await?;

        let sealed = ecies::encrypt(&mut OsRng, &recipient, &plaintext)?;
        debug!(chain_id, origin = %env.origin, target_address, "encrypted message");
        Ok(BASE64.encode(sealed))
    }

    /// Signs the SHA-256 of a base64 payload and returns the compact 64-byte
    /// signature as base64.
    ///
    /// # Errors
    ///
    /// [`Error::Base64DecodeFailed`] for bad input, or keyring failures.
    pub async fn sign(&self, env: &RequestEnv, chain_id: &str, payload: &str) -> Result<String> {
        let payload = BASE64.decode(payload)?;
        let key = self.get_private_key(env, chain_id).await?;

        let signing_key = SigningKey::from_slice(&key[..])
            .map_err(|e| Error::InvalidPrivateKey(e.to_string()))?;
        let digest: [u8; 32] = Sha256::digest(&payload).into();
        let signature: K256Signature = signing_key
            .sign_prehash(&digest)
            .map_err(|e| Error::InvalidSignature(e.to_string()))?;
        let signature = signature.normalize_s().unwrap_or(signature);

        debug!(chain_id, "signed messaging payload");
        Ok(BASE64.encode(signature.to_bytes()))
    }

    /// Returns the messaging key of `address`, asking the resolver on a miss.
    ///
    /// # Errors
    ///
    /// [`Error::PublicKeyLookupNotImplemented`] without a resolver, or the
    /// resolver's failure.
    pub async fn lookup_public_key(&self, chain_id: &str, address: &str) -> Result<PublicKey> {
        let cached = self.public_keys.read().get(address).copied();
        if let Some(key) = cached {
            return Ok(key);
        }

        let Some(resolver) = &self.resolver else {
            warn!(chain_id, address, "no messaging key known for address");
            return Err(Error::PublicKeyLookupNotImplemented(address.to_string()));
        };

        let encoded = resolver.fetch_public_key(chain_id, address).await?;
        let key = decode_public_key(&encoded)?;
        self.public_keys.write().insert(address.to_string(), key);
        debug!(chain_id, address, "cached fetched messaging key");
        Ok(key)
    }

    /// Seeds the counterparty cache with a base64 public key.
    ///
    /// # Errors
    ///
    /// [`Error::Base64DecodeFailed`] or [`Error::InvalidPublicKey`].
    pub fn register_public_key(&self, address: &str, public_key: &str) -> Result<()> {
        let key = decode_public_key(public_key)?;
        self.public_keys.write().insert(address.to_string(), key);
        debug!(address, "registered messaging key");
        Ok(())
    }

    async fn secret_key(&self, env: &RequestEnv, chain_id: &str) -> Result<SecretKey> {
        let key = self.get_private_key(env, chain_id).await?;
        SecretKey::from_slice(&key[..]).map_err(|e| Error::InvalidPrivateKey(e.to_string()))
    }
}

fn decode_public_key(encoded: &str) -> Result<PublicKey> {
    crypto::parse_public_key(&BASE64.decode(encoded)?)
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use k256::ecdsa::VerifyingKey;
    use k256::ecdsa::signature::hazmat::PrehashVerifier;

    use super::*;

    /// Signs by hashing the sign doc, which is deterministic like a real keyring.
    #[derive(Default)]
    struct CountingKeyring {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl KeyringSigner for CountingKeyring {
        async fn sign(&self, _env: &RequestEnv, _chain_id: &str, sign_doc: &[u8]) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Sha256::digest(sign_doc).to_vec())
        }
    }

    struct LockedKeyring;

    #[async_trait]
    impl KeyringSigner for LockedKeyring {
        async fn sign(&self, _env: &RequestEnv, _chain_id: &str, _sign_doc: &[u8]) -> Result<Vec<u8>> {
            Err(Error::Keyring("keyring is locked".to_string()))
        }
    }

    struct StaticResolver {
        key: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PublicKeyResolver for StaticResolver {
        async fn fetch_public_key(&self, _chain_id: &str, _address: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.key.clone())
        }
    }

    fn service() -> (MessagingService, Arc<CountingKeyring>) {
        let keyring = Arc::new(CountingKeyring::default());
        let service = MessagingService::new(keyring.clone(), &MessagingConfig::default());
        (service, keyring)
    }

    #[tokio::test]
    async fn private_key_is_derived_once_per_chain() {
        let (service, keyring) = service();
        let env = RequestEnv::internal();

        let a = service.get_private_key(&env, "cosmoshub-4").await.unwrap();
        let b = service.get_private_key(&env, "cosmoshub-4").await.unwrap();
        assert_eq!(*a, *b);
        assert_eq!(keyring.calls.load(Ordering::SeqCst), 1);

        let c = service.get_private_key(&env, "osmosis-1").await.unwrap();
        assert_ne!(*a, *c);
        assert_eq!(keyring.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_derivation_asks_the_keyring_once() {
        let (service, keyring) = service();
        let env = RequestEnv::internal();

        let (a, b) = tokio::join!(
            service.get_private_key(&env, "cosmoshub-4"),
            service.get_private_key(&env, "cosmoshub-4"),
        );

        assert_eq!(*a.unwrap(), *b.unwrap());
        assert_eq!(keyring.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn keyring_errors_pass_through() {
        let service = MessagingService::new(Arc::new(LockedKeyring), &MessagingConfig::default());

        let err = service
            .get_public_key(&RequestEnv::internal(), "cosmoshub-4")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Keyring(ref m) if m == "keyring is locked"));
    }

    #[tokio::test]
    async fn public_key_is_compressed_base64() {
        let (service, _) = service();
        let encoded = service
            .get_public_key(&RequestEnv::internal(), "cosmoshub-4")
            .await
            .unwrap();

        let bytes = BASE64.decode(encoded).unwrap();
        assert_eq!(bytes.len(), 33);
        assert!(bytes[0] == 0x02 || bytes[0] == 0x03);
    }

    #[tokio::test]
    async fn encrypt_to_self_round_trips() {
        let (service, _) = service();
        let env = RequestEnv::internal();
        let own_key = service.get_public_key(&env, "cosmoshub-4").await.unwrap();
        service.register_public_key("cosmos1self", &own_key).unwrap();

        let message = BASE64.encode("gm");
        let sealed = service
            .encrypt_message(&env, "cosmoshub-4", "cosmos1self", &message)
            .await
            .unwrap();
        let opened = service
            .decrypt_message(&env, "cosmoshub-4", &sealed)
            .await
            .unwrap();

        assert_eq!(opened, message);
    }

    #[tokio::test]
    async fn unknown_target_without_resolver() {
        let (service, _) = service();

        let result = service
            .encrypt_message(&RequestEnv::internal(), "cosmoshub-4", "cosmos1bob", "Z20=")
            .await;

        assert!(matches!(
            result,
            Err(Error::PublicKeyLookupNotImplemented(ref a)) if a == "cosmos1bob"
        ));
    }

    #[tokio::test]
    async fn resolver_result_is_cached() {
        let bob = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let resolver = Arc::new(StaticResolver {
            key: BASE64.encode(bob.public_key().to_encoded_point(true).as_bytes()),
            calls: AtomicUsize::new(0),
        });
        let (service, _) = service();
        let service = service.with_resolver(resolver.clone());

        let first = service.lookup_public_key("cosmoshub-4", "cosmos1bob").await.unwrap();
        let second = service.lookup_public_key("cosmoshub-4", "cosmos1bob").await.unwrap();

        assert_eq!(first, bob.public_key());
        assert_eq!(first, second);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn signature_verifies_against_public_key() {
        let (service, _) = service();
        let env = RequestEnv::internal();

        let payload = b"hello";
        let signature = service
            .sign(&env, "cosmoshub-4", &BASE64.encode(payload))
            .await
            .unwrap();
        let public_key = service.get_public_key(&env, "cosmoshub-4").await.unwrap();

        let signature = K256Signature::from_slice(&BASE64.decode(signature).unwrap()).unwrap();
        let verifying_key = VerifyingKey::from_sec1_bytes(&BASE64.decode(public_key).unwrap()).unwrap();
        let digest: [u8; 32] = Sha256::digest(payload).into();

        assert!(verifying_key.verify_prehash(&digest, &signature).is_ok());
        assert!(signature.normalize_s().is_none());
    }

    #[tokio::test]
    async fn bad_base64_is_reported() {
        let (service, _) = service();
        let result = service
            .sign(&RequestEnv::internal(), "cosmoshub-4", "not base64!")
            .await;
        assert!(matches!(result, Err(Error::Base64DecodeFailed(_))));
    }

    #[test]
    fn register_rejects_garbage() {
        let (service, _) = service();
        assert!(matches!(
            service.register_public_key("cosmos1x", &BASE64.encode([1u8; 33])),
            Err(Error::InvalidPublicKey(_))
        ));
    }
}
