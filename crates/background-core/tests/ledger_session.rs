//! Ledger sessions driven over a spy transport.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{Signature as K256Signature, SigningKey};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use wallet_background_core::config::LedgerConfig;
use wallet_background_core::ledger::path::{Bip44Fields, DerivationPath};
use wallet_background_core::ledger::{
    Apdu, ApduResponse, EthSignType, Ledger, LedgerApp, Transport, TransportError,
    TransportFactory,
};
use wallet_background_core::{Address, Error, TypedData, crypto};

#[derive(Default)]
struct SpyLog {
    sent: Vec<Apdu>,
    closes: usize,
}

struct SpyTransport {
    replies: VecDeque<Vec<u8>>,
    log: Arc<Mutex<SpyLog>>,
}

#[async_trait]
impl Transport for SpyTransport {
    async fn exchange(&mut self, apdu: &Apdu) -> Result<ApduResponse, TransportError> {
        self.log.lock().sent.push(apdu.clone());
        let reply = self.replies.pop_front().ok_or(TransportError::Disconnected)?;
        ApduResponse::from_bytes(&reply).map_err(|e| TransportError::Other(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.log.lock().closes += 1;
        Ok(())
    }
}

struct SpyFactory {
    transport: Mutex<Option<SpyTransport>>,
}

#[async_trait]
impl TransportFactory for SpyFactory {
    async fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        let transport = self.transport.lock().take().ok_or(TransportError::DeviceNotFound)?;
        Ok(Box::new(transport))
    }
}

fn spy(replies: Vec<Vec<u8>>) -> (SpyFactory, Arc<Mutex<SpyLog>>) {
    let log = Arc::new(Mutex::new(SpyLog::default()));
    let transport = SpyTransport {
        replies: replies.into(),
        log: Arc::clone(&log),
    };
    let factory = SpyFactory {
        transport: Mutex::new(Some(transport)),
    };
    (factory, log)
}

fn ok(data: &[u8]) -> Vec<u8> {
    let mut reply = data.to_vec();
    reply.extend_from_slice(&[0x90, 0x00]);
    reply
}

fn version(locked: bool) -> Vec<u8> {
    ok(&[0, 2, 35, 1, u8::from(locked)])
}

fn app_info(name: &str) -> Vec<u8> {
    let mut data = vec![0x01, name.len() as u8];
    data.extend_from_slice(name.as_bytes());
    data.push(5);
    data.extend_from_slice(b"2.35.");
    ok(&data)
}

fn eth_address(key: &SigningKey) -> Vec<u8> {
    let point = key.verifying_key().to_encoded_point(false);
    let address = Address::from_public_key_bytes(point.as_bytes()).unwrap();

    let mut data = vec![65];
    data.extend_from_slice(point.as_bytes());
    data.push(40);
    data.extend_from_slice(address.to_checksum_hex()[2..].as_bytes());
    ok(&data)
}

fn vrs(v: u8) -> Vec<u8> {
    let mut data = vec![v];
    data.extend_from_slice(&[0xAA; 32]);
    data.extend_from_slice(&[0x55; 32]);
    ok(&data)
}

#[tokio::test]
async fn locked_cosmos_device_is_reported_and_released() {
    let (factory, log) = spy(vec![version(true)]);

    let result = Ledger::init(&factory, LedgerApp::Cosmos, &LedgerConfig::default()).await;

    let err = result.unwrap_err();
    assert!(matches!(err, Error::DeviceLocked));
    assert_eq!(err.to_string(), "Unlock your Ledger device and try again");
    assert_eq!(log.lock().closes, 1);
    assert_eq!(log.lock().sent.len(), 1);
}

#[tokio::test]
async fn cosmos_like_app_name_is_configurable() {
    let config = LedgerConfig {
        cosmos_app_name: "Terra".to_string(),
        bech32_prefix: "terra".to_string(),
    };
    let (factory, log) = spy(vec![version(false), app_info("Cosmos")]);

    let err = Ledger::init(&factory, LedgerApp::Cosmos, &config).await.unwrap_err();

    assert!(matches!(err, Error::UnsupportedApp { ref expected, .. } if expected == "Terra"));
    assert!(err.to_string().contains("Open the Terra app on Ledger"));
    assert_eq!(log.lock().closes, 1);
}

#[tokio::test]
async fn cosmos_key_export_and_signing() {
    let key = SigningKey::from_slice(&[0x42; 32]).unwrap();
    let compressed = key.verifying_key().to_encoded_point(true);
    let sign_doc = serde_json::to_vec(&serde_json::json!({
        "account_number": "7",
        "chain_id": "cosmoshub-4",
        "fee": {"amount": [], "gas": "200000"},
        "memo": "x".repeat(300),
        "msgs": [],
        "sequence": "3",
    }))
    .unwrap();
    let digest: [u8; 32] = Sha256::digest(&sign_doc).into();
    let der: K256Signature = key.sign_prehash(&digest).unwrap();

    let mut address_reply = compressed.as_bytes().to_vec();
    address_reply.extend_from_slice(b"cosmos1qqqq");

    let chunk_count = 1 + sign_doc.len().div_ceil(250);
    let mut replies = vec![version(false), app_info("Cosmos"), ok(&address_reply)];
    replies.extend((1..chunk_count).map(|_| ok(&[])));
    replies.push(ok(der.to_der().as_bytes()));

    let (factory, log) = spy(replies);
    let mut ledger = Ledger::init(&factory, LedgerApp::Cosmos, &LedgerConfig::default())
        .await
        .unwrap();
    let path = DerivationPath::cosmos(Bip44Fields::default());
    assert_eq!(path.to_string(), "m/44'/118'/0'/0/0");

    let public_key = ledger.get_public_key(LedgerApp::Cosmos, &path).await.unwrap();
    assert_eq!(public_key.as_slice(), compressed.as_bytes());

    let signature = ledger.sign(&path, &sign_doc).await.unwrap();
    assert!(crypto::verify_prehash(&public_key, &digest, &signature));

    ledger.close().await.unwrap();
    ledger.close().await.unwrap();
    let log = log.lock();
    assert_eq!(log.closes, 1);
    assert_eq!(log.sent.len(), 3 + chunk_count);
}

#[tokio::test]
async fn ethereum_personal_message_is_65_bytes() {
    let key = SigningKey::from_slice(&[0x17; 32]).unwrap();
    let (factory, log) = spy(vec![eth_address(&key), vrs(28)]);

    let mut ledger = Ledger::init(&factory, LedgerApp::Ethereum, &LedgerConfig::default())
        .await
        .unwrap();
    let signature = ledger
        .sign_ethereum(
            EthSignType::Message,
            &DerivationPath::ethereum(Bip44Fields::default()),
            b"Sign in to app.example",
        )
        .await
        .unwrap();

    assert_eq!(signature.len(), 65);
    assert_eq!(&signature[..32], &[0xAA; 32]);
    assert_eq!(&signature[32..64], &[0x55; 32]);
    assert_eq!(signature[64], 28);
    assert_eq!(log.lock().sent.len(), 2);
}

#[tokio::test]
async fn ethereum_typed_data_sends_both_hashes() {
    let typed_data = br#"{
        "types": {
            "EIP712Domain": [
                {"name": "name", "type": "string"},
                {"name": "version", "type": "string"},
                {"name": "chainId", "type": "uint256"},
                {"name": "verifyingContract", "type": "address"}
            ],
            "Person": [
                {"name": "name", "type": "string"},
                {"name": "wallet", "type": "address"}
            ],
            "Mail": [
                {"name": "from", "type": "Person"},
                {"name": "to", "type": "Person"},
                {"name": "contents", "type": "string"}
            ]
        },
        "primaryType": "Mail",
        "domain": {
            "name": "Ether Mail",
            "version": "1",
            "chainId": 1,
            "verifyingContract": "0xCcCCccccCCCCcCCCCCCcCcCccCcCCCcCcccccccC"
        },
        "message": {
            "from": {"name": "Cow", "wallet": "0xCD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826"},
            "to": {"name": "Bob", "wallet": "0xbBbBBBBbbBBBbbbBbbBbbbbBBbBbbbbBbBbbBBbB"},
            "contents": "Hello, Bob!"
        }
    }"#;
    let parsed = TypedData::from_json(typed_data).unwrap();

    let key = SigningKey::from_slice(&[0x17; 32]).unwrap();
    let (factory, log) = spy(vec![eth_address(&key), vrs(27)]);
    let mut ledger = Ledger::init(&factory, LedgerApp::Ethereum, &LedgerConfig::default())
        .await
        .unwrap();

    let signature = ledger
        .sign_ethereum(
            EthSignType::Eip712,
            &DerivationPath::ethereum(Bip44Fields::default()),
            typed_data,
        )
        .await
        .unwrap();
    assert_eq!(signature[64], 27);

    let log = log.lock();
    let data = log.sent[1].data();
    assert_eq!(&data[21..53], parsed.domain.separator_hash().unwrap().as_slice());
    assert_eq!(&data[53..85], parsed.message_hash().unwrap().as_slice());
}

#[tokio::test]
async fn personas_are_exclusive() {
    let key = SigningKey::from_slice(&[0x17; 32]).unwrap();
    let (factory, _) = spy(vec![eth_address(&key)]);
    let mut ledger = Ledger::init(&factory, LedgerApp::Ethereum, &LedgerConfig::default())
        .await
        .unwrap();

    let result = ledger
        .sign(&DerivationPath::cosmos(Bip44Fields::default()), b"{}")
        .await;

    assert!(matches!(result, Err(Error::AppNotInitialised(ref app)) if app == "Cosmos"));
}

#[test]
fn unknown_sign_type_is_rejected() {
    let err = "personal_sign".parse::<EthSignType>().unwrap_err();
    assert!(matches!(err, Error::UnknownSignType(_)));
}
