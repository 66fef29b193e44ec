//! The Ledger Cosmos app protocol.
//!
//! Covers the instructions the wallet needs: version and app info (used to
//! probe the device on init), address export and chunked signing of the JSON
//! sign doc.

use core::fmt;

use super::apdu::Apdu;
use super::path::DerivationPath;
use super::transport::{Transport, send};
use crate::error::{Error, Result};

/// Class byte of the Cosmos app.
const CLA: u8 = 0x55;

/// Class byte of the dashboard-level app info instruction.
const CLA_APP_INFO: u8 = 0xB0;

/// Message bytes per signing chunk.
pub const CHUNK_SIZE: usize = 250;

mod ins {
    pub(super) const GET_VERSION: u8 = 0x00;
    pub(super) const SIGN_SECP256K1: u8 = 0x02;
    pub(super) const GET_ADDR_SECP256K1: u8 = 0x04;
    pub(super) const APP_INFO: u8 = 0x01;
}

/// Chunk position markers sent in P1 while signing.
mod payload {
    pub(super) const INIT: u8 = 0x00;
    pub(super) const ADD: u8 = 0x01;
    pub(super) const LAST: u8 = 0x02;
}

/// P2 selecting the legacy JSON sign mode.
const SIGN_MODE_JSON: u8 = 0x00;

/// Version information reported by the Cosmos app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppVersion {
    /// Whether the app was built in test mode.
    pub test_mode: bool,
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch version.
    pub patch: u8,
    /// Whether the device reports itself as locked.
    pub device_locked: bool,
    /// The device target id, absent on old firmware.
    pub target_id: Option<u32>,
}

impl AppVersion {
    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 5 {
            return Err(Error::MalformedResponse(format!(
                "version response has {} bytes",
                data.len()
            )));
        }

        let target_id = data
            .get(5..9)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]));

        Ok(Self {
            test_mode: data[0] != 0,
            major: data[1],
            minor: data[2],
            patch: data[3],
            device_locked: data[4] == 1,
            target_id,
        })
    }
}

impl fmt::Display for AppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Name and version of the app currently open on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    /// The app name, e.g. `Cosmos`.
    pub name: String,
    /// The app version string.
    pub version: String,
}

impl AppInfo {
    fn parse(data: &[u8]) -> Result<Self> {
        let malformed = || Error::MalformedResponse("truncated app info response".to_string());

        // data[0] is the format id
        let mut cursor = 1;
        let mut read_field = || -> Result<String> {
            let len = *data.get(cursor).ok_or_else(malformed)? as usize;
            let bytes = data.get(cursor + 1..cursor + 1 + len).ok_or_else(malformed)?;
            cursor += 1 + len;
            Ok(String::from_utf8_lossy(bytes).into_owned())
        };

        let name = read_field()?;
        let version = read_field()?;
        Ok(Self { name, version })
    }
}

/// A key exported by the Cosmos app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosmosPublicKey {
    /// The 33-byte compressed secp256k1 key.
    pub compressed: [u8; 33],
    /// The bech32 address derived by the device.
    pub address: String,
}

/// An open session with the Cosmos app.
pub struct CosmosApp {
    transport: Box<dyn Transport>,
    app_name: String,
    bech32_prefix: String,
}

impl fmt::Debug for CosmosApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CosmosApp")
            .field("app_name", &self.app_name)
            .field("bech32_prefix", &self.bech32_prefix)
            .finish_non_exhaustive()
    }
}

impl CosmosApp {
    /// Wraps an open transport.
    #[must_use]
    pub fn new(transport: Box<dyn Transport>, app_name: &str, bech32_prefix: &str) -> Self {
        Self {
            transport,
            app_name: app_name.to_string(),
            bech32_prefix: bech32_prefix.to_string(),
        }
    }

    /// The app name this session expects on the device.
    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Reads the app version.
    ///
    /// # Errors
    ///
    /// Returns the classified device or transport error.
    pub async fn get_version(&mut self) -> Result<AppVersion> {
        let apdu = Apdu::new(CLA, ins::GET_VERSION, 0, 0, Vec::new());
        let data = send(self.transport.as_mut(), &apdu).await?;
        AppVersion::parse(&data)
    }

    /// Reads the name and version of the app open on the device.
    ///
    /// # Errors
    ///
    /// Returns the classified device or transport error.
    pub async fn app_info(&mut self) -> Result<AppInfo> {
        let apdu = Apdu::new(CLA_APP_INFO, ins::APP_INFO, 0, 0, Vec::new());
        let data = send(self.transport.as_mut(), &apdu).await?;
        AppInfo::parse(&data)
    }

    /// Exports the compressed public key and address for `path`.
    ///
    /// # Errors
    ///
    /// Returns the classified device or transport error,
    /// [`Error::MalformedResponse`] if the key is truncated, or
    /// [`Error::Config`] if the bech32 prefix does not fit its length byte.
    pub async fn get_public_key(&mut self, path: &DerivationPath) -> Result<CosmosPublicKey> {
        let hrp = self.bech32_prefix.as_bytes();
        let hrp_len = u8::try_from(hrp.len()).map_err(|_| {
            Error::Config(format!("bech32 prefix is {} bytes, limit is 255", hrp.len()))
        })?;
        let mut data = Vec::with_capacity(1 + hrp.len() + 20);
        data.push(hrp_len);
        data.extend_from_slice(hrp);
        data.extend_from_slice(&path.to_cosmos_bytes());

        let apdu = Apdu::new(CLA, ins::GET_ADDR_SECP256K1, 0, 0, data);
        let response = send(self.transport.as_mut(), &apdu).await?;

        let compressed: [u8; 33] = response
            .get(..33)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::MalformedResponse("public key shorter than 33 bytes".to_string()))?;
        let address = String::from_utf8_lossy(&response[33..]).into_owned();

        Ok(CosmosPublicKey {
            compressed,
            address,
        })
    }

    /// Signs a JSON sign doc and returns the device's DER signature.
    ///
    /// The path travels in the first chunk and the message follows in
    /// [`CHUNK_SIZE`] pieces. Only the last chunk answers with the signature.
    ///
    /// # Errors
    ///
    /// [`Error::FailedSign`] for an empty message, which is refused before
    /// anything reaches the device. Otherwise the classified device or
    /// transport error.
    pub async fn sign(&mut self, path: &DerivationPath, message: &[u8]) -> Result<Vec<u8>> {
        if message.is_empty() {
            return Err(Error::FailedSign("empty sign doc".to_string()));
        }
        let chunks = sign_chunks(path, message);
        let last = chunks.len() - 1;

        let mut signature = Vec::new();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let p1 = if i == last {
                payload::LAST
            } else if i == 0 {
                payload::INIT
            } else {
                payload::ADD
            };
            let apdu = Apdu::new(CLA, ins::SIGN_SECP256K1, p1, SIGN_MODE_JSON, chunk);
            signature = send(self.transport.as_mut(), &apdu).await?;
        }

        Ok(signature)
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

fn sign_chunks(path: &DerivationPath, message: &[u8]) -> Vec<Vec<u8>> {
    let mut chunks = vec![path.to_cosmos_bytes().to_vec()];
    chunks.extend(message.chunks(CHUNK_SIZE).map(<[u8]>::to_vec));
    chunks
}

#[cfg(test)]
mod tests {
    use super::super::mock::{MockTransport, ok};
    use super::super::path::Bip44Fields;
    use super::*;

    #[test]
    fn version_parsing() {
        let version = AppVersion::parse(&[0, 2, 34, 12, 0, 0x31, 0x10, 0x00, 0x04]).unwrap();
        assert_eq!(version.to_string(), "2.34.12");
        assert!(!version.device_locked);
        assert_eq!(version.target_id, Some(0x3110_0004));

        let old = AppVersion::parse(&[1, 1, 5, 0, 1]).unwrap();
        assert!(old.test_mode);
        assert!(old.device_locked);
        assert_eq!(old.target_id, None);

        assert!(AppVersion::parse(&[0, 1]).is_err());
    }

    #[test]
    fn app_info_parsing() {
        let mut data = vec![0x01, 6];
        data.extend_from_slice(b"Cosmos");
        data.push(6);
        data.extend_from_slice(b"2.35.0");
        data.extend_from_slice(&[0x01, 0x00]);

        let info = AppInfo::parse(&data).unwrap();
        assert_eq!(info.name, "Cosmos");
        assert_eq!(info.version, "2.35.0");

        assert!(AppInfo::parse(&[0x01, 10, b'C']).is_err());
    }

    #[test]
    fn chunking() {
        let path = DerivationPath::cosmos(Bip44Fields::default());

        assert_eq!(sign_chunks(&path, &[]).len(), 1);
        assert_eq!(sign_chunks(&path, &[0u8; 250]).len(), 2);

        let chunks = sign_chunks(&path, &[0u8; 251]);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 20);
        assert_eq!(chunks[2].len(), 1);
    }

    #[tokio::test]
    async fn get_public_key_sends_hrp_and_path() {
        let mut response = vec![0x02; 33];
        response.extend_from_slice(b"cosmos1abc");
        let (transport, handle) = MockTransport::new(vec![ok(&response)]);
        let mut app = CosmosApp::new(Box::new(transport), "Cosmos", "cosmos");

        let key = app
            .get_public_key(&DerivationPath::cosmos(Bip44Fields::default()))
            .await
            .unwrap();

        assert_eq!(key.compressed, [0x02; 33]);
        assert_eq!(key.address, "cosmos1abc");

        let sent = handle.sent();
        assert_eq!(sent[0].ins(), ins::GET_ADDR_SECP256K1);
        assert_eq!(sent[0].data()[0], 6);
        assert_eq!(&sent[0].data()[1..7], b"cosmos");
        assert_eq!(sent[0].data().len(), 27);
    }

    #[tokio::test]
    async fn sign_marks_chunk_positions() {
        let (transport, handle) =
            MockTransport::new(vec![ok(&[]), ok(&[]), ok(&[0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x02])]);
        let mut app = CosmosApp::new(Box::new(transport), "Cosmos", "cosmos");

        let der = app
            .sign(&DerivationPath::cosmos(Bip44Fields::default()), &[b'{'; 300])
            .await
            .unwrap();

        assert_eq!(der[0], 0x30);
        let p1s: Vec<u8> = handle.sent().iter().map(Apdu::p1).collect();
        assert_eq!(p1s, vec![payload::INIT, payload::ADD, payload::LAST]);
    }

    #[tokio::test]
    async fn sign_stops_on_rejection() {
        let (transport, handle) = MockTransport::new(vec![ok(&[]), vec![0x69, 0x86]]);
        let mut app = CosmosApp::new(Box::new(transport), "Cosmos", "cosmos");

        let result = app
            .sign(&DerivationPath::cosmos(Bip44Fields::default()), &[0u8; 10])
            .await;

        assert!(matches!(result, Err(Error::SignRejected)));
        assert_eq!(handle.sent().len(), 2);
    }

    #[tokio::test]
    async fn empty_sign_doc_never_reaches_the_device() {
        let (transport, handle) = MockTransport::new(vec![ok(&[0x30, 0x00])]);
        let mut app = CosmosApp::new(Box::new(transport), "Cosmos", "cosmos");

        let result = app
            .sign(&DerivationPath::cosmos(Bip44Fields::default()), &[])
            .await;

        assert!(matches!(result, Err(Error::FailedSign(_))));
        assert!(handle.sent().is_empty());
    }

    #[tokio::test]
    async fn oversized_prefix_is_a_config_error() {
        let (transport, handle) = MockTransport::new(vec![ok(&[0x02; 33])]);
        let prefix = "a".repeat(300);
        let mut app = CosmosApp::new(Box::new(transport), "Cosmos", &prefix);

        let result = app
            .get_public_key(&DerivationPath::cosmos(Bip44Fields::default()))
            .await;

        assert!(matches!(result, Err(Error::Config(_))));
        assert!(handle.sent().is_empty());
    }
}
