//! APDU (Application Protocol Data Unit) command and response types.
//!
//! Ledger apps speak a subset of ISO 7816-4: short commands only, no `Le`
//! byte, responses terminated by a two-byte status word.
//!
//! # APDU Command Structure
//!
//! ```text
//! | CLA | INS | P1 | P2 | Lc | Data |
//! |-----|-----|----|----|----|----- |
//! | 1B  | 1B  | 1B | 1B | 1B | Var  |
//! ```
//!
//! # APDU Response Structure
//!
//! ```text
//! | Data | SW1 | SW2 |
//! |------|-----|-----|
//! | Var  | 1B  | 1B  |
//! ```
//!
//! # Example
//!
//! ```
//! use wallet_background_core::ledger::Apdu;
//!
//! // GET VERSION for the Cosmos app
//! let apdu = Apdu::new(0x55, 0x00, 0x00, 0x00, vec![]);
//! assert_eq!(apdu.to_bytes(), vec![0x55, 0x00, 0x00, 0x00, 0x00]);
//! ```

use crate::error::{Error, Result};

/// Status word reported on success.
pub const SW_OK: u16 = 0x9000;

/// Status word some firmware reports while the device is locked.
pub const SW_DEVICE_LOCKED: u16 = 0x5515;

/// Status word reported when the user rejects a request on the device.
pub const SW_REJECTED: u16 = 0x6986;

/// Status word the Ethereum app reports when the user denies a request.
pub const SW_CONDITIONS_NOT_SATISFIED: u16 = 0x6985;

/// A command for a Ledger app. `cla` selects the app, `ins` the instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Vec<u8>,
}

impl Apdu {
    /// Largest payload a short command carries.
    pub const MAX_DATA: usize = 255;

    /// `data` must not exceed [`Self::MAX_DATA`]; callers chunk before this.
    #[must_use]
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data,
        }
    }

    #[must_use]
    pub const fn cla(&self) -> u8 {
        self.cla
    }

    #[must_use]
    pub const fn ins(&self) -> u8 {
        self.ins
    }

    #[must_use]
    pub const fn p1(&self) -> u8 {
        self.p1
    }

    #[must_use]
    pub const fn p2(&self) -> u8 {
        self.p2
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Wire form. `Lc` is written even when there is no data.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let lc = u8::try_from(self.data.len()).unwrap_or(u8::MAX);
        [self.cla, self.ins, self.p1, self.p2, lc]
            .into_iter()
            .chain(self.data.iter().copied())
            .collect()
    }
}

/// Reply payload and the trailing `SW1 SW2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    data: Vec<u8>,
    status: u16,
}

impl ApduResponse {
    #[must_use]
    pub const fn new(data: Vec<u8>, status: u16) -> Self {
        Self { data, status }
    }

    /// Parses a raw response, splitting off the trailing status word.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] if fewer than two bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [data @ .., sw1, sw2] => Ok(Self::new(data.to_vec(), u16::from_be_bytes([*sw1, *sw2]))),
            _ => Err(Error::MalformedResponse(format!(
                "{} byte reply has no status word",
                bytes.len()
            ))),
        }
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    #[must_use]
    pub const fn status_word(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status == SW_OK
    }

    /// # Errors
    ///
    /// [`Self::to_error`] for anything but [`SW_OK`].
    pub fn check(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self.to_error())
        }
    }

    /// Lock and user rejection get their own variants so callers can show a
    /// useful prompt. Everything else keeps the raw status.
    #[must_use]
    pub fn to_error(&self) -> Error {
        match self.status {
            SW_DEVICE_LOCKED => Error::DeviceLocked,
            SW_REJECTED | SW_CONDITIONS_NOT_SATISFIED => Error::SignRejected,
            status => Error::Device {
                status,
                message: status_message(status).to_string(),
            },
        }
    }
}

/// Returns the human readable message for a Ledger status word.
#[must_use]
pub const fn status_message(status: u16) -> &'static str {
    match status {
        0x0001 => "U2F: Unknown",
        0x0002 => "U2F: Bad request",
        0x0003 => "U2F: Configuration unsupported",
        0x0004 => "U2F: Device Ineligible",
        0x0005 => "U2F: Timeout",
        0x000E => "Timeout",
        SW_OK => "No errors",
        0x9001 => "Device is busy",
        SW_DEVICE_LOCKED => "Device is locked",
        0x6400 => "Execution Error",
        0x6511 | 0x6E00 | 0x6E01 => "App does not seem to be open",
        0x6700 => "Wrong Length",
        0x6982 => "Empty Buffer",
        0x6983 => "Output buffer too small",
        0x6984 => "Data is invalid",
        SW_CONDITIONS_NOT_SATISFIED => "Conditions not satisfied",
        SW_REJECTED => "Transaction rejected",
        0x6A80 => "Bad key handle",
        0x6B00 => "Invalid P1/P2",
        0x6D00 => "Instruction not supported",
        0x6F00 => "Unknown error",
        0x6F01 => "Sign/verify error",
        _ => "Unknown Status Code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apdu_new() {
        let apdu = Apdu::new(0xE0, 0x02, 0x00, 0x01, vec![0xA0, 0x00]);

        assert_eq!(apdu.cla(), 0xE0);
        assert_eq!(apdu.ins(), 0x02);
        assert_eq!(apdu.p1(), 0x00);
        assert_eq!(apdu.p2(), 0x01);
        assert_eq!(apdu.data(), &[0xA0, 0x00]);
    }

    #[test]
    fn apdu_to_bytes() {
        let apdu = Apdu::new(0x55, 0x04, 0x00, 0x00, vec![0x01, 0x02]);
        assert_eq!(apdu.to_bytes(), vec![0x55, 0x04, 0x00, 0x00, 0x02, 0x01, 0x02]);
    }

    #[test]
    fn apdu_to_bytes_no_data() {
        let apdu = Apdu::new(0xB0, 0x01, 0x00, 0x00, vec![]);
        assert_eq!(apdu.to_bytes(), vec![0xB0, 0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn apdu_response_from_bytes() {
        let response = ApduResponse::from_bytes(&[0x01, 0x02, 0x03, 0x90, 0x00]).unwrap();

        assert_eq!(response.data(), &[0x01, 0x02, 0x03]);
        assert_eq!(response.status_word(), SW_OK);
        assert!(response.is_success());
        assert!(response.check().is_ok());
    }

    #[test]
    fn apdu_response_too_short() {
        let result = ApduResponse::from_bytes(&[0x90]);
        assert!(matches!(result, Err(Error::MalformedResponse(_))));
    }

    #[test]
    fn apdu_response_locked() {
        let response = ApduResponse::new(vec![], SW_DEVICE_LOCKED);
        assert!(matches!(response.check(), Err(Error::DeviceLocked)));
    }

    #[test]
    fn apdu_response_rejected() {
        let response = ApduResponse::new(vec![], SW_REJECTED);
        assert!(matches!(response.to_error(), Error::SignRejected));

        let response = ApduResponse::new(vec![], SW_CONDITIONS_NOT_SATISFIED);
        assert!(matches!(response.to_error(), Error::SignRejected));
    }

    #[test]
    fn apdu_response_unclassified_status() {
        let response = ApduResponse::new(vec![], 0x6E00);
        match response.to_error() {
            Error::Device { status, message } => {
                assert_eq!(status, 0x6E00);
                assert_eq!(message, "App does not seem to be open");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn apdu_response_into_data() {
        let response = ApduResponse::from_bytes(&[0x01, 0x02, 0x90, 0x00]).unwrap();
        assert_eq!(response.into_data(), vec![0x01, 0x02]);
    }

    #[test]
    fn status_messages() {
        assert_eq!(status_message(SW_OK), "No errors");
        assert_eq!(status_message(0x1234), "Unknown Status Code");
    }
}
