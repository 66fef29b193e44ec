//! File configuration.
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [interaction]
//! timeout_secs = 300
//!
//! [ledger]
//! cosmos_app_name = "Cosmos"
//! bech32_prefix = "cosmos"
//! ```
//!
//! Every section and key is optional.

use core::fmt;
use core::time::Duration;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::messaging::KEY_DERIVATION_MEMO;

const MAX_CONFIG_SIZE: u64 = 1024 * 1024;

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// The filter directive for this level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: LogLevel,
}

/// Settings of the interaction registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InteractionConfig {
    /// Seconds a request waits for a decision. Absent means forever.
    #[serde(deserialize_with = "deserialize_timeout")]
    pub timeout_secs: Option<u64>,
}

impl InteractionConfig {
    /// The configured timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn deserialize_timeout<'de, D>(deserializer: D) -> core::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<u64>::deserialize(deserializer)?;
    if opt == Some(0) {
        return Err(serde::de::Error::custom("timeout must be greater than 0"));
    }
    Ok(opt)
}

/// Settings of the Ledger adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// Name the Cosmos-like app must report, e.g. `Cosmos` or `Terra`.
    pub cosmos_app_name: String,
    /// Human readable part requested for device-derived addresses.
    pub bech32_prefix: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            cosmos_app_name: "Cosmos".to_string(),
            bech32_prefix: "cosmos".to_string(),
        }
    }
}

/// Settings of the derived-key messaging service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MessagingConfig {
    /// Memo of the sign doc the keyring signs to derive messaging keys.
    ///
    /// Changing it changes every derived key, so existing ciphertexts can no
    /// longer be decrypted.
    pub memo: String,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            memo: KEY_DERIVATION_MEMO.to_string(),
        }
    }
}

/// The full configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub logging: LoggingConfig,
    pub interaction: InteractionConfig,
    pub ledger: LedgerConfig,
    pub messaging: MessagingConfig,
}

impl Config {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid TOML, unknown keys or a zero
    /// timeout.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read, is larger than
    /// 1 MiB or does not parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        if metadata.len() > MAX_CONFIG_SIZE {
            return Err(Error::Config(format!(
                "{} is larger than {MAX_CONFIG_SIZE} bytes",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }
}
