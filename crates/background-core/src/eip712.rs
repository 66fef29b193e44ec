//! EIP-712 typed structured data hashing.
//!
//! The Ledger Ethereum app signs typed data from two precomputed hashes: the
//! domain separator and `hashStruct(message)`. This module validates the JSON
//! a dApp supplies, normalizes the loose parts of it (a `chainId` given as a
//! string, for instance) and computes both hashes.
//!
//! # Hash Computation
//!
//! ```text
//! keccak256("\x19\x01" || domainSeparator || hashStruct(message))
//! ```
//!
//! # Example
//!
//! ```
//! use wallet_background_core::TypedData;
//!
//! let typed_data = TypedData::from_json(br#"{
//!     "types": {
//!         "EIP712Domain": [{"name": "name", "type": "string"}],
//!         "Person": [
//!             {"name": "name", "type": "string"},
//!             {"name": "wallet", "type": "address"}
//!         ]
//!     },
//!     "primaryType": "Person",
//!     "domain": {"name": "My DApp", "chainId": "0x1"},
//!     "message": {"name": "Alice", "wallet": "0x0000000000000000000000000000000000000001"}
//! }"#).unwrap();
//!
//! typed_data.validate().unwrap();
//! assert_eq!(typed_data.domain.chain_id, Some(1));
//! ```
//!
//! [EIP-712]: https://eips.ethereum.org/EIPS/eip-712

use std::collections::{BTreeSet, HashMap};

use alloy_primitives::{Address as AlloyAddress, B256, U256, keccak256};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;

use crate::error::{Error, Result};

/// Name of the domain type that dApps include in `types`.
const DOMAIN_TYPE: &str = "EIP712Domain";

/// The `domain` object. Absent members are left out of the separator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip712Domain {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Dapps send a number, a decimal string or a `0x` hex string.
    #[serde(
        default,
        deserialize_with = "deserialize_chain_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifying_contract: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

fn deserialize_chain_id<'de, D>(deserializer: D) -> core::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid chainId: {n}"))),
        Some(Value::String(s)) => {
            let parsed = match s.strip_prefix("0x") {
                Some(hex_str) => u64::from_str_radix(hex_str, 16),
                None => s.parse::<u64>(),
            };
            parsed
                .map(Some)
                .map_err(|_| de::Error::custom(format!("invalid chainId: {s}")))
        }
        Some(other) => Err(de::Error::custom(format!("invalid chainId: {other}"))),
    }
}

impl Eip712Domain {
    /// Computes the domain separator hash.
    ///
    /// Only the fields present take part in the `EIP712Domain` type, in the
    /// canonical order `name, version, chainId, verifyingContract, salt`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTypedData`] if `verifyingContract` or `salt`
    /// is malformed.
    pub fn separator_hash(&self) -> Result<B256> {
        let members = [
            ("string", "name", self.name.clone().map(Value::String)),
            ("string", "version", self.version.clone().map(Value::String)),
            ("uint256", "chainId", self.chain_id.map(Value::from)),
            (
                "address",
                "verifyingContract",
                self.verifying_contract.clone().map(Value::String),
            ),
            ("bytes32", "salt", self.salt.clone().map(Value::String)),
        ];

        let mut declared = Vec::new();
        let mut preimage = vec![0u8; 32];
        for (kind, name, value) in &members {
            let Some(value) = value else { continue };
            if *kind == "bytes32" {
                // salt must be exactly 32 bytes, not merely fit in them
                parse_bytes32(as_text(value, kind)?)?;
            }
            declared.push(format!("{kind} {name}"));
            preimage.extend_from_slice(&encode_primitive(kind, value)?);
        }

        let type_hash = keccak256(format!("{DOMAIN_TYPE}({})", declared.join(",")));
        preimage[..32].copy_from_slice(type_hash.as_slice());
        Ok(keccak256(&preimage))
    }
}

/// `{"name": ..., "type": ...}` inside `types`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

/// The `eth_signTypedData_v4` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedData {
    pub domain: Eip712Domain,
    pub types: HashMap<String, Vec<TypeField>>,
    pub primary_type: String,
    pub message: Value,
}

impl TypedData {
    /// # Errors
    ///
    /// [`Error::InvalidTypedData`] when the JSON does not have the four
    /// top-level members.
    pub fn from_json(json: &[u8]) -> Result<Self> {
        serde_json::from_slice(json).map_err(|e| Error::InvalidTypedData(e.to_string()))
    }

    /// Checks that the type graph is closed and the message has the right shape.
    ///
    /// # Errors
    ///
    /// - [`Error::UndefinedType`] if the primary type or a referenced type is
    ///   missing from `types`
    /// - [`Error::InvalidTypedData`] if the message is not an object or a field
    ///   type is not a known primitive
    pub fn validate(&self) -> Result<()> {
        if !self.types.contains_key(&self.primary_type) {
            return Err(Error::UndefinedType(self.primary_type.clone()));
        }

        for fields in self.types.values() {
            for field in fields {
                let base = base_type(&field.field_type);
                if !self.types.contains_key(base) && !is_primitive(base) {
                    return Err(Error::UndefinedType(base.to_string()));
                }
            }
        }

        if !self.message.is_object() {
            return Err(Error::InvalidTypedData(
                "message must be an object".to_string(),
            ));
        }

        Ok(())
    }

    /// Computes `hashStruct(message)` for the primary type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTypedData`] or [`Error::UndefinedType`] if the
    /// message does not match its type definitions.
    pub fn message_hash(&self) -> Result<B256> {
        self.hash_struct(&self.primary_type, &self.message)
    }

    /// `keccak256(0x1901 ‖ domainSeparator ‖ hashStruct(message))`, the digest
    /// a software signer would sign. The device computes it itself.
    ///
    /// # Errors
    ///
    /// Same as [`Eip712Domain::separator_hash`] and [`Self::message_hash`].
    pub fn signing_hash(&self) -> Result<B256> {
        let domain_separator = self.domain.separator_hash()?;
        let struct_hash = self.message_hash()?;

        let mut data = Vec::with_capacity(2 + 32 + 32);
        data.extend_from_slice(&[0x19, 0x01]);
        data.extend_from_slice(domain_separator.as_slice());
        data.extend_from_slice(struct_hash.as_slice());

        Ok(keccak256(&data))
    }

    /// `hashStruct(s) = keccak256(typeHash || encodeData(s))`
    fn hash_struct(&self, type_name: &str, data: &Value) -> Result<B256> {
        let type_hash = keccak256(self.encode_type(type_name)?.as_bytes());
        let encoded_data = self.encode_data(type_name, data)?;

        let mut buf = Vec::with_capacity(32 + encoded_data.len());
        buf.extend_from_slice(type_hash.as_slice());
        buf.extend_from_slice(&encoded_data);

        Ok(keccak256(&buf))
    }

    /// Encodes a type followed by all of its transitive dependencies, sorted.
    fn encode_type(&self, type_name: &str) -> Result<String> {
        let mut dependencies = BTreeSet::new();
        self.collect_dependencies(type_name, &mut dependencies)?;
        dependencies.remove(type_name);

        let mut result = self.format_type(type_name)?;
        for dependency in dependencies {
            result.push_str(&self.format_type(dependency)?);
        }
        Ok(result)
    }

    fn format_type(&self, type_name: &str) -> Result<String> {
        let fields = self
            .types
            .get(type_name)
            .ok_or_else(|| Error::UndefinedType(type_name.to_string()))?;

        let field_strings: Vec<String> = fields
            .iter()
            .map(|f| format!("{} {}", f.field_type, f.name))
            .collect();
        Ok(format!("{type_name}({})", field_strings.join(",")))
    }

    fn collect_dependencies<'a>(
        &'a self,
        type_name: &'a str,
        found: &mut BTreeSet<&'a str>,
    ) -> Result<()> {
        if !found.insert(type_name) {
            return Ok(());
        }

        let fields = self
            .types
            .get(type_name)
            .ok_or_else(|| Error::UndefinedType(type_name.to_string()))?;

        for field in fields {
            let base = base_type(&field.field_type);
            if self.types.contains_key(base) {
                self.collect_dependencies(base, found)?;
            }
        }
        Ok(())
    }

    fn encode_data(&self, type_name: &str, data: &Value) -> Result<Vec<u8>> {
        let fields = self
            .types
            .get(type_name)
            .ok_or_else(|| Error::UndefinedType(type_name.to_string()))?;

        let obj = data
            .as_object()
            .ok_or_else(|| Error::InvalidTypedData(format!("expected object for {type_name}")))?;

        let mut encoded = Vec::with_capacity(32 * fields.len());
        for field in fields {
            let value = obj
                .get(&field.name)
                .ok_or_else(|| Error::InvalidTypedData(format!("missing field: {}", field.name)))?;
            encoded.extend_from_slice(&self.encode_field(&field.field_type, value)?);
        }

        Ok(encoded)
    }

    fn encode_field(&self, field_type: &str, value: &Value) -> Result<Vec<u8>> {
        if let Some(open) = field_type.rfind('[')
            && field_type.ends_with(']')
        {
            let item_type = &field_type[..open];
            let arr = value
                .as_array()
                .ok_or_else(|| Error::InvalidTypedData(format!("expected array for {field_type}")))?;

            let mut items_encoded = Vec::with_capacity(32 * arr.len());
            for item in arr {
                items_encoded.extend_from_slice(&self.encode_field(item_type, item)?);
            }
            return Ok(keccak256(&items_encoded).to_vec());
        }

        if self.types.contains_key(field_type) {
            return Ok(self.hash_struct(field_type, value)?.to_vec());
        }

        encode_primitive(field_type, value)
    }
}

/// Strips every array suffix: `Person[][2]` becomes `Person`.
fn base_type(field_type: &str) -> &str {
    field_type.find('[').map_or(field_type, |i| &field_type[..i])
}

fn is_primitive(type_name: &str) -> bool {
    match type_name {
        "string" | "bytes" | "bool" | "address" => true,
        t => {
            let sized = |prefix: &str, max: usize, step: usize| {
                t.strip_prefix(prefix)
                    .and_then(|n| n.parse::<usize>().ok())
                    .is_some_and(|n| n >= 1 && n <= max && n % step == 0)
            };
            t == "uint" || t == "int" || sized("uint", 256, 8) || sized("int", 256, 8) || sized("bytes", 32, 1)
        }
    }
}

fn type_mismatch(expected: &str, value: &Value) -> Error {
    Error::InvalidTypedData(format!("expected {expected}, got {value}"))
}

fn as_text<'a>(value: &'a Value, expected: &str) -> Result<&'a str> {
    value.as_str().ok_or_else(|| type_mismatch(expected, value))
}

/// One 32-byte `encodeData` word for an atomic or dynamic primitive.
fn encode_primitive(field_type: &str, value: &Value) -> Result<Vec<u8>> {
    let mut word = [0u8; 32];

    match field_type {
        "string" => return Ok(keccak256(as_text(value, "string")?).to_vec()),
        "bytes" => return Ok(keccak256(parse_hex_bytes(as_text(value, "hex bytes")?)?).to_vec()),
        "bool" => {
            let flag = value.as_bool().ok_or_else(|| type_mismatch("bool", value))?;
            word[31] = u8::from(flag);
        }
        "address" => {
            let address = parse_address(as_text(value, "address")?)?;
            word[12..].copy_from_slice(address.as_slice());
        }
        t => {
            if let Some(width) = t.strip_prefix("bytes") {
                let width: usize = width
                    .parse()
                    .map_err(|_| Error::InvalidTypedData(format!("unsupported type: {t}")))?;
                let bytes = parse_hex_bytes(as_text(value, t)?)?;
                if bytes.len() > width {
                    return Err(Error::InvalidTypedData(format!(
                        "{} bytes do not fit {t}",
                        bytes.len()
                    )));
                }
                word[..bytes.len()].copy_from_slice(&bytes);
            } else if t.starts_with("uint") {
                word = parse_uint(value)?.to_be_bytes::<32>();
            } else if t.starts_with("int") {
                word = parse_int(value)?.to_be_bytes::<32>();
            } else {
                return Err(Error::InvalidTypedData(format!("unsupported type: {t}")));
            }
        }
    }

    Ok(word.to_vec())
}

fn parse_address(text: &str) -> Result<AlloyAddress> {
    let bytes = parse_hex_bytes(text)?;
    if bytes.len() != 20 {
        return Err(Error::InvalidTypedData(format!("{text} is not an address")));
    }
    Ok(AlloyAddress::from_slice(&bytes))
}

fn parse_bytes32(text: &str) -> Result<[u8; 32]> {
    parse_hex_bytes(text)?
        .try_into()
        .map_err(|_| Error::InvalidTypedData(format!("{text} is not 32 bytes")))
}

fn parse_hex_bytes(text: &str) -> Result<Vec<u8>> {
    hex::decode(text.strip_prefix("0x").unwrap_or(text))
        .map_err(|e| Error::InvalidTypedData(format!("{text}: {e}")))
}

/// Numbers, decimal strings and `0x` hex strings.
fn parse_uint(value: &Value) -> Result<U256> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().map(U256::from).ok_or(()),
        Value::String(text) => match text.strip_prefix("0x") {
            Some(digits) => U256::from_str_radix(digits, 16).map_err(drop),
            None => U256::from_str_radix(text, 10).map_err(drop),
        },
        _ => Err(()),
    };
    parsed.map_err(|()| type_mismatch("unsigned integer", value))
}

/// Two's complement word for negative values.
fn parse_int(value: &Value) -> Result<U256> {
    match value {
        Value::Number(n) if n.as_i64().is_some_and(i64::is_negative) => {
            let n = n.as_i64().unwrap_or_default();
            Ok(U256::from(n.unsigned_abs()).wrapping_neg())
        }
        Value::String(text) if text.starts_with('-') => {
            let magnitude = parse_uint(&Value::String(text[1..].to_string()))?;
            Ok(magnitude.wrapping_neg())
        }
        _ => parse_uint(value),
    }
}
