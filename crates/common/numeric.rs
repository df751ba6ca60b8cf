//! Hex/decimal parsing for 256-bit integers and the sparse `u64 -> U256`
//! JSON map types used by schedule-style chain parameters.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use ethereum_types::U256;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ParseError {
    #[error("hex string \"0x\" has no digits")]
    EmptyHex,
    #[error("decimal string {0:?} has a leading zero")]
    LeadingZero(String),
    #[error("value {0:?} does not fit in 256 bits")]
    Overflow(String),
    #[error("invalid 256-bit integer {0:?}")]
    InvalidDigits(String),
    #[error("value {0:?} does not fit in 64 bits")]
    OverflowU64(String),
}

/// Parses a 256-bit integer from a decimal or `0x`-prefixed hex string.
///
/// The empty string parses as zero. Hex digits after the prefix may be of
/// odd length and any case. Bare decimals with a leading zero are rejected,
/// as are values above 2^256 - 1 and `"0x"` with no digits.
pub fn parse_u256(s: &str) -> Result<U256, ParseError> {
    if s.is_empty() {
        return Ok(U256::zero());
    }
    if let Some(digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if digits.is_empty() {
            return Err(ParseError::EmptyHex);
        }
        if digits.len() > 64 {
            return Err(ParseError::Overflow(s.to_string()));
        }
        return U256::from_str_radix(digits, 16)
            .map_err(|_| ParseError::InvalidDigits(s.to_string()));
    }
    if s.len() > 1 && s.starts_with('0') {
        return Err(ParseError::LeadingZero(s.to_string()));
    }
    U256::from_dec_str(s).map_err(|_| {
        if s.bytes().all(|b| b.is_ascii_digit()) {
            ParseError::Overflow(s.to_string())
        } else {
            ParseError::InvalidDigits(s.to_string())
        }
    })
}

/// Parses a `u64` with the same rules as [`parse_u256`].
pub fn parse_u64(s: &str) -> Result<u64, ParseError> {
    let value = parse_u256(s)?;
    if value > U256::from(u64::MAX) {
        return Err(ParseError::OverflowU64(s.to_string()));
    }
    Ok(value.as_u64())
}

/// Like [`parse_u256`], but panics on malformed input. Reserved for
/// hard-coded literals in chain presets and tests.
pub fn must_parse_u256(s: &str) -> U256 {
    match parse_u256(s) {
        Ok(v) => v,
        Err(e) => panic!("invalid hard-coded 256-bit literal: {e}"),
    }
}

fn value_to_u256(v: &serde_json::Value) -> Result<U256, ParseError> {
    match v {
        serde_json::Value::String(s) => parse_u256(s),
        serde_json::Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Ok(U256::from(u))
            } else {
                Err(ParseError::InvalidDigits(n.to_string()))
            }
        }
        other => Err(ParseError::InvalidDigits(other.to_string())),
    }
}

fn serialize_entries<S: Serializer>(
    entries: &BTreeMap<u64, U256>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (k, v) in entries {
        map.serialize_entry(&format!("{k:#x}"), &format!("{v:#x}"))?;
    }
    map.end()
}

fn deserialize_entries<E: serde::de::Error>(
    raw: &serde_json::Map<String, serde_json::Value>,
) -> Result<BTreeMap<u64, U256>, E> {
    raw.iter()
        .map(|(k, v)| {
            let key = parse_u64(k).map_err(E::custom)?;
            let value = value_to_u256(v).map_err(E::custom)?;
            Ok((key, value))
        })
        .collect()
}

/// Sparse `u64 -> U256` map encoded in JSON as an object with hex (or
/// decimal, or raw numeric) keys and values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct U64HexMap(pub BTreeMap<u64, U256>);

impl Deref for U64HexMap {
    type Target = BTreeMap<u64, U256>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for U64HexMap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Serialize for U64HexMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_entries(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for U64HexMap {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = serde_json::Map::deserialize(d)?;
        Ok(U64HexMap(deserialize_entries(&raw)?))
    }
}

/// Either a single 256-bit scalar or a sparse map. A bare scalar unmarshals
/// as `{0: value}`; marshalling always produces a map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct U64HexValOrMap(pub BTreeMap<u64, U256>);

impl Deref for U64HexValOrMap {
    type Target = BTreeMap<u64, U256>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for U64HexValOrMap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Serialize for U64HexValOrMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_entries(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for U64HexValOrMap {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(d)?;
        let entries = match &raw {
            serde_json::Value::Object(map) => deserialize_entries(map)?,
            scalar => {
                let value = value_to_u256(scalar).map_err(D::Error::custom)?;
                BTreeMap::from([(0u64, value)])
            }
        };
        Ok(U64HexValOrMap(entries))
    }
}
