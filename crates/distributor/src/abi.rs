//! ABI handling for the RewardDistributor contract.
//!
//! Events are decoded against a standard Solidity JSON ABI loaded at startup
//! (`alloy` json-abi + dyn-abi); the view and distribution calls the scheduler
//! makes take no arguments, so those only need their selectors.

use crate::client::RawLog;
use crate::error::KeeperError;
use alloy::dyn_abi::{DynSolType, DynSolValue, EventExt};
use alloy::json_abi::{Event, JsonAbi, Param};
use alloy::primitives::{B256, U256};
use serde_json::{Map, Value};
use sha3::{Digest, Keccak256};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

pub const EPOCH_DURATION_SIG: &str = "epochDuration()";
pub const LAST_EPOCH_START_SIG: &str = "lastEpochStart()";
pub const REWARDS_PER_EPOCH_SIG: &str = "rewardsPerEpoch()";
pub const DISTRIBUTE_REWARDS_SIG: &str = "distributeRewards()";

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

/// First 4 bytes of keccak256 of a canonical function signature.
pub fn function_selector(signature: &str) -> [u8; 4] {
    let h = keccak256(signature.as_bytes());
    [h[0], h[1], h[2], h[3]]
}

/// Calldata for a function without arguments.
pub fn encode_call(signature: &str) -> Vec<u8> {
    function_selector(signature).to_vec()
}

/// Decode a single `uint256` return value.
pub fn decode_uint_return(data: &[u8]) -> Result<U256, KeeperError> {
    match DynSolType::Uint(256).abi_decode(data) {
        Ok(DynSolValue::Uint(v, _)) => Ok(v),
        Ok(other) => Err(KeeperError::Decode(format!("expected uint256, got {other:?}"))),
        Err(e) => Err(KeeperError::Decode(format!("uint256 return: {e}"))),
    }
}

/// Event name plus decoded fields, before chain metadata is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLog {
    pub name: String,
    pub return_values: BTreeMap<String, Value>,
}

/// Non-anonymous events of one contract, indexed by topic0.
#[derive(Debug, Clone, Default)]
pub struct ContractAbi {
    events: HashMap<B256, Event>,
}

impl ContractAbi {
    /// Parse either a bare ABI array or a compiler artifact with an `abi` field.
    pub fn from_json(s: &str) -> Result<Self, KeeperError> {
        let v: Value =
            serde_json::from_str(s).map_err(|e| KeeperError::Config(format!("ABI JSON: {e}")))?;
        let entries = match v {
            Value::Array(_) => v,
            Value::Object(mut o) => o.remove("abi").ok_or_else(|| {
                KeeperError::Config("ABI artifact has no `abi` field".into())
            })?,
            _ => {
                return Err(KeeperError::Config(
                    "ABI must be an array or an artifact object".into(),
                ))
            }
        };
        let abi: JsonAbi = serde_json::from_value(entries)
            .map_err(|e| KeeperError::Config(format!("ABI entries: {e}")))?;
        let events = abi
            .events()
            .filter(|e| !e.anonymous)
            .map(|e| (e.selector(), e.clone()))
            .collect();
        Ok(Self { events })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, KeeperError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| KeeperError::Config(format!("read ABI {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn event(&self, name: &str) -> Option<&Event> {
        self.events.values().find(|e| e.name == name)
    }

    /// `0x`-prefixed topic0 of the named event.
    pub fn topic0_hex(&self, name: &str) -> Option<String> {
        self.event(name)
            .map(|e| format!("0x{}", hex::encode(e.selector())))
    }

    /// Sorted event names.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.events.values().map(|e| e.name.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    /// Decode a raw log into its event name and named return values.
    pub fn decode_log(&self, log: &RawLog) -> Result<DecodedLog, KeeperError> {
        let topics = log
            .topics
            .iter()
            .map(|t| parse_hex_32(t).map(B256::from))
            .collect::<Result<Vec<_>, _>>()?;
        let topic0 = topics
            .first()
            .ok_or_else(|| KeeperError::Decode("log has no topics".into()))?;
        let event = self.events.get(topic0).ok_or_else(|| {
            KeeperError::Decode(format!("unknown event topic 0x{}", hex::encode(topic0)))
        })?;
        let data = parse_hex_bytes(&log.data)?;

        let decoded = event
            .decode_log_parts(topics.iter().copied(), &data, true)
            .map_err(|e| KeeperError::Decode(format!("{}: {e}", event.name)))?;

        // Indexed and body values come back in two lists; put them back in
        // declaration order. Indexed dynamic values are only their hash.
        let mut indexed = decoded.indexed.into_iter();
        let mut body = decoded.body.into_iter();
        let mut return_values = BTreeMap::new();
        for (i, param) in event.inputs.iter().enumerate() {
            let value = if param.indexed {
                indexed.next()
            } else {
                body.next()
            }
            .ok_or_else(|| KeeperError::Decode(format!("{}: missing value {i}", event.name)))?;
            let key = if param.name.is_empty() {
                i.to_string()
            } else {
                param.name.clone()
            };
            return_values.insert(key, to_json(value, &param.components));
        }

        Ok(DecodedLog {
            name: event.name.clone(),
            return_values,
        })
    }
}

/// JSON rendering of a decoded value. Integers become decimal strings, byte
/// values and addresses `0x` hex; tuple fields take their component names.
fn to_json(value: DynSolValue, components: &[Param]) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::Address(a) => Value::String(format!("0x{}", hex::encode(a))),
        DynSolValue::FixedBytes(w, size) => Value::String(format!("0x{}", hex::encode(&w[..size]))),
        DynSolValue::Bytes(b) => Value::String(format!("0x{}", hex::encode(b))),
        DynSolValue::String(s) => Value::String(s),
        DynSolValue::Function(f) => Value::String(format!("0x{}", hex::encode(f))),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => Value::Array(
            items
                .into_iter()
                .map(|v| to_json(v, components))
                .collect(),
        ),
        DynSolValue::Tuple(fields) => {
            let mut out = Map::new();
            for (i, v) in fields.into_iter().enumerate() {
                let component = components.get(i);
                let key = match component {
                    Some(c) if !c.name.is_empty() => c.name.clone(),
                    _ => i.to_string(),
                };
                let nested = component.map(|c| c.components.as_slice()).unwrap_or(&[]);
                out.insert(key, to_json(v, nested));
            }
            Value::Object(out)
        }
        // Only reachable when dyn-abi is built with eip712.
        #[allow(unreachable_patterns)]
        other => match other.as_tuple() {
            Some(fields) => to_json(DynSolValue::Tuple(fields.to_vec()), components),
            None => Value::String(format!("{other:?}")),
        },
    }
}

pub(crate) fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, KeeperError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| KeeperError::Decode(format!("hex: {e}")))
}

pub(crate) fn parse_hex_32(s: &str) -> Result<[u8; 32], KeeperError> {
    let bytes = parse_hex_bytes(s)?;
    if bytes.len() != 32 {
        return Err(KeeperError::Decode(format!("expected 32 bytes, got {}", bytes.len())));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
