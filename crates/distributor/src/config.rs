//! Keeper configuration.
//!
//! Deserialized from JSON; every section falls back to defaults so a config
//! file only needs the RPC URL, the key and the contract addresses.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level keeper configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeeperConfig {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    pub contracts: ContractAddresses,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// RewardDistributor JSON ABI (bare array or artifact with an `abi` field).
    pub abi_path: Option<PathBuf>,
}

impl KeeperConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("parse keeper config")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&raw)
    }
}

/// JSON-RPC endpoint and call bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub http_url: String,
    /// EIP-155 chain id used when signing locally.
    pub chain_id: u64,
    /// Upper bound on any single chain call.
    pub timeout_ms: u64,
    /// How long a submission waits for its receipt.
    pub receipt_timeout_ms: u64,
    pub receipt_poll_interval_ms: u64,
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.receipt_timeout_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            http_url: "http://127.0.0.1:8545".to_string(),
            chain_id: 31337,
            timeout_ms: 15_000,
            receipt_timeout_ms: 60_000,
            receipt_poll_interval_ms: 1_000,
        }
    }
}

/// Signing keys. Without a keeper key, transactions go out via
/// `eth_sendTransaction` and the node signs for the unlocked `address`.
#[derive(Clone, Default, Deserialize)]
pub struct KeysConfig {
    pub keeper: Option<String>,
    #[serde(default, deserialize_with = "de_opt_address")]
    pub address: Option<[u8; 20]>,
}

impl std::fmt::Debug for KeysConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeysConfig")
            .field("keeper", &self.keeper.as_ref().map(|_| "<redacted>"))
            .field("address", &self.address.as_ref().map(format_address))
            .finish()
    }
}

/// Addresses the keeper reports on. Only the distributor is acted upon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractAddresses {
    #[serde(
        deserialize_with = "de_address",
        serialize_with = "ser_address",
        alias = "reward_distributor"
    )]
    pub reward_distributor: [u8; 20],
    #[serde(
        default,
        deserialize_with = "de_opt_address",
        serialize_with = "ser_opt_address",
        alias = "staking_vault"
    )]
    pub staking_vault: Option<[u8; 20]>,
    #[serde(default, deserialize_with = "de_opt_address", serialize_with = "ser_opt_address")]
    pub token: Option<[u8; 20]>,
}

/// Event tracker settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// First block to scan (inclusive).
    pub start_block: u64,
    pub poll_interval_ms: u64,
    /// Max block range per eth_getLogs request.
    pub max_block_range: u64,
    /// Fetch the block header of each event to fill in its timestamp.
    pub resolve_timestamps: bool,
    /// How many events the in-memory event log keeps.
    pub event_log_capacity: usize,
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            poll_interval_ms: 10_000,
            max_block_range: 1_000,
            resolve_timestamps: false,
            event_log_capacity: 1_000,
        }
    }
}

/// Epoch scheduler settings. Gas is fixed; there is no estimation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_ms: u64,
    pub gas_limit: u64,
    /// Gas price in wei.
    pub gas_price: u64,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            gas_limit: 9_721_900,
            gas_price: 101_000_000_000,
        }
    }
}

/// Parse a 20-byte hex address (with or without `0x`).
pub fn parse_address(s: &str) -> Result<[u8; 20], String> {
    let addr_hex = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(addr_hex).map_err(|e| format!("invalid address {s}: {e}"))?;
    if bytes.len() != 20 {
        return Err(format!("address must be 20 bytes (40 hex chars), got {}", bytes.len()));
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// `0x`-prefixed lowercase hex.
pub fn format_address(addr: &[u8; 20]) -> String {
    format!("0x{}", hex::encode(addr))
}

fn de_address<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 20], D::Error> {
    let s = String::deserialize(d)?;
    parse_address(&s).map_err(serde::de::Error::custom)
}

fn de_opt_address<'de, D: Deserializer<'de>>(d: D) -> Result<Option<[u8; 20]>, D::Error> {
    match Option::<String>::deserialize(d)? {
        Some(s) if !s.is_empty() => parse_address(&s).map(Some).map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

fn ser_address<S: serde::Serializer>(addr: &[u8; 20], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_address(addr))
}

fn ser_opt_address<S: serde::Serializer>(addr: &Option<[u8; 20]>, s: S) -> Result<S::Ok, S::Error> {
    match addr {
        Some(a) => s.serialize_str(&format_address(a)),
        None => s.serialize_none(),
    }
}
