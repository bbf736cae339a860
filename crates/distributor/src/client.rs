//! The chain capability both loops consume.
//!
//! [ChainClient] is deliberately small: block reads, a view call, a
//! transaction send and a log query. [TimeoutClient] wraps any client so no
//! single call can stall a loop.

use crate::error::KeeperError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: String,
    pub transaction_hash: String,
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn block_number_u64(&self) -> Result<u64, KeeperError> {
        parse_hex_u64(&self.block_number).map_err(KeeperError::Decode)
    }

    pub fn log_index_u64(&self) -> Result<u64, KeeperError> {
        parse_hex_u64(&self.log_index).map_err(KeeperError::Decode)
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// The subset of a block header the keeper needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub timestamp: u64,
}

/// A state-changing call with fixed gas settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub to: [u8; 20],
    pub from: [u8; 20],
    pub data: Vec<u8>,
    pub gas_limit: u64,
    pub gas_price: u64,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, KeeperError>;

    async fn block(&self, number: u64) -> Result<BlockHeader, KeeperError>;

    /// Read-only call against the latest state.
    async fn call_view(&self, to: [u8; 20], calldata: Vec<u8>) -> Result<Vec<u8>, KeeperError>;

    /// Submit a transaction and wait for it to be mined. Returns the
    /// transaction hash; a reverted transaction is an error.
    async fn send_transaction(&self, tx: TxRequest) -> Result<String, KeeperError>;

    /// Logs emitted by `address` in `[from, to]`, inclusive.
    async fn get_logs(
        &self,
        address: [u8; 20],
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, KeeperError>;
}

/// Bounds every call of the inner client. Reads that expire become
/// [KeeperError::Timeout]; a send gets its own, longer bound since it waits
/// for the receipt.
pub struct TimeoutClient<C> {
    inner: C,
    read_timeout: Duration,
    send_timeout: Duration,
}

impl<C: ChainClient> TimeoutClient<C> {
    pub fn new(inner: C, read_timeout: Duration, send_timeout: Duration) -> Self {
        Self {
            inner,
            read_timeout,
            send_timeout,
        }
    }
}

async fn bounded<T>(
    method: &'static str,
    after: Duration,
    fut: impl Future<Output = Result<T, KeeperError>>,
) -> Result<T, KeeperError> {
    match tokio::time::timeout(after, fut).await {
        Ok(res) => res,
        Err(_) => {
            tracing::warn!(method, after_ms = after.as_millis() as u64, "chain call timed out");
            Err(KeeperError::Timeout { method, after })
        }
    }
}

#[async_trait]
impl<C: ChainClient> ChainClient for TimeoutClient<C> {
    async fn block_number(&self) -> Result<u64, KeeperError> {
        bounded("eth_blockNumber", self.read_timeout, self.inner.block_number()).await
    }

    async fn block(&self, number: u64) -> Result<BlockHeader, KeeperError> {
        bounded("eth_getBlockByNumber", self.read_timeout, self.inner.block(number)).await
    }

    async fn call_view(&self, to: [u8; 20], calldata: Vec<u8>) -> Result<Vec<u8>, KeeperError> {
        bounded("eth_call", self.read_timeout, self.inner.call_view(to, calldata)).await
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<String, KeeperError> {
        bounded("send_transaction", self.send_timeout, self.inner.send_transaction(tx))
            .await
            .map_err(KeeperError::into_submission)
    }

    async fn get_logs(
        &self,
        address: [u8; 20],
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, KeeperError> {
        bounded("eth_getLogs", self.read_timeout, self.inner.get_logs(address, from, to)).await
    }
}

/// Parse a hex quantity (with or without `0x`).
pub fn parse_hex_u64(s: &str) -> Result<u64, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).map_err(|e| format!("parse hex u64 {s:?}: {e}"))
}
