//! EpochScheduler: polls epoch state and calls `distributeRewards()` once the
//! current epoch has elapsed.
//!
//! One cycle at a time. The next cycle is scheduled `poll_interval` after the
//! previous one finishes, so a slow submission delays the loop instead of
//! overlapping with it. The contract rejects early or duplicate calls; the
//! scheduler only avoids sending obviously premature ones.

use crate::abi::{
    decode_uint_return, encode_call, DISTRIBUTE_REWARDS_SIG, EPOCH_DURATION_SIG,
    LAST_EPOCH_START_SIG, REWARDS_PER_EPOCH_SIG,
};
use crate::client::{ChainClient, TxRequest};
use crate::config::{format_address, ContractAddresses, SchedulerConfig};
use crate::error::{KeeperError, RecordedError};
use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Chain and contract state read at the start of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochSnapshot {
    pub latest_block: u64,
    pub latest_timestamp: u64,
    #[serde(serialize_with = "ser_decimal")]
    pub epoch_duration: U256,
    #[serde(serialize_with = "ser_decimal")]
    pub last_epoch_start: U256,
    #[serde(serialize_with = "ser_decimal")]
    pub rewards_per_epoch: U256,
}

impl EpochSnapshot {
    /// Strictly greater: an epoch exactly `epoch_duration` old is not due yet.
    /// A timestamp before the epoch start counts as zero elapsed.
    pub fn epoch_elapsed(&self) -> bool {
        let elapsed = U256::from(self.latest_timestamp).saturating_sub(self.last_epoch_start);
        elapsed > self.epoch_duration
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerInfo {
    pub sync: Option<EpochSnapshot>,
    /// Time of the last successful distribution.
    pub last_update_time: Option<DateTime<Utc>>,
    pub last_success_tx_hash: Option<String>,
    /// Never populated; reverted transactions surface through `last_error`.
    pub last_error_tx_hash: Option<String>,
    pub last_error: Option<RecordedError>,
    pub contracts: ContractAddresses,
    pub poll_interval_ms: u64,
    pub cycles: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Skipped,
    Distributed { tx_hash: String },
}

pub struct EpochScheduler<C> {
    client: Arc<C>,
    contracts: ContractAddresses,
    sender: [u8; 20],
    config: SchedulerConfig,
    state: watch::Sender<SchedulerInfo>,
    cancel: CancellationToken,
}

impl<C: ChainClient + 'static> EpochScheduler<C> {
    pub fn new(
        client: Arc<C>,
        contracts: ContractAddresses,
        sender: [u8; 20],
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerInfo {
            sync: None,
            last_update_time: None,
            last_success_tx_hash: None,
            last_error_tx_hash: None,
            last_error: None,
            contracts: contracts.clone(),
            poll_interval_ms: config.poll_interval_ms,
            cycles: 0,
        });
        Self {
            client,
            contracts,
            sender,
            config,
            state,
            cancel,
        }
    }

    /// Spawn the scheduling loop. The first cycle runs immediately.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub fn info(&self) -> SchedulerInfo {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerInfo> {
        self.state.subscribe()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn run(self: Arc<Self>) {
        tracing::info!(
            distributor = %format_address(&self.contracts.reward_distributor),
            sender = %format_address(&self.sender),
            "epoch scheduler started"
        );
        let poll_interval = self.config.poll_interval();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.run_cycle() => {}
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(poll_interval) => {}
            }
        }
        tracing::info!("epoch scheduler stopped");
    }

    /// One guarded cycle: errors are recorded and logged, never propagated.
    pub async fn run_cycle(&self) -> Option<CycleOutcome> {
        let result = self.execute().await;
        self.state.send_modify(|s| {
            s.cycles += 1;
            s.last_error = result.as_ref().err().map(RecordedError::from);
        });
        match result {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!(reason = %e, kind = ?e.kind(), "distribution cycle failed");
                None
            }
        }
    }

    /// Read the epoch, publish it, and distribute if the epoch has elapsed.
    pub async fn execute(&self) -> Result<CycleOutcome, KeeperError> {
        let snapshot = self.read_epoch().await?;
        let due = snapshot.epoch_elapsed();
        tracing::debug!(
            block = snapshot.latest_block,
            timestamp = snapshot.latest_timestamp,
            last_epoch_start = %snapshot.last_epoch_start,
            epoch_duration = %snapshot.epoch_duration,
            due,
            "epoch state"
        );
        self.state.send_modify(|s| s.sync = Some(snapshot));
        if !due {
            return Ok(CycleOutcome::Skipped);
        }

        let tx = TxRequest {
            to: self.contracts.reward_distributor,
            from: self.sender,
            data: encode_call(DISTRIBUTE_REWARDS_SIG),
            gas_limit: self.config.gas_limit,
            gas_price: self.config.gas_price,
        };
        let tx_hash = self
            .client
            .send_transaction(tx)
            .await
            .map_err(KeeperError::into_submission)?;
        tracing::info!(%tx_hash, "rewards distributed");
        let now = Utc::now();
        self.state.send_modify(|s| {
            s.last_success_tx_hash = Some(tx_hash.clone());
            s.last_update_time = Some(now);
        });
        Ok(CycleOutcome::Distributed { tx_hash })
    }

    async fn read_epoch(&self) -> Result<EpochSnapshot, KeeperError> {
        let latest_block = self.client.block_number().await?;
        let header = self.client.block(latest_block).await?;
        let (epoch_duration, last_epoch_start, rewards_per_epoch) = tokio::try_join!(
            self.view(EPOCH_DURATION_SIG),
            self.view(LAST_EPOCH_START_SIG),
            self.view(REWARDS_PER_EPOCH_SIG),
        )?;
        Ok(EpochSnapshot {
            latest_block,
            latest_timestamp: header.timestamp,
            epoch_duration,
            last_epoch_start,
            rewards_per_epoch,
        })
    }

    async fn view(&self, signature: &str) -> Result<U256, KeeperError> {
        let out = self
            .client
            .call_view(self.contracts.reward_distributor, encode_call(signature))
            .await?;
        decode_uint_return(&out)
    }
}

fn ser_decimal<S: Serializer>(v: &U256, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&v.to_string())
}
