//! EventTracker: forward-only, resumable scanning of the distributor's logs.
//!
//! Each cycle reads the chain tip and scans `[last_scanned_block + 1, tip]` in
//! chunks of at most `max_block_range` blocks. Logs are sorted by
//! `(block_number, log_index)`, decoded against the contract ABI and handed to
//! the [EventHandler] one at a time. The cursor moves past a chunk only once
//! every event in it has been delivered, so a decode or handler failure
//! re-scans the failing chunk on the next cycle (at-least-once delivery).
//!
//! The loop owns the cursor. Readers get [TrackerInfo] snapshots through a
//! `watch` channel and never wait on a scan.

use crate::abi::ContractAbi;
use crate::client::{ChainClient, RawLog};
use crate::config::{format_address, TrackerConfig};
use crate::cursor::Cursor;
use crate::error::{KeeperError, RecordedError};
use crate::events::{EventHandler, TrackedEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Snapshot of tracker progress and health.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerInfo {
    pub contract_address: String,
    /// Event names the ABI can decode.
    pub events: Vec<String>,
    pub last_scanned_block: u64,
    /// Chain tip seen by the latest cycle.
    pub chain_tip: Option<u64>,
    pub is_running: bool,
    pub last_error: Option<RecordedError>,
    pub last_scan_time: Option<DateTime<Utc>>,
    pub events_delivered: u64,
}

/// Result of one successful scan cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Nothing new since the last cycle.
    UpToDate { tip: u64 },
    Scanned { from: u64, to: u64, events: usize },
}

pub struct EventTracker<C> {
    client: Arc<C>,
    abi: ContractAbi,
    contract_address: [u8; 20],
    handler: Arc<dyn EventHandler>,
    config: TrackerConfig,
    state: watch::Sender<TrackerInfo>,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl<C: ChainClient + 'static> EventTracker<C> {
    pub fn new(
        client: Arc<C>,
        abi: ContractAbi,
        contract_address: [u8; 20],
        handler: Arc<dyn EventHandler>,
        config: TrackerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(TrackerInfo {
            contract_address: format_address(&contract_address),
            events: abi.event_names(),
            last_scanned_block: Cursor::starting_at(config.start_block).last_scanned_block(),
            chain_tip: None,
            is_running: false,
            last_error: None,
            last_scan_time: None,
            events_delivered: 0,
        });
        Self {
            client,
            abi,
            contract_address,
            handler,
            config,
            state,
            started: AtomicBool::new(false),
            cancel,
        }
    }

    /// Start the polling loop at `from_block` (inclusive). Only the first call
    /// starts a loop; later calls return `None`.
    pub fn start(self: &Arc<Self>, from_block: u64) -> Option<JoinHandle<()>> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("event tracker already started");
            return None;
        }
        let cursor = Cursor::starting_at(from_block);
        self.state.send_modify(|s| {
            s.is_running = true;
            s.last_scanned_block = cursor.last_scanned_block();
        });
        let this = Arc::clone(self);
        Some(tokio::spawn(this.run(cursor)))
    }

    /// Stop the loop. The current cycle is abandoned; its window was not
    /// committed and would be re-scanned by a new tracker.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Current snapshot. Never waits on the scan loop.
    pub fn info(&self) -> TrackerInfo {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerInfo> {
        self.state.subscribe()
    }

    async fn run(self: Arc<Self>, mut cursor: Cursor) {
        tracing::info!(
            contract = %format_address(&self.contract_address),
            from_block = cursor.next_block(),
            "event tracker started"
        );
        let poll_interval = self.config.poll_interval();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = self.scan_once(&mut cursor) => match res {
                    Ok(ScanOutcome::UpToDate { tip }) => {
                        tracing::trace!(tip, "no new blocks");
                    }
                    Ok(ScanOutcome::Scanned { from, to, events }) => {
                        tracing::debug!(from, to, events, "scan cycle complete");
                    }
                    Err(e) => {
                        tracing::warn!(
                            reason = %e,
                            kind = ?e.kind(),
                            next_block = cursor.next_block(),
                            "scan cycle failed, range will be retried"
                        );
                    }
                },
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(poll_interval) => {}
            }
        }
        self.state.send_modify(|s| s.is_running = false);
        tracing::info!(last_scanned_block = cursor.last_scanned_block(), "event tracker stopped");
    }

    /// Run a single scan cycle and record its outcome.
    pub async fn scan_once(&self, cursor: &mut Cursor) -> Result<ScanOutcome, KeeperError> {
        let result = self.scan(cursor).await;
        let now = Utc::now();
        self.state.send_modify(|s| {
            s.last_scanned_block = cursor.last_scanned_block();
            s.last_scan_time = Some(now);
            s.last_error = result.as_ref().err().map(RecordedError::from);
        });
        result
    }

    async fn scan(&self, cursor: &mut Cursor) -> Result<ScanOutcome, KeeperError> {
        let tip = self.client.block_number().await?;
        self.state.send_modify(|s| s.chain_tip = Some(tip));
        let Some(range) = cursor.pending(tip) else {
            return Ok(ScanOutcome::UpToDate { tip });
        };
        let (start, end) = range.into_inner();
        let span = self.config.max_block_range.max(1);

        let mut delivered = 0;
        let mut from = start;
        while from <= end {
            let to = from.saturating_add(span - 1).min(end);
            let logs = self.client.get_logs(self.contract_address, from, to).await?;
            let events = self.decode_window(logs).await?;
            tracing::debug!(from, to, count = events.len(), "decoded window");

            for event in &events {
                self.handler
                    .handle(event)
                    .await
                    .map_err(|e| KeeperError::Callback {
                        tx_hash: event.transaction_hash.clone(),
                        log_index: event.log_index,
                        reason: format!("{e:#}"),
                    })?;
                delivered += 1;
                self.state.send_modify(|s| s.events_delivered += 1);
            }

            cursor.advance_to(to);
            self.state
                .send_modify(|s| s.last_scanned_block = cursor.last_scanned_block());
            if to == u64::MAX {
                break;
            }
            from = to + 1;
        }
        Ok(ScanOutcome::Scanned {
            from: start,
            to: end,
            events: delivered,
        })
    }

    /// Filter, order and decode one window. Fails as a whole if any log fails.
    async fn decode_window(&self, logs: Vec<RawLog>) -> Result<Vec<TrackedEvent>, KeeperError> {
        let contract = format_address(&self.contract_address);
        let mut ordered = Vec::with_capacity(logs.len());
        for log in logs {
            if log.is_removed() || !log.address.eq_ignore_ascii_case(&contract) {
                continue;
            }
            ordered.push((log.block_number_u64()?, log.log_index_u64()?, log));
        }
        ordered.sort_by_key(|(block, index, _)| (*block, *index));
        ordered.dedup_by_key(|(block, index, _)| (*block, *index));

        let mut timestamps: HashMap<u64, u64> = HashMap::new();
        let mut events = Vec::with_capacity(ordered.len());
        for (block_number, log_index, log) in ordered {
            let decoded = self.abi.decode_log(&log)?;
            let timestamp = if self.config.resolve_timestamps {
                Some(match timestamps.get(&block_number) {
                    Some(ts) => *ts,
                    None => {
                        let ts = self.client.block(block_number).await?.timestamp;
                        timestamps.insert(block_number, ts);
                        ts
                    }
                })
            } else {
                None
            };
            events.push(TrackedEvent {
                name: decoded.name,
                block_number,
                transaction_hash: log.transaction_hash,
                log_index,
                return_values: decoded.return_values,
                timestamp,
            });
        }
        Ok(events)
    }
}
