//! Common helpers for integration tests: a scriptable in-memory chain and a
//! few handlers. Not every test binary uses every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use distributor::abi::{
    function_selector, EPOCH_DURATION_SIG, LAST_EPOCH_START_SIG, REWARDS_PER_EPOCH_SIG,
};
use distributor::config::{format_address, parse_address};
use distributor::{
    BlockHeader, ChainClient, ContractAbi, EventHandler, KeeperError, RawLog, TrackedEvent,
    TxRequest,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

pub const DISTRIBUTOR: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
pub const KEEPER: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

pub const ABI: &str = r#"[
    {"type":"function","name":"distributeRewards","inputs":[],"outputs":[],"stateMutability":"nonpayable"},
    {"type":"event","name":"RewardsDistributed","anonymous":false,"inputs":[
        {"name":"epoch","type":"uint256","indexed":true},
        {"name":"amount","type":"uint256","indexed":false}
    ]},
    {"type":"event","name":"Staked","anonymous":false,"inputs":[
        {"name":"user","type":"address","indexed":true},
        {"name":"amount","type":"uint256","indexed":false}
    ]}
]"#;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("distributor=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

pub fn distributor() -> [u8; 20] {
    parse_address(DISTRIBUTOR).unwrap()
}

pub fn keeper_address() -> [u8; 20] {
    parse_address(KEEPER).unwrap()
}

pub fn abi() -> ContractAbi {
    ContractAbi::from_json(ABI).unwrap()
}

fn word(n: u64) -> String {
    format!("{:064x}", n)
}

pub fn tx_hash(block: u64, index: u64) -> String {
    format!("0x{:032x}{:032x}", block, index)
}

/// `RewardsDistributed(epoch, amount)` emitted by the distributor.
pub fn rewards_log(block: u64, index: u64, epoch: u64, amount: u64) -> RawLog {
    let topic0 = abi().topic0_hex("RewardsDistributed").unwrap();
    RawLog {
        address: DISTRIBUTOR.to_string(),
        topics: vec![topic0, format!("0x{}", word(epoch))],
        data: format!("0x{}", word(amount)),
        block_number: format!("0x{block:x}"),
        transaction_hash: tx_hash(block, index),
        log_index: format!("0x{index:x}"),
        removed: None,
    }
}

/// A log whose topic0 is not in the ABI.
pub fn unknown_log(block: u64, index: u64) -> RawLog {
    RawLog {
        topics: vec![format!("0x{}", "ee".repeat(32))],
        ..rewards_log(block, index, 0, 0)
    }
}

#[derive(Default)]
struct MockState {
    tip: u64,
    latest_timestamp: u64,
    timestamps: HashMap<u64, u64>,
    epoch_duration: u64,
    last_epoch_start: u64,
    rewards_per_epoch: u64,
    logs: Vec<RawLog>,
    send_results: VecDeque<Result<String, KeeperError>>,
    failing_reads: u32,
    sent: Vec<TxRequest>,
    log_queries: Vec<(u64, u64)>,
    block_queries: Vec<u64>,
}

/// In-memory chain. Logs are returned in insertion order so callers must sort.
/// A successful send moves `lastEpochStart` to the latest timestamp, the way
/// the contract does.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
    hang_reads: AtomicBool,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tip(&self, tip: u64) {
        self.state.lock().unwrap().tip = tip;
    }

    /// Latest block timestamp plus the three epoch views.
    pub fn set_epoch(&self, latest_timestamp: u64, last_epoch_start: u64, epoch_duration: u64) {
        let mut s = self.state.lock().unwrap();
        s.latest_timestamp = latest_timestamp;
        s.last_epoch_start = last_epoch_start;
        s.epoch_duration = epoch_duration;
        s.rewards_per_epoch = 1_000;
    }

    pub fn set_block_timestamp(&self, block: u64, timestamp: u64) {
        self.state.lock().unwrap().timestamps.insert(block, timestamp);
    }

    pub fn push_log(&self, log: RawLog) {
        self.state.lock().unwrap().logs.push(log);
    }

    /// Queue the result of the next send. Unscripted sends return `"0xabc"`.
    pub fn script_send(&self, result: Result<String, KeeperError>) {
        self.state.lock().unwrap().send_results.push_back(result);
    }

    /// The next `n` reads fail with an RPC error.
    pub fn fail_next_reads(&self, n: u32) {
        self.state.lock().unwrap().failing_reads = n;
    }

    pub fn hang_reads(&self, hang: bool) {
        self.hang_reads.store(hang, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<TxRequest> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().log_queries.clone()
    }

    pub fn block_queries(&self) -> Vec<u64> {
        self.state.lock().unwrap().block_queries.clone()
    }

    async fn read<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> Result<T, KeeperError> {
        if self.hang_reads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let mut s = self.state.lock().unwrap();
        if s.failing_reads > 0 {
            s.failing_reads -= 1;
            return Err(KeeperError::Rpc("mock: connection refused".into()));
        }
        Ok(f(&mut s))
    }
}

fn uint_word(n: u64) -> Vec<u8> {
    let mut out = vec![0u8; 32];
    out[24..].copy_from_slice(&n.to_be_bytes());
    out
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64, KeeperError> {
        self.read(|s| s.tip).await
    }

    async fn block(&self, number: u64) -> Result<BlockHeader, KeeperError> {
        self.read(|s| {
            s.block_queries.push(number);
            BlockHeader {
                number,
                timestamp: s.timestamps.get(&number).copied().unwrap_or(s.latest_timestamp),
            }
        })
        .await
    }

    async fn call_view(&self, to: [u8; 20], calldata: Vec<u8>) -> Result<Vec<u8>, KeeperError> {
        assert_eq!(format_address(&to), DISTRIBUTOR);
        let value = self
            .read(|s| {
                let selector = &calldata[..4];
                if selector == function_selector(EPOCH_DURATION_SIG) {
                    Some(s.epoch_duration)
                } else if selector == function_selector(LAST_EPOCH_START_SIG) {
                    Some(s.last_epoch_start)
                } else if selector == function_selector(REWARDS_PER_EPOCH_SIG) {
                    Some(s.rewards_per_epoch)
                } else {
                    None
                }
            })
            .await?;
        value
            .map(uint_word)
            .ok_or_else(|| KeeperError::Rpc("execution reverted".into()))
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<String, KeeperError> {
        let mut s = self.state.lock().unwrap();
        s.sent.push(tx);
        let result = s.send_results.pop_front().unwrap_or_else(|| Ok("0xabc".to_string()));
        if result.is_ok() {
            s.last_epoch_start = s.latest_timestamp;
        }
        result
    }

    async fn get_logs(
        &self,
        address: [u8; 20],
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, KeeperError> {
        assert_eq!(format_address(&address), DISTRIBUTOR);
        self.read(|s| {
            s.log_queries.push((from, to));
            s.logs
                .iter()
                .filter(|l| {
                    let b = l.block_number_u64().unwrap();
                    b >= from && b <= to
                })
                .cloned()
                .collect()
        })
        .await
    }
}

/// Records every delivery, duplicates included.
#[derive(Default)]
pub struct Recording {
    events: Mutex<Vec<TrackedEvent>>,
}

impl Recording {
    pub fn events(&self) -> Vec<TrackedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn blocks(&self) -> Vec<(u64, u64)> {
        self.events()
            .iter()
            .map(|e| (e.block_number, e.log_index))
            .collect()
    }
}

#[async_trait]
impl EventHandler for Recording {
    async fn handle(&self, event: &TrackedEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Fails the first delivery of events in `fail_at`, then succeeds.
pub struct FailOnce {
    fail_at: HashSet<u64>,
    failed: Mutex<HashSet<u64>>,
    pub inner: Recording,
}

impl FailOnce {
    pub fn at_blocks(blocks: &[u64]) -> Self {
        Self {
            fail_at: blocks.iter().copied().collect(),
            failed: Mutex::new(HashSet::new()),
            inner: Recording::default(),
        }
    }
}

#[async_trait]
impl EventHandler for FailOnce {
    async fn handle(&self, event: &TrackedEvent) -> anyhow::Result<()> {
        if self.fail_at.contains(&event.block_number)
            && self.failed.lock().unwrap().insert(event.block_number)
        {
            anyhow::bail!("consumer unavailable");
        }
        self.inner.handle(event).await
    }
}

/// Blocks every delivery until released.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
    pub inner: Recording,
}

#[async_trait]
impl EventHandler for Gate {
    async fn handle(&self, event: &TrackedEvent) -> anyhow::Result<()> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.handle(event).await
    }
}

/// Poll `cond` until it holds or `within` elapses.
pub async fn wait_until<F>(within: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

/// Await `fut`, failing the test if it does not finish within `within`.
pub async fn within<T>(within: Duration, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(within, fut)
        .await
        .expect("future did not complete in time")
}
