//! Off-chain keeper for the RewardDistributor contract.
//!
//! - **EpochScheduler**: polls `epochDuration()`, `lastEpochStart()` and
//!   `rewardsPerEpoch()` and sends `distributeRewards()` once the current epoch
//!   has elapsed (fixed gas, one submission per cycle, errors recorded and
//!   retried next cycle).
//! - **EventTracker**: resumable, forward-only scan of the contract's logs with
//!   ordered, at-least-once delivery to an [EventHandler]. The cursor is in
//!   memory only.
//! - **StatusReporter**: non-blocking snapshots of both loops and the recorded
//!   events, serializable to JSON.
//!
//! The chain is reached through [ChainClient]; [HttpChainClient] implements it
//! over JSON-RPC and [TimeoutClient] bounds every call.

pub mod abi;
pub mod client;
pub mod config;
pub mod cursor;
pub mod error;
pub mod events;
pub mod keeper;
pub mod rpc;
pub mod scheduler;
pub mod signer;
pub mod status;
pub mod tracker;

pub use abi::{ContractAbi, DecodedLog};
pub use client::{BlockHeader, ChainClient, RawLog, TimeoutClient, TxRequest};
pub use config::{
    ContractAddresses, KeeperConfig, KeysConfig, RpcConfig, SchedulerConfig, TrackerConfig,
};
pub use cursor::Cursor;
pub use error::{ErrorKind, KeeperError, RecordedError};
pub use events::{EventHandler, EventLog, HandlerChain, TrackedEvent};
pub use keeper::{HttpKeeperClient, Keeper, KeeperBuilder};
pub use rpc::HttpChainClient;
pub use scheduler::{CycleOutcome, EpochScheduler, EpochSnapshot, SchedulerInfo};
pub use signer::Signer;
pub use status::{KeeperStatus, StatusReporter};
pub use tracker::{EventTracker, ScanOutcome, TrackerInfo};
