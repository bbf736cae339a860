//! Keeper service: wires config, chain client, tracker and scheduler together.

use crate::abi::ContractAbi;
use crate::client::{ChainClient, TimeoutClient};
use crate::config::{format_address, KeeperConfig};
use crate::error::KeeperError;
use crate::events::{EventHandler, EventLog, HandlerChain};
use crate::rpc::HttpChainClient;
use crate::scheduler::EpochScheduler;
use crate::signer::Signer;
use crate::status::StatusReporter;
use crate::tracker::EventTracker;
use anyhow::Context;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Chain client used by [Keeper::from_config].
pub type HttpKeeperClient = TimeoutClient<HttpChainClient>;

/// Builder for the keeper.
pub struct KeeperBuilder<C> {
    client: Arc<C>,
    config: KeeperConfig,
    sender: Option<[u8; 20]>,
    abi: Option<ContractAbi>,
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl<C: ChainClient + 'static> KeeperBuilder<C> {
    pub fn new(client: Arc<C>, config: KeeperConfig) -> Self {
        Self {
            client,
            config,
            sender: None,
            abi: None,
            handlers: Vec::new(),
        }
    }

    /// Address `distributeRewards()` is sent from. Defaults to `keys.address`.
    pub fn sender(mut self, address: [u8; 20]) -> Self {
        self.sender = Some(address);
        self
    }

    /// Enables event tracking. Without an ABI only the scheduler runs.
    pub fn abi(mut self, abi: ContractAbi) -> Self {
        self.abi = Some(abi);
        self
    }

    /// Add an event consumer. Runs after the built-in event log, in the
    /// order added.
    pub fn handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn build(self) -> Result<Keeper<C>, KeeperError> {
        let sender = self.sender.or(self.config.keys.address).ok_or_else(|| {
            KeeperError::Config("no sender: set keys.keeper or keys.address".into())
        })?;
        let cancel = CancellationToken::new();
        let events = Arc::new(EventLog::new(self.config.tracker.event_log_capacity));

        let tracker = match self.abi {
            Some(abi) => {
                let mut chain = HandlerChain::new();
                chain.push(events.clone());
                for handler in self.handlers {
                    chain.push(handler);
                }
                Some(Arc::new(EventTracker::new(
                    self.client.clone(),
                    abi,
                    self.config.contracts.reward_distributor,
                    Arc::new(chain),
                    self.config.tracker.clone(),
                    cancel.child_token(),
                )))
            }
            None => {
                tracing::info!("no ABI configured, event tracking disabled");
                None
            }
        };
        let scheduler = Arc::new(EpochScheduler::new(
            self.client,
            self.config.contracts.clone(),
            sender,
            self.config.scheduler.clone(),
            cancel.child_token(),
        ));

        Ok(Keeper {
            tracker,
            scheduler,
            events,
            start_block: self.config.tracker.start_block,
            started: AtomicBool::new(false),
            cancel,
        })
    }
}

/// The running keeper: one event tracker (when an ABI is configured) and one
/// epoch scheduler under a shared cancellation token.
pub struct Keeper<C> {
    tracker: Option<Arc<EventTracker<C>>>,
    scheduler: Arc<EpochScheduler<C>>,
    events: Arc<EventLog>,
    start_block: u64,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl Keeper<HttpKeeperClient> {
    /// Build a keeper talking JSON-RPC over HTTP, as described by `config`.
    pub fn from_config(config: KeeperConfig) -> anyhow::Result<Self> {
        let signer = config
            .keys
            .keeper
            .as_deref()
            .map(Signer::from_hex)
            .transpose()
            .context("load keeper key")?;

        let http = HttpChainClient::new(&config.rpc, signer).context("create rpc client")?;
        let sender = http.signer_address();
        if let Some(address) = sender {
            tracing::info!(sender = %format_address(&address), "signing locally");
        }
        // A send covers submission plus receipt polling.
        let client = TimeoutClient::new(
            http,
            config.rpc.timeout(),
            config.rpc.receipt_timeout() + config.rpc.timeout(),
        );

        let abi = config
            .abi_path
            .as_ref()
            .map(|path| {
                ContractAbi::from_json_file(path)
                    .with_context(|| format!("load ABI {}", path.display()))
            })
            .transpose()?;

        let mut builder = KeeperBuilder::new(Arc::new(client), config);
        if let Some(address) = sender {
            builder = builder.sender(address);
        }
        if let Some(abi) = abi {
            builder = builder.abi(abi);
        }
        Ok(builder.build()?)
    }
}

impl<C: ChainClient + 'static> Keeper<C> {
    pub fn builder(client: Arc<C>, config: KeeperConfig) -> KeeperBuilder<C> {
        KeeperBuilder::new(client, config)
    }

    /// Start both loops. Later calls start nothing and return no handles.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }
        let mut handles = Vec::with_capacity(2);
        if let Some(tracker) = &self.tracker {
            handles.extend(tracker.start(self.start_block));
        }
        handles.push(self.scheduler.clone().spawn());
        handles
    }

    pub fn status(&self) -> StatusReporter {
        StatusReporter::new(
            self.tracker.as_ref().map(|t| t.subscribe()),
            self.scheduler.subscribe(),
            self.events.clone(),
        )
    }

    pub fn tracker(&self) -> Option<&Arc<EventTracker<C>>> {
        self.tracker.as_ref()
    }

    pub fn scheduler(&self) -> &Arc<EpochScheduler<C>> {
        &self.scheduler
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    /// Cancel both loops. In-flight cycles are abandoned.
    pub fn shutdown(&self) {
        tracing::info!("keeper shutting down");
        self.cancel.cancel();
    }
}
