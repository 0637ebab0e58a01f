//! Wiring of store, providers, driver and API into a running service
//!
//! The hosting wallet supplies the pieces it owns (per-account chain clients,
//! the account directory and the notification sink); everything else is built
//! from `Settings`.

use crate::api::{self, AppState};
use crate::chain::{ClientFactory, EvmChainProvider, Network};
use crate::config::Settings;
use crate::error::SwapResult;
use crate::notify::Notifier;
use crate::quote::AgentClient;
use crate::scheduler::{ActionLocks, SwapDriver};
use crate::state::{MemorySwapStore, PgSwapStore, SwapStore};
use crate::swap::{HtlcSwapProvider, NewSwapRequest, SwapProvider, SwapProviderDeps, SwapRecord};
use crate::wallet::AccountDirectory;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

/// Upper bound on waiting for the driver's in-flight tick at shutdown
const DRIVER_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// A started orchestrator with its background tasks
pub struct Orchestrator {
    driver: Arc<SwapDriver>,
    provider: Arc<dyn SwapProvider>,
    networks: Vec<Network>,
    chains: HashMap<String, Arc<EvmChainProvider>>,
    driver_task: JoinHandle<()>,
    /// API server and market refresher
    tasks: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Build every component and spawn the driver loop, the market refresher
    /// and the API server
    pub async fn start(
        settings: Settings,
        clients: Arc<dyn ClientFactory>,
        accounts: Arc<dyn AccountDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> SwapResult<Self> {
        info!("Starting HTLC swap orchestrator v{}", env!("CARGO_PKG_VERSION"));

        let store: Arc<dyn SwapStore> = match &settings.database {
            Some(database) => {
                let store = PgSwapStore::new(database).await?;
                store.run_migrations().await?;
                Arc::new(store)
            }
            None => {
                warn!("No database configured, swaps are kept in memory only");
                Arc::new(MemorySwapStore::new())
            }
        };

        let mut chains = HashMap::new();
        for (name, config) in settings.enabled_chains() {
            chains.insert(name.clone(), Arc::new(EvmChainProvider::new(config)?));
            info!("Chain {} ({}) initialized", name, config.chain);
        }

        let networks = settings
            .agents
            .keys()
            .map(|name| name.parse::<Network>())
            .collect::<SwapResult<Vec<_>>>()?;

        let assets = settings.asset_registry();
        let orders = Arc::new(AgentClient::new(&settings.agents)?);
        let provider: Arc<dyn SwapProvider> = Arc::new(HtlcSwapProvider::new(
            settings.scheduler.provider_id.clone(),
            assets.clone(),
            SwapProviderDeps {
                clients,
                orders,
                accounts,
                notifier: notifier.clone(),
                locks: Arc::new(ActionLocks::new()),
            },
            &settings.scheduler,
        ));

        refresh_markets(provider.as_ref(), &networks).await;

        let mut driver = SwapDriver::new(
            store.clone(),
            notifier,
            assets.clone(),
            settings.scheduler.poll_interval(),
        );
        driver.register_provider(provider.clone());
        let driver = Arc::new(driver);

        let driver_task = tokio::spawn({
            let driver = driver.clone();
            async move {
                if let Err(e) = driver.run().await {
                    error!("Swap driver error: {}", e);
                }
            }
        });

        let market_task = tokio::spawn({
            let provider = provider.clone();
            let networks = networks.clone();
            let period = settings.scheduler.market_refresh_interval();
            async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // the first tick completes immediately and startup already loaded markets
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    refresh_markets(provider.as_ref(), &networks).await;
                }
            }
        });

        let api_task = tokio::spawn({
            let config = settings.api.clone();
            let state = AppState {
                store,
                assets: Arc::new(assets),
            };
            async move {
                if let Err(e) = api::run_server(config, state).await {
                    error!("API server error: {}", e);
                }
            }
        });

        info!("API server: http://{}:{}", settings.api.host, settings.api.port);

        Ok(Self {
            driver,
            provider,
            networks,
            chains,
            driver_task,
            tasks: vec![market_task, api_task],
        })
    }

    pub fn driver(&self) -> &Arc<SwapDriver> {
        &self.driver
    }

    /// Configured EVM chain by its settings name
    pub fn chain(&self, name: &str) -> Option<Arc<EvmChainProvider>> {
        self.chains.get(name).cloned()
    }

    /// Reload market data from every agent now; returns the number of markets
    pub async fn refresh_markets(&self) -> usize {
        refresh_markets(self.provider.as_ref(), &self.networks).await
    }

    /// Start a swap with the configured provider
    pub async fn create_swap(
        &self,
        network: Network,
        wallet_id: &str,
        request: NewSwapRequest,
    ) -> SwapResult<SwapRecord> {
        self.driver
            .create_swap(self.provider.id(), network, wallet_id, request)
            .await
    }

    /// Stop the driver once its in-flight tick is persisted, then abort the
    /// remaining tasks
    pub async fn shutdown(self) {
        info!("Shutdown requested, stopping...");
        drain_driver(&self.driver, self.driver_task, DRIVER_SHUTDOWN_GRACE).await;
        for task in self.tasks {
            task.abort();
        }
        info!("HTLC swap orchestrator stopped");
    }
}

/// Load market data for each network; failures are logged per network
async fn refresh_markets(provider: &dyn SwapProvider, networks: &[Network]) -> usize {
    let mut total = 0;
    for network in networks {
        match provider.update_market_data(*network).await {
            Ok(count) => {
                info!("Loaded {} markets for {}", count, network);
                total += count;
            }
            Err(e) => warn!("Failed to load markets for {}: {}", network, e),
        }
    }
    total
}

/// Stop `driver` and wait up to `grace` for its loop to exit; returns whether it
/// exited cleanly. Within `grace` a step is never cut between broadcast and save.
async fn drain_driver(driver: &SwapDriver, mut task: JoinHandle<()>, grace: Duration) -> bool {
    driver.stop().await;
    match tokio::time::timeout(grace, &mut task).await {
        Ok(_) => true,
        Err(_) => {
            error!("Swap driver still busy after {:?}, aborting", grace);
            task.abort();
            false
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
