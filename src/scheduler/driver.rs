//! Swap driver - steps every active swap on a timer
//!
//! Each tick loads the active swaps from the store and performs one step per
//! swap, all swaps concurrently. A step's update is merged and persisted
//! before the next tick, so a swap's handlers never overlap and a restart
//! resumes from the last saved status.

use crate::assets::AssetRegistry;
use crate::chain::Network;
use crate::error::{SwapError, SwapResult};
use crate::events::SwapEvent;
use crate::metrics;
use crate::notify::Notifier;
use crate::state::SwapStore;
use crate::swap::{NewSwapRequest, SwapProvider, SwapRecord};

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 1024;

/// Drives persisted swaps through their providers
pub struct SwapDriver {
    /// Providers keyed by id
    providers: HashMap<String, Arc<dyn SwapProvider>>,
    store: Arc<dyn SwapStore>,
    notifier: Arc<dyn Notifier>,
    assets: AssetRegistry,
    poll_interval: Duration,
    events: broadcast::Sender<SwapEvent>,
    /// Shutdown flag
    shutdown: Arc<RwLock<bool>>,
}

impl SwapDriver {
    pub fn new(
        store: Arc<dyn SwapStore>,
        notifier: Arc<dyn Notifier>,
        assets: AssetRegistry,
        poll_interval: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            providers: HashMap::new(),
            store,
            notifier,
            assets,
            poll_interval,
            events,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    pub fn register_provider(&mut self, provider: Arc<dyn SwapProvider>) {
        info!("Registered swap provider {}", provider.id());
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn provider(&self, id: &str) -> SwapResult<&Arc<dyn SwapProvider>> {
        self.providers
            .get(id)
            .ok_or_else(|| SwapError::UnknownProvider(id.to_string()))
    }

    pub fn store(&self) -> &Arc<dyn SwapStore> {
        &self.store
    }

    /// Subscribe to swap lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SwapEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SwapEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    /// Start a swap and persist it
    pub async fn create_swap(
        &self,
        provider_id: &str,
        network: Network,
        wallet_id: &str,
        request: NewSwapRequest,
    ) -> SwapResult<SwapRecord> {
        let provider = self.provider(provider_id)?;
        let swap = provider.new_swap(network, wallet_id, request).await?;

        let record = SwapRecord {
            network,
            wallet_id: wallet_id.to_string(),
            swap,
        };
        self.store.insert(&record).await?;

        metrics::record_swap_created(network.as_str(), &record.swap.from, &record.swap.to);
        self.emit(SwapEvent::created(&record));
        info!(
            "Swap {} created with {} for wallet {}",
            record.swap.id, provider_id, wallet_id
        );
        Ok(record)
    }

    /// Perform one step; returns the persisted record if the swap moved
    pub async fn step(&self, record: SwapRecord) -> SwapResult<Option<SwapRecord>> {
        let provider = self.provider(&record.swap.provider)?;
        let status = record.swap.status;

        let started = Instant::now();
        let result = provider
            .perform_next_swap_action(record.network, &record.wallet_id, &record.swap)
            .await;
        metrics::record_action_latency(status, started.elapsed().as_secs_f64());

        let update = match result {
            Ok(Some(update)) => update,
            Ok(None) => return Ok(None),
            Err(e) => {
                metrics::record_action_error(status, e.is_retryable());
                self.emit(SwapEvent::ActionFailed {
                    swap_id: record.swap.id.clone(),
                    status,
                    error: e.to_string(),
                    retryable: e.is_retryable(),
                });
                return Err(e);
            }
        };

        let mut next = record;
        next.swap.apply(&update)?;
        self.store.save(&next).await?;

        if next.swap.status != status {
            metrics::record_transition(status, next.swap.status);
            self.emit(SwapEvent::Transitioned {
                swap_id: next.swap.id.clone(),
                from_status: status,
                to_status: next.swap.status,
            });

            let descriptor = next.swap.status.descriptor();
            if let Some(notification) = descriptor.notification(&next.swap, &self.assets) {
                self.notifier.notify(notification);
            }
        }

        Ok(Some(next))
    }

    async fn step_logged(&self, record: SwapRecord) -> bool {
        let swap_id = record.swap.id.clone();
        let status = record.swap.status;

        match self.step(record).await {
            Ok(Some(next)) => {
                info!("Swap {}: {} -> {}", swap_id, status, next.swap.status);
                true
            }
            Ok(None) => false,
            Err(e) => {
                if e.should_alert() {
                    error!("ALERT swap {} in {}: {}", swap_id, status, e);
                } else if e.is_retryable() {
                    warn!("Swap {} in {} will retry: {}", swap_id, status, e);
                } else {
                    error!("Swap {} in {} failed: {}", swap_id, status, e);
                }
                false
            }
        }
    }

    /// Step every active swap once; returns how many moved
    pub async fn tick(&self) -> SwapResult<usize> {
        let records = self.store.active().await?;
        metrics::record_active_swaps(records.len());
        if records.is_empty() {
            return Ok(0);
        }

        debug!("Stepping {} active swaps", records.len());
        let moved = join_all(records.into_iter().map(|r| self.step_logged(r))).await;
        Ok(moved.into_iter().filter(|m| *m).count())
    }

    /// Main loop
    pub async fn run(&self) -> SwapResult<()> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Swap driver started");

        loop {
            ticker.tick().await;
            if *self.shutdown.read().await {
                break;
            }

            if let Err(e) = self.tick().await {
                error!("Error driving swaps: {}", e);
            }
        }

        info!("Swap driver stopped");
        Ok(())
    }

    /// Stop the driver; an in-flight tick still persists its transitions
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        info!("Swap driver shutdown initiated");
    }
}
