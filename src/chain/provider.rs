//! EVM chain queries with multi-RPC support and automatic failover

use super::{BlockInfo, Chain, ChainApi, ChainResult, TxInfo};
use crate::config::ChainRpcConfig;
use crate::error::{ChainError, SwapError, SwapResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Multi-provider `ChainApi` for an EVM chain
pub struct EvmChainProvider {
    chain: Chain,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl EvmChainProvider {
    /// Create a provider from the chain's RPC configuration
    pub fn new(config: &ChainRpcConfig) -> SwapResult<Self> {
        if !config.chain.is_evm() {
            return Err(SwapError::Config(format!(
                "{} is not an EVM chain",
                config.chain
            )));
        }

        let mut http_providers = Vec::new();
        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider.interval(Duration::from_millis(100)));
                    debug!("Added HTTP provider for {}: {}", config.chain, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(SwapError::Config(format!(
                "No valid RPC providers for {}",
                config.chain
            )));
        }

        Ok(Self {
            chain: config.chain,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("{} failover to provider {}", self.chain, next);
    }
}

#[async_trait]
impl ChainApi for EvmChainProvider {
    async fn block_height(&self) -> ChainResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!("Failed to get block number from {}: {}", self.chain, e);
                    self.failover();
                }
            }
        }

        Err(ChainError::Rpc(format!("All {} providers failed", self.chain)))
    }

    async fn block_by_number(&self, number: u64) -> ChainResult<BlockInfo> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block(number).await {
                Ok(Some(block)) => {
                    return Ok(BlockInfo {
                        number,
                        timestamp: block.timestamp.as_u64(),
                    })
                }
                Ok(None) => return Err(ChainError::BlockNotFound(number)),
                Err(e) => {
                    warn!("Failed to get block {} from {}: {}", number, self.chain, e);
                    self.failover();
                }
            }
        }

        Err(ChainError::Rpc(format!("All {} providers failed", self.chain)))
    }

    async fn transaction_by_hash(&self, hash: &str) -> ChainResult<TxInfo> {
        let tx_hash = parse_tx_hash(hash)?;

        let tx = loop_providers(self, |provider| async move {
            provider.get_transaction(tx_hash).await
        })
        .await?
        .ok_or_else(|| ChainError::TxNotFound(hash.to_string()))?;

        let confirmations = match tx.block_number {
            Some(included) => confirmations(self.block_height().await?, included.as_u64()),
            None => 0,
        };

        Ok(TxInfo::new(hash, confirmations))
    }
}

/// Run a provider call, failing over through every configured RPC
async fn loop_providers<'a, T, F, Fut>(
    provider: &'a EvmChainProvider,
    call: F,
) -> ChainResult<T>
where
    F: Fn(&'a Provider<Http>) -> Fut,
    Fut: std::future::Future<Output = Result<T, ProviderError>>,
{
    for _ in 0..provider.http_providers.len() {
        match call(provider.http()).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!("RPC call on {} failed: {}", provider.chain, e);
                provider.failover();
            }
        }
    }

    Err(ChainError::Rpc(format!(
        "All {} providers failed",
        provider.chain
    )))
}

fn parse_tx_hash(hash: &str) -> ChainResult<H256> {
    H256::from_str(hash).map_err(|e| ChainError::Rpc(format!("Invalid tx hash {}: {}", hash, e)))
}

/// Confirmation count of a transaction included at `included` with chain head `head`
pub(crate) fn confirmations(head: u64, included: u64) -> u64 {
    if head < included {
        return 0;
    }
    head - included + 1
}
