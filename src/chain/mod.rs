//! Chain module - the per-asset client interfaces the orchestrator drives
//!
//! This module provides:
//! - `ChainApi` for read-only chain queries (height, block time, confirmations)
//! - `SwapApi` for the HTLC operations a signing client performs
//! - A client registry keyed by network, wallet, asset and account
//! - Chain-specific finality (safe confirmation) tables
//! - An ethers-backed `ChainApi` with multi-RPC failover for EVM chains

pub mod finality;
pub mod provider;

pub use finality::{is_final, safe_confirmations};
pub use provider::EvmChainProvider;

use crate::error::{ChainError, SwapError, SwapResult};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Result type for chain client calls
pub type ChainResult<T> = Result<T, ChainError>;

/// Network a wallet operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Network {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(SwapError::Config(format!("Unknown network {}", other))),
        }
    }
}

/// Blockchains an asset can live on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Bitcoin,
    Ethereum,
    Rsk,
    Bsc,
    Polygon,
    Arbitrum,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Bitcoin => "bitcoin",
            Chain::Ethereum => "ethereum",
            Chain::Rsk => "rsk",
            Chain::Bsc => "bsc",
            Chain::Polygon => "polygon",
            Chain::Arbitrum => "arbitrum",
        }
    }

    pub fn is_evm(&self) -> bool {
        !matches!(self, Chain::Bitcoin)
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Block header data the orchestrator needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub number: u64,
    /// Unix seconds
    pub timestamp: u64,
}

/// A transaction as seen by a chain client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInfo {
    pub hash: String,
    pub confirmations: u64,
}

impl TxInfo {
    pub fn new(hash: impl Into<String>, confirmations: u64) -> Self {
        Self {
            hash: hash.into(),
            confirmations,
        }
    }
}

/// Terms of one side of an HTLC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapParams {
    pub value: u128,
    pub recipient_address: String,
    pub refund_address: String,
    pub secret_hash: String,
    /// Timelock in chain time (unix seconds)
    pub expiration: u64,
}

/// Read-only chain queries
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainApi: Send + Sync {
    async fn block_height(&self) -> ChainResult<u64>;

    async fn block_by_number(&self, number: u64) -> ChainResult<BlockInfo>;

    /// Fails with `ChainError::TxNotFound` when the chain has no record of `hash`
    async fn transaction_by_hash(&self, hash: &str) -> ChainResult<TxInfo>;
}

/// HTLC operations performed by a signing client
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SwapApi: Send + Sync {
    /// Derive a secret deterministically from a hex-encoded message
    async fn generate_secret(&self, message_hex: &str) -> ChainResult<String>;

    async fn initiate_swap(&self, params: &SwapParams, fee: &str) -> ChainResult<TxInfo>;

    async fn fund_swap(
        &self,
        params: &SwapParams,
        initiation_hash: &str,
        fee: &str,
    ) -> ChainResult<TxInfo>;

    async fn find_initiate_swap_transaction(
        &self,
        params: &SwapParams,
    ) -> ChainResult<Option<TxInfo>>;

    async fn verify_initiate_swap_transaction(
        &self,
        params: &SwapParams,
        initiation_hash: &str,
    ) -> ChainResult<bool>;

    async fn find_fund_swap_transaction(
        &self,
        params: &SwapParams,
        initiation_hash: &str,
    ) -> ChainResult<Option<TxInfo>>;

    async fn claim_swap(
        &self,
        params: &SwapParams,
        initiation_hash: &str,
        secret: &str,
        fee: &str,
    ) -> ChainResult<TxInfo>;

    async fn refund_swap(
        &self,
        params: &SwapParams,
        initiation_hash: &str,
        fee: &str,
    ) -> ChainResult<TxInfo>;
}

/// Chain and swap capabilities for one asset of one account
#[derive(Clone)]
pub struct AssetClient {
    pub chain: Arc<dyn ChainApi>,
    pub swap: Arc<dyn SwapApi>,
}

/// Resolves the client for an account's asset
pub trait ClientFactory: Send + Sync {
    fn client(
        &self,
        network: Network,
        wallet_id: &str,
        asset: &str,
        account_id: &str,
    ) -> SwapResult<AssetClient>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    network: Network,
    wallet_id: String,
    asset: String,
    account_id: String,
}

/// Clients registered by the hosting wallet
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<ClientKey, AssetClient>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the client for an account's asset
    pub fn register(
        &self,
        network: Network,
        wallet_id: &str,
        asset: &str,
        account_id: &str,
        client: AssetClient,
    ) {
        debug!(
            "Registering {} client for account {} on {}",
            asset, account_id, network
        );
        self.clients.insert(
            ClientKey {
                network,
                wallet_id: wallet_id.to_string(),
                asset: asset.to_string(),
                account_id: account_id.to_string(),
            },
            client,
        );
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl ClientFactory for ClientRegistry {
    fn client(
        &self,
        network: Network,
        wallet_id: &str,
        asset: &str,
        account_id: &str,
    ) -> SwapResult<AssetClient> {
        let key = ClientKey {
            network,
            wallet_id: wallet_id.to_string(),
            asset: asset.to_string(),
            account_id: account_id.to_string(),
        };
        self.clients
            .get(&key)
            .map(|c| c.clone())
            .ok_or_else(|| SwapError::ClientNotFound {
                network: network.to_string(),
                wallet_id: wallet_id.to_string(),
                asset: asset.to_string(),
                account_id: account_id.to_string(),
            })
    }
}
