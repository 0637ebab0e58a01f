//! Error types for the swap orchestrator

use thiserror::Error;

/// Errors surfaced by per-chain clients
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Transaction {0} not found")]
    TxNotFound(String),

    #[error("Block {0} not found")]
    BlockNotFound(u64),

    #[error("Transaction {0} is still pending")]
    PendingTx(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),
}

impl ChainError {
    /// Not-found and pending conditions resolve themselves on a later poll
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::TxNotFound(_) | ChainError::BlockNotFound(_) | ChainError::PendingTx(_)
        )
    }
}

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum SwapError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Order service error: {0}")]
    OrderService(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("The quote is expired (expired at {expires_at})")]
    QuoteExpired { expires_at: String },

    #[error("Invalid quote: {0}")]
    InvalidQuote(String),

    #[error("Counterparty timelock {node_swap_expiration} must be before own timelock {swap_expiration}")]
    InvalidTimelocks {
        swap_expiration: u64,
        node_swap_expiration: u64,
    },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Swap {swap_id}: {field} is already set and cannot be overwritten")]
    FieldAlreadySet { swap_id: String, field: &'static str },

    #[error("No client for {asset} on {network} (wallet {wallet_id}, account {account_id})")]
    ClientNotFound {
        network: String,
        wallet_id: String,
        asset: String,
        account_id: String,
    },

    #[error("Unknown asset {0}")]
    UnknownAsset(String),

    #[error("Unknown swap provider {0}")]
    UnknownProvider(String),

    #[error("Swap {0} not found")]
    SwapNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SwapError {
    /// Check if error is retryable on a later tick
    pub fn is_retryable(&self) -> bool {
        match self {
            SwapError::Chain(e) => e.is_transient() || matches!(e, ChainError::Rpc(_)),
            SwapError::OrderService(_) | SwapError::Http(_) | SwapError::Database(_) => true,
            _ => false,
        }
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            SwapError::FieldAlreadySet { .. }
                | SwapError::InvalidStateTransition { .. }
                | SwapError::Chain(ChainError::Rejected(_))
        )
    }
}

/// Result type for orchestrator operations
pub type SwapResult<T> = Result<T, SwapError>;
