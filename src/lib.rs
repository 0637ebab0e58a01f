//! HTLC Swap Orchestrator - resumable cross-chain atomic swaps for wallets
//!
//! Drives hash-time-locked swaps with a counterparty agent through a
//! persisted state machine:
//! 1. Lock a quote with the agent and fund our HTLC on the `from` chain
//! 2. Verify the agent's HTLC on the `to` chain
//! 3. Claim with the secret, or refund once our timelock has passed
//!
//! Every step is re-entrant: a swap can be resumed from its saved status
//! after a restart.

pub mod api;
pub mod assets;
pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod quote;
pub mod scheduler;
pub mod state;
pub mod swap;
pub mod telemetry;
pub mod wallet;

pub use config::Settings;
pub use error::{ChainError, SwapError, SwapResult};
pub use orchestrator::{shutdown_signal, Orchestrator};
pub use swap::{HtlcSwapProvider, Swap, SwapProvider, SwapRecord, SwapStatus};
