//! Swap lifecycle events
//!
//! Broadcast by the driver so hosts can react to progress without polling
//! the store.

use crate::chain::Network;
use crate::swap::{SwapRecord, SwapStatus};

use serde::Serialize;

/// Events emitted while driving swaps
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SwapEvent {
    /// Swap initiated and persisted
    #[serde(rename_all = "camelCase")]
    Created {
        swap_id: String,
        network: Network,
        wallet_id: String,
        from: String,
        to: String,
    },

    /// A step moved the swap to a new status
    #[serde(rename_all = "camelCase")]
    Transitioned {
        swap_id: String,
        from_status: SwapStatus,
        to_status: SwapStatus,
    },

    /// A step failed; the swap keeps its status
    #[serde(rename_all = "camelCase")]
    ActionFailed {
        swap_id: String,
        status: SwapStatus,
        error: String,
        retryable: bool,
    },
}

impl SwapEvent {
    pub fn created(record: &SwapRecord) -> Self {
        SwapEvent::Created {
            swap_id: record.swap.id.clone(),
            network: record.network,
            wallet_id: record.wallet_id.clone(),
            from: record.swap.from.clone(),
            to: record.swap.to.clone(),
        }
    }

    /// Get event name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            SwapEvent::Created { .. } => "created",
            SwapEvent::Transitioned { .. } => "transitioned",
            SwapEvent::ActionFailed { .. } => "action_failed",
        }
    }
}
