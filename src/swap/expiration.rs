//! Timelock checks against chain time

use super::{Swap, SwapStatus, SwapUpdate};
use crate::chain::ChainApi;
use crate::error::SwapResult;
use crate::scheduler::RetryPolicy;

use tracing::{debug, info};

/// Decides when a swap has to fall back to the refund branch
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpirationPolicy {
    retry: RetryPolicy,
}

impl ExpirationPolicy {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Whether the latest block on `chain` is newer than `t` (unix seconds)
    pub async fn has_chain_time_passed(&self, chain: &dyn ChainApi, t: u64) -> SwapResult<bool> {
        let block = self
            .retry
            .retry("Chain time query", || async {
                let height = chain.block_height().await?;
                chain.block_by_number(height).await
            })
            .await?;

        debug!(
            "Block {} has timestamp {} (deadline {})",
            block.number, block.timestamp, t
        );
        Ok(block.timestamp > t)
    }

    /// Own timelock passed on the `from` chain: the refund can be claimed
    pub async fn can_refund(&self, from_chain: &dyn ChainApi, swap: &Swap) -> SwapResult<bool> {
        self.has_chain_time_passed(from_chain, swap.swap_expiration)
            .await
    }

    /// Counterparty timelock passed on the `to` chain: claiming is no longer safe
    pub async fn has_swap_expired(&self, to_chain: &dyn ChainApi, swap: &Swap) -> SwapResult<bool> {
        self.has_chain_time_passed(to_chain, swap.node_swap_expiration)
            .await
    }

    /// Move to the refund branch once either timelock has passed
    pub async fn handle_expirations(
        &self,
        from_chain: &dyn ChainApi,
        to_chain: &dyn ChainApi,
        swap: &Swap,
    ) -> SwapResult<Option<SwapUpdate>> {
        if self.can_refund(from_chain, swap).await? {
            info!("Swap {} timelock passed, refunding", swap.id);
            return Ok(Some(SwapUpdate::status(SwapStatus::GetRefund)));
        }

        if self.has_swap_expired(to_chain, swap).await? {
            info!("Swap {} counterparty timelock passed, waiting for refund", swap.id);
            return Ok(Some(SwapUpdate::status(SwapStatus::WaitingForRefund)));
        }

        Ok(None)
    }
}
