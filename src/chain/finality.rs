//! Chain finality thresholds for counterparty funding
//!
//! A counterparty funding transaction is only treated as irreversible once it is
//! buried under the chain's safe confirmation count:
//! - Bitcoin: 1 block (swap amounts are small relative to reorg cost)
//! - Ethereum: 3 blocks
//! - RSK / BSC / Polygon / Arbitrum: 5 blocks

use super::{Chain, TxInfo};

use tracing::debug;

/// Minimum confirmations before a counterparty transaction is considered final
pub fn safe_confirmations(chain: Chain) -> u64 {
    match chain {
        Chain::Bitcoin => 1,
        Chain::Ethereum => 3,
        Chain::Rsk | Chain::Bsc | Chain::Polygon | Chain::Arbitrum => 5,
    }
}

/// Whether `tx` has reached the safe confirmation count for `chain`
pub fn is_final(chain: Chain, tx: &TxInfo) -> bool {
    let required = safe_confirmations(chain);
    if tx.confirmations < required {
        debug!(
            "Transaction {} has {} / {} confirmations on {}",
            tx.hash, tx.confirmations, required, chain
        );
        return false;
    }
    true
}
