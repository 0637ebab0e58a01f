//! Wallet account port: account lookup and balance refresh

use crate::chain::Network;
use crate::error::SwapResult;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

/// How an account signs transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Software,
    /// Signing requires user interaction on a device
    Hardware,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub kind: AccountKind,
}

impl Account {
    pub fn is_hardware(&self) -> bool {
        self.kind == AccountKind::Hardware
    }
}

/// Accounts of the hosting wallet
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn account(&self, network: Network, wallet_id: &str, account_id: &str)
        -> SwapResult<Option<Account>>;

    /// Re-read balances of the given assets
    async fn refresh_balances(
        &self,
        network: Network,
        wallet_id: &str,
        assets: Vec<String>,
    ) -> SwapResult<()>;
}
