//! Swap persistence
//!
//! Swaps must survive restarts: every transition is saved before the next
//! step runs. Two stores are provided:
//! - `MemorySwapStore` for tests and ephemeral hosts
//! - `PgSwapStore` backed by PostgreSQL

mod manager;
mod memory;

pub use manager::PgSwapStore;
pub use memory::MemorySwapStore;

use crate::error::SwapResult;
use crate::swap::SwapRecord;

use async_trait::async_trait;

#[async_trait]
pub trait SwapStore: Send + Sync {
    /// Persist a new swap; fails if the id already exists
    async fn insert(&self, record: &SwapRecord) -> SwapResult<()>;

    /// Overwrite an existing swap
    async fn save(&self, record: &SwapRecord) -> SwapResult<()>;

    async fn get(&self, swap_id: &str) -> SwapResult<Option<SwapRecord>>;

    /// Swaps that are not in a terminal status
    async fn active(&self) -> SwapResult<Vec<SwapRecord>>;

    async fn all(&self) -> SwapResult<Vec<SwapRecord>>;
}
