//! In-memory swap store

use super::SwapStore;
use crate::error::{SwapError, SwapResult};
use crate::swap::SwapRecord;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Default)]
pub struct MemorySwapStore {
    swaps: DashMap<String, SwapRecord>,
}

impl MemorySwapStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SwapStore for MemorySwapStore {
    async fn insert(&self, record: &SwapRecord) -> SwapResult<()> {
        match self.swaps.entry(record.swap.id.clone()) {
            Entry::Occupied(_) => Err(SwapError::Internal(format!(
                "Swap {} already exists",
                record.swap.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn save(&self, record: &SwapRecord) -> SwapResult<()> {
        match self.swaps.get_mut(&record.swap.id) {
            Some(mut existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(SwapError::SwapNotFound(record.swap.id.clone())),
        }
    }

    async fn get(&self, swap_id: &str) -> SwapResult<Option<SwapRecord>> {
        Ok(self.swaps.get(swap_id).map(|r| r.value().clone()))
    }

    async fn active(&self) -> SwapResult<Vec<SwapRecord>> {
        Ok(self
            .swaps
            .iter()
            .filter(|r| !r.swap.status.is_terminal())
            .map(|r| r.value().clone())
            .collect())
    }

    async fn all(&self) -> SwapResult<Vec<SwapRecord>> {
        let mut records: Vec<_> = self.swaps.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.swap.start_time);
        Ok(records)
    }
}
