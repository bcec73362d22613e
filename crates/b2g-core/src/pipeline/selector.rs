use std::sync::Arc;

use crate::error::CoreError;
use crate::store::EntityStore;
use crate::types::{Block, BlockHeight, BlockState};

/// Picks the next unit of work for state-driven stages: the lowest-height
/// block currently in the required state.
///
/// Lowest-first is what guarantees an input's origin transaction (at a lower
/// or equal height) went through the earlier stages first.
#[derive(Clone)]
pub struct StageSelector {
    store: Arc<dyn EntityStore>,
}

impl StageSelector {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub async fn next_block(&self, required: BlockState) -> Result<Option<Block>, CoreError> {
        self.next_block_after(required, None).await
    }

    /// Like [`next_block`](Self::next_block), restricted to heights strictly
    /// above `after`.
    pub async fn next_block_after(
        &self,
        required: BlockState,
        after: Option<BlockHeight>,
    ) -> Result<Option<Block>, CoreError> {
        Ok(self.store.find_block_by_state(required, after).await?)
    }
}
