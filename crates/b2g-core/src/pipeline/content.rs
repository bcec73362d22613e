use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::rpc::NodeRpc;
use crate::store::EntityStore;
use crate::types::{Block, BlockHeight, BlockState};

use super::Stage;

/// Block-creating stage: fetches the block following the highest stored
/// one from the node and persists its transactions.
///
/// Heights are imported strictly in order. The stage never skips past a
/// block it failed to import, so `select` ignores any `after` cursor at or
/// beyond the next height.
///
/// The node's block count is remembered and only asked for again once the
/// import has caught up with it.
pub struct ContentStage {
    rpc: Arc<dyn NodeRpc>,
    store: Arc<dyn EntityStore>,
    /// Last reported block count plus one; zero until the first query.
    known_tip: AtomicU64,
}

impl ContentStage {
    pub fn new(rpc: Arc<dyn NodeRpc>, store: Arc<dyn EntityStore>) -> Self {
        Self {
            rpc,
            store,
            known_tip: AtomicU64::new(0),
        }
    }

    fn cached_tip(&self) -> Option<u64> {
        self.known_tip.load(Ordering::Relaxed).checked_sub(1)
    }

    async fn next_height(&self) -> Result<BlockHeight, CoreError> {
        Ok(self
            .store
            .max_block_height()
            .await?
            .map(BlockHeight::next)
            .unwrap_or(BlockHeight(0)))
    }

    /// The fetched block must extend the stored chain.
    async fn check_parent(&self, block: &Block) -> Result<(), CoreError> {
        let Some(parent_height) = block.height.0.checked_sub(1) else {
            return Ok(());
        };
        let Some(parent) = self
            .store
            .find_block_by_height(BlockHeight(parent_height))
            .await?
        else {
            return Ok(());
        };
        if block.previous_block_hash != Some(parent.hash) {
            return Err(CoreError::InvalidData(format!(
                "block {} at height {} does not extend stored block {} (chain reorganization?)",
                block.hash, block.height, parent.hash
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Stage for ContentStage {
    fn name(&self) -> &'static str {
        "content"
    }

    fn precondition(&self) -> Option<BlockState> {
        None
    }

    fn postcondition(&self) -> BlockState {
        BlockState::ContentImported
    }

    async fn select(&self, after: Option<BlockHeight>) -> Result<Option<BlockHeight>, CoreError> {
        let next = self.next_height().await?;
        if after.is_some_and(|a| a >= next) {
            return Ok(None);
        }
        let next_height = u64::from(next.0);
        if self.cached_tip().is_some_and(|tip| next_height <= tip) {
            return Ok(Some(next));
        }

        let tip = self.rpc.get_block_count().await?;
        self.known_tip.store(tip.saturating_add(1), Ordering::Relaxed);
        if next_height > tip {
            debug!(next = %next, tip, "node has no new block");
            return Ok(None);
        }
        Ok(Some(next))
    }

    async fn process(&self, height: BlockHeight) -> Result<Block, CoreError> {
        let hash = self.rpc.get_block_hash(height).await?;
        let raw = self.rpc.get_block(&hash).await?;
        if raw.height != height {
            return Err(CoreError::InvalidData(format!(
                "node returned block {} at height {} for requested height {height}",
                raw.hash, raw.height
            )));
        }

        let (block, transactions) = raw.into_parts(BlockState::ContentImported);
        self.check_parent(&block).await?;

        let tx_count = transactions.len();
        // Transactions land before the block so later stages never see a
        // block whose transactions are missing.
        self.store.save_transactions(transactions).await?;
        info!(
            height = %height,
            hash = %block.hash,
            transactions = tx_count,
            "block content imported"
        );
        Ok(block)
    }
}
