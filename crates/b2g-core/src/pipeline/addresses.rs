use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::CoreError;
use crate::store::EntityStore;
use crate::types::{Block, BlockHeight, BlockState};

use super::selector::StageSelector;
use super::Stage;

/// `content_imported → addresses_imported`: creates an address node for
/// every non-empty address paid by the block's outputs.
pub struct AddressStage {
    store: Arc<dyn EntityStore>,
    selector: StageSelector,
}

impl AddressStage {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            selector: StageSelector::new(store.clone()),
            store,
        }
    }
}

#[async_trait]
impl Stage for AddressStage {
    fn name(&self) -> &'static str {
        "addresses"
    }

    fn precondition(&self) -> Option<BlockState> {
        Some(BlockState::ContentImported)
    }

    fn postcondition(&self) -> BlockState {
        BlockState::AddressesImported
    }

    async fn select(&self, after: Option<BlockHeight>) -> Result<Option<BlockHeight>, CoreError> {
        Ok(self
            .selector
            .next_block_after(BlockState::ContentImported, after)
            .await?
            .map(|b| b.height))
    }

    async fn process(&self, height: BlockHeight) -> Result<Block, CoreError> {
        let block = self
            .store
            .find_block_by_height(height)
            .await?
            .ok_or(CoreError::BlockNotFound(height))?;

        let mut created = 0usize;
        for txid in &block.tx {
            let tx = self
                .store
                .find_transaction_by_id(txid)
                .await?
                .ok_or(CoreError::BlockTransactionNotFound {
                    height,
                    txid: *txid,
                })?;
            for output in &tx.outputs {
                for address in output.linked_addresses() {
                    if self.store.ensure_address(address).await? {
                        created += 1;
                    }
                }
            }
        }

        info!(height = %height, created, "block addresses imported");
        Ok(block)
    }
}
