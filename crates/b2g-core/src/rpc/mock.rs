use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bitcoin::BlockHash;

use crate::error::{CoreError, RpcError};
use crate::types::BlockHeight;

use super::types::RawBlock;
use super::NodeRpc;

/// A mock node for testing. Serves canned blocks keyed by height,
/// populated via the builder pattern.
pub struct MockRpc {
    blocks: BTreeMap<BlockHeight, RawBlock>,
    /// Heights whose `getblock` call fails, simulating a flaky node.
    failing: Vec<BlockHeight>,
    get_block_calls: AtomicUsize,
    get_block_count_calls: AtomicUsize,
}

impl MockRpc {
    pub fn builder() -> MockRpcBuilder {
        MockRpcBuilder {
            blocks: BTreeMap::new(),
            failing: Vec::new(),
        }
    }

    pub fn get_block_calls(&self) -> usize {
        self.get_block_calls.load(Ordering::Relaxed)
    }

    pub fn get_block_count_calls(&self) -> usize {
        self.get_block_count_calls.load(Ordering::Relaxed)
    }
}

pub struct MockRpcBuilder {
    blocks: BTreeMap<BlockHeight, RawBlock>,
    failing: Vec<BlockHeight>,
}

impl MockRpcBuilder {
    pub fn with_block(mut self, block: RawBlock) -> Self {
        self.blocks.insert(block.height, block);
        self
    }

    pub fn failing_at(mut self, height: u32) -> Self {
        self.failing.push(BlockHeight(height));
        self
    }

    pub fn build(self) -> MockRpc {
        MockRpc {
            blocks: self.blocks,
            failing: self.failing,
            get_block_calls: AtomicUsize::new(0),
            get_block_count_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl NodeRpc for MockRpc {
    async fn get_block_count(&self) -> Result<u64, CoreError> {
        self.get_block_count_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .blocks
            .keys()
            .next_back()
            .map(|h| u64::from(h.0))
            .unwrap_or(0))
    }

    async fn get_block_hash(&self, height: BlockHeight) -> Result<BlockHash, CoreError> {
        self.blocks
            .get(&height)
            .map(|b| b.hash)
            .ok_or_else(|| {
                RpcError::ServerError {
                    code: -8,
                    message: "Block height out of range".into(),
                }
                .into()
            })
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<RawBlock, CoreError> {
        self.get_block_calls.fetch_add(1, Ordering::Relaxed);
        let block = self
            .blocks
            .values()
            .find(|b| b.hash == *hash)
            .ok_or_else(|| {
                CoreError::from(RpcError::ServerError {
                    code: -5,
                    message: "Block not found".into(),
                })
            })?;
        if self.failing.contains(&block.height) {
            return Err(RpcError::InvalidResponse("simulated node failure".into()).into());
        }
        Ok(block.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    #[tokio::test]
    async fn block_count_is_highest_height() {
        let rpc = MockRpc::builder()
            .with_block(RawBlock {
                hash: block_hash_from_height(0),
                height: BlockHeight(0),
                previous_block_hash: None,
                time: 0,
                transactions: vec![],
            })
            .with_block(RawBlock {
                hash: block_hash_from_height(1),
                height: BlockHeight(1),
                previous_block_hash: Some(block_hash_from_height(0)),
                time: 600,
                transactions: vec![],
            })
            .build();

        assert_eq!(rpc.get_block_count().await.expect("count"), 1);
        let hash = rpc.get_block_hash(BlockHeight(1)).await.expect("hash");
        assert_eq!(hash, block_hash_from_height(1));
        assert!(rpc.get_block_hash(BlockHeight(2)).await.is_err());
    }
}
