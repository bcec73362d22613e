//! RPC-specific types that do not belong to the shared domain model.
//!
//! Transactions are decoded straight into [`Transaction`]; this module only
//! wraps the block envelope returned by `getblock`.

use bitcoin::BlockHash;

use crate::types::{Block, BlockHeight, BlockState, Transaction};

/// A block as returned by `getblock <hash> 2`.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub hash: BlockHash,
    pub height: BlockHeight,
    pub previous_block_hash: Option<BlockHash>,
    pub time: u64,
    pub transactions: Vec<Transaction>,
}

impl RawBlock {
    /// Split into the block entity (in `state`) and its transactions.
    pub fn into_parts(self, state: BlockState) -> (Block, Vec<Transaction>) {
        let block = Block {
            height: self.height,
            hash: self.hash,
            previous_block_hash: self.previous_block_hash,
            time: self.time,
            tx: self.transactions.iter().map(|tx| tx.txid).collect(),
            state,
        };
        (block, self.transactions)
    }
}
