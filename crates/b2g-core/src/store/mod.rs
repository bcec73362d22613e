//! Entity store abstraction.
//!
//! Defines the [`EntityStore`] trait consumed by the pipeline stages and an
//! in-memory arena implementation ([`MemoryStore`]) with optional JSON
//! snapshot persistence.

mod memory;

pub use memory::MemoryStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use bitcoin::{OutPoint, Txid};
use serde::Serialize;

use crate::error::StoreError;
use crate::types::{Address, Block, BlockHeight, BlockState, InputPoint, Transaction};

/// Keyed lookups and upserts over blocks, transactions and addresses.
///
/// Implementations must make each method atomic with respect to the entity
/// it touches: a reader never observes a half-written block state, and the
/// `add_address_*` appends never race into duplicate entries.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Lowest-height block in `state`, strictly above `after` when given.
    async fn find_block_by_state(
        &self,
        state: BlockState,
        after: Option<BlockHeight>,
    ) -> Result<Option<Block>, StoreError>;

    async fn find_block_by_height(&self, height: BlockHeight)
        -> Result<Option<Block>, StoreError>;

    /// Highest stored block height, whatever its state.
    async fn max_block_height(&self) -> Result<Option<BlockHeight>, StoreError>;

    /// Unconditional upsert.
    async fn save_block(&self, block: Block) -> Result<(), StoreError>;

    /// Compare-and-swap upsert on the stored block's state.
    ///
    /// With `expected = Some(s)` the block is written only if a block at the
    /// same height currently has state `s`; with `expected = None` only if no
    /// block exists at that height. Returns whether the write happened.
    async fn commit_block(
        &self,
        block: Block,
        expected: Option<BlockState>,
    ) -> Result<bool, StoreError>;

    async fn find_transaction_by_id(&self, txid: &Txid)
        -> Result<Option<Transaction>, StoreError>;

    async fn save_transaction(&self, tx: Transaction) -> Result<(), StoreError>;

    async fn save_transactions(&self, txs: Vec<Transaction>) -> Result<(), StoreError> {
        for tx in txs {
            self.save_transaction(tx).await?;
        }
        Ok(())
    }

    async fn find_address_by_value(&self, address: &str) -> Result<Option<Address>, StoreError>;

    async fn save_address(&self, address: Address) -> Result<(), StoreError>;

    /// Create an empty address node if none exists. Returns `true` if created.
    async fn ensure_address(&self, address: &str) -> Result<bool, StoreError>;

    /// Atomically add `input` to the address's input-transaction set,
    /// creating the address if needed. Returns `true` if the entry is new.
    async fn add_address_input(&self, address: &str, input: InputPoint)
        -> Result<bool, StoreError>;

    /// Atomically add `output` to the address's output-transaction set,
    /// creating the address if needed. Returns `true` if the entry is new.
    async fn add_address_output(&self, address: &str, output: OutPoint)
        -> Result<bool, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Persist pending changes, if the store has a durable backing.
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Entity counts, reported as operational status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub blocks_by_state: BTreeMap<BlockState, usize>,
    pub transactions: usize,
    pub addresses: usize,
}

impl StoreStats {
    pub fn blocks_in(&self, state: BlockState) -> usize {
        self.blocks_by_state.get(&state).copied().unwrap_or(0)
    }
}
