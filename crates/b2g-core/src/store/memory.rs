use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bitcoin::{OutPoint, Txid};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::types::{Address, Block, BlockHeight, BlockState, InputPoint, Transaction};

use super::{EntityStore, StoreStats};

// ==============================================================================
// Block Table
// ==============================================================================

/// Blocks keyed by height, with a per-state height index so selecting the
/// lowest block in a state does not scan the whole chain.
#[derive(Default)]
struct BlockTable {
    rows: BTreeMap<BlockHeight, Block>,
    by_state: HashMap<BlockState, BTreeSet<BlockHeight>>,
}

impl BlockTable {
    fn upsert(&mut self, block: Block) {
        if let Some(previous) = self.rows.get(&block.height) {
            if let Some(heights) = self.by_state.get_mut(&previous.state) {
                heights.remove(&block.height);
            }
        }
        self.by_state
            .entry(block.state)
            .or_default()
            .insert(block.height);
        self.rows.insert(block.height, block);
    }

    fn first_in_state(&self, state: BlockState, after: Option<BlockHeight>) -> Option<&Block> {
        let heights = self.by_state.get(&state)?;
        let lower = match after {
            Some(h) => Bound::Excluded(h),
            None => Bound::Unbounded,
        };
        heights
            .range((lower, Bound::Unbounded))
            .next()
            .and_then(|h| self.rows.get(h))
    }
}

// ==============================================================================
// Snapshot Format
// ==============================================================================

#[derive(Serialize)]
struct SnapshotRef<'a> {
    blocks: Vec<&'a Block>,
    transactions: Vec<&'a Transaction>,
    addresses: Vec<&'a Address>,
}

#[derive(Deserialize)]
struct Snapshot {
    blocks: Vec<Block>,
    transactions: Vec<Transaction>,
    addresses: Vec<Address>,
}

// ==============================================================================
// MemoryStore
// ==============================================================================

/// In-memory entity arena.
///
/// Each table sits behind its own `tokio::sync::RwLock`; every trait method
/// takes a single lock, so the read-modify-write of an address edge set or a
/// block state is atomic. When opened with a path, [`EntityStore::flush`]
/// writes a JSON snapshot (write to a temp file, then rename).
pub struct MemoryStore {
    blocks: RwLock<BlockTable>,
    transactions: RwLock<HashMap<Txid, Transaction>>,
    addresses: RwLock<BTreeMap<String, Address>>,
    snapshot_path: Option<PathBuf>,
    dirty: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store with no durable backing.
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(BlockTable::default()),
            transactions: RwLock::new(HashMap::new()),
            addresses: RwLock::new(BTreeMap::new()),
            snapshot_path: None,
            dirty: AtomicBool::new(false),
        }
    }

    /// Open a snapshot-backed store. A missing file yields an empty store
    /// that will be created on the first flush.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let mut store = Self::new();
        store.snapshot_path = Some(path.to_owned());

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no snapshot found, starting empty store");
                return Ok(store);
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: Snapshot = serde_json::from_str(&content)?;
        {
            let blocks = store.blocks.get_mut();
            for block in snapshot.blocks {
                blocks.upsert(block);
            }
        }
        store.transactions.get_mut().extend(
            snapshot
                .transactions
                .into_iter()
                .map(|tx| (tx.txid, tx)),
        );
        store.addresses.get_mut().extend(
            snapshot
                .addresses
                .into_iter()
                .map(|a| (a.address.clone(), a)),
        );

        let block_count = store.blocks.get_mut().rows.len();
        let tx_count = store.transactions.get_mut().len();
        let address_count = store.addresses.get_mut().len();
        info!(
            path = %path.display(),
            blocks = block_count,
            transactions = tx_count,
            addresses = address_count,
            "loaded store snapshot"
        );
        Ok(store)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    async fn write_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        let bytes = {
            let blocks = self.blocks.read().await;
            let transactions = self.transactions.read().await;
            let addresses = self.addresses.read().await;

            let mut txs: Vec<&Transaction> = transactions.values().collect();
            txs.sort_by_key(|tx| (tx.block_height, tx.txid));

            let snapshot = SnapshotRef {
                blocks: blocks.rows.values().collect(),
                transactions: txs,
                addresses: addresses.values().collect(),
            };
            serde_json::to_vec(&snapshot)?
        };

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "store snapshot written");
        Ok(())
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn find_block_by_state(
        &self,
        state: BlockState,
        after: Option<BlockHeight>,
    ) -> Result<Option<Block>, StoreError> {
        Ok(self
            .blocks
            .read()
            .await
            .first_in_state(state, after)
            .cloned())
    }

    async fn find_block_by_height(
        &self,
        height: BlockHeight,
    ) -> Result<Option<Block>, StoreError> {
        Ok(self.blocks.read().await.rows.get(&height).cloned())
    }

    async fn max_block_height(&self) -> Result<Option<BlockHeight>, StoreError> {
        Ok(self.blocks.read().await.rows.keys().next_back().copied())
    }

    async fn save_block(&self, block: Block) -> Result<(), StoreError> {
        self.blocks.write().await.upsert(block);
        self.mark_dirty();
        Ok(())
    }

    async fn commit_block(
        &self,
        block: Block,
        expected: Option<BlockState>,
    ) -> Result<bool, StoreError> {
        let mut blocks = self.blocks.write().await;
        let current = blocks.rows.get(&block.height).map(|b| b.state);
        if current != expected {
            debug!(
                height = %block.height,
                current = ?current,
                expected = ?expected,
                "block commit rejected: state changed"
            );
            return Ok(false);
        }
        blocks.upsert(block);
        drop(blocks);
        self.mark_dirty();
        Ok(true)
    }

    async fn find_transaction_by_id(
        &self,
        txid: &Txid,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(self.transactions.read().await.get(txid).cloned())
    }

    async fn save_transaction(&self, tx: Transaction) -> Result<(), StoreError> {
        self.transactions.write().await.insert(tx.txid, tx);
        self.mark_dirty();
        Ok(())
    }

    async fn save_transactions(&self, txs: Vec<Transaction>) -> Result<(), StoreError> {
        let mut transactions = self.transactions.write().await;
        for tx in txs {
            transactions.insert(tx.txid, tx);
        }
        drop(transactions);
        self.mark_dirty();
        Ok(())
    }

    async fn find_address_by_value(&self, address: &str) -> Result<Option<Address>, StoreError> {
        Ok(self.addresses.read().await.get(address).cloned())
    }

    async fn save_address(&self, address: Address) -> Result<(), StoreError> {
        self.addresses
            .write()
            .await
            .insert(address.address.clone(), address);
        self.mark_dirty();
        Ok(())
    }

    async fn ensure_address(&self, address: &str) -> Result<bool, StoreError> {
        let mut addresses = self.addresses.write().await;
        if addresses.contains_key(address) {
            return Ok(false);
        }
        addresses.insert(address.to_owned(), Address::new(address));
        drop(addresses);
        self.mark_dirty();
        Ok(true)
    }

    async fn add_address_input(
        &self,
        address: &str,
        input: InputPoint,
    ) -> Result<bool, StoreError> {
        let inserted = self
            .addresses
            .write()
            .await
            .entry(address.to_owned())
            .or_insert_with(|| Address::new(address))
            .input_transactions
            .insert(input);
        if inserted {
            self.mark_dirty();
        }
        Ok(inserted)
    }

    async fn add_address_output(
        &self,
        address: &str,
        output: OutPoint,
    ) -> Result<bool, StoreError> {
        let inserted = self
            .addresses
            .write()
            .await
            .entry(address.to_owned())
            .or_insert_with(|| Address::new(address))
            .output_transactions
            .insert(output);
        if inserted {
            self.mark_dirty();
        }
        Ok(inserted)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let blocks_by_state = {
            let blocks = self.blocks.read().await;
            blocks
                .by_state
                .iter()
                .filter(|(_, heights)| !heights.is_empty())
                .map(|(state, heights)| (*state, heights.len()))
                .collect()
        };
        Ok(StoreStats {
            blocks_by_state,
            transactions: self.transactions.read().await.len(),
            addresses: self.addresses.read().await.len(),
        })
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.write_snapshot(path).await {
            self.mark_dirty();
            return Err(e);
        }
        Ok(())
    }
}
