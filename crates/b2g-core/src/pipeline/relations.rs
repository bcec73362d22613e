use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{OutPoint, Txid};
use tracing::{debug, info};

use crate::error::CoreError;
use crate::store::EntityStore;
use crate::types::{Block, BlockHeight, BlockState, InputPoint, Transaction};

use super::selector::StageSelector;
use super::Stage;

// ==============================================================================
// Relation Resolver
// ==============================================================================

/// One input resolved to the output it spends.
struct Spend {
    input: InputPoint,
    addresses: Vec<String>,
}

/// Links every input of a block to the output it spends and records the
/// address edges on both sides.
///
/// All inputs of the block are resolved before anything is written, so a
/// block that fails (missing origin) leaves the store exactly as it was.
/// Edge writes go through the store's set-append operations, so resolving a
/// block twice adds nothing the second time.
pub struct RelationResolver {
    store: Arc<dyn EntityStore>,
}

impl RelationResolver {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, block: Block) -> Result<Block, CoreError> {
        let mut transactions = self.load_block_transactions(&block).await?;

        // Resolve every input first; any failure aborts the block here.
        let mut origins: HashMap<Txid, Transaction> = HashMap::new();
        let mut spends: Vec<Vec<Spend>> = Vec::with_capacity(transactions.len());
        for tx in &mut transactions {
            let mut tx_spends = Vec::new();
            for (vin, input) in tx.inputs.iter_mut().enumerate() {
                let Some(origin) = input.origin else {
                    continue;
                };
                let point = InputPoint::new(tx.txid, vin as u32);
                let addresses = self.origin_addresses(&mut origins, origin, point).await?;
                input.resolved_output = Some(origin);
                tx_spends.push(Spend {
                    input: point,
                    addresses,
                });
            }
            spends.push(tx_spends);
        }

        let resolved: Vec<Transaction> = transactions
            .iter()
            .filter(|tx| !tx.is_coinbase())
            .cloned()
            .collect();
        self.store.save_transactions(resolved).await?;

        let mut new_input_edges = 0usize;
        let mut new_output_edges = 0usize;
        for (tx, tx_spends) in transactions.iter().zip(&spends) {
            for spend in tx_spends {
                for address in &spend.addresses {
                    if self.store.add_address_input(address, spend.input).await? {
                        new_input_edges += 1;
                    }
                }
            }

            for output in &tx.outputs {
                let point = OutPoint::new(tx.txid, output.n);
                for address in output.linked_addresses() {
                    if self.store.add_address_output(address, point).await? {
                        new_output_edges += 1;
                    }
                }
            }
            debug!(height = %block.height, txid = %tx.txid, "transaction relations resolved");
        }

        info!(
            height = %block.height,
            transactions = transactions.len(),
            inputs = spends.iter().map(Vec::len).sum::<usize>(),
            new_input_edges,
            new_output_edges,
            "block relations resolved"
        );

        Ok(Block {
            state: BlockState::RelationsResolved,
            ..block
        })
    }

    async fn load_block_transactions(&self, block: &Block) -> Result<Vec<Transaction>, CoreError> {
        let mut transactions = Vec::with_capacity(block.tx.len());
        for txid in &block.tx {
            let tx = self.store.find_transaction_by_id(txid).await?.ok_or(
                CoreError::BlockTransactionNotFound {
                    height: block.height,
                    txid: *txid,
                },
            )?;
            transactions.push(tx);
        }
        Ok(transactions)
    }

    /// Addresses of the output `origin` points at. Origin transactions are
    /// memoised for the duration of one block.
    async fn origin_addresses(
        &self,
        origins: &mut HashMap<Txid, Transaction>,
        origin: OutPoint,
        input: InputPoint,
    ) -> Result<Vec<String>, CoreError> {
        if !origins.contains_key(&origin.txid) {
            let tx = self
                .store
                .find_transaction_by_id(&origin.txid)
                .await?
                .ok_or(CoreError::MissingOriginTransaction {
                    origin: origin.txid,
                    input,
                })?;
            origins.insert(origin.txid, tx);
        }

        origins
            .get(&origin.txid)
            .and_then(|tx| tx.output(origin.vout))
            .map(|output| output.linked_addresses().map(str::to_owned).collect())
            .ok_or(CoreError::MissingOriginOutput { origin, input })
    }
}

// ==============================================================================
// Relations Stage
// ==============================================================================

/// `addresses_imported → relations_resolved`.
pub struct RelationStage {
    store: Arc<dyn EntityStore>,
    selector: StageSelector,
    resolver: RelationResolver,
}

impl RelationStage {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            selector: StageSelector::new(store.clone()),
            resolver: RelationResolver::new(store.clone()),
            store,
        }
    }
}

#[async_trait]
impl Stage for RelationStage {
    fn name(&self) -> &'static str {
        "relations"
    }

    fn precondition(&self) -> Option<BlockState> {
        Some(BlockState::AddressesImported)
    }

    fn postcondition(&self) -> BlockState {
        BlockState::RelationsResolved
    }

    async fn select(&self, after: Option<BlockHeight>) -> Result<Option<BlockHeight>, CoreError> {
        Ok(self
            .selector
            .next_block_after(BlockState::AddressesImported, after)
            .await?
            .map(|b| b.height))
    }

    async fn process(&self, height: BlockHeight) -> Result<Block, CoreError> {
        let block = self
            .store
            .find_block_by_height(height)
            .await?
            .ok_or(CoreError::BlockNotFound(height))?;
        self.resolver.resolve(block).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_util::*;

    /// Block 2: coinbase C pays A1; T spends (C,0) and pays A2.
    async fn seed_scenario(store: &MemoryStore) -> (Txid, Txid) {
        let c = txid_from_byte(0xC0);
        let t = txid_from_byte(0x70);
        store
            .save_transaction(make_tx(
                c,
                2,
                vec![coinbase_input()],
                vec![output_to(0, 50_000, &["A1"])],
            ))
            .await
            .expect("save C");
        store
            .save_transaction(make_tx(
                t,
                2,
                vec![spending_input(c, 0)],
                vec![output_to(0, 40_000, &["A2"])],
            ))
            .await
            .expect("save T");
        store
            .save_block(make_block(2, vec![c, t], BlockState::AddressesImported))
            .await
            .expect("save block");
        (c, t)
    }

    async fn stored_block(store: &MemoryStore, height: u32) -> Block {
        store
            .find_block_by_height(BlockHeight(height))
            .await
            .expect("lookup")
            .expect("block stored")
    }

    #[tokio::test]
    async fn coinbase_spend_scenario_links_both_addresses() {
        let store = Arc::new(MemoryStore::new());
        let (c, t) = seed_scenario(&store).await;
        let resolver = RelationResolver::new(store.clone());

        let block = resolver
            .resolve(stored_block(&store, 2).await)
            .await
            .expect("resolve");
        assert_eq!(block.state, BlockState::RelationsResolved);

        let a1 = store
            .find_address_by_value("A1")
            .await
            .expect("lookup")
            .expect("A1 exists");
        assert_eq!(
            a1.input_transactions.iter().copied().collect::<Vec<_>>(),
            vec![InputPoint::new(t, 0)]
        );
        assert_eq!(
            a1.output_transactions.iter().copied().collect::<Vec<_>>(),
            vec![OutPoint::new(c, 0)]
        );

        let a2 = store
            .find_address_by_value("A2")
            .await
            .expect("lookup")
            .expect("A2 exists");
        assert_eq!(
            a2.output_transactions.iter().copied().collect::<Vec<_>>(),
            vec![OutPoint::new(t, 0)]
        );
        assert!(a2.input_transactions.is_empty());

        let spend = store
            .find_transaction_by_id(&t)
            .await
            .expect("lookup")
            .expect("T exists");
        assert_eq!(spend.inputs[0].resolved_output, Some(OutPoint::new(c, 0)));
    }

    #[tokio::test]
    async fn re_resolution_adds_no_duplicate_edges() {
        let store = Arc::new(MemoryStore::new());
        seed_scenario(&store).await;
        let resolver = RelationResolver::new(store.clone());

        resolver
            .resolve(stored_block(&store, 2).await)
            .await
            .expect("first resolve");
        let first_a1 = store.find_address_by_value("A1").await.expect("lookup");
        let first_a2 = store.find_address_by_value("A2").await.expect("lookup");

        resolver
            .resolve(stored_block(&store, 2).await)
            .await
            .expect("second resolve");
        assert_eq!(store.find_address_by_value("A1").await.expect("lookup"), first_a1);
        assert_eq!(store.find_address_by_value("A2").await.expect("lookup"), first_a2);
    }

    #[tokio::test]
    async fn missing_origin_transaction_fails_without_writes() {
        let store = Arc::new(MemoryStore::new());
        let ghost = txid_from_byte(0xEE);
        let t = txid_from_byte(0x71);
        let c = txid_from_byte(0xC1);
        store
            .save_transaction(make_tx(
                c,
                3,
                vec![coinbase_input()],
                vec![output_to(0, 1, &["COINBASE"])],
            ))
            .await
            .expect("save");
        store
            .save_transaction(make_tx(
                t,
                3,
                vec![spending_input(ghost, 4)],
                vec![output_to(0, 1, &["B"])],
            ))
            .await
            .expect("save");
        store
            .save_block(make_block(3, vec![c, t], BlockState::AddressesImported))
            .await
            .expect("save");

        let err = RelationResolver::new(store.clone())
            .resolve(stored_block(&store, 3).await)
            .await
            .expect_err("ghost origin must fail");
        let CoreError::MissingOriginTransaction { origin, input } = &err else {
            panic!("expected a missing origin transaction, got {err:?}");
        };
        assert_eq!(*origin, ghost);
        assert_eq!(*input, InputPoint::new(t, 0));

        // Nothing was linked, not even the outputs of the coinbase.
        assert!(store
            .find_address_by_value("COINBASE")
            .await
            .expect("lookup")
            .is_none());
        assert!(store.find_address_by_value("B").await.expect("lookup").is_none());
        let spend = store
            .find_transaction_by_id(&t)
            .await
            .expect("lookup")
            .expect("exists");
        assert!(spend.inputs[0].resolved_output.is_none());
        assert_eq!(
            stored_block(&store, 3).await.state,
            BlockState::AddressesImported
        );
    }

    #[tokio::test]
    async fn missing_origin_output_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let c = txid_from_byte(0xC2);
        let t = txid_from_byte(0x72);
        store
            .save_transaction(make_tx(
                c,
                1,
                vec![coinbase_input()],
                vec![output_to(0, 1, &["X"])],
            ))
            .await
            .expect("save");
        store
            .save_transaction(make_tx(
                t,
                2,
                vec![spending_input(c, 1)],
                vec![output_to(0, 1, &["Y"])],
            ))
            .await
            .expect("save");

        let block = make_block(2, vec![t], BlockState::AddressesImported);
        let err = RelationResolver::new(store)
            .resolve(block)
            .await
            .expect_err("origin index 1 does not exist");
        let CoreError::MissingOriginOutput { origin, .. } = &err else {
            panic!("expected a missing origin output, got {err:?}");
        };
        assert_eq!(*origin, OutPoint::new(c, 1));
    }

    #[tokio::test]
    async fn multi_address_outputs_and_shared_addresses() {
        let store = Arc::new(MemoryStore::new());
        let c = txid_from_byte(0xC3);
        let t = txid_from_byte(0x73);
        store
            .save_transaction(make_tx(
                c,
                1,
                vec![coinbase_input()],
                vec![
                    output_to(0, 10, &["M1", "M2", ""]),
                    output_to(1, 20, &["M1"]),
                ],
            ))
            .await
            .expect("save");
        store
            .save_block(make_block(1, vec![c], BlockState::AddressesImported))
            .await
            .expect("save");
        store
            .save_transaction(make_tx(
                t,
                2,
                vec![spending_input(c, 0), spending_input(c, 1)],
                vec![output_to(0, 25, &["M1"])],
            ))
            .await
            .expect("save");
        store
            .save_block(make_block(2, vec![t], BlockState::AddressesImported))
            .await
            .expect("save");

        let resolver = RelationResolver::new(store.clone());
        for h in [1, 2] {
            resolver
                .resolve(stored_block(&store, h).await)
                .await
                .expect("resolve");
        }

        let m1 = store
            .find_address_by_value("M1")
            .await
            .expect("lookup")
            .expect("M1");
        assert_eq!(m1.output_transactions.len(), 3);
        assert_eq!(m1.input_transactions.len(), 2);

        let m2 = store
            .find_address_by_value("M2")
            .await
            .expect("lookup")
            .expect("M2");
        assert_eq!(
            m2.input_transactions.iter().copied().collect::<Vec<_>>(),
            vec![InputPoint::new(t, 0)]
        );
        assert!(store.find_address_by_value("").await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn missing_block_transaction_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let block = make_block(4, vec![txid_from_byte(0x44)], BlockState::AddressesImported);
        let err = RelationResolver::new(store)
            .resolve(block)
            .await
            .expect_err("unstored block tx");
        assert!(matches!(err, CoreError::BlockTransactionNotFound { .. }));
        assert!(!err.is_missing_origin());
    }

    #[tokio::test]
    async fn relation_stage_selects_and_processes_lowest_block() {
        let store = Arc::new(MemoryStore::new());
        seed_scenario(&store).await;
        let stage = RelationStage::new(store.clone());

        let height = stage
            .select(None)
            .await
            .expect("select")
            .expect("block 2 eligible");
        assert_eq!(height, BlockHeight(2));
        let block = stage.process(height).await.expect("process");
        assert_eq!(block.height, BlockHeight(2));

        assert!(matches!(
            stage.process(BlockHeight(99)).await,
            Err(CoreError::BlockNotFound(BlockHeight(99)))
        ));
    }
}
