//! Shared test helpers for `b2g-core` unit tests.
//!
//! Builders for transactions, outputs and blocks so tests across modules
//! share one source of dummy data.

use bitcoin::hashes::Hash;
use bitcoin::{Amount, BlockHash, OutPoint, Txid};

use crate::types::{Block, BlockHeight, BlockState, ScriptType, Transaction, TxInput, TxOutput};

// ==============================================================================
// Id Helpers
// ==============================================================================

/// Create a deterministic `Txid` from a single distinguishing byte.
pub fn txid_from_byte(b: u8) -> Txid {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    Txid::from_byte_array(bytes)
}

pub fn block_hash_from_height(height: u32) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&height.to_le_bytes());
    bytes[31] = 0xb1;
    BlockHash::from_byte_array(bytes)
}

// ==============================================================================
// Transaction Builders
// ==============================================================================

pub fn coinbase_input() -> TxInput {
    TxInput::coinbase(0xFFFF_FFFF)
}

pub fn spending_input(funding_txid: Txid, vout: u32) -> TxInput {
    TxInput::spending(OutPoint::new(funding_txid, vout), 0xFFFF_FFFE)
}

/// An output with index `n` paying `sats` to the given addresses.
pub fn output_to(n: u32, sats: u64, addresses: &[&str]) -> TxOutput {
    TxOutput {
        n,
        value: Amount::from_sat(sats),
        addresses: addresses.iter().map(|a| (*a).to_owned()).collect(),
        script_type: ScriptType::Pubkeyhash,
    }
}

pub fn make_tx(
    txid: Txid,
    height: u32,
    inputs: Vec<TxInput>,
    outputs: Vec<TxOutput>,
) -> Transaction {
    Transaction {
        txid,
        block_height: BlockHeight(height),
        inputs,
        outputs,
    }
}

pub fn make_block(height: u32, tx: Vec<Txid>, state: BlockState) -> Block {
    Block {
        height: BlockHeight(height),
        hash: block_hash_from_height(height),
        previous_block_hash: height.checked_sub(1).map(block_hash_from_height),
        time: 1_231_006_505 + u64::from(height) * 600,
        tx,
        state,
    }
}
