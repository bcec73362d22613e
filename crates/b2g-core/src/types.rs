//! Domain types for the address graph.
//!
//! Entities reference each other by key (block height, txid, outpoint,
//! address string) rather than by pointer; the store is the arena that owns
//! them.

use std::collections::BTreeSet;

use bitcoin::{Amount, BlockHash, OutPoint, Script, Txid};
use serde::{Deserialize, Serialize};

// ==============================================================================
// Script Type Classification
// ==============================================================================

/// Output script classification, using the labels Bitcoin Core reports in
/// `scriptPubKey.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptType {
    Nonstandard,
    Pubkey,
    Pubkeyhash,
    Scripthash,
    Multisig,
    Nulldata,
    WitnessV0Keyhash,
    WitnessV0Scripthash,
}

impl ScriptType {
    /// Map a node-reported type label. Labels outside the known set
    /// (`witness_v1_taproot`, `witness_unknown`, ...) are `Nonstandard`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "pubkey" => Self::Pubkey,
            "pubkeyhash" => Self::Pubkeyhash,
            "scripthash" => Self::Scripthash,
            "multisig" => Self::Multisig,
            "nulldata" => Self::Nulldata,
            "witness_v0_keyhash" => Self::WitnessV0Keyhash,
            "witness_v0_scripthash" => Self::WitnessV0Scripthash,
            _ => Self::Nonstandard,
        }
    }

    /// Classify a raw script with the `bitcoin` crate's detection methods.
    #[must_use]
    pub fn classify(script: &Script) -> Self {
        if script.is_p2pk() {
            Self::Pubkey
        } else if script.is_p2pkh() {
            Self::Pubkeyhash
        } else if script.is_p2sh() {
            Self::Scripthash
        } else if script.is_p2wpkh() {
            Self::WitnessV0Keyhash
        } else if script.is_p2wsh() {
            Self::WitnessV0Scripthash
        } else if script.is_multisig() {
            Self::Multisig
        } else if script.is_op_return() {
            Self::Nulldata
        } else {
            Self::Nonstandard
        }
    }
}

impl std::fmt::Display for ScriptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nonstandard => write!(f, "nonstandard"),
            Self::Pubkey => write!(f, "pubkey"),
            Self::Pubkeyhash => write!(f, "pubkeyhash"),
            Self::Scripthash => write!(f, "scripthash"),
            Self::Multisig => write!(f, "multisig"),
            Self::Nulldata => write!(f, "nulldata"),
            Self::WitnessV0Keyhash => write!(f, "witness_v0_keyhash"),
            Self::WitnessV0Scripthash => write!(f, "witness_v0_scripthash"),
        }
    }
}

// ==============================================================================
// Block Height
// ==============================================================================

/// A Bitcoin block height, wrapped for type safety.
///
/// `#[serde(transparent)]` keeps the JSON representation a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHeight(pub u32);

impl BlockHeight {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u32> for BlockHeight {
    fn from(h: u32) -> Self {
        Self(h)
    }
}

impl From<BlockHeight> for u32 {
    fn from(h: BlockHeight) -> Self {
        h.0
    }
}

impl std::ops::Deref for BlockHeight {
    type Target = u32;
    fn deref(&self) -> &u32 {
        &self.0
    }
}

impl std::fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ==============================================================================
// Block State
// ==============================================================================

/// Pipeline progress of a block. Variants are declared in pipeline order,
/// so `Ord` reflects forward progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockState {
    /// Block, transactions and outputs stored.
    ContentImported,
    /// Address nodes created for every output address, not linked yet.
    AddressesImported,
    /// Inputs resolved and address edges complete.
    RelationsResolved,
}

impl BlockState {
    pub const ALL: [BlockState; 3] = [
        Self::ContentImported,
        Self::AddressesImported,
        Self::RelationsResolved,
    ];

    /// Whether moving from `self` to `to` is forward progress.
    pub fn can_advance_to(self, to: BlockState) -> bool {
        to > self
    }
}

impl std::fmt::Display for BlockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContentImported => write!(f, "content_imported"),
            Self::AddressesImported => write!(f, "addresses_imported"),
            Self::RelationsResolved => write!(f, "relations_resolved"),
        }
    }
}

// ==============================================================================
// Entities
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: BlockHeight,
    pub hash: BlockHash,
    pub previous_block_hash: Option<BlockHash>,
    pub time: u64,
    /// Transaction ids in block order.
    pub tx: Vec<Txid>,
    pub state: BlockState,
}

/// Identifies one input of a transaction: "input `vin` of `txid`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InputPoint {
    pub txid: Txid,
    pub vin: u32,
}

impl InputPoint {
    pub fn new(txid: Txid, vin: u32) -> Self {
        Self { txid, vin }
    }
}

impl std::fmt::Display for InputPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.txid, self.vin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: Txid,
    pub block_height: BlockHeight,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Look up an output by its `n` index (not by array position).
    pub fn output(&self, n: u32) -> Option<&TxOutput> {
        self.outputs.iter().find(|o| o.n == n)
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }
}

/// A transaction input. For coinbase inputs, `origin` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub origin: Option<OutPoint>,
    pub sequence: u32,
    /// Key of the output this input spends, set by relation resolution.
    pub resolved_output: Option<OutPoint>,
}

impl TxInput {
    pub fn coinbase(sequence: u32) -> Self {
        Self {
            origin: None,
            sequence,
            resolved_output: None,
        }
    }

    pub fn spending(origin: OutPoint, sequence: u32) -> Self {
        Self {
            origin: Some(origin),
            sequence,
            resolved_output: None,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.origin.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub n: u32,
    pub value: Amount,
    /// Addresses paid by this output. Empty for scripts without an address
    /// encoding (nulldata, bare multisig on recent nodes, nonstandard).
    pub addresses: Vec<String>,
    pub script_type: ScriptType,
}

impl TxOutput {
    /// Associated addresses, skipping empty entries.
    pub fn linked_addresses(&self) -> impl Iterator<Item = &str> {
        self.addresses
            .iter()
            .map(String::as_str)
            .filter(|a| !a.is_empty())
    }
}

/// An address node and its two edge sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub address: String,
    /// Inputs spending outputs paid to this address.
    pub input_transactions: BTreeSet<InputPoint>,
    /// Outputs paying to this address.
    pub output_transactions: BTreeSet<OutPoint>,
}

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            input_transactions: BTreeSet::new(),
            output_transactions: BTreeSet::new(),
        }
    }
}
