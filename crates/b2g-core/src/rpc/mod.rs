//! Bitcoin node RPC abstraction layer.
//!
//! Defines the [`NodeRpc`] trait and provides an HTTP JSON-RPC
//! implementation ([`HttpRpcClient`]) plus a test mock (`mock::MockRpc`).

mod http_adapter;
#[cfg(test)]
pub mod mock;
pub mod types;

pub use http_adapter::HttpRpcClient;
pub use types::RawBlock;

use async_trait::async_trait;
use bitcoin::BlockHash;

use crate::error::CoreError;
use crate::types::BlockHeight;

/// Minimal trait covering the node RPC methods the import pipeline needs.
///
/// Implementations are expected to handle authentication, connection
/// management, and response deserialization internally.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Height of the node's best chain tip (`getblockcount`).
    async fn get_block_count(&self) -> Result<u64, CoreError>;

    /// Hash of the best-chain block at `height` (`getblockhash`).
    async fn get_block_hash(&self, height: BlockHeight) -> Result<BlockHash, CoreError>;

    /// Fully decoded block with its transactions (`getblock <hash> 2`).
    async fn get_block(&self, hash: &BlockHash) -> Result<RawBlock, CoreError>;
}
