use std::path::PathBuf;

use bitcoin::{OutPoint, Txid};

use crate::types::{BlockHeight, InputPoint};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("origin transaction {origin} not found (spent by input {input})")]
    MissingOriginTransaction { origin: Txid, input: InputPoint },

    #[error("origin output {origin} not found (spent by input {input})")]
    MissingOriginOutput { origin: OutPoint, input: InputPoint },

    #[error("block {0} not found in store")]
    BlockNotFound(BlockHeight),

    #[error("transaction {txid} of block {height} not found in store")]
    BlockTransactionNotFound { height: BlockHeight, txid: Txid },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl CoreError {
    /// `true` for the resolution errors caused by an input whose origin is
    /// not (yet) in the store.
    pub fn is_missing_origin(&self) -> bool {
        matches!(
            self,
            Self::MissingOriginTransaction { .. } | Self::MissingOriginOutput { .. }
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("store snapshot is not valid JSON: {0}")]
    Snapshot(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("RPC transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("RPC server error {code}: {message}")]
    ServerError { code: i64, message: String },

    #[error("invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("invalid RPC URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("RPC user and password must be given together")]
    PartialCredentials,

    #[error("unusable RPC cookie file {}: {reason}", path.display())]
    Cookie { path: PathBuf, reason: String },

    #[error("RPC requests per second must be at least 1")]
    ZeroRateLimit,
}
