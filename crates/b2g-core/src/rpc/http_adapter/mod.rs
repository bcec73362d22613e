//! Native JSON-RPC client for Bitcoin Core compatible endpoints.
//!
//! Implements [`NodeRpc`](super::NodeRpc) over JSON-RPC using `reqwest`,
//! with HTTP Basic auth (explicit credentials or cookie file) and optional
//! request rate limiting.

mod client;
mod connection;
mod parsing;
mod protocol;

pub use client::HttpRpcClient;
