use std::path::PathBuf;

use clap::Parser;

/// b2g: imports a Bitcoin node's chain into an address/transaction graph.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Bitcoin Core RPC URL.
    #[arg(long, default_value = "http://127.0.0.1:8332", env = "B2G_RPC_URL")]
    pub rpc_url: String,

    /// RPC username. Requires --rpc-pass.
    #[arg(long, env = "B2G_RPC_USER")]
    pub rpc_user: Option<String>,

    /// RPC password. Requires --rpc-user.
    #[arg(long, env = "B2G_RPC_PASS")]
    pub rpc_pass: Option<String>,

    /// Path to the node's `.cookie` file, used when no user/pass is given.
    #[arg(long, env = "B2G_RPC_COOKIE_FILE")]
    pub rpc_cookie_file: Option<PathBuf>,

    /// Maximum RPC requests per second. Unlimited if omitted.
    #[arg(long)]
    pub rpc_requests_per_second: Option<u32>,

    /// JSON snapshot the store is loaded from and flushed to.
    /// If omitted, the graph is in-memory only.
    #[arg(long, env = "B2G_STORE")]
    pub store: Option<PathBuf>,

    /// Interval between content stage cycles, in milliseconds.
    #[arg(long, default_value = "1000", value_parser = clap::value_parser!(u64).range(1..))]
    pub content_interval_ms: u64,

    /// Interval between address stage cycles, in milliseconds.
    #[arg(long, default_value = "1000", value_parser = clap::value_parser!(u64).range(1..))]
    pub addresses_interval_ms: u64,

    /// Interval between relation stage cycles, in milliseconds.
    #[arg(long, default_value = "1000", value_parser = clap::value_parser!(u64).range(1..))]
    pub relations_interval_ms: u64,

    /// Interval between store snapshot flushes, in milliseconds.
    #[arg(long, default_value = "30000", value_parser = clap::value_parser!(u64).range(1..))]
    pub flush_interval_ms: u64,

    /// Stop a stage on its first block failure instead of retrying.
    #[arg(long)]
    pub halt_on_error: bool,

    /// Skip a block after this many consecutive failures, until restart.
    #[arg(long)]
    pub max_failures: Option<u32>,

    /// Run every stage until idle, in pipeline order, then exit.
    #[arg(long)]
    pub once: bool,
}
