use std::env;
use std::sync::Once;

use b2g_core::rpc::{HttpRpcClient, NodeRpc};
use b2g_core::BlockHeight;

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("b2g_core=debug")),
            )
            .with_target(true)
            .try_init();
    });
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires local regtest bitcoind with B2G_TEST_RPC_* set"]
async fn regtest_blocks_parse_and_link_to_their_parents() {
    init_tracing();

    let rpc_url = env::var("B2G_TEST_RPC_URL").expect("B2G_TEST_RPC_URL must be set");
    let rpc_user = env::var("B2G_TEST_RPC_USER").expect("B2G_TEST_RPC_USER must be set");
    let rpc_pass = env::var("B2G_TEST_RPC_PASS").expect("B2G_TEST_RPC_PASS must be set");

    let rpc = HttpRpcClient::new(&rpc_url, Some(&rpc_user), Some(&rpc_pass), None, None)
        .expect("rpc client must construct");

    let tip = rpc.get_block_count().await.expect("getblockcount must succeed");
    assert!(tip >= 1, "regtest must have mined at least one block");
    eprintln!("[itest] walking {} blocks from {rpc_url}", tip.min(20) + 1);

    let mut previous = None;
    for height in 0..=tip.min(20) as u32 {
        let hash = rpc
            .get_block_hash(BlockHeight(height))
            .await
            .expect("getblockhash must succeed");
        let block = rpc.get_block(&hash).await.expect("getblock must succeed");

        assert_eq!(block.hash, hash);
        assert_eq!(block.height, BlockHeight(height));
        assert_eq!(block.previous_block_hash, previous, "block {height} parent link");
        assert!(!block.transactions.is_empty(), "every block has a coinbase");
        assert!(block.transactions[0].is_coinbase());
        for tx in &block.transactions {
            assert_eq!(tx.block_height, BlockHeight(height));
        }
        previous = Some(hash);
    }
}
