mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{eyre, WrapErr};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use b2g_core::pipeline::{
    AddressStage, ContentStage, DriverConfig, RelationStage, Stage, StageDriver,
};
use b2g_core::rpc::{HttpRpcClient, NodeRpc};
use b2g_core::store::{EntityStore, MemoryStore};
use b2g_core::{BlockState, CoreError};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    // Connect to Bitcoin Core RPC and verify the connection succeeds
    // before any stage starts.
    let rpc: Arc<dyn NodeRpc> = Arc::new(
        HttpRpcClient::new(
            &args.rpc_url,
            args.rpc_user.as_deref(),
            args.rpc_pass.as_deref(),
            args.rpc_cookie_file.as_deref(),
            args.rpc_requests_per_second,
        )
        .context("configure RPC client")?,
    );

    let tip = rpc.get_block_count().await.map_err(|err| {
        let message = format_rpc_connect_error(&args.rpc_url, &err.to_string());
        eyre!(message).wrap_err("while attempting to connect to Bitcoin Core RPC")
    })?;
    tracing::info!(tip, "connected to Bitcoin Core");

    let store: Arc<dyn EntityStore> = match &args.store {
        Some(path) => {
            let store = MemoryStore::open(path)
                .await
                .with_context(|| format!("load store snapshot {}", path.display()))?;
            tracing::info!(path = %path.display(), "opened persistent store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("no --store given; the imported graph is in-memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let config = |interval_ms: u64| DriverConfig {
        interval: Duration::from_millis(interval_ms),
        halt_on_error: args.halt_on_error,
        max_failures: args.max_failures,
    };
    let content = StageDriver::new(
        ContentStage::new(rpc.clone(), store.clone()),
        store.clone(),
        config(args.content_interval_ms),
    )?;
    let addresses = StageDriver::new(
        AddressStage::new(store.clone()),
        store.clone(),
        config(args.addresses_interval_ms),
    )?;
    let relations = StageDriver::new(
        RelationStage::new(store.clone()),
        store.clone(),
        config(args.relations_interval_ms),
    )?;

    let outcome = if args.once {
        run_once(content, addresses, relations).await
    } else {
        run_until_shutdown(
            content,
            addresses,
            relations,
            store.clone(),
            Duration::from_millis(args.flush_interval_ms),
        )
        .await
    };

    store.flush().await.context("flush store")?;
    log_store_stats(store.as_ref()).await?;

    outcome
}

/// Drain each stage in pipeline order, so blocks imported by one stage are
/// picked up by the next within the same run.
async fn run_once(
    mut content: StageDriver<ContentStage>,
    mut addresses: StageDriver<AddressStage>,
    mut relations: StageDriver<RelationStage>,
) -> eyre::Result<()> {
    let reports = [
        ("content", content.run_cycle().await.context("content stage")?),
        ("addresses", addresses.run_cycle().await.context("addresses stage")?),
        ("relations", relations.run_cycle().await.context("relations stage")?),
    ];
    for (stage, report) in reports {
        tracing::info!(
            stage,
            processed = report.processed.len(),
            failed = report.failed.len(),
            superseded = report.superseded.len(),
            "stage drained"
        );
    }
    Ok(())
}

async fn run_until_shutdown(
    content: StageDriver<ContentStage>,
    addresses: StageDriver<AddressStage>,
    relations: StageDriver<RelationStage>,
    store: Arc<dyn EntityStore>,
    flush_interval: Duration,
) -> eyre::Result<()> {
    let shutdown = Arc::new(watch::channel(false).0);

    let drivers = vec![
        ("content", spawn_driver(content, shutdown.clone())),
        ("addresses", spawn_driver(addresses, shutdown.clone())),
        ("relations", spawn_driver(relations, shutdown.clone())),
    ];
    // The flusher outlives the drivers so blocks finished during shutdown
    // are still covered by periodic snapshots.
    let (stop_flusher, flusher_stopped) = watch::channel(false);
    let flusher = tokio::spawn(flush_periodically(store, flush_interval, flusher_stopped));

    let mut stopped = shutdown.subscribe();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listen for Ctrl-C")?;
            tracing::info!("shutdown requested; waiting for stages to finish their current block");
        }
        _ = stopped.changed() => {
            tracing::warn!("a stage driver stopped; shutting down the others");
        }
    }
    shutdown.send_replace(true);

    let (names, handles): (Vec<_>, Vec<_>) = drivers.into_iter().unzip();
    let results = futures::future::join_all(handles).await;
    stop_flusher.send_replace(true);
    if let Err(err) = flusher.await {
        tracing::warn!(error = %err, "store flusher task failed");
    }

    let mut first_error = None;
    for (stage, result) in names.into_iter().zip(results) {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                first_error.get_or_insert(
                    eyre::Report::new(err).wrap_err(format!("{stage} stage halted")),
                );
            }
            Err(err) => {
                first_error.get_or_insert(
                    eyre::Report::new(err).wrap_err(format!("{stage} stage task failed")),
                );
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Runs `driver` on its own task. A driver that returns an error asks
/// every other task to stop too.
fn spawn_driver<S: Stage + 'static>(
    driver: StageDriver<S>,
    shutdown: Arc<watch::Sender<bool>>,
) -> JoinHandle<Result<(), CoreError>> {
    let receiver = shutdown.subscribe();
    tokio::spawn(async move {
        let result = driver.run(receiver).await;
        if result.is_err() {
            shutdown.send_replace(true);
        }
        result
    })
}

async fn flush_periodically(
    store: Arc<dyn EntityStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = store.flush().await {
                    tracing::warn!(error = %err, "periodic store flush failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn log_store_stats(store: &dyn EntityStore) -> eyre::Result<()> {
    let stats = store.stats().await.context("read store stats")?;
    tracing::info!(
        content_imported = stats.blocks_in(BlockState::ContentImported),
        addresses_imported = stats.blocks_in(BlockState::AddressesImported),
        relations_resolved = stats.blocks_in(BlockState::RelationsResolved),
        transactions = stats.transactions,
        addresses = stats.addresses,
        "store totals"
    );
    Ok(())
}

fn format_rpc_connect_error(rpc_url: &str, source_error: &str) -> String {
    let mut lines = vec![
        format!("could not connect to RPC endpoint `{rpc_url}`"),
        format!("RPC error: {source_error}"),
    ];

    if source_error.contains("Could not resolve host") || source_error.contains("dns error") {
        lines.push("hint: hostname resolution failed; verify the endpoint hostname".into());
    } else if source_error.contains("401") || source_error.contains("unauthorized") {
        lines.push(
            "hint: authentication failed; verify --rpc-user/--rpc-pass or --rpc-cookie-file".into(),
        );
    } else if source_error.contains("Connection refused")
        || source_error.contains("error sending request")
    {
        lines.push(
            "hint: is bitcoind running with -server=1 and is the RPC port reachable?".into(),
        );
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_error_hints_at_credentials_on_401() {
        let message = format_rpc_connect_error(
            "http://127.0.0.1:8332",
            "invalid response: HTTP 401 unauthorized",
        );
        assert!(message.contains("`http://127.0.0.1:8332`"));
        assert!(message.contains("--rpc-cookie-file"));
    }

    #[test]
    fn connect_error_without_known_cause_has_no_hint() {
        let message = format_rpc_connect_error("http://node:8332", "something odd");
        assert_eq!(message.lines().count(), 2);
    }
}
