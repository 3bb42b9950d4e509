//! PharmaPOS daemon (`pharmaposd`)
//!
//! Headless process that keeps the local store and the pending-operation outbox of a
//! point-of-sale terminal in sync with the pharmacy's document API.

mod config;
mod context;
mod environment;

use anyhow::Context as _;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use pharmapos_core::kv::KeyValueStoreTrait;
use pharmapos_core::outbox::{OperationRequest, OutboxRepositoryTrait};
use pharmapos_core::remote::{document_key, merge_document, with_document_id, TenantCollection};
use pharmapos_core::sync::{BackupService, LocalWrite, PullOutcome, SyncTrigger};

use crate::config::{parse_collection, Cli, Command};
use crate::context::{AppContext, ContextConfig, StorageMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    tracing::debug!("pharmaposd v{} starting...", env!("CARGO_PKG_VERSION"));

    let ctx = AppContext::initialize(ContextConfig {
        data_dir: cli.data_dir.clone(),
        api_url: cli.api_url.clone(),
        api_token: cli.api_token.clone(),
        start_offline: cli.offline,
        policy: cli.sync_policy(),
    })?;
    if !ctx.is_durable() {
        tracing::warn!("Running without durable storage; queued operations will not survive a restart");
    }

    match cli.command.clone() {
        Command::Run => run(&ctx, cli.probe_interval()).await,
        Command::Sync => sync_once(&ctx).await,
        Command::Status => print_status(&ctx).await,
        Command::Export { file } => {
            let snapshot = ctx.backup().get_all_data_for_backup().await?;
            let contents = BackupService::render_backup(&snapshot)?;
            std::fs::write(&file, contents)
                .with_context(|| format!("Failed to write {}", file.display()))?;
            tracing::info!("Exported {} record(s) to {}", snapshot.len(), file.display());
            Ok(())
        }
        Command::Import { file } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let snapshot = BackupService::parse_backup(&contents)?;
            let count = snapshot.len();
            ctx.backup().import_all_data(snapshot).await?;
            tracing::info!("Imported {} record(s) from {}", count, file.display());
            Ok(())
        }
        Command::Reconcile => {
            let tenant = cli.require_tenant()?;
            match ctx.reconciler().pull_all(tenant).await? {
                PullOutcome::Skipped { pending } => tracing::warn!(
                    "Reconcile skipped: {} local write(s) still queued, run `sync` first",
                    pending
                ),
                PullOutcome::Pulled { documents } => {
                    println!("{}", serde_json::to_string_pretty(&documents)?)
                }
            }
            Ok(())
        }
        Command::Put {
            collection,
            id,
            json,
        } => {
            let tenant = cli.require_tenant()?;
            let collection = parse_collection(&collection)?;
            let body: serde_json::Value =
                serde_json::from_str(&json).context("Document body is not valid JSON")?;
            put_document(&ctx, tenant, collection, &id, body).await
        }
    }
}

/// Start the background driver and keep it alive until a shutdown signal.
async fn run(ctx: &AppContext, probe_interval: Option<Duration>) -> anyhow::Result<()> {
    let driver = ctx.driver();
    let mut status = driver.subscribe_status();
    driver.start().await;
    let probe = probe_interval.map(|interval| {
        environment::spawn_environment_probe(
            ctx.monitor.clone(),
            Arc::clone(&ctx.remote),
            interval,
        )
    });
    tracing::info!("Syncing with {}", ctx.remote.base_url());
    tracing::info!("Daemon ready. Press Ctrl+C to stop.");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                tracing::info!(
                    "Sync {:?}: {} pending, {} consecutive failure(s)",
                    current.state,
                    current.pending_count,
                    current.consecutive_failures
                );
            }
        }
    }

    tracing::info!("Shutdown signal received...");
    if let Some(probe) = probe {
        probe.abort();
    }
    driver.stop().await;
    tracing::info!("Daemon stopped");
    Ok(())
}

async fn sync_once(ctx: &AppContext) -> anyhow::Result<()> {
    let report = ctx.driver().drain(SyncTrigger::Manual).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn print_status(ctx: &AppContext) -> anyhow::Result<()> {
    let driver = ctx.driver();
    let pending = ctx.outbox.count().await?;
    let mut status = driver.status();
    status.pending_count = pending;
    status.queue_pressure = driver.policy().is_under_pressure(pending);

    let storage = match &ctx.storage_mode {
        StorageMode::Durable { db_path } => db_path.as_str(),
        StorageMode::Memory => "memory",
    };
    let report = serde_json::json!({
        "storage": storage,
        "api": ctx.remote.base_url(),
        "connectivity": ctx.monitor.state(),
        "sync": status,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Upsert one document into the local copy of its collection and mirror it remotely.
async fn put_document(
    ctx: &AppContext,
    tenant: &str,
    collection: TenantCollection,
    id: &str,
    body: serde_json::Value,
) -> anyhow::Result<()> {
    let document = with_document_id(body, id);
    let mut items = match ctx.store.get(collection.as_str()).await? {
        Some(serde_json::Value::Array(items)) => items,
        _ => Vec::new(),
    };
    upsert_document(&mut items, id, document.clone());

    let request = OperationRequest::set_document(tenant, collection, id, document);
    let outcome = ctx
        .writer()
        .write(LocalWrite::mirrored(
            collection.as_str(),
            serde_json::Value::Array(items),
            request,
        ))
        .await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

/// Merge into the item whose id matches, numeric ids included, or append.
fn upsert_document(items: &mut Vec<serde_json::Value>, id: &str, document: serde_json::Value) {
    match items
        .iter_mut()
        .find(|item| item.get("id").and_then(document_key).as_deref() == Some(id))
    {
        Some(existing) => merge_document(existing, document),
        None => items.push(document),
    }
}

fn init_tracing(verbosity: u8) {
    let mut filter = EnvFilter::from_default_env();

    // Only apply defaults if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        let level = match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        if let Ok(directive) = level.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Keep the HTTP stack quiet unless asked for explicitly
    const SILENCE: &[&str] = &["hyper=warn", "hyper_util=warn", "rustls=warn", "reqwest=info"];
    for d in SILENCE {
        if let Ok(directive) = d.parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
            }
            _ => {
                tracing::warn!("Failed to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
    }
}
