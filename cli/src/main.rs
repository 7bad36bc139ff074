//! chainhook: relay MultiversX transfers to subscriber webhooks.
//!
//! Usage:
//! ```bash
//! # Run the relay until Ctrl-C / SIGTERM
//! chainhook run --config ./chainhook.json
//!
//! # Delivery statistics for one subscription
//! chainhook stats --id 42
//!
//! # Check a webhook URL before subscribing it
//! chainhook validate --url https://hooks.example.com/in
//!
//! # Send a test transfer to subscription 42's webhook
//! chainhook test --id 42 [--data transfer.json]
//! ```

mod tracing_setup;

use std::env;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};

use chainhook_core::{
    DeliveryConfig, HookConfig, StorageConfig, SubscriptionId, SubscriptionStore, TransferEvent,
};
use chainhook_delivery::{
    validate_webhook_url, DeliveryEngine, DeliveryLog, HttpWebhookClient, WebhookDispatcher,
};
use chainhook_feed::{ConnectionManager, SocketIoConnector};
use chainhook_storage::SqliteStorage;

use crate::tracing_setup::init_tracing;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "run" => cmd_run(&args[2..]).await,
        "stats" => cmd_stats(&args[2..]).await,
        "validate" => cmd_validate(&args[2..]).await,
        "test" => cmd_test(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("chainhook {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainhook {}", env!("CARGO_PKG_VERSION"));
    println!("Relay MultiversX token transfers to subscriber webhooks\n");
    println!("USAGE:");
    println!("    chainhook <COMMAND>\n");
    println!("COMMANDS:");
    println!("    run        Restore active subscriptions and relay until stopped");
    println!("    stats      Print delivery statistics for a subscription");
    println!("    validate   Validate and probe a webhook URL");
    println!("    test       Deliver a test transfer to a subscription's webhook");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("FLAGS:");
    println!("    --config <FILE>   JSON configuration file (run, stats, test)");
    println!("    --id <N>          Subscription id (stats, test)  [required]");
    println!("    --data <FILE>     Transfer JSON to send instead of the built-in one (test)");
    println!("    --url <URL>       Webhook URL (validate)  [required]\n");
    println!("ENVIRONMENT:");
    println!("    WEBHOOK_TIMEOUT_MS, WEBHOOK_MAX_RETRIES, DB_PATH,");
    println!("    MVX_API_MAINNET, MVX_API_TESTNET, MVX_API_DEVNET,");
    println!("    CHAINHOOK_LOG, CHAINHOOK_LOG_JSON, RUST_LOG");
}

async fn cmd_run(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    init_tracing(&config.log);
    info!(version = env!("CARGO_PKG_VERSION"), "starting chainhook");

    let storage = Arc::new(open_storage(&config.storage).await?);
    let client = Arc::new(HttpWebhookClient::new(&config.delivery)?);
    let engine = Arc::new(DeliveryEngine::new(
        client,
        DeliveryLog::new(storage.clone()),
        &config.delivery,
    ));
    let dispatcher = Arc::new(WebhookDispatcher::new(storage.clone(), engine));
    let connector = Arc::new(SocketIoConnector::new(&config.feed)?);

    let (manager, inbound) = ConnectionManager::new(connector, dispatcher, &config.feed);
    let manager = Arc::new(manager);
    let dispatch_task = tokio::spawn(manager.clone().run_dispatcher(inbound));

    let active = storage
        .list_active()
        .await
        .context("failed to load active subscriptions")?;
    let restored = manager.activate_all(&active).await;
    info!(restored, stored = active.len(), "relay running");

    shutdown_signal().await;
    info!("shutdown signal received");

    manager.shutdown_all().await;
    let metrics = manager.metrics();
    info!(
        batches = metrics.batches_received,
        events = metrics.events_received,
        matches = metrics.matches_dispatched,
        skipped = metrics.batches_skipped,
        "dispatch totals"
    );

    if tokio::time::timeout(Duration::from_secs(5), dispatch_task)
        .await
        .is_err()
    {
        warn!("dispatcher still draining at exit");
    }
    Ok(())
}

async fn cmd_stats(args: &[String]) -> anyhow::Result<()> {
    let id = parse_id(args)?;
    let config = load_config(args)?;

    let storage = Arc::new(open_storage(&config.storage).await?);
    let stats = DeliveryLog::new(storage).stats_for(id).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn cmd_validate(args: &[String]) -> anyhow::Result<()> {
    let url = parse_flag(args, "--url").ok_or_else(|| anyhow!("--url is required"))?;
    validate_webhook_url(&url)?;

    let client = HttpWebhookClient::new(&DeliveryConfig::default())?;
    let result = client.probe(&url).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Deliver one transfer to a stored subscription's webhook through the
/// regular retrying engine, logging it like any other delivery.
async fn cmd_test(args: &[String]) -> anyhow::Result<()> {
    let id = parse_id(args)?;
    let config = load_config(args)?;
    init_tracing(&config.log);

    let storage = Arc::new(open_storage(&config.storage).await?);
    let subscription = storage
        .get(id)
        .await?
        .ok_or_else(|| anyhow!("subscription {id} not found"))?;

    let transfer = match parse_flag(args, "--data") {
        Some(path) => read_transfer(&path)?,
        None => test_transfer(Utc::now()),
    };
    info!(
        subscription_id = %id,
        tx_hash = transfer["txHash"].as_str().unwrap_or_default(),
        url = %subscription.webhook_url,
        "sending test webhook"
    );

    let client = Arc::new(HttpWebhookClient::new(&config.delivery)?);
    let engine = DeliveryEngine::new(client, DeliveryLog::new(storage), &config.delivery);
    let outcome = engine
        .deliver(&subscription, &TransferEvent::new(transfer))
        .await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

/// Built-in transfer used by `test` when no `--data` file is given.
fn test_transfer(now: DateTime<Utc>) -> Value {
    json!({
        "txHash": format!("test-{}", now.timestamp_millis()),
        "sender": "erd1test...",
        "receiver": "erd1test...",
        "status": "success",
        "timestamp": now.timestamp(),
        "value": "1000000000000000000",
        "function": "transfer",
        "action": {
            "category": "transfer",
            "name": "transfer",
            "description": "Test transfer",
            "arguments": {
                "transfers": [{
                    "type": "FungibleESDT",
                    "ticker": "TEST",
                    "token": "TEST-123456",
                    "decimals": 18,
                    "value": "1000000000000000000"
                }]
            }
        }
    })
}

fn read_transfer(path: &str) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    let transfer: Value =
        serde_json::from_str(&text).with_context(|| format!("{path} is not valid JSON"))?;
    if !transfer.is_object() {
        bail!("{path} must contain a JSON object");
    }
    Ok(transfer)
}

fn parse_id(args: &[String]) -> anyhow::Result<SubscriptionId> {
    let id: i64 = parse_flag(args, "--id")
        .ok_or_else(|| anyhow!("--id is required"))?
        .parse()
        .context("--id must be an integer")?;
    Ok(SubscriptionId(id))
}

fn load_config(args: &[String]) -> anyhow::Result<HookConfig> {
    let base = match parse_flag(args, "--config") {
        Some(path) => HookConfig::from_json_file(&path)?,
        None => HookConfig::default(),
    };
    Ok(base.with_overrides(|key| env::var(key).ok())?)
}

async fn open_storage(config: &StorageConfig) -> anyhow::Result<SqliteStorage> {
    let url = config.database_url.as_str();
    if !url.starts_with("sqlite:") {
        if let Some(dir) = Path::new(url).parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
    }
    SqliteStorage::open(url)
        .await
        .with_context(|| format!("failed to open database {url}"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}
