//! Process entry point for the complete-set Up/Down arbitrage engine
//! (`SPEC_FULL.md` §2 component 14).
//!
//! A standalone binary rather than a subcommand on the legacy `ploy` CLI:
//! the legacy `Cli`/`Commands` tree in `cli/legacy.rs` is wired to the old
//! `strategy::engine::StrategyEngine` throughout `main.rs`, and threading a
//! second engine through that ~2000-line dispatch without a compiler to
//! check the result is not worth the risk. `src/bin/` already holds one
//! other free-standing binary (`sdk_auth_check.rs`); this follows the same
//! convention.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use clap::Parser;
use config::{Config, Environment, File};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::time::interval;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ploy::adapters::PolymarketClient;
use ploy::signing::Wallet;
use ploy::strategy::complete_set::{
    clob_adapter::{LiveClobClient, LiveDiscoveryClient},
    event_bus,
    onchain_adapter,
    persistence::PersistenceWriter,
    reference_price::ReferencePriceFeed,
    CompleteSetConfig,
    StrategyEngine,
};

const CLOB_BASE_URL: &str = "https://clob.polymarket.com";
const POLYGON_CHAIN_ID: u64 = 137;
const DEFAULT_RPC_URL: &str = "https://polygon-rpc.com";
const DEFAULT_DATABASE_URL: &str = "postgres://localhost/ploy";
const DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Parser)]
#[command(about = "Runs the complete-set Up/Down arbitrage engine")]
struct Args {
    /// Path to a config file (TOML). Falls back to built-in defaults plus
    /// `PLOY_CS_*` environment overrides when omitted.
    #[arg(long)]
    config: Option<String>,

    /// Forces dry-run mode regardless of what the config file says.
    #[arg(long)]
    dry_run: bool,

    /// Emit structured JSON logs instead of the default compact format.
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}

/// Loads `CompleteSetConfig` from an optional file layered under
/// `PLOY_CS_*` environment overrides, per `SPEC_FULL.md` §10.3. Kept
/// self-contained rather than nested under `config::AppConfig` — that
/// struct is already load-bearing for the legacy engine and `main.rs`, and
/// this binary never touches either.
fn load_config(path: Option<&str>) -> anyhow::Result<CompleteSetConfig> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::with_name(path).required(true));
    }
    builder = builder.add_source(Environment::with_prefix("PLOY_CS").separator("_"));
    let raw = builder.build()?;
    let cfg: CompleteSetConfig = raw.try_deserialize().unwrap_or_default();
    let issues = cfg.validate();
    if !issues.is_empty() {
        anyhow::bail!("invalid complete-set config: {}", issues.join("; "));
    }
    Ok(cfg)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs);

    let mut cfg = load_config(args.config.as_deref())?;
    if args.dry_run {
        cfg.dry_run = true;
    }
    info!(dry_run = cfg.dry_run, assets = ?cfg.assets, timeframes = ?cfg.timeframes, "starting complete-set engine");

    let clob_client = if cfg.dry_run {
        PolymarketClient::new(CLOB_BASE_URL, true)?
    } else {
        let wallet = Wallet::from_env(POLYGON_CHAIN_ID)?;
        PolymarketClient::new_authenticated(CLOB_BASE_URL, wallet, false).await?
    };

    let clob = Arc::new(LiveClobClient::new(clob_client.clone()));
    let discovery = Arc::new(LiveDiscoveryClient::new(clob_client));

    let rpc_url = std::env::var("POLYGON_RPC_URL").unwrap_or_else(|_| DEFAULT_RPC_URL.to_string());
    let private_key = std::env::var("POLYMARKET_PRIVATE_KEY").or_else(|_| std::env::var("PRIVATE_KEY"));
    let chain = match private_key {
        Ok(pk) => Arc::new(onchain_adapter::connect(&rpc_url, &pk, POLYGON_CHAIN_ID).await?),
        Err(_) if cfg.dry_run => {
            anyhow::bail!(
                "dry-run still requires POLYMARKET_PRIVATE_KEY/PRIVATE_KEY to read on-chain \
                 balances and gas price; no funds move in dry-run but the RPC reads are live"
            );
        }
        Err(_) => anyhow::bail!("POLYMARKET_PRIVATE_KEY or PRIVATE_KEY environment variable not set"),
    };

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
    let pool = PgPoolOptions::new()
        .max_connections(DB_MAX_CONNECTIONS)
        .connect(&database_url)
        .await?;
    let session_id = uuid::Uuid::new_v4().to_string();
    info!(session_id = %session_id, "persistence writer connected to postgres");

    let (events, events_rx) = event_bus(cfg.event_bus_capacity);
    let writer = PersistenceWriter::new(pool, session_id);
    writer.purge_retention(cfg.retention_days).await?;
    tokio::spawn(writer.run(events_rx, |event| {
        info!(?event, "engine event");
    }));

    // One reference-price feed per configured asset, keyed the same way
    // `CompleteSetMarket::asset` is (e.g. "BTC" -> "BTCUSDT" on Binance).
    // `window_open` starts at zero; `CandleState::deviation_from_open`
    // treats a zero open as "no reading yet" until the first kline tick
    // lands, matching the reference-price feed's own "stale until
    // reconnect" contract from `spec.md` §4.2.
    let mut reference_feeds = std::collections::HashMap::new();
    for asset in &cfg.assets {
        let symbol = format!("{}USDT", asset.to_ascii_uppercase());
        let feed = Arc::new(ReferencePriceFeed::new(
            &symbol,
            rust_decimal::Decimal::ZERO,
            cfg.volume_short_sec,
            cfg.volume_medium_sec,
        ));
        feed.clone().spawn(cfg.volume_short_sec, cfg.volume_medium_sec);
        reference_feeds.insert(asset.clone(), feed);
    }

    let mut engine = StrategyEngine::new(cfg.clone(), clob, discovery, chain, events);
    let mut ticker = interval(StdDuration::from_millis(cfg.refresh_millis));

    info!("entering tick loop");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = chrono::Utc::now();
                let reference = reference_feeds
                    .iter()
                    .map(|(asset, feed)| (asset.clone(), feed.snapshot()))
                    .collect();
                engine.tick(now, &reference).await;
            }
            _ = shutdown_signal() => {
                warn!("shutdown signal received, exiting tick loop");
                break;
            }
        }
    }

    info!("complete-set engine shut down cleanly");
    Ok(())
}
