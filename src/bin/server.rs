//! Headless sync daemon. No HTTP server, no incoming connections: this binary
//! only drives the sync orchestrator on a timer (or once, with `--once`) and
//! logs structured text to stdout.
//!
//! # Environment
//! See `rustfolio::config::Config` for the full list (`DATABASE_URL`,
//! `EXCHANGE_BASE_URL`, `EXCHANGE_API_KEY`/`EXCHANGE_API_SECRET`,
//! `SYNC_INTERVAL_MINUTES`, `TRACKED_ASSETS`, `TRADED_SYMBOLS`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use rustfolio::application::bootstrap::ensure_default_account;
use rustfolio::application::SyncOrchestrator;
use rustfolio::config::Config;
use rustfolio::domain::ports::{CredentialStore, ExchangeClient};
use rustfolio::infrastructure::CircuitBreaker;
use rustfolio::infrastructure::credentials::EnvCredentialStore;
use rustfolio::infrastructure::exchange::BinanceClient;
use rustfolio::infrastructure::persistence::{
    Database, SqliteAccountRepository, SqliteBalanceRepository, SqlitePriceHistoryRepository,
    SqliteTransactionRepository,
};

/// Single-account deployment: the daemon syncs one exchange account on a
/// loop. Multi-account orchestration would iterate over a list of accounts
/// instead of one fixed id; nothing else here would change.
const DEFAULT_ACCOUNT_NAME: &str = "default";

#[derive(Parser, Debug)]
#[command(about = "Rustfolio sync daemon")]
struct Cli {
    /// Run a single sync pass and exit, instead of looping on the configured interval.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    info!(
        db_url = %config.db_url,
        traded_symbols = ?config.traded_symbols,
        tracked_assets = ?config.tracked_assets,
        "rustfolio-server starting"
    );

    let db = Database::new(&config.db_url).await?;
    let account_id = ensure_default_account(&db.pool, DEFAULT_ACCOUNT_NAME).await?;

    let credentials = EnvCredentialStore::new(
        config.exchange_api_key.clone(),
        config.exchange_api_secret.clone(),
    );
    let (api_key, api_secret) = credentials.load(account_id).await?;
    let exchange: Arc<dyn ExchangeClient> = Arc::new(BinanceClient::new(
        api_key,
        api_secret,
        config.exchange_base_url.clone(),
    ));

    let accounts = Arc::new(SqliteAccountRepository::new(db.pool.clone()));
    let transactions = Arc::new(SqliteTransactionRepository::new(db.pool.clone()));
    let balances = Arc::new(SqliteBalanceRepository::new(db.pool.clone()));
    let price_history = Arc::new(SqlitePriceHistoryRepository::new(db.pool.clone()));

    let orchestrator = Arc::new(SyncOrchestrator::new(
        exchange,
        accounts,
        transactions,
        balances,
        price_history,
        config.tracked_assets.clone(),
        config.traded_symbols.clone(),
        config.history_start_ms,
    ));

    // Protects the sync loop from hammering a down or geo-blocked exchange
    // across cycles; the orchestrator's own per-step retry/backoff handles
    // transient failures within a single sync.
    let breaker = Arc::new(CircuitBreaker::new(
        "exchange-sync",
        5,
        2,
        Duration::from_secs(300),
    ));

    if cli.once {
        run_once(&orchestrator, &breaker, account_id).await;
        return Ok(());
    }

    let mut interval =
        tokio::time::interval(Duration::from_secs(config.sync_interval_minutes * 60));
    info!(interval_minutes = config.sync_interval_minutes, "entering sync loop");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_once(&orchestrator, &breaker, account_id).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, exiting after current tick");
                break;
            }
        }
    }

    Ok(())
}

async fn run_once(orchestrator: &Arc<SyncOrchestrator>, breaker: &Arc<CircuitBreaker>, account_id: Uuid) {
    match breaker.call(orchestrator.sync_all(account_id)).await {
        Ok(stats) => {
            if stats.is_success() {
                info!(
                    trades = stats.trades_saved,
                    balances = stats.balances_saved,
                    deposits = stats.deposits_saved,
                    withdrawals = stats.withdrawals_saved,
                    fiat_orders = stats.fiat_orders_saved,
                    "sync completed"
                );
            } else {
                warn!(errors = ?stats.errors, "sync completed with errors");
            }
        }
        Err(e) => error!(error = %e, "sync pass failed"),
    }
}
