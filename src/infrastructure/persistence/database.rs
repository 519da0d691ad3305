use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Owns the connection pool and the schema. SQLite has no native decimal
/// type, so every monetary/quantity column is stored as `TEXT` and parsed
/// back through `rust_decimal::Decimal::from_str` at read time, the same
/// convention the teacher's own `candles`/`orders` tables use.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect to SQLite database")?;

        info!(db_url, "connected to database");

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                api_key_encrypted TEXT,
                api_secret_encrypted TEXT,
                last_sync_at TEXT,
                sync_status TEXT NOT NULL DEFAULT 'idle',
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create accounts table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                binance_id TEXT UNIQUE,
                tx_type TEXT NOT NULL,
                base_asset TEXT NOT NULL,
                quote_asset TEXT,
                pair TEXT,
                quantity TEXT NOT NULL,
                price TEXT,
                total_value_usd TEXT,
                fee_asset TEXT,
                fee_amount TEXT,
                executed_at TEXT NOT NULL,
                raw_data TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create transactions table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transactions_account_time ON transactions (account_id, executed_at);",
        )
        .execute(&mut *conn)
        .await
        .context("failed to create transactions account/time index")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transactions_asset_time ON transactions (base_asset, executed_at);",
        )
        .execute(&mut *conn)
        .await
        .context("failed to create transactions asset/time index")?;

        // `pair` (the full trading symbol, e.g. "BTCUSDT") is indexed
        // separately from `base_asset` so last-trade-id/first-trade-time
        // lookups never collide across pairs sharing a base asset (BTCUSDT
        // vs BTCEUR).
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transactions_account_pair ON transactions (account_id, pair);",
        )
        .execute(&mut *conn)
        .await
        .context("failed to create transactions pair index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS balance_snapshots (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                asset TEXT NOT NULL,
                free TEXT NOT NULL,
                locked TEXT NOT NULL,
                snapshot_at TEXT NOT NULL,
                value_usd TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create balance_snapshots table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_balance_snapshots_account_time ON balance_snapshots (account_id, snapshot_at);",
        )
        .execute(&mut *conn)
        .await
        .context("failed to create balance_snapshots index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_history (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                open_at TEXT NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                UNIQUE(symbol, interval, open_at)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create price_history table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_price_history_symbol_interval_time ON price_history (symbol, interval, open_at);",
        )
        .execute(&mut *conn)
        .await
        .context("failed to create price_history index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolio_snapshots (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                snapshot_date TEXT NOT NULL,
                total_value_usd TEXT NOT NULL,
                invested_usd TEXT NOT NULL,
                pnl_unrealized_usd TEXT NOT NULL,
                pnl_realized_usd TEXT NOT NULL,
                btc_amount TEXT,
                btc_avg_buy_price TEXT,
                composition_json TEXT,
                UNIQUE(account_id, snapshot_date)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create portfolio_snapshots table")?;

        info!("database schema initialized");
        Ok(())
    }
}
