//! Narrow interfaces the application layer depends on. Infrastructure
//! implements these traits; nothing above this layer knows whether the
//! backing store is SQLite or the credentials come from an env var or a
//! vault.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::account::Account;
use crate::domain::balance_snapshot::BalanceSnapshot;
use crate::domain::errors::ExchangeError;
use crate::domain::portfolio_snapshot::PortfolioSnapshot;
use crate::domain::price_history::PriceHistory;
use crate::domain::transaction::Transaction;

/// One page of raw trades/deposits/withdrawals/fiat-orders, still shaped as
/// the exchange's own JSON so the caller can map it into a `Transaction`.
pub type RawPage = Vec<serde_json::Value>;

/// The subset of exchange operations the sync orchestrator needs. A single
/// implementation (`infrastructure::exchange::BinanceClient`) backs this in
/// production; tests substitute an in-memory fake.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_account_balances(&self) -> Result<Vec<(String, Decimal, Decimal)>, ExchangeError>;

    async fn get_ticker_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_time_ms: i64,
        end_time_ms: Option<i64>,
        limit: u32,
    ) -> Result<RawPage, ExchangeError>;

    /// One page of `myTrades`, ordered by id. `from_id` takes priority over
    /// `start_time_ms` when both are given, matching the exchange's own
    /// endpoint semantics.
    async fn get_trades_page(
        &self,
        symbol: &str,
        from_id: Option<i64>,
        start_time_ms: Option<i64>,
        limit: u32,
    ) -> Result<RawPage, ExchangeError>;

    async fn get_deposits_page(
        &self,
        start_time_ms: i64,
        end_time_ms: i64,
    ) -> Result<RawPage, ExchangeError>;

    async fn get_withdrawals_page(
        &self,
        start_time_ms: i64,
        end_time_ms: i64,
    ) -> Result<RawPage, ExchangeError>;

    async fn get_fiat_orders_page(
        &self,
        transaction_type: u8,
        start_time_ms: i64,
        end_time_ms: i64,
        page: u32,
        rows: u32,
    ) -> Result<RawPage, ExchangeError>;
}

/// Where account credentials come from. Encryption-at-rest is an external
/// collaborator's responsibility (out of scope); this trait is the seam
/// that collaborator plugs into. The crate ships a plaintext/env-var
/// implementation for local use.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, account_id: Uuid) -> Result<(String, String), ExchangeError>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn find(&self, id: Uuid) -> anyhow::Result<Option<Account>>;
    async fn save_status(&self, id: Uuid, status: crate::domain::account::SyncStatus, last_sync_at: DateTime<Utc>) -> anyhow::Result<()>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Inserts rows, ignoring any whose `binance_id` already exists.
    /// Returns the number of rows actually inserted.
    async fn upsert_many(&self, transactions: &[Transaction]) -> anyhow::Result<u64>;

    async fn find_by_account(&self, account_id: Uuid, base_asset: Option<&str>) -> anyhow::Result<Vec<Transaction>>;

    /// `None` if no trade for `pair` has ever been synced.
    async fn last_trade_id(&self, account_id: Uuid, pair: &str) -> anyhow::Result<Option<i64>>;

    async fn first_trade_time(&self, account_id: Uuid, pair: &str) -> anyhow::Result<Option<DateTime<Utc>>>;

    /// Fills `total_value_usd` for rows left `NULL` at insert time (EUR
    /// trades priced against the EURUSDT daily close). Idempotent.
    async fn enrich_usd_values(&self, account_id: Uuid) -> anyhow::Result<u64>;
}

#[async_trait]
pub trait BalanceRepository: Send + Sync {
    async fn insert_many(&self, balances: &[BalanceSnapshot]) -> anyhow::Result<u64>;
    async fn latest_by_asset(&self, account_id: Uuid) -> anyhow::Result<Vec<BalanceSnapshot>>;
}

#[async_trait]
pub trait PriceHistoryRepository: Send + Sync {
    async fn upsert_many(&self, rows: &[PriceHistory]) -> anyhow::Result<u64>;
    async fn range(
        &self,
        symbol: &str,
        interval: crate::domain::price_history::CandleInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PriceHistory>>;
    async fn close_on(
        &self,
        symbol: &str,
        interval: crate::domain::price_history::CandleInterval,
        date: chrono::NaiveDate,
    ) -> anyhow::Result<Option<Decimal>>;
}

#[async_trait]
pub trait PortfolioSnapshotRepository: Send + Sync {
    async fn upsert(&self, snapshot: &PortfolioSnapshot) -> anyhow::Result<()>;
    async fn range(
        &self,
        account_id: Uuid,
        from: chrono::NaiveDate,
        to: chrono::NaiveDate,
    ) -> anyhow::Result<Vec<PortfolioSnapshot>>;
}

/// Current spot prices for the read path. Kept separate from
/// `ExchangeClient` because valuation only ever needs a best-effort batch
/// lookup, never retried or rate-limited the way a sync step is.
#[async_trait]
pub trait CurrentPriceProvider: Send + Sync {
    async fn get_prices(&self, symbols: &[&str]) -> std::collections::HashMap<String, Decimal>;
}
