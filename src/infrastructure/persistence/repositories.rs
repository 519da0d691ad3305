use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::account::{Account, SyncStatus};
use crate::domain::balance_snapshot::BalanceSnapshot;
use crate::domain::portfolio_snapshot::PortfolioSnapshot;
use crate::domain::ports::{
    AccountRepository, BalanceRepository, PortfolioSnapshotRepository, PriceHistoryRepository,
    TransactionRepository,
};
use crate::domain::price_history::{CandleInterval, PriceHistory};
use crate::domain::transaction::{Transaction, TransactionType};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or_default()
}

fn opt_dec(s: Option<String>) -> Option<Decimal> {
    s.and_then(|v| Decimal::from_str(&v).ok())
}

pub struct SqliteAccountRepository {
    pool: SqlitePool,
}

impl SqliteAccountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for SqliteAccountRepository {
    async fn find(&self, id: Uuid) -> anyhow::Result<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };

        let sync_status: String = row.try_get("sync_status")?;
        let last_sync_at: Option<String> = row.try_get("last_sync_at")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Some(Account {
            id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            name: row.try_get("name")?,
            api_key_encrypted: row.try_get("api_key_encrypted")?,
            api_secret_encrypted: row.try_get("api_secret_encrypted")?,
            last_sync_at: last_sync_at
                .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
                .transpose()?,
            sync_status: SyncStatus::from_str(&sync_status)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        }))
    }

    async fn save_status(
        &self,
        id: Uuid,
        status: SyncStatus,
        last_sync_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE accounts SET sync_status = ?, last_sync_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(last_sync_at.to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct SqliteTransactionRepository {
    pool: SqlitePool,
}

impl SqliteTransactionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_transaction(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Transaction> {
        let tx_type: String = row.try_get("tx_type")?;
        let raw_data: Option<String> = row.try_get("raw_data")?;
        let executed_at: String = row.try_get("executed_at")?;

        Ok(Transaction {
            id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            account_id: Uuid::parse_str(&row.try_get::<String, _>("account_id")?)?,
            binance_id: row.try_get("binance_id")?,
            tx_type: TransactionType::from_str(&tx_type)?,
            base_asset: row.try_get("base_asset")?,
            quote_asset: row.try_get("quote_asset")?,
            quantity: dec(&row.try_get::<String, _>("quantity")?),
            price: opt_dec(row.try_get("price")?),
            total_value_usd: opt_dec(row.try_get("total_value_usd")?),
            fee_asset: row.try_get("fee_asset")?,
            fee_amount: opt_dec(row.try_get("fee_amount")?),
            executed_at: DateTime::parse_from_rfc3339(&executed_at)?.with_timezone(&Utc),
            raw_data: raw_data.and_then(|s| serde_json::from_str(&s).ok()),
        })
    }
}

#[async_trait]
impl TransactionRepository for SqliteTransactionRepository {
    async fn upsert_many(&self, transactions: &[Transaction]) -> anyhow::Result<u64> {
        let mut inserted = 0u64;

        for tx in transactions {
            let pair = tx
                .raw_data
                .as_ref()
                .and_then(|v| v.get("symbol"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| {
                    format!("{}{}", tx.base_asset, tx.quote_asset.clone().unwrap_or_default())
                });

            let result = sqlx::query(
                r#"
                INSERT INTO transactions
                    (id, account_id, binance_id, tx_type, base_asset, quote_asset, pair,
                     quantity, price, total_value_usd, fee_asset, fee_amount, executed_at, raw_data)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(binance_id) DO NOTHING
                "#,
            )
            .bind(tx.id.to_string())
            .bind(tx.account_id.to_string())
            .bind(&tx.binance_id)
            .bind(tx.tx_type.as_str())
            .bind(&tx.base_asset)
            .bind(&tx.quote_asset)
            .bind(pair)
            .bind(tx.quantity.to_string())
            .bind(tx.price.map(|p| p.to_string()))
            .bind(tx.total_value_usd.map(|v| v.to_string()))
            .bind(&tx.fee_asset)
            .bind(tx.fee_amount.map(|v| v.to_string()))
            .bind(tx.executed_at.to_rfc3339())
            .bind(tx.raw_data.as_ref().map(|v| v.to_string()))
            .execute(&self.pool)
            .await?;

            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    async fn find_by_account(
        &self,
        account_id: Uuid,
        base_asset: Option<&str>,
    ) -> anyhow::Result<Vec<Transaction>> {
        let rows = if let Some(asset) = base_asset {
            sqlx::query(
                "SELECT * FROM transactions WHERE account_id = ? AND base_asset = ? ORDER BY executed_at ASC",
            )
            .bind(account_id.to_string())
            .bind(asset)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query("SELECT * FROM transactions WHERE account_id = ? ORDER BY executed_at ASC")
                .bind(account_id.to_string())
                .fetch_all(&self.pool)
                .await?
        };

        rows.iter().map(Self::row_to_transaction).collect()
    }

    async fn last_trade_id(&self, account_id: Uuid, pair: &str) -> anyhow::Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT MAX(CAST(binance_id AS INTEGER)) as max_id FROM transactions \
             WHERE account_id = ? AND pair = ? AND tx_type IN ('buy', 'sell')",
        )
        .bind(account_id.to_string())
        .bind(pair)
        .fetch_one(&self.pool)
        .await?;

        let max_id: Option<i64> = row.try_get("max_id")?;
        Ok(max_id.map(|id| id + 1))
    }

    async fn first_trade_time(
        &self,
        account_id: Uuid,
        pair: &str,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT MIN(executed_at) as min_time FROM transactions \
             WHERE account_id = ? AND pair = ? AND tx_type IN ('buy', 'sell')",
        )
        .bind(account_id.to_string())
        .bind(pair)
        .fetch_one(&self.pool)
        .await?;

        let min_time: Option<String> = row.try_get("min_time")?;
        Ok(min_time
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
            .transpose()?)
    }

    async fn enrich_usd_values(&self, account_id: Uuid) -> anyhow::Result<u64> {
        use crate::domain::money::round_price;

        let stable_quotes = crate::domain::transaction::USD_QUOTE_ASSETS
            .iter()
            .map(|q| format!("'{q}'"))
            .collect::<Vec<_>>()
            .join(",");

        let stable_rows = sqlx::query(&format!(
            "SELECT id, price, quantity FROM transactions \
             WHERE account_id = ? AND total_value_usd IS NULL AND price IS NOT NULL \
             AND quote_asset IN ({stable_quotes})"
        ))
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut updated = 0u64;
        for row in &stable_rows {
            let id: String = row.try_get("id")?;
            let price = dec(&row.try_get::<String, _>("price")?);
            let quantity = dec(&row.try_get::<String, _>("quantity")?);
            let total_value_usd = round_price(price * quantity);

            sqlx::query("UPDATE transactions SET total_value_usd = ? WHERE id = ?")
                .bind(total_value_usd.to_string())
                .bind(&id)
                .execute(&self.pool)
                .await?;
            updated += 1;
        }

        // EUR-quoted trades are priced in EUR; convert through the EURUSDT
        // daily close recorded in price_history for that trade's day.
        let eur_rows = sqlx::query(
            r#"
            SELECT t.id, t.price, t.quantity, ph.close AS eur_usd
            FROM transactions t
            JOIN price_history ph
              ON ph.symbol = 'EURUSDT'
             AND ph.interval = '1d'
             AND date(ph.open_at) = date(t.executed_at)
            WHERE t.account_id = ?
              AND t.total_value_usd IS NULL
              AND t.price IS NOT NULL
              AND t.quote_asset = 'EUR'
            "#,
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        for row in &eur_rows {
            let id: String = row.try_get("id")?;
            let price = dec(&row.try_get::<String, _>("price")?);
            let quantity = dec(&row.try_get::<String, _>("quantity")?);
            let eur_usd = dec(&row.try_get::<String, _>("eur_usd")?);
            let total_value_usd = round_price(price * quantity * eur_usd);

            sqlx::query("UPDATE transactions SET total_value_usd = ? WHERE id = ?")
                .bind(total_value_usd.to_string())
                .bind(&id)
                .execute(&self.pool)
                .await?;
            updated += 1;
        }

        Ok(updated)
    }
}

pub struct SqliteBalanceRepository {
    pool: SqlitePool,
}

impl SqliteBalanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BalanceRepository for SqliteBalanceRepository {
    async fn insert_many(&self, balances: &[BalanceSnapshot]) -> anyhow::Result<u64> {
        let mut inserted = 0u64;
        for b in balances {
            let result = sqlx::query(
                "INSERT INTO balance_snapshots (id, account_id, asset, free, locked, snapshot_at, value_usd) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(b.id.to_string())
            .bind(b.account_id.to_string())
            .bind(&b.asset)
            .bind(b.free.to_string())
            .bind(b.locked.to_string())
            .bind(b.snapshot_at.to_rfc3339())
            .bind(b.value_usd.map(|v| v.to_string()))
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    async fn latest_by_asset(&self, account_id: Uuid) -> anyhow::Result<Vec<BalanceSnapshot>> {
        // Avoids PostgreSQL-only `DISTINCT ON`: join each asset to its own
        // most recent snapshot via a per-asset MAX(snapshot_at) subquery,
        // which works identically on SQLite.
        let rows = sqlx::query(
            r#"
            SELECT bs.* FROM balance_snapshots bs
            INNER JOIN (
                SELECT asset, MAX(snapshot_at) AS max_at
                FROM balance_snapshots
                WHERE account_id = ?
                GROUP BY asset
            ) latest ON bs.asset = latest.asset AND bs.snapshot_at = latest.max_at
            WHERE bs.account_id = ?
            "#,
        )
        .bind(account_id.to_string())
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let snapshot_at: String = row.try_get("snapshot_at")?;
                Ok(BalanceSnapshot {
                    id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
                    account_id: Uuid::parse_str(&row.try_get::<String, _>("account_id")?)?,
                    asset: row.try_get("asset")?,
                    free: dec(&row.try_get::<String, _>("free")?),
                    locked: dec(&row.try_get::<String, _>("locked")?),
                    snapshot_at: DateTime::parse_from_rfc3339(&snapshot_at)?.with_timezone(&Utc),
                    value_usd: opt_dec(row.try_get("value_usd")?),
                })
            })
            .collect()
    }
}

pub struct SqlitePriceHistoryRepository {
    pool: SqlitePool,
}

impl SqlitePriceHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PriceHistoryRepository for SqlitePriceHistoryRepository {
    async fn upsert_many(&self, rows: &[PriceHistory]) -> anyhow::Result<u64> {
        let mut inserted = 0u64;
        for r in rows {
            let result = sqlx::query(
                "INSERT INTO price_history (id, symbol, interval, open_at, open, high, low, close, volume) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(symbol, interval, open_at) DO NOTHING",
            )
            .bind(r.id.to_string())
            .bind(&r.symbol)
            .bind(r.interval.as_str())
            .bind(r.open_at.to_rfc3339())
            .bind(r.open.to_string())
            .bind(r.high.to_string())
            .bind(r.low.to_string())
            .bind(r.close.to_string())
            .bind(r.volume.to_string())
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    async fn range(
        &self,
        symbol: &str,
        interval: CandleInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PriceHistory>> {
        let rows = sqlx::query(
            "SELECT * FROM price_history WHERE symbol = ? AND interval = ? \
             AND open_at >= ? AND open_at <= ? ORDER BY open_at ASC",
        )
        .bind(symbol)
        .bind(interval.as_str())
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let open_at: String = row.try_get("open_at")?;
                Ok(PriceHistory {
                    id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
                    symbol: row.try_get("symbol")?,
                    interval,
                    open_at: DateTime::parse_from_rfc3339(&open_at)?.with_timezone(&Utc),
                    open: dec(&row.try_get::<String, _>("open")?),
                    high: dec(&row.try_get::<String, _>("high")?),
                    low: dec(&row.try_get::<String, _>("low")?),
                    close: dec(&row.try_get::<String, _>("close")?),
                    volume: dec(&row.try_get::<String, _>("volume")?),
                })
            })
            .collect()
    }

    async fn close_on(
        &self,
        symbol: &str,
        interval: CandleInterval,
        date: NaiveDate,
    ) -> anyhow::Result<Option<Decimal>> {
        let row = sqlx::query(
            "SELECT close FROM price_history WHERE symbol = ? AND interval = ? AND date(open_at) = ? LIMIT 1",
        )
        .bind(symbol)
        .bind(interval.as_str())
        .bind(date.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| dec(&r.try_get::<String, _>("close").unwrap_or_default())))
    }
}

pub struct SqlitePortfolioSnapshotRepository {
    pool: SqlitePool,
}

impl SqlitePortfolioSnapshotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PortfolioSnapshotRepository for SqlitePortfolioSnapshotRepository {
    async fn upsert(&self, snapshot: &PortfolioSnapshot) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO portfolio_snapshots
                (id, account_id, snapshot_date, total_value_usd, invested_usd,
                 pnl_unrealized_usd, pnl_realized_usd, btc_amount, btc_avg_buy_price, composition_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id, snapshot_date) DO UPDATE SET
                total_value_usd = excluded.total_value_usd,
                invested_usd = excluded.invested_usd,
                pnl_unrealized_usd = excluded.pnl_unrealized_usd,
                pnl_realized_usd = excluded.pnl_realized_usd,
                btc_amount = excluded.btc_amount,
                btc_avg_buy_price = excluded.btc_avg_buy_price,
                composition_json = excluded.composition_json
            "#,
        )
        .bind(snapshot.id.to_string())
        .bind(snapshot.account_id.to_string())
        .bind(snapshot.snapshot_date.to_string())
        .bind(snapshot.total_value_usd.to_string())
        .bind(snapshot.invested_usd.to_string())
        .bind(snapshot.pnl_unrealized_usd.to_string())
        .bind(snapshot.pnl_realized_usd.to_string())
        .bind(snapshot.btc_amount.map(|v| v.to_string()))
        .bind(snapshot.btc_avg_buy_price.map(|v| v.to_string()))
        .bind(snapshot.composition_json.as_ref().map(|v| v.to_string()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn range(
        &self,
        account_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Vec<PortfolioSnapshot>> {
        let rows = sqlx::query(
            "SELECT * FROM portfolio_snapshots WHERE account_id = ? AND snapshot_date >= ? AND snapshot_date <= ? ORDER BY snapshot_date ASC",
        )
        .bind(account_id.to_string())
        .bind(from.to_string())
        .bind(to.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let snapshot_date: String = row.try_get("snapshot_date")?;
                let composition_json: Option<String> = row.try_get("composition_json")?;
                Ok(PortfolioSnapshot {
                    id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
                    account_id: Uuid::parse_str(&row.try_get::<String, _>("account_id")?)?,
                    snapshot_date: NaiveDate::from_str(&snapshot_date)?,
                    total_value_usd: dec(&row.try_get::<String, _>("total_value_usd")?),
                    invested_usd: dec(&row.try_get::<String, _>("invested_usd")?),
                    pnl_unrealized_usd: dec(&row.try_get::<String, _>("pnl_unrealized_usd")?),
                    pnl_realized_usd: dec(&row.try_get::<String, _>("pnl_realized_usd")?),
                    btc_amount: opt_dec(row.try_get("btc_amount")?),
                    btc_avg_buy_price: opt_dec(row.try_get("btc_avg_buy_price")?),
                    composition_json: composition_json.and_then(|s| serde_json::from_str(&s).ok()),
                })
            })
            .collect()
    }
}
