//! Exercises `PortfolioService` against in-memory fakes of the persistence
//! ports, the same way `sync_orchestrator`'s own unit tests would substitute
//! a fake `ExchangeClient` — no SQLite involved.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use rustfolio::application::portfolio_service::PortfolioService;
use rustfolio::domain::balance_snapshot::BalanceSnapshot;
use rustfolio::domain::portfolio_snapshot::PortfolioSnapshot;
use rustfolio::domain::ports::{
    BalanceRepository, CurrentPriceProvider, PortfolioSnapshotRepository, PriceHistoryRepository,
    TransactionRepository,
};
use rustfolio::domain::price_history::{CandleInterval, PriceHistory};
use rustfolio::domain::transaction::{Transaction, TransactionType};

fn dt(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(
        &NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
    )
}

fn tx(
    tx_type: TransactionType,
    base: &str,
    quote: Option<&str>,
    qty: Decimal,
    price: Option<Decimal>,
    total_usd: Option<Decimal>,
    at: DateTime<Utc>,
) -> Transaction {
    Transaction {
        id: Uuid::new_v4(),
        account_id: Uuid::nil(),
        binance_id: None,
        tx_type,
        base_asset: base.to_string(),
        quote_asset: quote.map(|q| q.to_string()),
        quantity: qty,
        price,
        total_value_usd: total_usd,
        fee_asset: None,
        fee_amount: None,
        executed_at: at,
        raw_data: None,
    }
}

#[derive(Default)]
struct FakeTransactions {
    rows: Vec<Transaction>,
}

#[async_trait]
impl TransactionRepository for FakeTransactions {
    async fn upsert_many(&self, _transactions: &[Transaction]) -> anyhow::Result<u64> {
        Ok(0)
    }

    async fn find_by_account(
        &self,
        _account_id: Uuid,
        base_asset: Option<&str>,
    ) -> anyhow::Result<Vec<Transaction>> {
        Ok(self
            .rows
            .iter()
            .filter(|t| base_asset.is_none_or(|a| t.base_asset == a))
            .cloned()
            .collect())
    }

    async fn last_trade_id(&self, _account_id: Uuid, _pair: &str) -> anyhow::Result<Option<i64>> {
        Ok(None)
    }

    async fn first_trade_time(
        &self,
        _account_id: Uuid,
        _pair: &str,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(None)
    }

    async fn enrich_usd_values(&self, _account_id: Uuid) -> anyhow::Result<u64> {
        Ok(0)
    }
}

#[derive(Default)]
struct FakeBalances {
    rows: Vec<BalanceSnapshot>,
}

#[async_trait]
impl BalanceRepository for FakeBalances {
    async fn insert_many(&self, _balances: &[BalanceSnapshot]) -> anyhow::Result<u64> {
        Ok(0)
    }

    async fn latest_by_asset(&self, _account_id: Uuid) -> anyhow::Result<Vec<BalanceSnapshot>> {
        Ok(self.rows.clone())
    }
}

#[derive(Default)]
struct FakePriceHistory {
    rows: Vec<PriceHistory>,
}

#[async_trait]
impl PriceHistoryRepository for FakePriceHistory {
    async fn upsert_many(&self, _rows: &[PriceHistory]) -> anyhow::Result<u64> {
        Ok(0)
    }

    async fn range(
        &self,
        symbol: &str,
        _interval: CandleInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PriceHistory>> {
        Ok(self
            .rows
            .iter()
            .filter(|p| p.symbol == symbol && p.open_at >= from && p.open_at <= to)
            .cloned()
            .collect())
    }

    async fn close_on(
        &self,
        symbol: &str,
        _interval: CandleInterval,
        date: NaiveDate,
    ) -> anyhow::Result<Option<Decimal>> {
        Ok(self
            .rows
            .iter()
            .find(|p| p.symbol == symbol && p.open_at.date_naive() == date)
            .map(|p| p.close))
    }
}

#[derive(Default)]
struct FakeSnapshots;

#[async_trait]
impl PortfolioSnapshotRepository for FakeSnapshots {
    async fn upsert(&self, _snapshot: &PortfolioSnapshot) -> anyhow::Result<()> {
        Ok(())
    }

    async fn range(
        &self,
        _account_id: Uuid,
        _from: NaiveDate,
        _to: NaiveDate,
    ) -> anyhow::Result<Vec<PortfolioSnapshot>> {
        Ok(Vec::new())
    }
}

struct FakePrices {
    quotes: HashMap<String, Decimal>,
}

#[async_trait]
impl CurrentPriceProvider for FakePrices {
    async fn get_prices(&self, symbols: &[&str]) -> HashMap<String, Decimal> {
        symbols
            .iter()
            .filter_map(|s| self.quotes.get(*s).map(|p| (s.to_string(), *p)))
            .collect()
    }
}

fn balance(asset: &str, free: Decimal) -> BalanceSnapshot {
    BalanceSnapshot {
        id: Uuid::new_v4(),
        account_id: Uuid::nil(),
        asset: asset.to_string(),
        free,
        locked: Decimal::ZERO,
        snapshot_at: Utc::now(),
        value_usd: None,
    }
}

fn build_service(
    transactions: Vec<Transaction>,
    balances: Vec<BalanceSnapshot>,
    prices: Vec<PriceHistory>,
    quotes: HashMap<String, Decimal>,
) -> PortfolioService {
    PortfolioService::new(
        Arc::new(FakeTransactions { rows: transactions }),
        Arc::new(FakeBalances { rows: balances }),
        Arc::new(FakePriceHistory { rows: prices }),
        Arc::new(FakeSnapshots),
        Arc::new(FakePrices { quotes }),
    )
}

#[tokio::test]
async fn per_asset_metrics_computes_fifo_cost_basis_and_value() {
    let txs = vec![
        tx(
            TransactionType::Buy,
            "BTC",
            Some("USDT"),
            dec!(1),
            Some(dec!(20000)),
            Some(dec!(20000)),
            dt(2023, 1, 1),
        ),
        tx(
            TransactionType::Buy,
            "BTC",
            Some("USDT"),
            dec!(1),
            Some(dec!(30000)),
            Some(dec!(30000)),
            dt(2023, 6, 1),
        ),
    ];
    let balances = vec![balance("BTC", dec!(2))];
    let mut quotes = HashMap::new();
    quotes.insert("BTCUSDT".to_string(), dec!(40000));

    let service = build_service(txs, balances, Vec::new(), quotes);
    let assets = service.per_asset_metrics(Uuid::nil()).await.unwrap();

    assert_eq!(assets.len(), 1);
    let btc = &assets[0];
    assert_eq!(btc.quantity, dec!(2));
    assert_eq!(btc.value_usd, dec!(80000.00000000));
    assert_eq!(btc.cost_basis_usd, dec!(50000.00000000));
    assert_eq!(btc.pnl_usd, dec!(30000.00000000));
    assert_eq!(btc.portfolio_pct, dec!(100.00));
}

#[tokio::test]
async fn overview_invested_subtracts_only_fiat_withdrawals_not_sells() {
    let txs = vec![
        tx(
            TransactionType::Buy,
            "BTC",
            Some("USDT"),
            dec!(1),
            Some(dec!(20000)),
            Some(dec!(20000)),
            dt(2023, 1, 1),
        ),
        tx(
            TransactionType::Sell,
            "BTC",
            Some("USDT"),
            dec!(0.5),
            Some(dec!(25000)),
            Some(dec!(12500)),
            dt(2023, 6, 1),
        ),
        tx(
            TransactionType::Withdrawal,
            "USDT",
            None,
            dec!(5000),
            None,
            Some(dec!(5000)),
            dt(2023, 7, 1),
        ),
    ];
    let balances = vec![balance("BTC", dec!(0.5))];
    let mut quotes = HashMap::new();
    quotes.insert("BTCUSDT".to_string(), dec!(30000));

    let service = build_service(txs, balances, Vec::new(), quotes);
    let overview = service.overview(Uuid::nil()).await.unwrap();

    // invested = 20000 (buy) - 5000 (fiat withdrawal); the sell's proceeds
    // are a cash-flow event for IRR but never reduce invested capital.
    assert_eq!(overview.invested_usd, dec!(15000.00000000));
    assert!(overview.irr_annual_pct.is_some());
}

#[tokio::test]
async fn dca_analysis_builds_cumulative_vwap_rows() {
    let txs = vec![
        tx(
            TransactionType::Buy,
            "BTC",
            Some("USDT"),
            dec!(1),
            Some(dec!(10000)),
            Some(dec!(10000)),
            dt(2023, 1, 1),
        ),
        tx(
            TransactionType::Buy,
            "BTC",
            Some("USDT"),
            dec!(1),
            Some(dec!(20000)),
            Some(dec!(20000)),
            dt(2023, 2, 1),
        ),
    ];
    let service = build_service(txs, vec![balance("BTC", dec!(2))], Vec::new(), HashMap::new());
    let dca = service.dca_analysis(Uuid::nil(), "BTC").await.unwrap();

    assert_eq!(dca.rows.len(), 2);
    assert_eq!(dca.rows[0].cumulative_vwap_usd, dec!(10000.00000000));
    assert_eq!(dca.rows[1].cumulative_vwap_usd, dec!(15000.00000000));
    assert_eq!(dca.current_quantity, dec!(2));
}

#[tokio::test]
async fn fiscal_year_report_only_counts_sells_within_the_year() {
    let txs = vec![
        tx(
            TransactionType::Buy,
            "BTC",
            Some("USDT"),
            dec!(1),
            Some(dec!(10000)),
            Some(dec!(10000)),
            dt(2022, 1, 1),
        ),
        tx(
            TransactionType::Sell,
            "BTC",
            Some("USDT"),
            dec!(1),
            Some(dec!(25000)),
            Some(dec!(25000)),
            dt(2023, 6, 1),
        ),
        tx(
            TransactionType::Sell,
            "ETH",
            Some("USDT"),
            dec!(1),
            Some(dec!(2000)),
            Some(dec!(2000)),
            dt(2024, 6, 1),
        ),
    ];
    let service = build_service(txs, Vec::new(), Vec::new(), HashMap::new());
    let report = service.fiscal_year_report(Uuid::nil(), 2023).await.unwrap();

    assert_eq!(report.assets.len(), 1);
    assert_eq!(report.assets[0].asset, "BTC");
    assert_eq!(report.assets[0].realized_pnl_usd, dec!(15000.00000000));
}

#[tokio::test]
async fn performance_history_synthesizes_from_btc_price_history_when_no_snapshots() {
    let txs = vec![tx(
        TransactionType::Buy,
        "BTC",
        Some("USDT"),
        dec!(1),
        Some(dec!(10000)),
        Some(dec!(10000)),
        dt(2023, 1, 1),
    )];
    let prices = vec![
        PriceHistory {
            id: Uuid::new_v4(),
            symbol: "BTCUSDT".to_string(),
            interval: CandleInterval::OneDay,
            open_at: dt(2023, 1, 1),
            open: dec!(10000),
            high: dec!(10000),
            low: dec!(10000),
            close: dec!(10000),
            volume: dec!(1),
        },
        PriceHistory {
            id: Uuid::new_v4(),
            symbol: "BTCUSDT".to_string(),
            interval: CandleInterval::OneDay,
            open_at: dt(2023, 1, 2),
            open: dec!(12000),
            high: dec!(12000),
            low: dec!(12000),
            close: dec!(12000),
            volume: dec!(1),
        },
    ];
    let service = build_service(txs, Vec::new(), prices, HashMap::new());
    let points = service
        .performance_history(Uuid::nil(), dt(2023, 1, 1).date_naive(), dt(2023, 1, 2).date_naive())
        .await
        .unwrap();

    assert_eq!(points.len(), 2);
    assert_eq!(points[0].total_value_usd, dec!(10000.00000000));
    assert_eq!(points[1].total_value_usd, dec!(12000.00000000));
    assert_eq!(points[1].pnl_usd, dec!(2000.00000000));
}
