//! Prints portfolio views as `Envelope` JSON to stdout. No HTTP routes live
//! here (that's out of scope); this binary is the read path's only consumer
//! of `PortfolioService` and the analytics-view adapters, useful for piping
//! into `jq` or a cron job that mails a daily digest.

use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing_subscriber::prelude::*;

use rustfolio::application::analytics_views::{
    self, DcaCadence,
};
use rustfolio::application::bootstrap::ensure_default_account;
use rustfolio::application::{Envelope, PortfolioService};
use rustfolio::config::Config;
use rustfolio::domain::price_history::CandleInterval;
use rustfolio::infrastructure::persistence::{
    Database, SqliteBalanceRepository, SqlitePortfolioSnapshotRepository,
    SqlitePriceHistoryRepository, SqliteTransactionRepository,
};
use rustfolio::infrastructure::prices::LivePriceProvider;

const DEFAULT_ACCOUNT_NAME: &str = "default";

#[derive(Parser, Debug)]
#[command(about = "Rustfolio portfolio reports")]
struct Cli {
    #[command(subcommand)]
    view: View,
}

#[derive(Subcommand, Debug)]
enum View {
    /// Holdings, total value, ROI and annualized IRR.
    Overview,
    /// Per-asset quantity, value and P&L.
    PerAsset,
    /// Cumulative cost/VWAP per buy event for one asset.
    Dca { asset: String },
    /// Daily total-value/invested/P&L series over a date range.
    Performance { from: NaiveDate, to: NaiveDate },
    /// Peak-to-trough drawdown over the whole history.
    Drawdown,
    /// Realized P&L for sells executed within one calendar year.
    FiscalYear { year: i32 },
    /// 50/200-day moving averages for BTCUSDT.
    MovingAverages,
    /// Per-buy timing percentile against the trailing 30 closes, plus aggregates.
    Timing { asset: String },
    /// $5000-wide buy-price histogram.
    Histogram { asset: String },
    /// Monthly invested/BTC-acquired/buy-count grid.
    Heatmap { asset: String },
    /// Real buy history vs. a fixed-cadence DCA plan of equal total spend.
    DcaSim {
        asset: String,
        #[arg(value_enum)]
        cadence: Cadence,
    },
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum Cadence {
    Weekly,
    Monthly,
}

impl From<Cadence> for DcaCadence {
    fn from(c: Cadence) -> Self {
        match c {
            Cadence::Weekly => DcaCadence::Weekly,
            Cadence::Monthly => DcaCadence::Monthly,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let db = Database::new(&config.db_url).await?;
    let account_id = ensure_default_account(&db.pool, DEFAULT_ACCOUNT_NAME).await?;

    let transactions = Arc::new(SqliteTransactionRepository::new(db.pool.clone()));
    let balances = Arc::new(SqliteBalanceRepository::new(db.pool.clone()));
    let price_history = Arc::new(SqlitePriceHistoryRepository::new(db.pool.clone()));
    let snapshots = Arc::new(SqlitePortfolioSnapshotRepository::new(db.pool.clone()));
    let prices = Arc::new(LivePriceProvider::new(config.exchange_base_url.clone()));

    let service = PortfolioService::new(
        transactions.clone(),
        balances.clone(),
        price_history.clone(),
        snapshots,
        prices.clone(),
    );

    let output = match cli.view {
        View::Overview => {
            serde_json::to_string_pretty(&Envelope::from_result(service.overview(account_id).await))?
        }
        View::PerAsset => serde_json::to_string_pretty(&Envelope::from_result(
            service.per_asset_metrics(account_id).await,
        ))?,
        View::Dca { asset } => serde_json::to_string_pretty(&Envelope::from_result(
            service.dca_analysis(account_id, &asset).await,
        ))?,
        View::Performance { from, to } => serde_json::to_string_pretty(&Envelope::from_result(
            service.performance_history(account_id, from, to).await,
        ))?,
        View::Drawdown => {
            serde_json::to_string_pretty(&Envelope::from_result(service.drawdown(account_id).await))?
        }
        View::FiscalYear { year } => serde_json::to_string_pretty(&Envelope::from_result(
            service.fiscal_year_report(account_id, year).await,
        ))?,
        View::MovingAverages => {
            let result = load_btc_prices(&price_history).await;
            serde_json::to_string_pretty(&Envelope::from_result(
                result.map(|prices| analytics_views::moving_averages(&prices)),
            ))?
        }
        View::Timing { asset } => {
            let result = async {
                let buys = buy_transactions(&transactions, account_id, &asset).await?;
                let prices = load_btc_prices(&price_history).await?;
                let timings = analytics_views::timing_percentile_per_buy(&buys, &prices);
                let ma_points = analytics_views::moving_averages(&prices);
                let aggregates = analytics_views::timing_aggregates(&timings, &ma_points);
                Ok::<_, anyhow::Error>((timings, aggregates))
            }
            .await;
            serde_json::to_string_pretty(&Envelope::from_result(result))?
        }
        View::Histogram { asset } => {
            let result = buy_transactions(&transactions, account_id, &asset)
                .await
                .map(|buys| analytics_views::price_histogram(&buys));
            serde_json::to_string_pretty(&Envelope::from_result(result))?
        }
        View::Heatmap { asset } => {
            let result = buy_transactions(&transactions, account_id, &asset)
                .await
                .map(|buys| analytics_views::monthly_heatmap(&buys));
            serde_json::to_string_pretty(&Envelope::from_result(result))?
        }
        View::DcaSim { asset, cadence } => {
            let result = async {
                let buys = buy_transactions(&transactions, account_id, &asset).await?;
                let prices = load_btc_prices(&price_history).await?;
                let eur_usd = prices_eur_usd(&prices);
                let today = chrono::Utc::now().date_naive();
                Ok::<_, anyhow::Error>(analytics_views::dca_simulation(
                    &buys,
                    &prices,
                    cadence.into(),
                    today,
                    eur_usd,
                ))
            }
            .await;
            serde_json::to_string_pretty(&Envelope::from_result(result))?
        }
    };

    println!("{output}");
    Ok(())
}

async fn buy_transactions(
    transactions: &Arc<SqliteTransactionRepository>,
    account_id: uuid::Uuid,
    asset: &str,
) -> Result<Vec<rustfolio::domain::transaction::Transaction>> {
    use rustfolio::domain::ports::TransactionRepository;
    let txs = transactions.find_by_account(account_id, Some(asset)).await?;
    Ok(txs.into_iter().filter(|t| t.tx_type.is_buy_like()).collect())
}

/// Whole-history daily BTCUSDT closes, the series every BTC-denominated
/// analytics view is computed against.
async fn load_btc_prices(
    price_history: &Arc<SqlitePriceHistoryRepository>,
) -> Result<Vec<rustfolio::domain::price_history::PriceHistory>> {
    use rustfolio::domain::ports::PriceHistoryRepository;
    let from = Utc.timestamp_millis_opt(0).single().unwrap_or_default();
    let to = Utc::now();
    let mut prices = price_history
        .range("BTCUSDT", CandleInterval::OneDay, from, to)
        .await?;
    prices.sort_by_key(|p| p.open_at);
    Ok(prices)
}

fn prices_eur_usd(_prices: &[rustfolio::domain::price_history::PriceHistory]) -> Decimal {
    rustfolio::domain::money::DEFAULT_EUR_USD
}
