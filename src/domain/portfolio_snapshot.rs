use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A daily rollup of total portfolio value, invested capital, and P&L,
/// persisted once per day so performance history and drawdown don't need to
/// be recomputed from the full transaction ledger every time they're read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub id: Uuid,
    pub account_id: Uuid,
    pub snapshot_date: NaiveDate,
    pub total_value_usd: Decimal,
    pub invested_usd: Decimal,
    pub pnl_unrealized_usd: Decimal,
    pub pnl_realized_usd: Decimal,
    pub btc_amount: Option<Decimal>,
    pub btc_avg_buy_price: Option<Decimal>,
    pub composition_json: Option<serde_json::Value>,
}

impl PortfolioSnapshot {
    pub fn created_at(&self) -> DateTime<Utc> {
        self.snapshot_date
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always a valid time")
            .and_utc()
    }
}

/// A single point on a valuation time series — the concrete input type the
/// drawdown kernel operates on (never a duck-typed trait object), shared by
/// real `PortfolioSnapshot` rows and the synthetic performance history
/// derived from price history when no snapshots exist yet.
#[derive(Debug, Clone, Copy)]
pub struct ValuationPoint {
    pub date: NaiveDate,
    pub total_value_usd: Decimal,
}

impl From<&PortfolioSnapshot> for ValuationPoint {
    fn from(s: &PortfolioSnapshot) -> Self {
        ValuationPoint {
            date: s.snapshot_date,
            total_value_usd: s.total_value_usd,
        }
    }
}
