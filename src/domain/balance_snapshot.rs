use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A point-in-time balance reading for one asset, as returned by the
/// exchange's account endpoint. `value_usd` is filled in later by price
/// enrichment, not at snapshot time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub id: Uuid,
    pub account_id: Uuid,
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
    pub snapshot_at: DateTime<Utc>,
    pub value_usd: Option<Decimal>,
}

impl BalanceSnapshot {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}
