use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandleInterval {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1M")]
    OneMonth,
}

impl CandleInterval {
    pub fn as_str(self) -> &'static str {
        match self {
            CandleInterval::OneDay => "1d",
            CandleInterval::OneWeek => "1w",
            CandleInterval::OneMonth => "1M",
        }
    }
}

impl std::str::FromStr for CandleInterval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1d" => Ok(CandleInterval::OneDay),
            "1w" => Ok(CandleInterval::OneWeek),
            "1M" => Ok(CandleInterval::OneMonth),
            other => anyhow::bail!("unknown candle interval: {other}"),
        }
    }
}

/// One OHLCV candle for a symbol, used both to track BTC/EUR price history
/// for EUR-value enrichment and to drive the analytics-view adapters
/// (moving averages, histograms, heatmaps).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistory {
    pub id: Uuid,
    pub symbol: String,
    pub interval: CandleInterval,
    pub open_at: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}
