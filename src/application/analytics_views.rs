//! Stateless, Decimal-pure derivations on top of the portfolio service's
//! outputs: BTC moving averages, buy-timing percentiles, price histograms,
//! a monthly investment heatmap, and a DCA-vs-lump-sum simulation. None of
//! these touch a repository — callers hand in the transactions/price rows
//! already loaded for the view being built.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::domain::money::{round_pct, round_price, round_qty};
use crate::domain::price_history::PriceHistory;
use crate::domain::transaction::Transaction;

const HISTOGRAM_BUCKET_WIDTH: i64 = 5000;

#[derive(Debug, Clone, Serialize)]
pub struct MovingAveragePoint {
    pub date: NaiveDate,
    pub close: Decimal,
    pub ma50: Option<Decimal>,
    pub ma200: Option<Decimal>,
}

/// Sliding 50/200-day windows over daily closes, O(n) via running sums.
/// `prices` must already be sorted by `open_at` ascending.
pub fn moving_averages(prices: &[PriceHistory]) -> Vec<MovingAveragePoint> {
    let mut points = Vec::with_capacity(prices.len());
    let mut sum50 = Decimal::ZERO;
    let mut sum200 = Decimal::ZERO;

    for (i, p) in prices.iter().enumerate() {
        sum50 += p.close;
        sum200 += p.close;

        if i >= 50 {
            sum50 -= prices[i - 50].close;
        }
        if i >= 200 {
            sum200 -= prices[i - 200].close;
        }

        let ma50 = (i >= 49).then(|| round_price(sum50 / Decimal::from(50)));
        let ma200 = (i >= 199).then(|| round_price(sum200 / Decimal::from(200)));

        points.push(MovingAveragePoint {
            date: p.open_at.date_naive(),
            close: p.close,
            ma50,
            ma200,
        });
    }

    points
}

#[derive(Debug, Clone, Serialize)]
pub struct BuyTiming {
    pub executed_at: chrono::DateTime<chrono::Utc>,
    pub buy_price: Decimal,
    pub percentile: Option<Decimal>,
}

/// For each buy, `(buy_price − min) / (max − min) × 100` over the 30
/// closing prices strictly preceding the buy's date, clamped to `[0, 100]`.
/// `50` when the window is flat, `None` when there's no prior price data.
pub fn timing_percentile_per_buy(buys: &[Transaction], prices: &[PriceHistory]) -> Vec<BuyTiming> {
    let mut sorted_prices = prices.to_vec();
    sorted_prices.sort_by_key(|p| p.open_at);

    buys.iter()
        .map(|buy| {
            let buy_date = buy.executed_at.date_naive();
            let prior: Vec<Decimal> = sorted_prices
                .iter()
                .filter(|p| p.open_at.date_naive() < buy_date)
                .rev()
                .take(30)
                .map(|p| p.close)
                .collect();

            let buy_price = buy.usd_unit_cost();
            let percentile = match (prior.iter().min(), prior.iter().max()) {
                (Some(min), Some(max)) if min == max => Some(dec!(50)),
                (Some(min), Some(max)) => {
                    let raw = (buy_price - *min) / (*max - *min) * Decimal::from(100);
                    Some(round_pct(raw.clamp(Decimal::ZERO, Decimal::from(100))))
                }
                _ => None,
            };

            BuyTiming {
                executed_at: buy.executed_at,
                buy_price,
                percentile,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct TimingAggregates {
    /// Counts of buys in quartiles (≤25, ≤50, ≤75, >75) of timing percentile.
    pub quartile_counts: [u64; 4],
    pub average_percentile: Option<Decimal>,
    pub label: String,
    pub below_ma200_count: u64,
    pub above_ma200_count: u64,
}

pub fn timing_aggregates(buy_timings: &[BuyTiming], ma_points: &[MovingAveragePoint]) -> TimingAggregates {
    let percentiles: Vec<Decimal> = buy_timings.iter().filter_map(|b| b.percentile).collect();

    let mut quartile_counts = [0u64; 4];
    for p in &percentiles {
        let bucket = if *p <= dec!(25) {
            0
        } else if *p <= dec!(50) {
            1
        } else if *p <= dec!(75) {
            2
        } else {
            3
        };
        quartile_counts[bucket] += 1;
    }

    let average_percentile = if percentiles.is_empty() {
        None
    } else {
        let sum = percentiles.iter().fold(Decimal::ZERO, |acc, p| acc + p);
        Some(round_pct(sum / Decimal::from(percentiles.len() as i64)))
    };

    let label = match average_percentile {
        Some(avg) if avg < dec!(33) => "Dip Buyer",
        Some(avg) if avg > dec!(67) => "FOMO Buyer",
        _ => "Neutral",
    }
    .to_string();

    let ma200_by_date: HashMap<NaiveDate, Decimal> = ma_points
        .iter()
        .filter_map(|m| m.ma200.map(|v| (m.date, v)))
        .collect();

    let mut below_ma200_count = 0u64;
    let mut above_ma200_count = 0u64;
    for buy in buy_timings {
        if let Some(ma200) = ma200_by_date.get(&buy.executed_at.date_naive()) {
            if buy.buy_price < *ma200 {
                below_ma200_count += 1;
            } else {
                above_ma200_count += 1;
            }
        }
    }

    TimingAggregates {
        quartile_counts,
        average_percentile,
        label,
        below_ma200_count,
        above_ma200_count,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramBucket {
    pub label: String,
    pub bucket_min: Decimal,
    pub bucket_max: Decimal,
    pub total_qty: Decimal,
    pub buy_count: u64,
}

/// Buckets BTC bought by unit price in $5000 bands.
pub fn price_histogram(buys: &[Transaction]) -> Vec<HistogramBucket> {
    let mut buckets: BTreeMap<i64, (Decimal, u64)> = BTreeMap::new();

    for buy in buys {
        let price = buy.usd_unit_cost();
        if price <= Decimal::ZERO {
            continue;
        }
        let bucket_index = (price / Decimal::from(HISTOGRAM_BUCKET_WIDTH))
            .trunc()
            .to_i64()
            .unwrap_or(0);
        let entry = buckets.entry(bucket_index).or_insert((Decimal::ZERO, 0));
        entry.0 += buy.quantity;
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(idx, (qty, count))| {
            let bucket_min = Decimal::from(idx * HISTOGRAM_BUCKET_WIDTH);
            let bucket_max = bucket_min + Decimal::from(HISTOGRAM_BUCKET_WIDTH);
            let label = format!(
                "${}k-${}k",
                bucket_min / Decimal::from(1000),
                bucket_max / Decimal::from(1000)
            );
            HistogramBucket {
                label,
                bucket_min,
                bucket_max,
                total_qty: round_qty(qty),
                buy_count: count,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyHeatmapCell {
    pub year: i32,
    pub month: u32,
    pub invested_usd: Decimal,
    pub btc_acquired: Decimal,
    pub buy_count: u64,
}

pub fn monthly_heatmap(buys: &[Transaction]) -> Vec<MonthlyHeatmapCell> {
    let mut cells: BTreeMap<(i32, u32), (Decimal, Decimal, u64)> = BTreeMap::new();

    for buy in buys {
        let date = buy.executed_at.date_naive();
        let amount = buy
            .total_value_usd
            .unwrap_or_else(|| buy.usd_unit_cost() * buy.quantity);
        let entry = cells
            .entry((date.year(), date.month()))
            .or_insert((Decimal::ZERO, Decimal::ZERO, 0));
        entry.0 += amount;
        entry.1 += buy.quantity;
        entry.2 += 1;
    }

    cells
        .into_iter()
        .map(|((year, month), (invested, qty, count))| MonthlyHeatmapCell {
            year,
            month,
            invested_usd: round_price(invested),
            btc_acquired: round_qty(qty),
            buy_count: count,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DcaCadence {
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Serialize)]
pub struct DcaSimulationPoint {
    pub date: NaiveDate,
    pub real_btc: Decimal,
    pub simulated_btc: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct DcaSimulationSummary {
    pub real_total_invested_usd: Decimal,
    pub diff_btc: Decimal,
    pub diff_pct: Decimal,
    pub diff_value_usd: Decimal,
    pub diff_value_eur: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct DcaSimulation {
    pub points: Vec<DcaSimulationPoint>,
    pub summary: DcaSimulationSummary,
}

/// Compares the real buy history against a hypothetical fixed-cadence DCA
/// plan of equal total spend: `real_total_invested / period_count` per
/// period, converted to BTC at the closest price within a 5-day forward
/// window of each simulated date.
pub fn dca_simulation(
    buys: &[Transaction],
    prices: &[PriceHistory],
    cadence: DcaCadence,
    today: NaiveDate,
    eur_usd: Decimal,
) -> DcaSimulation {
    let mut sorted_buys = buys.to_vec();
    sorted_buys.sort_by_key(|b| b.executed_at);

    let mut sorted_prices = prices.to_vec();
    sorted_prices.sort_by_key(|p| p.open_at);

    let real_total_invested = sorted_buys.iter().fold(Decimal::ZERO, |acc, b| {
        acc + b.total_value_usd.unwrap_or_else(|| b.usd_unit_cost() * b.quantity)
    });

    let Some(first_buy) = sorted_buys.first() else {
        return DcaSimulation {
            points: vec![],
            summary: DcaSimulationSummary {
                real_total_invested_usd: Decimal::ZERO,
                diff_btc: Decimal::ZERO,
                diff_pct: Decimal::ZERO,
                diff_value_usd: Decimal::ZERO,
                diff_value_eur: Decimal::ZERO,
            },
        };
    };
    let first_buy_date = first_buy.executed_at.date_naive();

    let mut sim_dates = Vec::new();
    let mut cursor = first_buy_date;
    while cursor <= today {
        sim_dates.push(cursor);
        cursor = match cadence {
            DcaCadence::Weekly => cursor + chrono::Duration::days(7),
            DcaCadence::Monthly => add_one_month(cursor),
        };
    }

    let periods = sim_dates.len().max(1);
    let per_period_amount = round_price(real_total_invested / Decimal::from(periods as i64));

    let mut real_cum_qty = Decimal::ZERO;
    let mut real_idx = 0usize;
    let mut sim_cum_qty = Decimal::ZERO;
    let mut points = Vec::with_capacity(sim_dates.len());

    for sim_date in &sim_dates {
        while real_idx < sorted_buys.len() && sorted_buys[real_idx].executed_at.date_naive() <= *sim_date {
            real_cum_qty += sorted_buys[real_idx].quantity;
            real_idx += 1;
        }

        if let Some(price) = closest_price_within(&sorted_prices, *sim_date, 5) {
            if price > Decimal::ZERO {
                sim_cum_qty += per_period_amount / price;
            }
        }

        points.push(DcaSimulationPoint {
            date: *sim_date,
            real_btc: round_qty(real_cum_qty),
            simulated_btc: round_qty(sim_cum_qty),
        });
    }

    let total_real_qty = sorted_buys.iter().fold(Decimal::ZERO, |acc, b| acc + b.quantity);
    let diff_btc = round_qty(total_real_qty - sim_cum_qty);
    let diff_pct = if sim_cum_qty > Decimal::ZERO {
        round_pct(diff_btc / sim_cum_qty * Decimal::from(100))
    } else {
        Decimal::ZERO
    };

    let current_price = sorted_prices.last().map(|p| p.close).unwrap_or(Decimal::ZERO);
    let diff_value_usd = round_price(diff_btc * current_price);
    let diff_value_eur = crate::domain::money::to_eur(diff_value_usd, eur_usd);

    DcaSimulation {
        points,
        summary: DcaSimulationSummary {
            real_total_invested_usd: round_price(real_total_invested),
            diff_btc,
            diff_pct,
            diff_value_usd,
            diff_value_eur,
        },
    }
}

fn closest_price_within(sorted_prices: &[PriceHistory], date: NaiveDate, max_forward_days: i64) -> Option<Decimal> {
    sorted_prices
        .iter()
        .filter(|p| {
            let d = p.open_at.date_naive();
            d >= date && (d - date).num_days() <= max_forward_days
        })
        .min_by_key(|p| (p.open_at.date_naive() - date).num_days())
        .map(|p| p.close)
}

fn add_one_month(date: NaiveDate) -> NaiveDate {
    let (mut year, mut month) = (date.year(), date.month() + 1);
    if month > 12 {
        month = 1;
        year += 1;
    }
    let day = date.day().min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(date)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next_month_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid date");
    let this_month_first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid date");
    (next_month_first - this_month_first).num_days() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::TransactionType;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn price(day: i64, close: Decimal) -> PriceHistory {
        PriceHistory {
            id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            interval: crate::domain::price_history::CandleInterval::OneDay,
            open_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(day),
            open: close,
            high: close,
            low: close,
            close,
            volume: Decimal::ZERO,
        }
    }

    fn buy(day: i64, price: Decimal, qty: Decimal) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            account_id: Uuid::nil(),
            binance_id: None,
            tx_type: TransactionType::Buy,
            base_asset: "BTC".into(),
            quote_asset: Some("USDT".into()),
            quantity: qty,
            price: Some(price),
            total_value_usd: Some(price * qty),
            fee_asset: None,
            fee_amount: None,
            executed_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(day),
            raw_data: None,
        }
    }

    #[test]
    fn moving_average_nulls_before_window_fills() {
        let prices: Vec<PriceHistory> = (0..60).map(|i| price(i, Decimal::from(100 + i))).collect();
        let points = moving_averages(&prices);
        assert!(points[0].ma50.is_none());
        assert!(points[48].ma50.is_none());
        assert!(points[49].ma50.is_some());
        assert!(points[59].ma200.is_none());
    }

    #[test]
    fn timing_percentile_flat_window_is_fifty() {
        let prices: Vec<PriceHistory> = (0..10).map(|i| price(i, dec!(100))).collect();
        let buys = vec![buy(20, dec!(100), dec!(1))];
        let timings = timing_percentile_per_buy(&buys, &prices);
        assert_eq!(timings[0].percentile, Some(dec!(50)));
    }

    #[test]
    fn timing_percentile_none_without_prior_data() {
        let buys = vec![buy(0, dec!(100), dec!(1))];
        let timings = timing_percentile_per_buy(&buys, &[]);
        assert_eq!(timings[0].percentile, None);
    }

    #[test]
    fn price_histogram_buckets_by_five_thousand() {
        let buys = vec![buy(0, dec!(12000), dec!(1)), buy(1, dec!(13500), dec!(2))];
        let buckets = price_histogram(&buys);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].label, "$10k-$15k");
        assert_eq!(buckets[0].total_qty, dec!(3.000000000000000000));
        assert_eq!(buckets[0].buy_count, 2);
    }

    #[test]
    fn monthly_heatmap_groups_by_calendar_month() {
        let buys = vec![buy(0, dec!(100), dec!(1)), buy(40, dec!(100), dec!(1))];
        let cells = monthly_heatmap(&buys);
        assert_eq!(cells.len(), 2);
    }

    #[test]
    fn dca_simulation_empty_buys_is_zeroed() {
        let sim = dca_simulation(&[], &[], DcaCadence::Monthly, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(), dec!(1.08));
        assert!(sim.points.is_empty());
        assert_eq!(sim.summary.real_total_invested_usd, Decimal::ZERO);
    }
}
