//! Pure analytics kernels: FIFO cost-basis reconstruction, VWAP, drawdown,
//! and XIRR. None of these touch the database or the network — they take
//! concrete value types and return concrete value types, so they can be
//! unit-tested without any I/O and reused identically by the portfolio
//! service and the fiscal-year report.

use std::collections::VecDeque;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::money::{round_pct, round_price};
use crate::domain::portfolio_snapshot::ValuationPoint;
use crate::domain::transaction::Transaction;

/// One FIFO lot: a slice of a buy transaction not yet consumed by a sell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FifoLot {
    pub quantity: Decimal,
    pub unit_cost_usd: Decimal,
    pub unit_cost_eur: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FifoResult {
    pub remaining_lots: VecDeque<FifoLot>,
    pub realized_pnl_usd: Decimal,
    pub cost_basis_usd: Decimal,
    pub cost_basis_eur: Decimal,
}

/// Reconstructs FIFO cost basis and realized P&L for one asset from its buy
/// and sell history. `buys` and `sells` must each be sorted by `executed_at`
/// ascending; sells beyond the available lot quantity are silently
/// discarded (a data-quality condition upstream, not this kernel's job to
/// flag).
pub fn compute_fifo(buys: &[Transaction], sells: &[Transaction], eur_usd: Decimal) -> FifoResult {
    let mut lots: VecDeque<FifoLot> = buys
        .iter()
        .map(|b| FifoLot {
            quantity: b.quantity,
            unit_cost_usd: b.usd_unit_cost(),
            unit_cost_eur: b.eur_unit_cost(eur_usd),
        })
        .collect();

    let mut realized_pnl_usd = Decimal::ZERO;

    for sell in sells {
        let sell_price = sell.usd_unit_cost();
        let mut qty_to_sell = sell.quantity;

        while qty_to_sell > Decimal::ZERO {
            let Some(lot) = lots.front().copied() else {
                break;
            };

            if lot.quantity <= qty_to_sell {
                realized_pnl_usd += (sell_price - lot.unit_cost_usd) * lot.quantity;
                qty_to_sell -= lot.quantity;
                lots.pop_front();
            } else {
                realized_pnl_usd += (sell_price - lot.unit_cost_usd) * qty_to_sell;
                let remaining = lot.quantity - qty_to_sell;
                lots[0] = FifoLot {
                    quantity: remaining,
                    unit_cost_usd: lot.unit_cost_usd,
                    unit_cost_eur: lot.unit_cost_eur,
                };
                qty_to_sell = Decimal::ZERO;
            }
        }
    }

    let cost_basis_usd = lots
        .iter()
        .fold(Decimal::ZERO, |acc, l| acc + l.quantity * l.unit_cost_usd);
    let cost_basis_eur = lots
        .iter()
        .fold(Decimal::ZERO, |acc, l| acc + l.quantity * l.unit_cost_eur);

    FifoResult {
        remaining_lots: lots,
        realized_pnl_usd: round_price(realized_pnl_usd),
        cost_basis_usd: round_price(cost_basis_usd),
        cost_basis_eur: round_price(cost_basis_eur),
    }
}

/// Volume-weighted average USD unit cost across a set of transactions,
/// skipping any transaction with a zero unit cost (e.g. a fee-only entry).
pub fn compute_vwap(transactions: &[Transaction]) -> Decimal {
    let mut weighted_sum = Decimal::ZERO;
    let mut total_qty = Decimal::ZERO;

    for tx in transactions {
        let unit_cost = tx.usd_unit_cost();
        if unit_cost == Decimal::ZERO {
            continue;
        }
        weighted_sum += unit_cost * tx.quantity;
        total_qty += tx.quantity;
    }

    if total_qty == Decimal::ZERO {
        return Decimal::ZERO;
    }

    round_price(weighted_sum / total_qty)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DrawdownResult {
    pub max_drawdown_pct: Decimal,
    pub peak_date: Option<NaiveDate>,
    pub trough_date: Option<NaiveDate>,
    pub peak_value_usd: Decimal,
    pub trough_value_usd: Decimal,
}

impl Default for DrawdownResult {
    fn default() -> Self {
        DrawdownResult {
            max_drawdown_pct: Decimal::ZERO,
            peak_date: None,
            trough_date: None,
            peak_value_usd: Decimal::ZERO,
            trough_value_usd: Decimal::ZERO,
        }
    }
}

/// Worst peak-to-trough decline across a valuation time series. `points`
/// must be sorted by `date` ascending. Returns a zeroed result for an empty
/// series.
pub fn compute_drawdown(points: &[ValuationPoint]) -> DrawdownResult {
    if points.is_empty() {
        return DrawdownResult::default();
    }

    let mut running_max = points[0].total_value_usd;
    let mut running_max_point = points[0];

    let mut worst_drawdown = Decimal::ZERO;
    let mut worst_peak = points[0];
    let mut worst_trough = points[0];

    for point in points {
        if point.total_value_usd > running_max {
            running_max = point.total_value_usd;
            running_max_point = *point;
        }

        if running_max > Decimal::ZERO {
            let drawdown = (point.total_value_usd - running_max) / running_max;
            if drawdown < worst_drawdown {
                worst_drawdown = drawdown;
                worst_peak = running_max_point;
                worst_trough = *point;
            }
        }
    }

    DrawdownResult {
        max_drawdown_pct: round_pct(worst_drawdown * Decimal::from(100)),
        peak_date: Some(worst_peak.date),
        trough_date: Some(worst_trough.date),
        peak_value_usd: worst_peak.total_value_usd,
        trough_value_usd: worst_trough.total_value_usd,
    }
}

/// One entry in an IRR cash-flow series: negative for capital deployed,
/// positive for capital returned or the final mark-to-market valuation.
#[derive(Debug, Clone, Copy)]
pub struct CashFlow {
    pub date: NaiveDate,
    pub amount: Decimal,
}

const XIRR_MAX_ITERATIONS: u32 = 200;
const XIRR_CONVERGENCE_THRESHOLD: f64 = 1e-10;
const XIRR_MIN_DERIVATIVE: f64 = 1e-12;
const XIRR_INITIAL_GUESS: f64 = 0.10;
const DAYS_PER_YEAR: f64 = 365.25;

/// Annualized internal rate of return via Newton-Raphson on the cash-flow
/// NPV. Returns `None` when fewer than two flows are given, when the
/// iteration fails to converge, or when the result falls outside the
/// (-100%, 10000%] sanity band.
pub fn compute_xirr(cash_flows: &[CashFlow]) -> Option<Decimal> {
    if cash_flows.len() < 2 {
        return None;
    }

    let t0 = cash_flows[0].date;
    let years: Vec<f64> = cash_flows
        .iter()
        .map(|cf| (cf.date - t0).num_days() as f64 / DAYS_PER_YEAR)
        .collect();
    let amounts: Vec<f64> = cash_flows
        .iter()
        .map(|cf| cf.amount.to_string().parse::<f64>().unwrap_or(0.0))
        .collect();

    let npv = |rate: f64| -> f64 {
        if rate <= -1.0 {
            return f64::INFINITY;
        }
        amounts
            .iter()
            .zip(&years)
            .map(|(a, t)| a / (1.0 + rate).powf(*t))
            .sum()
    };

    let d_npv = |rate: f64| -> f64 {
        if rate <= -1.0 {
            return f64::INFINITY;
        }
        amounts
            .iter()
            .zip(&years)
            .map(|(a, t)| -t * a / (1.0 + rate).powf(t + 1.0))
            .sum()
    };

    let mut rate = XIRR_INITIAL_GUESS;
    let mut converged = false;

    for _ in 0..XIRR_MAX_ITERATIONS {
        let fn_val = npv(rate);
        let dfn_val = d_npv(rate);

        if dfn_val.abs() < XIRR_MIN_DERIVATIVE {
            return None;
        }

        let step = fn_val / dfn_val;
        rate -= step;

        if step.abs() < XIRR_CONVERGENCE_THRESHOLD {
            converged = true;
            break;
        }
    }

    if !converged || rate <= -1.0 || rate > 100.0 {
        return None;
    }

    let pct = (rate * 100.0 * 10000.0).round() / 10000.0;
    Decimal::try_from(pct).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::TransactionType;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn buy(qty: Decimal, total_usd: Decimal, days_offset: i64) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            account_id: Uuid::nil(),
            binance_id: None,
            tx_type: TransactionType::Buy,
            base_asset: "BTC".into(),
            quote_asset: Some("USDT".into()),
            quantity: qty,
            price: None,
            total_value_usd: Some(total_usd),
            fee_asset: None,
            fee_amount: None,
            executed_at: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::days(days_offset),
            raw_data: None,
        }
    }

    fn sell(qty: Decimal, total_usd: Decimal, days_offset: i64) -> Transaction {
        let mut t = buy(qty, total_usd, days_offset);
        t.tx_type = TransactionType::Sell;
        t
    }

    #[test]
    fn fifo_consumes_oldest_lots_first() {
        let buys = vec![buy(dec!(1), dec!(10000), 0), buy(dec!(1), dec!(20000), 1)];
        let sells = vec![sell(dec!(1), dec!(15000), 2)];

        let result = compute_fifo(&buys, &sells, dec!(1.08));

        assert_eq!(result.realized_pnl_usd, dec!(5000.00000000));
        assert_eq!(result.remaining_lots.len(), 1);
        assert_eq!(result.remaining_lots[0].quantity, dec!(1));
        assert_eq!(result.cost_basis_usd, dec!(20000.00000000));
    }

    #[test]
    fn fifo_splits_partial_lot() {
        let buys = vec![buy(dec!(2), dec!(20000), 0)];
        let sells = vec![sell(dec!(0.5), dec!(6000), 1)];

        let result = compute_fifo(&buys, &sells, dec!(1.08));

        // unit cost = 10000, sell price = 12000, pnl = (12000-10000)*0.5 = 1000
        assert_eq!(result.realized_pnl_usd, dec!(1000.00000000));
        assert_eq!(result.remaining_lots.len(), 1);
        assert_eq!(result.remaining_lots[0].quantity, dec!(1.5));
    }

    #[test]
    fn fifo_discards_excess_sell_quantity() {
        let buys = vec![buy(dec!(1), dec!(10000), 0)];
        let sells = vec![sell(dec!(5), dec!(50000), 1)];

        let result = compute_fifo(&buys, &sells, dec!(1.08));

        assert!(result.remaining_lots.is_empty());
        // Only the 1 BTC actually owned is realized; the extra 4 are discarded.
        assert_eq!(result.realized_pnl_usd, dec!(40000.00000000));
    }

    #[test]
    fn vwap_skips_zero_cost_transactions() {
        let txs = vec![
            buy(dec!(1), dec!(10000), 0),
            {
                let mut t = buy(dec!(1), dec!(0), 1);
                t.total_value_usd = None;
                t.price = None;
                t
            },
            buy(dec!(1), dec!(20000), 2),
        ];
        assert_eq!(compute_vwap(&txs), dec!(15000.00000000));
    }

    #[test]
    fn vwap_of_empty_is_zero() {
        assert_eq!(compute_vwap(&[]), Decimal::ZERO);
    }

    fn point(y: i32, m: u32, d: u32, value: Decimal) -> ValuationPoint {
        ValuationPoint {
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            total_value_usd: value,
        }
    }

    #[test]
    fn drawdown_of_empty_series_is_zeroed() {
        let result = compute_drawdown(&[]);
        assert_eq!(result, DrawdownResult::default());
    }

    #[test]
    fn drawdown_finds_worst_peak_to_trough() {
        let points = vec![
            point(2024, 1, 1, dec!(1000)),
            point(2024, 1, 2, dec!(2000)),
            point(2024, 1, 3, dec!(1200)),
            point(2024, 1, 4, dec!(1800)),
            point(2024, 1, 5, dec!(900)),
        ];
        let result = compute_drawdown(&points);
        // Worst is peak 2000 -> trough 900 = -55%
        assert_eq!(result.max_drawdown_pct, dec!(-55.00));
        assert_eq!(result.peak_date, Some(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()));
        assert_eq!(result.trough_date, Some(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()));
    }

    #[test]
    fn drawdown_monotonic_rise_is_zero() {
        let points = vec![
            point(2024, 1, 1, dec!(1000)),
            point(2024, 1, 2, dec!(1500)),
            point(2024, 1, 3, dec!(2000)),
        ];
        let result = compute_drawdown(&points);
        assert_eq!(result.max_drawdown_pct, Decimal::ZERO);
    }

    #[test]
    fn xirr_needs_at_least_two_flows() {
        let flows = vec![CashFlow {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            amount: dec!(-100),
        }];
        assert_eq!(compute_xirr(&flows), None);
    }

    #[test]
    fn xirr_doubling_in_one_year_is_roughly_100_pct() {
        let flows = vec![
            CashFlow {
                date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
                amount: dec!(-1000),
            },
            CashFlow {
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                amount: dec!(2000),
            },
        ];
        let rate = compute_xirr(&flows).expect("should converge");
        let rate_f64: f64 = rate.to_string().parse().unwrap();
        assert!((rate_f64 - 100.0).abs() < 1.0, "rate was {rate_f64}");
    }

    #[test]
    fn xirr_rejects_implausible_result() {
        // A cash flow pattern with no sane positive rate: money goes out and
        // never comes back with any growth, same day, so NPV'(0.1) is ~flat
        // and/or the implied rate blows past the sanity band.
        let flows = vec![
            CashFlow {
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                amount: dec!(-1),
            },
            CashFlow {
                date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                amount: dec!(1_000_000),
            },
        ];
        // This one actually does converge to a very high but finite rate;
        // assert it's either None or clamped within the documented band.
        if let Some(rate) = compute_xirr(&flows) {
            assert!(rate <= dec!(10000));
        }
    }
}
