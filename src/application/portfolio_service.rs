//! Composes the persisted ledger into the views a reader actually wants:
//! per-asset holdings, an account overview, a DCA breakdown for one asset,
//! a performance time series, drawdown, and a fiscal-year realized P&L
//! report. All math routes through `domain::kernels`; this module owns only
//! the composition — which transactions feed which kernel call.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::kernels::{compute_drawdown, compute_fifo, compute_xirr, CashFlow, DrawdownResult};
use crate::domain::money::{round_pct, round_price, round_qty, to_eur};
use crate::domain::portfolio_snapshot::ValuationPoint;
use crate::domain::ports::{
    BalanceRepository, CurrentPriceProvider, PortfolioSnapshotRepository, PriceHistoryRepository,
    TransactionRepository,
};
use crate::domain::price_history::CandleInterval;
use crate::domain::transaction::{Transaction, TransactionType, FIAT_AND_STABLECOINS, USD_QUOTE_ASSETS};

#[derive(Debug, Clone, Serialize)]
pub struct AssetMetrics {
    pub asset: String,
    pub quantity: Decimal,
    pub current_price_usd: Decimal,
    pub value_usd: Decimal,
    pub value_eur: Decimal,
    pub cost_basis_usd: Decimal,
    pub cost_basis_eur: Decimal,
    pub realized_pnl_usd: Decimal,
    pub pnl_usd: Decimal,
    pub pnl_eur: Decimal,
    pub pnl_pct: Decimal,
    pub portfolio_pct: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub assets: Vec<AssetMetrics>,
    pub total_value_usd: Decimal,
    pub total_value_eur: Decimal,
    pub invested_usd: Decimal,
    pub invested_eur: Decimal,
    pub roi_pct: Decimal,
    pub irr_annual_pct: Option<Decimal>,
    /// Trailing 90-day value/invested/P&L series, embedded the way the
    /// original dashboard's overview carries its own `evolution_90d`
    /// alongside the top holdings rather than making the caller issue a
    /// second request.
    pub evolution_90d: Vec<PerformancePoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DcaEventRow {
    pub executed_at: chrono::DateTime<Utc>,
    pub quantity: Decimal,
    pub cumulative_quantity: Decimal,
    pub cumulative_cost_usd: Decimal,
    pub cumulative_vwap_usd: Decimal,
    pub cumulative_cost_eur: Decimal,
    pub cumulative_vwap_eur: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct DcaAnalysis {
    pub asset: String,
    pub rows: Vec<DcaEventRow>,
    pub current_quantity: Decimal,
    pub realized_pnl_usd: Decimal,
    pub cost_basis_usd: Decimal,
    pub cost_basis_eur: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformancePoint {
    pub date: NaiveDate,
    pub total_value_usd: Decimal,
    pub total_value_eur: Decimal,
    pub invested_usd: Decimal,
    pub invested_eur: Decimal,
    pub pnl_usd: Decimal,
    pub pnl_eur: Decimal,
    pub pnl_pct: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct FiscalYearAssetReport {
    pub asset: String,
    pub realized_pnl_usd: Decimal,
    pub realized_pnl_eur: Decimal,
    pub total_sold: Decimal,
    pub total_proceeds_usd: Decimal,
    pub total_proceeds_eur: Decimal,
    pub sell_events: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FiscalYearReport {
    pub year: i32,
    pub assets: Vec<FiscalYearAssetReport>,
    pub total_realized_pnl_usd: Decimal,
    pub total_realized_pnl_eur: Decimal,
}

pub struct PortfolioService {
    transactions: Arc<dyn TransactionRepository>,
    balances: Arc<dyn BalanceRepository>,
    price_history: Arc<dyn PriceHistoryRepository>,
    snapshots: Arc<dyn PortfolioSnapshotRepository>,
    prices: Arc<dyn CurrentPriceProvider>,
}

impl PortfolioService {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        balances: Arc<dyn BalanceRepository>,
        price_history: Arc<dyn PriceHistoryRepository>,
        snapshots: Arc<dyn PortfolioSnapshotRepository>,
        prices: Arc<dyn CurrentPriceProvider>,
    ) -> Self {
        Self {
            transactions,
            balances,
            price_history,
            snapshots,
            prices,
        }
    }

    async fn eur_usd_rate(&self) -> Decimal {
        let quotes = self.prices.get_prices(&["EURUSDT"]).await;
        quotes
            .get("EURUSDT")
            .copied()
            .unwrap_or(crate::domain::money::DEFAULT_EUR_USD)
    }

    pub async fn per_asset_metrics(&self, account_id: Uuid) -> anyhow::Result<Vec<AssetMetrics>> {
        let balances: Vec<_> = self
            .balances
            .latest_by_asset(account_id)
            .await?
            .into_iter()
            .filter(|b| b.total() > Decimal::ZERO)
            .collect();
        let eur_usd = self.eur_usd_rate().await;

        let symbols: Vec<String> = balances
            .iter()
            .filter(|b| !USD_QUOTE_ASSETS.contains(&b.asset.as_str()))
            .map(|b| format!("{}USDT", b.asset))
            .collect();
        let symbol_refs: Vec<&str> = symbols.iter().map(|s| s.as_str()).collect();
        let quotes = self.prices.get_prices(&symbol_refs).await;

        let mut rows = Vec::new();
        for balance in &balances {
            let txs = self
                .transactions
                .find_by_account(account_id, Some(&balance.asset))
                .await?;
            let mut buys: Vec<Transaction> = txs.iter().filter(|t| t.tx_type.is_buy_like()).cloned().collect();
            let mut sells: Vec<Transaction> =
                txs.iter().filter(|t| t.tx_type.is_sell_like()).cloned().collect();
            buys.sort_by_key(|t| t.executed_at);
            sells.sort_by_key(|t| t.executed_at);

            let fifo = compute_fifo(&buys, &sells, eur_usd);

            let current_price_usd = if USD_QUOTE_ASSETS.contains(&balance.asset.as_str()) {
                Decimal::ONE
            } else {
                quotes
                    .get(&format!("{}USDT", balance.asset))
                    .copied()
                    .unwrap_or(Decimal::ZERO)
            };

            let value_usd = round_price(balance.total() * current_price_usd);
            let pnl_usd = round_price(value_usd - fifo.cost_basis_usd);
            let pnl_pct = if fifo.cost_basis_usd > Decimal::ZERO {
                round_pct(pnl_usd / fifo.cost_basis_usd * Decimal::from(100))
            } else {
                Decimal::ZERO
            };

            rows.push(AssetMetrics {
                asset: balance.asset.clone(),
                quantity: balance.total(),
                current_price_usd,
                value_usd,
                value_eur: to_eur(value_usd, eur_usd),
                cost_basis_usd: fifo.cost_basis_usd,
                cost_basis_eur: fifo.cost_basis_eur,
                realized_pnl_usd: fifo.realized_pnl_usd,
                pnl_usd,
                pnl_eur: to_eur(pnl_usd, eur_usd),
                pnl_pct,
                portfolio_pct: Decimal::ZERO,
            });
        }

        rows.sort_by(|a, b| b.value_usd.cmp(&a.value_usd));

        let total_value = rows.iter().fold(Decimal::ZERO, |acc, r| acc + r.value_usd);
        if total_value > Decimal::ZERO {
            for row in rows.iter_mut() {
                row.portfolio_pct = round_pct(row.value_usd / total_value * Decimal::from(100));
            }
        }

        Ok(rows)
    }

    pub async fn overview(&self, account_id: Uuid) -> anyhow::Result<Overview> {
        let eur_usd = self.eur_usd_rate().await;
        let assets = self.per_asset_metrics(account_id).await?;
        let total_value_usd = assets.iter().fold(Decimal::ZERO, |acc, a| acc + a.value_usd);

        let all_txs = self.transactions.find_by_account(account_id, None).await?;

        let mut invested = Decimal::ZERO;
        let mut cash_flows: Vec<CashFlow> = Vec::new();

        for tx in &all_txs {
            let amount = tx
                .total_value_usd
                .unwrap_or_else(|| tx.price.unwrap_or(Decimal::ZERO) * tx.quantity);
            let date = tx.executed_at.date_naive();

            match tx.tx_type {
                TransactionType::Buy | TransactionType::Deposit => {
                    invested += amount;
                    cash_flows.push(CashFlow { date, amount: -amount });
                }
                TransactionType::Withdrawal if FIAT_AND_STABLECOINS.contains(&tx.base_asset.as_str()) => {
                    invested -= amount;
                    cash_flows.push(CashFlow { date, amount });
                }
                TransactionType::Sell => {
                    let is_fiat_quote = tx
                        .quote_asset
                        .as_deref()
                        .map(|q| FIAT_AND_STABLECOINS.contains(&q))
                        .unwrap_or(false);
                    if is_fiat_quote {
                        cash_flows.push(CashFlow { date, amount });
                    }
                }
                _ => {}
            }
        }

        if !cash_flows.is_empty() {
            cash_flows.push(CashFlow {
                date: Utc::now().date_naive(),
                amount: total_value_usd,
            });
        }

        let roi_pct = if invested > Decimal::ZERO {
            round_pct((total_value_usd - invested) / invested * Decimal::from(100))
        } else {
            Decimal::ZERO
        };

        let irr_annual_pct = compute_xirr(&cash_flows);

        let today = Utc::now().date_naive();
        let evolution_90d = self
            .performance_history(account_id, today - Duration::days(90), today)
            .await?;

        let invested_usd = round_price(invested);
        Ok(Overview {
            assets,
            total_value_usd,
            total_value_eur: to_eur(total_value_usd, eur_usd),
            invested_usd,
            invested_eur: to_eur(invested_usd, eur_usd),
            roi_pct,
            irr_annual_pct,
            evolution_90d,
        })
    }

    pub async fn dca_analysis(&self, account_id: Uuid, asset: &str) -> anyhow::Result<DcaAnalysis> {
        let eur_usd = self.eur_usd_rate().await;
        let txs = self.transactions.find_by_account(account_id, Some(asset)).await?;

        let mut buys: Vec<Transaction> = txs.iter().filter(|t| t.tx_type.is_buy_like()).cloned().collect();
        let mut sells: Vec<Transaction> = txs.iter().filter(|t| t.tx_type.is_sell_like()).cloned().collect();
        buys.sort_by_key(|t| t.executed_at);
        sells.sort_by_key(|t| t.executed_at);

        let fifo = compute_fifo(&buys, &sells, eur_usd);

        let mut rows = Vec::with_capacity(buys.len());
        let mut cum_qty = Decimal::ZERO;
        let mut cum_cost_usd = Decimal::ZERO;
        let mut cum_cost_eur = Decimal::ZERO;

        for buy in &buys {
            cum_qty += buy.quantity;
            cum_cost_usd += buy.usd_unit_cost() * buy.quantity;
            cum_cost_eur += buy.eur_unit_cost(eur_usd) * buy.quantity;

            let cum_vwap_usd = if cum_qty > Decimal::ZERO {
                round_price(cum_cost_usd / cum_qty)
            } else {
                Decimal::ZERO
            };
            let cum_vwap_eur = if cum_qty > Decimal::ZERO {
                round_price(cum_cost_eur / cum_qty)
            } else {
                Decimal::ZERO
            };

            rows.push(DcaEventRow {
                executed_at: buy.executed_at,
                quantity: buy.quantity,
                cumulative_quantity: cum_qty,
                cumulative_cost_usd: round_price(cum_cost_usd),
                cumulative_vwap_usd: cum_vwap_usd,
                cumulative_cost_eur: round_price(cum_cost_eur),
                cumulative_vwap_eur: cum_vwap_eur,
            });
        }

        let latest_balance = self
            .balances
            .latest_by_asset(account_id)
            .await?
            .into_iter()
            .find(|b| b.asset == asset);

        let current_quantity = match latest_balance {
            Some(b) => b.total(),
            None => {
                let total_buy = buys.iter().fold(Decimal::ZERO, |acc, t| acc + t.quantity);
                let total_sell = sells.iter().fold(Decimal::ZERO, |acc, t| acc + t.quantity);
                total_buy - total_sell
            }
        };

        Ok(DcaAnalysis {
            asset: asset.to_string(),
            rows,
            current_quantity,
            realized_pnl_usd: fifo.realized_pnl_usd,
            cost_basis_usd: fifo.cost_basis_usd,
            cost_basis_eur: fifo.cost_basis_eur,
        })
    }

    pub async fn performance_history(
        &self,
        account_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Vec<PerformancePoint>> {
        let snapshots = self.snapshots.range(account_id, from, to).await?;
        if !snapshots.is_empty() {
            let eur_usd = self.eur_usd_rate().await;
            return Ok(snapshots
                .iter()
                .map(|s| {
                    let pnl_usd = round_price(s.total_value_usd - s.invested_usd);
                    let pnl_pct = if s.invested_usd > Decimal::ZERO {
                        round_pct(pnl_usd / s.invested_usd * Decimal::from(100))
                    } else {
                        Decimal::ZERO
                    };
                    PerformancePoint {
                        date: s.snapshot_date,
                        total_value_usd: s.total_value_usd,
                        total_value_eur: to_eur(s.total_value_usd, eur_usd),
                        invested_usd: s.invested_usd,
                        invested_eur: to_eur(s.invested_usd, eur_usd),
                        pnl_usd,
                        pnl_eur: to_eur(pnl_usd, eur_usd),
                        pnl_pct,
                    }
                })
                .collect());
        }

        self.synthesize_btc_performance(account_id, from, to).await
    }

    pub async fn drawdown(&self, account_id: Uuid) -> anyhow::Result<DrawdownResult> {
        let wide_from = NaiveDate::from_ymd_opt(2009, 1, 3).expect("valid date");
        let wide_to = Utc::now().date_naive();

        let snapshots = self.snapshots.range(account_id, wide_from, wide_to).await?;
        let points: Vec<ValuationPoint> = if !snapshots.is_empty() {
            snapshots.iter().map(ValuationPoint::from).collect()
        } else {
            self.synthesize_btc_performance(account_id, wide_from, wide_to)
                .await?
                .iter()
                .map(|p| ValuationPoint {
                    date: p.date,
                    total_value_usd: p.total_value_usd,
                })
                .collect()
        };

        Ok(compute_drawdown(&points))
    }

    /// Synthesizes a daily BTC valuation series from `price_history` and BTC
    /// transactions when no `portfolio_snapshots` rows exist yet.
    async fn synthesize_btc_performance(
        &self,
        account_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Vec<PerformancePoint>> {
        let from_dt = Utc.from_utc_datetime(&from.and_hms_opt(0, 0, 0).expect("valid time"));
        let to_dt = Utc.from_utc_datetime(&to.and_hms_opt(23, 59, 59).expect("valid time"));

        let mut prices = self
            .price_history
            .range("BTCUSDT", CandleInterval::OneDay, from_dt, to_dt)
            .await?;
        prices.sort_by_key(|p| p.open_at);

        let mut btc_txs: Vec<Transaction> = self
            .transactions
            .find_by_account(account_id, Some("BTC"))
            .await?
            .into_iter()
            .filter(|t| t.executed_at.date_naive() <= to)
            .collect();
        btc_txs.sort_by_key(|t| t.executed_at);

        let eur_usd = self.eur_usd_rate().await;
        let mut points = Vec::new();
        let mut cum_qty = Decimal::ZERO;
        let mut cum_invested = Decimal::ZERO;
        let mut tx_idx = 0usize;
        let mut first_tx_date: Option<NaiveDate> = None;

        for price in &prices {
            let day = price.open_at.date_naive();

            while tx_idx < btc_txs.len() && btc_txs[tx_idx].executed_at.date_naive() <= day {
                let tx = &btc_txs[tx_idx];
                if first_tx_date.is_none() {
                    first_tx_date = Some(tx.executed_at.date_naive());
                }
                let amount = tx
                    .total_value_usd
                    .unwrap_or_else(|| tx.usd_unit_cost() * tx.quantity);

                if tx.tx_type.is_buy_like() {
                    cum_qty += tx.quantity;
                    cum_invested += amount;
                } else if tx.tx_type.is_sell_like() {
                    cum_qty -= tx.quantity;
                }
                tx_idx += 1;
            }

            let Some(first_date) = first_tx_date else {
                continue;
            };
            if day < first_date || cum_qty <= Decimal::ZERO {
                continue;
            }

            let value_usd = round_price(cum_qty * price.close);
            let pnl_usd = round_price(value_usd - cum_invested);
            let pnl_pct = if cum_invested > Decimal::ZERO {
                round_pct(pnl_usd / cum_invested * Decimal::from(100))
            } else {
                Decimal::ZERO
            };

            let invested_usd = round_price(cum_invested);
            points.push(PerformancePoint {
                date: day,
                total_value_usd: value_usd,
                total_value_eur: to_eur(value_usd, eur_usd),
                invested_usd,
                invested_eur: to_eur(invested_usd, eur_usd),
                pnl_usd,
                pnl_eur: to_eur(pnl_usd, eur_usd),
                pnl_pct,
            });
        }

        Ok(points)
    }

    pub async fn fiscal_year_report(&self, account_id: Uuid, year: i32) -> anyhow::Result<FiscalYearReport> {
        let eur_usd = self.eur_usd_rate().await;
        let start_of_year =
            Utc.from_utc_datetime(&NaiveDate::from_ymd_opt(year, 1, 1).expect("valid date").and_hms_opt(0, 0, 0).expect("valid time"));
        let end_of_year = Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(year, 12, 31)
                .expect("valid date")
                .and_hms_opt(23, 59, 59)
                .expect("valid time"),
        );

        let all_txs = self.transactions.find_by_account(account_id, None).await?;

        let mut by_asset: HashMap<String, (Vec<Transaction>, Vec<Transaction>)> = HashMap::new();
        for tx in all_txs {
            let entry = by_asset.entry(tx.base_asset.clone()).or_default();
            if tx.tx_type.is_buy_like() && tx.executed_at <= end_of_year {
                entry.0.push(tx.clone());
            }
            if tx.tx_type.is_sell_like() && tx.executed_at >= start_of_year && tx.executed_at <= end_of_year {
                entry.1.push(tx);
            }
        }

        let mut assets = Vec::new();
        let mut total_realized = Decimal::ZERO;

        for (asset, (mut buys, mut sells)) in by_asset {
            if sells.is_empty() {
                continue;
            }
            buys.sort_by_key(|t| t.executed_at);
            sells.sort_by_key(|t| t.executed_at);

            let fifo = compute_fifo(&buys, &sells, eur_usd);
            let total_sold = sells.iter().fold(Decimal::ZERO, |acc, t| acc + t.quantity);
            let total_proceeds_usd = sells.iter().fold(Decimal::ZERO, |acc, t| {
                acc + t.total_value_usd.unwrap_or_else(|| t.usd_unit_cost() * t.quantity)
            });

            let total_proceeds_usd = round_price(total_proceeds_usd);
            total_realized += fifo.realized_pnl_usd;
            assets.push(FiscalYearAssetReport {
                asset,
                realized_pnl_usd: fifo.realized_pnl_usd,
                realized_pnl_eur: to_eur(fifo.realized_pnl_usd, eur_usd),
                total_sold: round_qty(total_sold),
                total_proceeds_usd,
                total_proceeds_eur: to_eur(total_proceeds_usd, eur_usd),
                sell_events: sells.len() as u64,
            });
        }

        assets.sort_by(|a, b| a.asset.cmp(&b.asset));

        let total_realized_pnl_usd = round_price(total_realized);
        Ok(FiscalYearReport {
            year,
            assets,
            total_realized_pnl_usd,
            total_realized_pnl_eur: to_eur(total_realized_pnl_usd, eur_usd),
        })
    }
}
