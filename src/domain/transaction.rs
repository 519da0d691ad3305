use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of ledger event a transaction represents. Mirrors the exchange's
/// own vocabulary (trades, movements, passive income) rather than inventing
/// a narrower taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Buy,
    Sell,
    Deposit,
    Withdrawal,
    Convert,
    EarnInterest,
    StakingReward,
}

impl TransactionType {
    /// True for events that add to a position and count toward cost basis
    /// (buys, deposits, and passive-income credits).
    pub fn is_buy_like(self) -> bool {
        matches!(
            self,
            TransactionType::Buy | TransactionType::Deposit | TransactionType::EarnInterest
                | TransactionType::StakingReward
        )
    }

    /// True for events that remove from a position (sells, withdrawals).
    pub fn is_sell_like(self) -> bool {
        matches!(self, TransactionType::Sell | TransactionType::Withdrawal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Buy => "buy",
            TransactionType::Sell => "sell",
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Convert => "convert",
            TransactionType::EarnInterest => "earn_interest",
            TransactionType::StakingReward => "staking_reward",
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(TransactionType::Buy),
            "sell" => Ok(TransactionType::Sell),
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "convert" => Ok(TransactionType::Convert),
            "earn_interest" => Ok(TransactionType::EarnInterest),
            "staking_reward" => Ok(TransactionType::StakingReward),
            other => anyhow::bail!("unknown transaction type: {other}"),
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single ledger event: a trade, deposit, withdrawal, conversion, or
/// passive-income credit. Quantities and monetary amounts are exact
/// decimals; `raw_data` retains the full original exchange payload so later
/// disambiguation (e.g. telling BTCUSDT and BTCEUR trades apart) never needs
/// to guess from the parsed fields alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: Uuid,
    /// Exchange-assigned identifier, unique where present. `None` for
    /// synthetic entries (e.g. manually imported history).
    pub binance_id: Option<String>,
    pub tx_type: TransactionType,
    pub base_asset: String,
    pub quote_asset: Option<String>,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub total_value_usd: Option<Decimal>,
    pub fee_asset: Option<String>,
    pub fee_amount: Option<Decimal>,
    pub executed_at: DateTime<Utc>,
    pub raw_data: Option<serde_json::Value>,
}

/// Quote assets that count as fiat or stablecoin equivalents of USD value —
/// used both for invested-capital accounting and for USD-unit-cost lookup.
pub const USD_QUOTE_ASSETS: &[&str] = &["USDT", "BUSD", "FDUSD", "USD"];

/// Quote/base assets treated as cash-equivalent when computing invested
/// capital and cash-flow series for IRR.
pub const FIAT_AND_STABLECOINS: &[&str] = &[
    "EUR", "USD", "GBP", "CHF", "USDT", "USDC", "BUSD", "FDUSD", "DAI", "TUSD", "USDP",
];

impl Transaction {
    /// The USD-denominated unit cost of this transaction: prefer the stored
    /// total value divided by quantity (exact, as recorded at sync time),
    /// falling back to the raw price field when no total is available.
    pub fn usd_unit_cost(&self) -> Decimal {
        if let Some(total) = self.total_value_usd {
            if self.quantity > Decimal::ZERO {
                return crate::domain::money::round_price(total / self.quantity);
            }
        }
        self.price.unwrap_or(Decimal::ZERO)
    }

    /// The EUR-denominated unit cost of this transaction. Exact when the
    /// transaction's own quote asset is EUR; otherwise approximated from the
    /// USD unit cost via the supplied EUR/USD rate.
    pub fn eur_unit_cost(&self, eur_usd: Decimal) -> Decimal {
        if self.quote_asset.as_deref() == Some("EUR") {
            return self.price.unwrap_or(Decimal::ZERO);
        }
        if eur_usd <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        crate::domain::money::round_price(self.usd_unit_cost() / eur_usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tx(total_usd: Option<Decimal>, price: Option<Decimal>, qty: Decimal) -> Transaction {
        Transaction {
            id: Uuid::nil(),
            account_id: Uuid::nil(),
            binance_id: None,
            tx_type: TransactionType::Buy,
            base_asset: "BTC".into(),
            quote_asset: Some("USDT".into()),
            quantity: qty,
            price,
            total_value_usd: total_usd,
            fee_asset: None,
            fee_amount: None,
            executed_at: Utc::now(),
            raw_data: None,
        }
    }

    #[test]
    fn usd_unit_cost_prefers_total_value() {
        let t = tx(Some(dec!(20000)), Some(dec!(19000)), dec!(1));
        assert_eq!(t.usd_unit_cost(), dec!(20000.00000000));
    }

    #[test]
    fn usd_unit_cost_falls_back_to_price() {
        let t = tx(None, Some(dec!(19000)), dec!(1));
        assert_eq!(t.usd_unit_cost(), dec!(19000));
    }

    #[test]
    fn usd_unit_cost_zero_qty_falls_back_to_price() {
        let t = tx(Some(dec!(100)), Some(dec!(5)), Decimal::ZERO);
        assert_eq!(t.usd_unit_cost(), dec!(5));
    }

    #[test]
    fn eur_unit_cost_exact_when_quote_is_eur() {
        let mut t = tx(None, Some(dec!(18000)), dec!(1));
        t.quote_asset = Some("EUR".into());
        assert_eq!(t.eur_unit_cost(dec!(1.08)), dec!(18000));
    }

    #[test]
    fn eur_unit_cost_approximated_from_usd() {
        let t = tx(Some(dec!(21600)), None, dec!(1));
        assert_eq!(t.eur_unit_cost(dec!(1.08)), dec!(20000));
    }

    #[test]
    fn is_buy_like_and_sell_like_are_disjoint() {
        for t in [
            TransactionType::Buy,
            TransactionType::Deposit,
            TransactionType::EarnInterest,
            TransactionType::StakingReward,
        ] {
            assert!(t.is_buy_like());
            assert!(!t.is_sell_like());
        }
        for t in [TransactionType::Sell, TransactionType::Withdrawal] {
            assert!(t.is_sell_like());
            assert!(!t.is_buy_like());
        }
    }
}
