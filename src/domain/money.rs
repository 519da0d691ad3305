//! Exact-decimal helpers shared by the analytics kernels and the view adapters.
//! Never use `f64` for anything that represents quantity, price, or value.

use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;
use rust_decimal_macros::dec;

/// 8 fractional digits — USD/EUR monetary amounts.
pub const PRICE_PRECISION: u32 = 8;
/// 18 fractional digits — crypto quantities.
pub const QTY_PRECISION: u32 = 18;
/// 2 fractional digits — percentages.
pub const PCT_PRECISION: u32 = 2;

pub fn round_price(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PRICE_PRECISION, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round_qty(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(QTY_PRECISION, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round_pct(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PCT_PRECISION, RoundingStrategy::MidpointAwayFromZero)
}

/// Converts a USD amount into EUR using the given EUR/USD quote.
/// `eur_usd` is the price of one EUR in USD; a non-positive rate yields zero
/// rather than dividing by zero, mirroring how unit costs fall back to zero
/// when no conversion rate is available.
pub fn to_eur(usd: Decimal, eur_usd: Decimal) -> Decimal {
    if eur_usd <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    round_price(usd / eur_usd)
}

/// Default EUR/USD rate used when no live quote is available.
pub const DEFAULT_EUR_USD: Decimal = dec!(1.08);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_eur_zero_rate_is_zero() {
        assert_eq!(to_eur(dec!(100), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn to_eur_converts() {
        assert_eq!(to_eur(dec!(108), dec!(1.08)), dec!(100.00000000));
    }
}
