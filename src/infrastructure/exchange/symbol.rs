//! Splits an exchange trading pair (e.g. `"BTCUSDT"`) into its base and
//! quote asset by longest-suffix match against a fixed, ordered list of
//! quote assets — the same heuristic the original sync service used, since
//! the exchange's REST API gives no structured way to split a symbol.

const KNOWN_QUOTE_ASSETS: &[&str] = &["USDT", "BUSD", "FDUSD", "BTC", "ETH", "BNB", "EUR", "USD"];

/// Returns `(base_asset, quote_asset)`. Falls back to `(symbol, "USDT")`
/// when no known quote asset matches as a suffix — this can only happen
/// for symbols outside the tracked universe.
pub fn parse_symbol(symbol: &str) -> (String, String) {
    for quote in KNOWN_QUOTE_ASSETS {
        if symbol.len() > quote.len() && symbol.ends_with(quote) {
            let base = &symbol[..symbol.len() - quote.len()];
            return (base.to_string(), quote.to_string());
        }
    }
    (symbol.to_string(), "USDT".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_usdt_pair() {
        assert_eq!(parse_symbol("BTCUSDT"), ("BTC".into(), "USDT".into()));
    }

    #[test]
    fn splits_eur_pair() {
        assert_eq!(parse_symbol("BTCEUR"), ("BTC".into(), "EUR".into()));
    }

    #[test]
    fn prefers_longer_quote_suffix_order() {
        // BUSD listed before BTC/ETH/BNB in the priority list, so a
        // BTCBUSD pair must not be mis-split as base="BTCBU", quote="SD".
        assert_eq!(parse_symbol("BTCBUSD"), ("BTC".into(), "BUSD".into()));
    }

    #[test]
    fn cross_pair_eth_btc() {
        assert_eq!(parse_symbol("ETHBTC"), ("ETH".into(), "BTC".into()));
    }

    #[test]
    fn unknown_symbol_falls_back_to_usdt() {
        assert_eq!(parse_symbol("XYZ"), ("XYZ".into(), "USDT".into()));
    }

    #[test]
    fn symbol_equal_to_quote_asset_falls_back() {
        // len() > quote.len() guard: "USDT" itself must not split into ("", "USDT").
        assert_eq!(parse_symbol("USDT"), ("USDT".into(), "USDT".into()));
    }
}
