use anyhow::{Context, Result};
use std::env;

/// Earliest timestamp ever backfilled, 2021-01-01T00:00:00Z in epoch
/// milliseconds. Kline history and the fiscal-year report never reach
/// further back than this.
pub const HISTORY_START_MS: i64 = 1_609_459_200_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: String,
    pub exchange_base_url: String,
    pub exchange_api_key: String,
    pub exchange_api_secret: String,
    /// Minimum interval between sync runs; enforced at parse time since a
    /// tighter loop would outrun the exchange's own rate limit.
    pub sync_interval_minutes: u64,
    /// Assets the overview/per-asset views report on, beyond whatever the
    /// ledger itself has accumulated balances for.
    pub tracked_assets: Vec<String>,
    /// Trading pairs the sync orchestrator pages `myTrades` for.
    pub traded_symbols: Vec<String>,
    pub history_start_ms: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let db_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://rustfolio.db".to_string());

        let exchange_base_url = env::var("EXCHANGE_BASE_URL")
            .unwrap_or_else(|_| "https://api.binance.com".to_string());

        let exchange_api_key = env::var("EXCHANGE_API_KEY").unwrap_or_default();
        let exchange_api_secret = env::var("EXCHANGE_API_SECRET").unwrap_or_default();

        let sync_interval_minutes = env::var("SYNC_INTERVAL_MINUTES")
            .unwrap_or_else(|_| "15".to_string())
            .parse::<u64>()
            .context("failed to parse SYNC_INTERVAL_MINUTES")?;

        if sync_interval_minutes < 5 {
            anyhow::bail!(
                "SYNC_INTERVAL_MINUTES must be at least 5 (got {sync_interval_minutes}), to stay well under exchange rate limits"
            );
        }

        let tracked_assets_str = env::var("TRACKED_ASSETS")
            .unwrap_or_else(|_| "BTC,USDT,USDC,BUSD,FDUSD,EUR,USD".to_string());
        let tracked_assets: Vec<String> = tracked_assets_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let traded_symbols_str = env::var("TRADED_SYMBOLS")
            .unwrap_or_else(|_| "BTCUSDT,BTCEUR,BTCBUSD,BTCFDUSD".to_string());
        let traded_symbols: Vec<String> = traded_symbols_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let history_start_ms = env::var("HISTORY_START_MS")
            .map(|v| v.parse::<i64>().context("failed to parse HISTORY_START_MS"))
            .unwrap_or(Ok(HISTORY_START_MS))?;

        Ok(Config {
            db_url,
            exchange_base_url,
            exchange_api_key,
            exchange_api_secret,
            sync_interval_minutes,
            tracked_assets,
            traded_symbols,
            history_start_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_interval_under_five_minutes() {
        // SAFETY: test runs single-threaded for env var mutation via serial harness convention.
        unsafe {
            env::set_var("SYNC_INTERVAL_MINUTES", "1");
        }
        let result = Config::from_env();
        unsafe {
            env::remove_var("SYNC_INTERVAL_MINUTES");
        }
        assert!(result.is_err());
    }

    #[test]
    fn defaults_are_usable_without_any_env_vars() {
        unsafe {
            env::remove_var("SYNC_INTERVAL_MINUTES");
            env::remove_var("TRACKED_ASSETS");
        }
        let config = Config::from_env().expect("defaults must parse");
        assert!(config.sync_interval_minutes >= 5);
        assert!(!config.tracked_assets.is_empty());
    }
}
