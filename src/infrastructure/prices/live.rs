//! Live spot-price lookups for the read path (portfolio valuation), kept
//! separate from the sync orchestrator's own price history pipeline.
//! Grounded on `BinanceMarketDataService::get_prices`'s shape: one
//! short-timeout call returning a symbol-to-price map.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::ports::CurrentPriceProvider;
use crate::infrastructure::core::HttpClientFactory;

/// Public ticker reads get a short timeout: these are best-effort live
/// quotes, not signed account calls, and a slow fallback shouldn't stall
/// the read path.
const PUBLIC_TICKER_TIMEOUT: Duration = Duration::from_secs(6);

pub struct LivePriceProvider {
    http: ClientWithMiddleware,
    base_url: String,
}

impl LivePriceProvider {
    pub fn new(base_url: String) -> Self {
        Self {
            http: HttpClientFactory::create_client(PUBLIC_TICKER_TIMEOUT),
            base_url,
        }
    }

    /// Fetches the current price for each symbol (e.g. `"BTCUSDT"`,
    /// `"EURUSDT"`). Symbols the exchange doesn't recognize are silently
    /// absent from the result rather than failing the whole batch — a
    /// missing live price degrades the overview (falls back to the last
    /// known price history close) rather than aborting it.
    pub async fn get_prices(&self, symbols: &[&str]) -> HashMap<String, Decimal> {
        let mut out = HashMap::new();

        for symbol in symbols {
            let url = format!("{}/api/v3/ticker/price", self.base_url);
            let Ok(response) = self
                .http
                .get(&url)
                .query(&[("symbol", *symbol)])
                .send()
                .await
            else {
                continue;
            };
            if !response.status().is_success() {
                continue;
            }

            #[derive(Deserialize)]
            struct Ticker {
                price: String,
            }

            if let Ok(ticker) = response.json::<Ticker>().await
                && let Ok(price) = ticker.price.parse::<Decimal>()
            {
                out.insert(symbol.to_string(), price);
            }
        }

        let btc_requested = symbols.iter().any(|s| *s == "BTCUSDT" || *s == "BTCEUR");
        let btc_missing = !out.contains_key("BTCUSDT") && !out.contains_key("BTCEUR");
        if btc_requested && btc_missing {
            out.extend(self.fetch_btc_fallback().await);
        }

        out
    }

    /// CoinGecko first, Kraken second, for BTC alone — used when the primary
    /// exchange ticker is unreachable (geo-blocked, down, or simply not the
    /// configured exchange). Absent rather than erroring if both fail.
    async fn fetch_btc_fallback(&self) -> HashMap<String, Decimal> {
        if let Some(prices) = self.fetch_coingecko_btc().await {
            if !prices.is_empty() {
                return prices;
            }
        }
        self.fetch_kraken_btc().await.unwrap_or_default()
    }

    async fn fetch_coingecko_btc(&self) -> Option<HashMap<String, Decimal>> {
        #[derive(Deserialize)]
        struct Quote {
            usd: Option<f64>,
            eur: Option<f64>,
        }
        #[derive(Deserialize)]
        struct Response {
            bitcoin: Option<Quote>,
        }

        let response = self
            .http
            .get("https://api.coingecko.com/api/v3/simple/price")
            .query(&[("ids", "bitcoin"), ("vs_currencies", "eur,usd")])
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }

        let quote = response.json::<Response>().await.ok()?.bitcoin?;
        let mut out = HashMap::new();
        if let Some(usd) = quote.usd.and_then(|v| Decimal::try_from(v).ok()) {
            out.insert("BTCUSDT".to_string(), usd);
        }
        if let Some(eur) = quote.eur.and_then(|v| Decimal::try_from(v).ok()) {
            out.insert("BTCEUR".to_string(), eur);
        }
        Some(out)
    }

    async fn fetch_kraken_btc(&self) -> Option<HashMap<String, Decimal>> {
        #[derive(Deserialize)]
        struct Ticker {
            c: Vec<String>,
        }
        #[derive(Deserialize)]
        struct Response {
            result: HashMap<String, Ticker>,
        }

        let response = self
            .http
            .get("https://api.kraken.com/0/public/Ticker")
            .query(&[("pair", "XBTEUR,XBTUSD")])
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }

        let result = response.json::<Response>().await.ok()?.result;
        let mut out = HashMap::new();
        let usd = result
            .iter()
            .find(|(pair, _)| pair.contains("USD"))
            .and_then(|(_, t)| t.c.first())
            .and_then(|p| p.parse::<Decimal>().ok());
        let eur = result
            .iter()
            .find(|(pair, _)| pair.contains("EUR"))
            .and_then(|(_, t)| t.c.first())
            .and_then(|p| p.parse::<Decimal>().ok());
        if let Some(usd) = usd {
            out.insert("BTCUSDT".to_string(), usd);
        }
        if let Some(eur) = eur {
            out.insert("BTCEUR".to_string(), eur);
        }
        Some(out)
    }
}

#[async_trait]
impl CurrentPriceProvider for LivePriceProvider {
    async fn get_prices(&self, symbols: &[&str]) -> HashMap<String, Decimal> {
        LivePriceProvider::get_prices(self, symbols).await
    }
}
