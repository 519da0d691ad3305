//! Pagination strategies over the four ledger sources. Each function stops
//! requesting pages as soon as the exchange signals there's nothing left —
//! it never fetches more than the sync actually needs, matching the
//! original service's async-generator pagination.

use serde_json::Value;

use crate::domain::errors::ExchangeError;
use crate::domain::ports::ExchangeClient;

const PAGE_LIMIT: u32 = 1000;
const NINETY_DAYS_MS: i64 = 90 * 24 * 60 * 60 * 1000;
const FIAT_ROWS_PER_PAGE: u32 = 500;

fn get_i64(v: &Value, key: &str) -> Option<i64> {
    v.get(key).and_then(|x| x.as_i64().or_else(|| x.as_str()?.parse().ok()))
}

/// Pages `myTrades` forward from `from_id`, stopping on a short batch (the
/// exchange's own signal that this was the last page).
pub async fn all_trades_by_id(
    client: &dyn ExchangeClient,
    symbol: &str,
    from_id: i64,
) -> Result<Vec<Value>, ExchangeError> {
    let mut out = Vec::new();
    let mut cursor = from_id;

    loop {
        let batch = client
            .get_trades_page(symbol, Some(cursor), None, PAGE_LIMIT)
            .await?;
        let len = batch.len();
        if let Some(last) = batch.last() {
            cursor = get_i64(last, "id").unwrap_or(cursor) + 1;
        }
        out.extend(batch);
        if len < PAGE_LIMIT as usize {
            break;
        }
    }

    Ok(out)
}

/// Pages `myTrades` forward from a start time only (never an end time,
/// which the exchange would otherwise interpret as a narrow 24h window).
pub async fn all_trades_by_time(
    client: &dyn ExchangeClient,
    symbol: &str,
    start_time_ms: i64,
) -> Result<Vec<Value>, ExchangeError> {
    let mut out = Vec::new();
    let mut cursor = start_time_ms;

    loop {
        let batch = client
            .get_trades_page(symbol, None, Some(cursor), PAGE_LIMIT)
            .await?;
        let len = batch.len();
        if let Some(last) = batch.last() {
            cursor = get_i64(last, "time").unwrap_or(cursor) + 1;
        }
        out.extend(batch);
        if len < PAGE_LIMIT as usize {
            break;
        }
    }

    Ok(out)
}

/// Pages `klines` forward from `start_time_ms` to `now_ms`, advancing past
/// each batch's last candle using its close time (index 6 of the raw
/// array) rather than re-deriving the interval step from the interval
/// string.
pub async fn all_klines(
    client: &dyn ExchangeClient,
    symbol: &str,
    interval: &str,
    start_time_ms: i64,
    now_ms: i64,
) -> Result<Vec<Value>, ExchangeError> {
    let mut out = Vec::new();
    let mut cursor = start_time_ms;

    while cursor < now_ms {
        let batch = client
            .get_klines(symbol, interval, cursor, None, PAGE_LIMIT)
            .await?;
        let len = batch.len();
        if len == 0 {
            break;
        }

        let last_close_time = batch
            .last()
            .and_then(|k| k.as_array())
            .and_then(|arr| arr.get(6))
            .and_then(|v| v.as_i64().or_else(|| v.as_str()?.parse().ok()));

        out.extend(batch);

        match last_close_time {
            Some(t) => cursor = t + 1,
            None => break,
        }

        if len < PAGE_LIMIT as usize {
            break;
        }
    }

    Ok(out)
}

pub async fn all_deposits(
    client: &dyn ExchangeClient,
    since_ms: i64,
    now_ms: i64,
) -> Result<Vec<Value>, ExchangeError> {
    let mut out = Vec::new();
    let mut window_start = since_ms;

    while window_start < now_ms {
        let window_end = (window_start + NINETY_DAYS_MS).min(now_ms);
        let batch = client.get_deposits_page(window_start, window_end).await?;
        out.extend(batch);
        window_start = window_end;
    }

    Ok(out)
}

pub async fn all_withdrawals(
    client: &dyn ExchangeClient,
    since_ms: i64,
    now_ms: i64,
) -> Result<Vec<Value>, ExchangeError> {
    let mut out = Vec::new();
    let mut window_start = since_ms;

    while window_start < now_ms {
        let window_end = (window_start + NINETY_DAYS_MS).min(now_ms);
        let batch = client
            .get_withdrawals_page(window_start, window_end)
            .await?;
        out.extend(batch);
        window_start = window_end;
    }

    Ok(out)
}

/// Pages fiat deposit/withdrawal orders: 90-day windows, each paged with
/// `rows=500` until a short page signals the window is exhausted.
pub async fn all_fiat_orders(
    client: &dyn ExchangeClient,
    transaction_type: u8,
    since_ms: i64,
    now_ms: i64,
) -> Result<Vec<Value>, ExchangeError> {
    let mut out = Vec::new();
    let mut window_start = since_ms;

    while window_start < now_ms {
        let window_end = (window_start + NINETY_DAYS_MS).min(now_ms);
        let mut page = 1u32;

        loop {
            let batch = client
                .get_fiat_orders_page(
                    transaction_type,
                    window_start,
                    window_end,
                    page,
                    FIAT_ROWS_PER_PAGE,
                )
                .await?;
            let len = batch.len();
            if batch.is_empty() {
                break;
            }
            out.extend(batch);
            if len < FIAT_ROWS_PER_PAGE as usize {
                break;
            }
            page += 1;
        }

        window_start = window_end;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::RawPage;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeClient {
        trade_pages: Mutex<Vec<RawPage>>,
        calls: AtomicUsize,
        kline_pages: Mutex<Vec<RawPage>>,
        kline_calls: AtomicUsize,
    }

    #[async_trait]
    impl ExchangeClient for FakeClient {
        async fn get_account_balances(&self) -> Result<Vec<(String, Decimal, Decimal)>, ExchangeError> {
            Ok(vec![])
        }
        async fn get_ticker_price(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
            Ok(Decimal::ZERO)
        }
        async fn get_klines(
            &self,
            _symbol: &str,
            _interval: &str,
            _start_time_ms: i64,
            _end_time_ms: Option<i64>,
            _limit: u32,
        ) -> Result<RawPage, ExchangeError> {
            let idx = self.kline_calls.fetch_add(1, Ordering::SeqCst);
            let pages = self.kline_pages.lock().unwrap();
            Ok(pages.get(idx).cloned().unwrap_or_default())
        }
        async fn get_trades_page(
            &self,
            _symbol: &str,
            _from_id: Option<i64>,
            _start_time_ms: Option<i64>,
            _limit: u32,
        ) -> Result<RawPage, ExchangeError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            let pages = self.trade_pages.lock().unwrap();
            Ok(pages.get(idx).cloned().unwrap_or_default())
        }
        async fn get_deposits_page(&self, _s: i64, _e: i64) -> Result<RawPage, ExchangeError> {
            Ok(vec![])
        }
        async fn get_withdrawals_page(&self, _s: i64, _e: i64) -> Result<RawPage, ExchangeError> {
            Ok(vec![])
        }
        async fn get_fiat_orders_page(
            &self,
            _t: u8,
            _s: i64,
            _e: i64,
            _page: u32,
            _rows: u32,
        ) -> Result<RawPage, ExchangeError> {
            Ok(vec![])
        }
    }

    fn trade(id: i64, time: i64) -> Value {
        serde_json::json!({"id": id, "time": time, "symbol": "BTCUSDT"})
    }

    #[tokio::test]
    async fn stops_on_short_batch_by_id() {
        let full_page: RawPage = (0..1000).map(|i| trade(i, i)).collect();
        let short_page: RawPage = vec![trade(1000, 1000)];
        let client = FakeClient {
            trade_pages: Mutex::new(vec![full_page, short_page]),
            calls: AtomicUsize::new(0),
            ..Default::default()
        };

        let all = all_trades_by_id(&client, "BTCUSDT", 0).await.unwrap();
        assert_eq!(all.len(), 1001);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_first_page_stops_immediately() {
        let client = FakeClient::default();
        let all = all_trades_by_time(&client, "BTCUSDT", 0).await.unwrap();
        assert!(all.is_empty());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    fn kline(open_time: i64, close_time: i64) -> Value {
        serde_json::json!([open_time, "1", "1", "1", "1", "1", close_time])
    }

    #[tokio::test]
    async fn klines_stop_on_short_batch_and_advance_past_close_time() {
        let full_page: RawPage = (0..1000).map(|i| kline(i * 1000, i * 1000 + 999)).collect();
        let short_page: RawPage = vec![kline(1_000_000, 1_000_999)];
        let client = FakeClient {
            kline_pages: Mutex::new(vec![full_page, short_page]),
            ..Default::default()
        };

        let all = all_klines(&client, "BTCUSDT", "1d", 0, i64::MAX).await.unwrap();
        assert_eq!(all.len(), 1001);
        assert_eq!(client.kline_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn klines_stop_when_cursor_reaches_now() {
        let client = FakeClient::default();
        let all = all_klines(&client, "BTCUSDT", "1d", 100, 100).await.unwrap();
        assert!(all.is_empty());
        assert_eq!(client.kline_calls.load(Ordering::SeqCst), 0);
    }
}
