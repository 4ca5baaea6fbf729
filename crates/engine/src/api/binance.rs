//! Binance public API client for market data (no authentication required)

use anyhow::Result;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tracing::debug;

use crate::types::{Kline, Ticker};

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const MAX_KLINES_PER_REQUEST: u32 = 1000;

/// Binance public market data client
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

/// Raw kline data from Binance API (array of arrays)
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct RawKline(
    i64,    // 0: Open time
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    u64,    // 8: Number of trades
    String, // 9: Taker buy base
    String, // 10: Taker buy quote
    String, // 11: Ignore
);

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

/// Binance 24h ticker statistics
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerStats {
    symbol: String,
    price_change_percent: String,
    high_price: String,
    low_price: String,
    volume: String,
    last_price: String,
    bid_price: Option<String>,
    ask_price: Option<String>,
}

impl Default for BinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_klines(raw: Vec<RawKline>) -> Vec<Kline> {
    raw.into_iter()
        .filter_map(|raw| {
            Some(Kline {
                open_time: raw.0,
                open: Decimal::from_str(&raw.1).ok()?,
                high: Decimal::from_str(&raw.2).ok()?,
                low: Decimal::from_str(&raw.3).ok()?,
                close: Decimal::from_str(&raw.4).ok()?,
                volume: Decimal::from_str(&raw.5).ok()?,
                close_time: raw.6,
            })
        })
        .collect()
}

fn parse_stats(stats: TickerStats) -> Ticker {
    let num = |s: &str| Decimal::from_str(s).ok();
    Ticker {
        last: num(&stats.last_price).unwrap_or_default(),
        bid: stats.bid_price.as_deref().and_then(num),
        ask: stats.ask_price.as_deref().and_then(num),
        high: num(&stats.high_price),
        low: num(&stats.low_price),
        volume: num(&stats.volume),
        change_pct: num(&stats.price_change_percent),
        symbol: stats.symbol,
    }
}

impl BinanceClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: super::http_client(),
            base_url: base_url.into(),
        }
    }

    /// Fetch the most recent klines (candlesticks) for a pair such as `BTCUSDT`
    pub async fn get_klines(&self, pair: &str, interval: &str, limit: Option<u32>) -> Result<Vec<Kline>> {
        let limit = limit.unwrap_or(500).min(MAX_KLINES_PER_REQUEST);
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, pair, interval, limit
        );

        debug!(pair, interval, "Fetching klines from Binance");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {}: {}", status, body);
        }

        let raw_klines: Vec<RawKline> = response.json().await?;
        let klines = parse_klines(raw_klines);

        debug!(count = klines.len(), "Fetched klines");
        Ok(klines)
    }

    /// Get current price for a pair
    pub async fn get_price(&self, pair: &str) -> Result<Decimal> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, pair);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {}: {}", status, body);
        }

        let ticker: TickerPrice = response.json().await?;
        let price = Decimal::from_str(&ticker.price)?;
        Ok(price)
    }

    /// 24h statistics as an exchange-neutral ticker
    pub async fn get_24h_ticker(&self, pair: &str) -> Result<Ticker> {
        let url = format!("{}/api/v3/ticker/24hr?symbol={}", self.base_url, pair);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {}: {}", status, body);
        }

        let stats: TickerStats = response.json().await?;
        Ok(parse_stats(stats))
    }
}

#[async_trait::async_trait]
impl super::PriceSource for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    async fn usd_price(&self, symbol: &str) -> Result<Option<Decimal>> {
        match self.get_price(&format!("{}USDT", symbol.to_uppercase())).await {
            Ok(p) if p > Decimal::ZERO => Ok(Some(p)),
            Ok(_) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
