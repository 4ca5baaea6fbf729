//! HTTP clients: exchange adapters plus public market-data sources

pub mod binance;
pub mod bingx;
pub mod blofin;
pub mod coingecko;
pub mod cryptonews;
pub mod kraken;
pub mod kucoin;
pub mod lunarcrush;
pub mod signing;
pub mod taapi;

pub use binance::BinanceClient;
pub use bingx::BingXAdapter;
pub use blofin::BlofinAdapter;
pub use coingecko::CoinGeckoClient;
pub use cryptonews::{CryptoNewsClient, NewsArticle};
pub use kraken::KrakenAdapter;
pub use kucoin::KuCoinAdapter;
pub use lunarcrush::LunarCrushClient;
pub use taapi::TaapiClient;

use crate::error::{ExchangeError, ExchangeResult};
use crate::types::{Balance, Platform, RawOrder, RawPosition, Ticker, TradeFill};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Shared client configuration: every outbound call times out after 30s
pub fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Uniform contract over one exchange account
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Credentials present; private calls fail with `NotAvailable` otherwise
    fn is_configured(&self) -> bool;

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker>;

    async fn get_balance(&self) -> ExchangeResult<Balance>;

    async fn get_positions(&self) -> ExchangeResult<Vec<RawPosition>>;

    async fn get_orders(&self) -> ExchangeResult<Vec<RawOrder>>;

    async fn get_trade_history(&self) -> ExchangeResult<Vec<TradeFill>> {
        Ok(Vec::new())
    }
}

/// USD spot price lookup by bare ticker
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when the source does not know the asset
    async fn usd_price(&self, symbol: &str) -> anyhow::Result<Option<Decimal>>;

    /// Lookup for many tickers; failed or unknown tickers are left out
    async fn usd_prices_for(&self, symbols: &[String]) -> HashMap<String, Decimal> {
        let mut prices = HashMap::new();
        for symbol in symbols {
            match self.usd_price(symbol).await {
                Ok(Some(price)) => {
                    prices.insert(symbol.to_uppercase(), price);
                }
                Ok(None) => {}
                Err(e) => debug!(source = self.name(), symbol = %symbol, error = %e, "Price lookup failed"),
            }
        }
        prices
    }
}

/// Send a request and decode its JSON body, mapping failures to `ExchangeError`
pub(crate) async fn send_json(platform: Platform, request: reqwest::RequestBuilder) -> ExchangeResult<Value> {
    let response = request
        .send()
        .await
        .map_err(|e| ExchangeError::from_transport(platform, &e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ExchangeError::from_status(platform, status, &body));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| ExchangeError::from_transport(platform, &e))
}

/// Decimal from a JSON string or number; empty strings are `None`
pub(crate) fn json_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Decimal::from_str(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .ok(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else {
                Decimal::from_str(&n.to_string()).ok()
            }
        }
        _ => None,
    }
}

pub(crate) fn field_decimal(obj: &Value, key: &str) -> Option<Decimal> {
    obj.get(key).and_then(json_decimal)
}

pub(crate) fn field_str(obj: &Value, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Treat zero as "not set" (exchanges send `"0"` for absent trigger prices)
pub(crate) fn non_zero(value: Option<Decimal>) -> Option<Decimal> {
    value.filter(|v| !v.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_json_decimal_shapes() {
        assert_eq!(json_decimal(&json!("50000.5")), Some(dec!(50000.5)));
        assert_eq!(json_decimal(&json!(10)), Some(dec!(10)));
        assert_eq!(json_decimal(&json!(0.25)), Some(dec!(0.25)));
        assert_eq!(json_decimal(&json!("1e-3")), Some(dec!(0.001)));
        assert_eq!(json_decimal(&json!("")), None);
        assert_eq!(json_decimal(&json!(null)), None);
    }

    #[test]
    fn test_field_helpers() {
        let obj = json!({"orderId": 123, "type": "", "symbol": "BTC-USDT", "stopPrice": "0"});
        assert_eq!(field_str(&obj, "orderId").as_deref(), Some("123"));
        assert_eq!(field_str(&obj, "type"), None);
        assert_eq!(non_zero(field_decimal(&obj, "stopPrice")), None);
    }
}
