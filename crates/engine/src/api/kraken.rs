//! Kraken spot adapter. Kraken has no leveraged positions here: holdings come
//! from the balance endpoint and entries from trade history.

use super::signing::{kraken_signature, timestamp_ms};
use super::{field_decimal, field_str, json_decimal, non_zero, send_json, ExchangeAdapter};
use crate::config::ExchangeCredentials;
use crate::error::{ApiErrorKind, ExchangeError, ExchangeResult};
use crate::normalizer::strip_symbol;
use crate::types::{AssetBalance, Balance, FillSide, Platform, RawOrder, RawPosition, Ticker, TradeFill};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.kraken.com";

const BALANCE_PATH: &str = "/0/private/Balance";
const TRADES_PATH: &str = "/0/private/TradesHistory";
const OPEN_ORDERS_PATH: &str = "/0/private/OpenOrders";
const TICKER_PATH: &str = "/0/public/Ticker";

/// Quote codes that terminate a Kraken pair name, longest first
const PAIR_QUOTES: &[&str] = &["ZUSD", "ZEUR", "ZGBP", "USDT", "USDC", "USD", "EUR", "GBP"];

#[derive(Clone)]
pub struct KrakenAdapter {
    client: Client,
    base_url: String,
    credentials: ExchangeCredentials,
}

impl KrakenAdapter {
    pub fn new(credentials: ExchangeCredentials) -> Self {
        Self::with_base_url(credentials, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(credentials: ExchangeCredentials, base_url: impl Into<String>) -> Self {
        Self {
            client: super::http_client(),
            base_url: base_url.into(),
            credentials,
        }
    }

    async fn private_post(&self, path: &str) -> ExchangeResult<Value> {
        if !self.is_configured() {
            return Err(ExchangeError::not_configured(Platform::Kraken));
        }
        let nonce = (timestamp_ms() * 1000).to_string();
        let post_data = format!("nonce={}", nonce);
        let signature = kraken_signature(&self.credentials.secret, path, &nonce, &post_data)
            .map_err(|e| {
                ExchangeError::api(
                    Platform::Kraken,
                    ApiErrorKind::Authentication,
                    format!("API secret is not valid base64: {}", e),
                )
            })?;
        debug!(path, "Kraken private request");

        let request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("API-Key", &self.credentials.api_key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(post_data);
        unwrap_envelope(send_json(Platform::Kraken, request).await?)
    }
}

/// `{error: [...], result}`; any entry in `error` fails the call
pub fn unwrap_envelope(payload: Value) -> ExchangeResult<Value> {
    let errors: Vec<&str> = payload
        .get("error")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if let Some(first) = errors.first() {
        let code = first.split(':').next().unwrap_or("E");
        return Err(ExchangeError::from_payload(Platform::Kraken, code, &errors.join("; ")));
    }
    Ok(payload.get("result").cloned().unwrap_or(Value::Null))
}

/// Base asset of a Kraken pair: `XXBTZUSD` -> `BTC`, `SOLUSD` -> `SOL`
pub fn pair_base(pair: &str) -> String {
    let upper = pair.trim().to_uppercase();
    let upper = upper.split('/').next().unwrap_or(&upper).to_string();
    for quote in PAIR_QUOTES {
        if let Some(base) = upper.strip_suffix(quote) {
            if base.len() >= 2 {
                return strip_symbol(base);
            }
        }
    }
    strip_symbol(&upper)
}

/// Result map `{ "XXBT": "0.5", "SOL.F": "10" }`
pub fn parse_balance(result: &Value) -> Balance {
    let assets = result
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(asset, amount)| {
                    Some(AssetBalance {
                        asset: asset.clone(),
                        free: json_decimal(amount)?,
                        locked: Decimal::ZERO,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Balance {
        assets,
        total_usd: None,
    }
}

pub fn parse_trades(result: &Value) -> Vec<TradeFill> {
    let Some(trades) = result.get("trades").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut fills: Vec<TradeFill> = trades
        .values()
        .filter_map(|t| {
            let side = match field_str(t, "type")?.as_str() {
                "buy" => FillSide::Buy,
                "sell" => FillSide::Sell,
                _ => return None,
            };
            let time = t.get("time").and_then(Value::as_f64).unwrap_or(0.0);
            Some(TradeFill {
                symbol: pair_base(&field_str(t, "pair")?),
                side,
                amount: field_decimal(t, "vol")?,
                price: field_decimal(t, "price")?,
                timestamp: (time * 1000.0) as i64,
            })
        })
        .collect();
    fills.sort_by_key(|f| f.timestamp);
    fills
}

pub fn parse_open_orders(result: &Value) -> Vec<RawOrder> {
    let Some(open) = result.get("open").and_then(Value::as_object) else {
        return Vec::new();
    };
    open.values()
        .filter_map(|o| {
            let descr = o.get("descr")?;
            let order_type = field_str(descr, "ordertype");
            let conditional = !matches!(order_type.as_deref(), Some("limit") | Some("market") | None);
            let level = non_zero(field_decimal(descr, "price"));
            Some(RawOrder {
                symbol: pair_base(&field_str(descr, "pair")?),
                status: field_str(o, "status"),
                side: field_str(descr, "type"),
                price: if conditional { non_zero(field_decimal(descr, "price2")) } else { level },
                trigger_price: non_zero(field_decimal(o, "stopprice"))
                    .or(if conditional { level } else { None }),
                working_type: field_str(o, "trigger"),
                description: field_str(descr, "order").unwrap_or_default(),
                order_type,
            })
        })
        .collect()
}

pub fn parse_ticker(symbol: &str, result: &Value) -> ExchangeResult<Ticker> {
    let entry = result
        .as_object()
        .and_then(|m| m.values().next())
        .ok_or_else(|| ExchangeError::from_payload(Platform::Kraken, "ticker", "unknown pair"))?;
    let nth = |key: &str, idx: usize| entry.get(key).and_then(|v| v.get(idx)).and_then(json_decimal);

    let last = nth("c", 0)
        .ok_or_else(|| ExchangeError::from_payload(Platform::Kraken, "ticker", "missing last trade"))?;
    let open = field_decimal(entry, "o");
    Ok(Ticker {
        symbol: symbol.to_string(),
        last,
        bid: nth("b", 0),
        ask: nth("a", 0),
        high: nth("h", 1),
        low: nth("l", 1),
        volume: nth("v", 1),
        change_pct: open
            .filter(|o| !o.is_zero())
            .map(|o| ((last - o) / o * dec!(100)).round_dp(2)),
    })
}

#[async_trait]
impl ExchangeAdapter for KrakenAdapter {
    fn platform(&self) -> Platform {
        Platform::Kraken
    }

    fn is_configured(&self) -> bool {
        self.credentials.is_complete()
    }

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let pair = format!("{}USD", strip_symbol(symbol));
        let url = format!("{}{}?pair={}", self.base_url, TICKER_PATH, pair);
        let result = unwrap_envelope(send_json(Platform::Kraken, self.client.get(&url)).await?)?;
        parse_ticker(symbol, &result)
    }

    async fn get_balance(&self) -> ExchangeResult<Balance> {
        let result = self.private_post(BALANCE_PATH).await?;
        Ok(parse_balance(&result))
    }

    async fn get_positions(&self) -> ExchangeResult<Vec<RawPosition>> {
        if !self.is_configured() {
            return Err(ExchangeError::not_configured(Platform::Kraken));
        }
        Ok(Vec::new())
    }

    async fn get_orders(&self) -> ExchangeResult<Vec<RawOrder>> {
        let result = self.private_post(OPEN_ORDERS_PATH).await?;
        Ok(parse_open_orders(&result))
    }

    async fn get_trade_history(&self) -> ExchangeResult<Vec<TradeFill>> {
        let result = self.private_post(TRADES_PATH).await?;
        Ok(parse_trades(&result))
    }
}
