//! BingX perpetual swap adapter

use super::signing::{hmac_sha256_hex, timestamp_ms};
use super::{field_decimal, field_str, non_zero, send_json, ExchangeAdapter};
use crate::config::ExchangeCredentials;
use crate::error::{ExchangeError, ExchangeResult};
use crate::types::{AssetBalance, Balance, Platform, RawOrder, RawPosition, Ticker};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://open-api.bingx.com";
const RECV_WINDOW: &str = "5000";

const TICKER_PATH: &str = "/openApi/swap/v2/quote/ticker";
const POSITIONS_PATH: &str = "/openApi/swap/v2/user/positions";
const BALANCE_PATH: &str = "/openApi/swap/v3/user/balance";
const OPEN_ORDERS_PATHS: [&str; 2] = [
    "/openApi/swap/v2/trade/openOrders",
    "/openApi/swap/v3/trade/openOrders",
];

#[derive(Clone)]
pub struct BingXAdapter {
    client: Client,
    base_url: String,
    credentials: ExchangeCredentials,
}

impl BingXAdapter {
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

    async fn private_get(&self, path: &str) -> ExchangeResult<Value> {
        if !self.is_configured() {
            return Err(ExchangeError::not_configured(Platform::BingX));
        }
        let query = signed_query(&self.credentials.secret, &[], timestamp_ms());
        let url = format!("{}{}?{}", self.base_url, path, query);
        debug!(path, "BingX private request");

        let request = self
            .client
            .get(&url)
            .header("X-BX-APIKEY", &self.credentials.api_key);
        unwrap_envelope(send_json(Platform::BingX, request).await?)
    }
}

/// Query string in insertion order (BingX GET signing does not sort), signed
pub fn signed_query(secret: &str, params: &[(&str, String)], timestamp: i64) -> String {
    let mut parts: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    parts.push(format!("timestamp={}", timestamp));
    parts.push(format!("recvWindow={}", RECV_WINDOW));
    let query = parts.join("&");
    let signature = hmac_sha256_hex(secret, &query);
    format!("{}&signature={}", query, signature)
}

/// `{code, msg, data}` with `code == 0` on success
pub fn unwrap_envelope(payload: Value) -> ExchangeResult<Value> {
    let code = payload.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        let msg = payload.get("msg").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(ExchangeError::from_payload(Platform::BingX, code, msg));
    }
    Ok(payload.get("data").cloned().unwrap_or(Value::Null))
}

pub fn parse_positions(data: &Value) -> Vec<RawPosition> {
    let Some(items) = data.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|p| {
            let quantity = field_decimal(p, "positionAmt")?;
            let side = field_str(p, "positionSide").filter(|s| s != "BOTH");
            Some(RawPosition {
                symbol: field_str(p, "symbol")?,
                side,
                quantity,
                entry_price: field_decimal(p, "avgPrice").or_else(|| field_decimal(p, "entryPrice")),
                mark_price: field_decimal(p, "markPrice"),
                unrealized_pnl: field_decimal(p, "unrealizedProfit"),
                notional: field_decimal(p, "positionValue").or_else(|| field_decimal(p, "notional")),
                leverage: field_decimal(p, "leverage"),
            })
        })
        .collect()
}

/// Open orders arrive as `data.orders` or as a bare list
pub fn parse_orders(data: &Value) -> Vec<RawOrder> {
    let items = data
        .get("orders")
        .and_then(Value::as_array)
        .or_else(|| data.as_array());
    let Some(items) = items else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|o| {
            let description = ["clientOrderId", "positionSide", "stopGuaranteed"]
                .iter()
                .filter_map(|k| field_str(o, k))
                .collect::<Vec<_>>()
                .join(" ");
            Some(RawOrder {
                symbol: field_str(o, "symbol")?,
                order_type: field_str(o, "type"),
                status: field_str(o, "status"),
                side: field_str(o, "side"),
                price: non_zero(field_decimal(o, "price")),
                trigger_price: non_zero(field_decimal(o, "stopPrice")),
                working_type: field_str(o, "workingType"),
                description,
            })
        })
        .collect()
}

/// v3 returns a list of per-asset balances; v2 wraps one object in `balance`
pub fn parse_balance(data: &Value) -> Balance {
    let items: Vec<&Value> = match data {
        Value::Array(list) => list.iter().collect(),
        Value::Object(_) => vec![data.get("balance").unwrap_or(data)],
        _ => Vec::new(),
    };

    let mut total_usd = Decimal::ZERO;
    let assets = items
        .into_iter()
        .filter_map(|b| {
            let asset = field_str(b, "asset")?;
            let balance = field_decimal(b, "balance").unwrap_or_default();
            let available = field_decimal(b, "availableMargin").unwrap_or(balance);
            if let Some(equity) = field_decimal(b, "equity") {
                if matches!(asset.as_str(), "USDT" | "USDC") {
                    total_usd += equity;
                }
            }
            Some(AssetBalance {
                asset,
                free: available,
                locked: (balance - available).max(Decimal::ZERO),
            })
        })
        .collect();

    Balance {
        assets,
        total_usd: Some(total_usd).filter(|t| !t.is_zero()),
    }
}

pub fn parse_ticker(symbol: &str, data: &Value) -> ExchangeResult<Ticker> {
    let last = field_decimal(data, "lastPrice").ok_or_else(|| {
        ExchangeError::from_payload(Platform::BingX, "ticker", "missing lastPrice")
    })?;
    Ok(Ticker {
        symbol: symbol.to_string(),
        last,
        bid: field_decimal(data, "bidPrice"),
        ask: field_decimal(data, "askPrice"),
        high: field_decimal(data, "highPrice"),
        low: field_decimal(data, "lowPrice"),
        volume: field_decimal(data, "volume"),
        change_pct: field_decimal(data, "priceChangePercent"),
    })
}

/// `BTC`, `BTC/USDT` or `BTC-USDT` to the swap pair `BTC-USDT`
pub fn swap_pair(symbol: &str) -> String {
    let s = symbol.trim().to_uppercase().replace('/', "-");
    let s = s.split(':').next().unwrap_or(&s).to_string();
    if s.contains('-') {
        s
    } else {
        format!("{}-USDT", s)
    }
}

#[async_trait]
impl ExchangeAdapter for BingXAdapter {
    fn platform(&self) -> Platform {
        Platform::BingX
    }

    fn is_configured(&self) -> bool {
        self.credentials.is_complete()
    }

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let url = format!("{}{}?symbol={}", self.base_url, TICKER_PATH, swap_pair(symbol));
        let data = unwrap_envelope(send_json(Platform::BingX, self.client.get(&url)).await?)?;
        parse_ticker(symbol, &data)
    }

    async fn get_balance(&self) -> ExchangeResult<Balance> {
        let data = self.private_get(BALANCE_PATH).await?;
        Ok(parse_balance(&data))
    }

    async fn get_positions(&self) -> ExchangeResult<Vec<RawPosition>> {
        let data = self.private_get(POSITIONS_PATH).await?;
        Ok(parse_positions(&data))
    }

    async fn get_orders(&self) -> ExchangeResult<Vec<RawOrder>> {
        let mut last_err = None;
        for path in OPEN_ORDERS_PATHS {
            match self.private_get(path).await {
                Ok(data) => return Ok(parse_orders(&data)),
                Err(e @ ExchangeError::NotAvailable { .. }) => return Err(e),
                Err(e) => {
                    warn!(path, error = %e, "BingX open orders endpoint failed, trying next");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ExchangeError::not_available(Platform::BingX, "no order endpoint")))
    }
}
