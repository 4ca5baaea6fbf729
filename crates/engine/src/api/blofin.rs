//! Blofin perpetual adapter

use super::signing::{blofin_signature, timestamp_ms};
use super::{field_decimal, field_str, non_zero, send_json, ExchangeAdapter};
use crate::config::ExchangeCredentials;
use crate::error::{ExchangeError, ExchangeResult};
use crate::normalizer::strip_symbol;
use crate::types::{AssetBalance, Balance, Platform, RawOrder, RawPosition, Ticker};
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://openapi.blofin.com";

const POSITIONS_PATH: &str = "/api/v1/account/positions";
const BALANCES_PATH: &str = "/api/v1/asset/balances?accountType=futures";
const TPSL_PENDING_PATH: &str = "/api/v1/trade/orders-tpsl-pending";
const TICKERS_PATH: &str = "/api/v1/market/tickers";

#[derive(Clone)]
pub struct BlofinAdapter {
    client: Client,
    base_url: String,
    credentials: ExchangeCredentials,
}

fn nonce() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}

impl BlofinAdapter {
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
            return Err(ExchangeError::not_configured(Platform::Blofin));
        }
        let timestamp = timestamp_ms().to_string();
        let nonce = nonce();
        let signature = blofin_signature(&self.credentials.secret, path, "GET", &timestamp, &nonce, "");
        debug!(path, "Blofin private request");

        let request = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("ACCESS-KEY", &self.credentials.api_key)
            .header("ACCESS-SIGN", signature)
            .header("ACCESS-TIMESTAMP", timestamp)
            .header("ACCESS-NONCE", nonce)
            .header(
                "ACCESS-PASSPHRASE",
                self.credentials.passphrase.as_deref().unwrap_or_default(),
            );
        unwrap_envelope(send_json(Platform::Blofin, request).await?)
    }
}

/// `{code: "0", msg, data}`
pub fn unwrap_envelope(payload: Value) -> ExchangeResult<Value> {
    let code = field_str(&payload, "code").unwrap_or_else(|| "0".to_string());
    if code != "0" {
        let msg = payload.get("msg").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(ExchangeError::from_payload(Platform::Blofin, code, msg));
    }
    Ok(payload.get("data").cloned().unwrap_or(Value::Null))
}

/// Blofin reports size in contracts, so the notional comes from margin and
/// leverage. Without it the PnL is dropped and recomputed from prices.
pub fn parse_positions(data: &Value) -> Vec<RawPosition> {
    data.as_array()
        .into_iter()
        .flatten()
        .filter_map(|p| {
            let leverage = field_decimal(p, "leverage");
            let margin = field_decimal(p, "initialMargin").or_else(|| field_decimal(p, "margin"));
            let notional = match (margin, leverage) {
                (Some(m), Some(l)) if m > Decimal::ZERO => Some(m * l.max(Decimal::ONE)),
                _ => None,
            };
            let side = field_str(p, "positionSide").filter(|s| s != "net");
            Some(RawPosition {
                symbol: field_str(p, "instId")?,
                side,
                quantity: field_decimal(p, "positions")?,
                entry_price: field_decimal(p, "averagePrice"),
                mark_price: field_decimal(p, "markPrice"),
                unrealized_pnl: notional.and(field_decimal(p, "unrealizedPnl")),
                notional,
                leverage,
            })
        })
        .collect()
}

pub fn parse_balances(data: &Value) -> Balance {
    let mut total = Decimal::ZERO;
    let assets = data
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|b| {
            let asset = field_str(b, "currency")?;
            let balance = field_decimal(b, "balance").unwrap_or_default();
            let available = field_decimal(b, "available").unwrap_or(balance);
            let frozen = field_decimal(b, "frozen").unwrap_or((balance - available).max(Decimal::ZERO));
            if matches!(asset.as_str(), "USDT" | "USDC") {
                total += field_decimal(b, "equity").unwrap_or(balance);
            }
            Some(AssetBalance {
                asset,
                free: available,
                locked: frozen,
            })
        })
        .collect();
    Balance {
        assets,
        total_usd: Some(total).filter(|t| !t.is_zero()),
    }
}

/// One TP/SL order can carry both legs; each present leg becomes its own order
pub fn parse_tpsl_orders(data: &Value) -> Vec<RawOrder> {
    let mut orders = Vec::new();
    for o in data.as_array().into_iter().flatten() {
        let Some(symbol) = field_str(o, "instId") else {
            continue;
        };
        let base = RawOrder {
            symbol,
            status: field_str(o, "state"),
            side: field_str(o, "side"),
            description: field_str(o, "tpslId").unwrap_or_default(),
            ..Default::default()
        };
        if let Some(tp) = non_zero(field_decimal(o, "tpTriggerPrice")) {
            orders.push(RawOrder {
                order_type: Some("TAKE_PROFIT".into()),
                trigger_price: Some(tp),
                price: non_zero(field_decimal(o, "tpOrderPrice")),
                ..base.clone()
            });
        }
        if let Some(sl) = non_zero(field_decimal(o, "slTriggerPrice")) {
            orders.push(RawOrder {
                order_type: Some("STOP_LOSS".into()),
                trigger_price: Some(sl),
                price: non_zero(field_decimal(o, "slOrderPrice")),
                ..base
            });
        }
    }
    orders
}

pub fn parse_ticker(symbol: &str, data: &Value) -> ExchangeResult<Ticker> {
    let entry = data
        .as_array()
        .and_then(|list| list.first())
        .unwrap_or(data);
    let last = field_decimal(entry, "last")
        .ok_or_else(|| ExchangeError::from_payload(Platform::Blofin, "ticker", "missing last price"))?;
    let open = field_decimal(entry, "open24h");
    Ok(Ticker {
        symbol: symbol.to_string(),
        last,
        bid: field_decimal(entry, "bidPrice"),
        ask: field_decimal(entry, "askPrice"),
        high: field_decimal(entry, "high24h"),
        low: field_decimal(entry, "low24h"),
        volume: field_decimal(entry, "vol24h"),
        change_pct: open
            .filter(|o| !o.is_zero())
            .map(|o| ((last - o) / o * dec!(100)).round_dp(2)),
    })
}

#[async_trait]
impl ExchangeAdapter for BlofinAdapter {
    fn platform(&self) -> Platform {
        Platform::Blofin
    }

    fn is_configured(&self) -> bool {
        self.credentials.is_complete() && self.credentials.passphrase.is_some()
    }

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let url = format!(
            "{}{}?instId={}-USDT",
            self.base_url,
            TICKERS_PATH,
            strip_symbol(symbol)
        );
        let data = unwrap_envelope(send_json(Platform::Blofin, self.client.get(&url)).await?)?;
        parse_ticker(symbol, &data)
    }

    async fn get_balance(&self) -> ExchangeResult<Balance> {
        let data = self.private_get(BALANCES_PATH).await?;
        Ok(parse_balances(&data))
    }

    async fn get_positions(&self) -> ExchangeResult<Vec<RawPosition>> {
        let data = self.private_get(POSITIONS_PATH).await?;
        Ok(parse_positions(&data))
    }

    async fn get_orders(&self) -> ExchangeResult<Vec<RawOrder>> {
        let data = self.private_get(TPSL_PENDING_PATH).await?;
        Ok(parse_tpsl_orders(&data))
    }
}
