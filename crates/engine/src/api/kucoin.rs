//! KuCoin spot adapter

use super::signing::{hmac_sha256_base64, timestamp_ms};
use super::{field_decimal, field_str, non_zero, send_json, ExchangeAdapter};
use crate::config::ExchangeCredentials;
use crate::error::{ExchangeError, ExchangeResult};
use crate::normalizer::strip_symbol;
use crate::types::{AssetBalance, Balance, FillSide, Platform, RawOrder, RawPosition, Ticker, TradeFill};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.kucoin.com";
const SUCCESS_CODE: &str = "200000";

const ACCOUNTS_PATH: &str = "/api/v1/accounts?type=trade";
const STOP_ORDERS_PATH: &str = "/api/v1/stop-order?status=active";
const FILLS_PATH: &str = "/api/v1/fills";
const LEVEL1_PATH: &str = "/api/v1/market/orderbook/level1";

#[derive(Clone)]
pub struct KuCoinAdapter {
    client: Client,
    base_url: String,
    credentials: ExchangeCredentials,
}

/// Header values for one signed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub timestamp: String,
    pub signature: String,
    pub passphrase: String,
}

/// Key version 2: the passphrase is itself HMAC-signed with the secret
pub fn sign_request(
    credentials: &ExchangeCredentials,
    timestamp: i64,
    method: &str,
    endpoint: &str,
    body: &str,
) -> SignedHeaders {
    let timestamp = timestamp.to_string();
    let prehash = format!("{}{}{}{}", timestamp, method, endpoint, body);
    SignedHeaders {
        signature: hmac_sha256_base64(&credentials.secret, &prehash),
        passphrase: hmac_sha256_base64(
            &credentials.secret,
            credentials.passphrase.as_deref().unwrap_or_default(),
        ),
        timestamp,
    }
}

impl KuCoinAdapter {
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

    async fn private_get(&self, endpoint: &str) -> ExchangeResult<Value> {
        if !self.is_configured() {
            return Err(ExchangeError::not_configured(Platform::KuCoin));
        }
        let signed = sign_request(&self.credentials, timestamp_ms(), "GET", endpoint, "");
        debug!(endpoint, "KuCoin private request");

        let request = self
            .client
            .get(format!("{}{}", self.base_url, endpoint))
            .header("KC-API-KEY", &self.credentials.api_key)
            .header("KC-API-SIGN", signed.signature)
            .header("KC-API-TIMESTAMP", signed.timestamp)
            .header("KC-API-PASSPHRASE", signed.passphrase)
            .header("KC-API-KEY-VERSION", "2");
        unwrap_envelope(send_json(Platform::KuCoin, request).await?)
    }
}

/// `{code: "200000", data}`
pub fn unwrap_envelope(payload: Value) -> ExchangeResult<Value> {
    let code = field_str(&payload, "code").unwrap_or_else(|| SUCCESS_CODE.to_string());
    if code != SUCCESS_CODE {
        let msg = payload.get("msg").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(ExchangeError::from_payload(Platform::KuCoin, code, msg));
    }
    Ok(payload.get("data").cloned().unwrap_or(Value::Null))
}

/// Trade accounts, one entry per currency after summing sub-accounts
pub fn parse_accounts(data: &Value) -> Balance {
    let mut per_currency: BTreeMap<String, AssetBalance> = BTreeMap::new();
    for account in data.as_array().into_iter().flatten() {
        let Some(currency) = field_str(account, "currency") else {
            continue;
        };
        let available = field_decimal(account, "available").unwrap_or_default();
        let holds = field_decimal(account, "holds").unwrap_or_default();
        let entry = per_currency.entry(currency.clone()).or_insert(AssetBalance {
            asset: currency,
            free: Default::default(),
            locked: Default::default(),
        });
        entry.free += available;
        entry.locked += holds;
    }
    Balance {
        assets: per_currency.into_values().collect(),
        total_usd: None,
    }
}

/// Active stop orders.
///
/// For sells, `stop: loss` triggers on the way down (stop-loss) and
/// `stop: entry` on the way up (take-profit). Other combinations keep their raw
/// type and go through the fallback classifier.
pub fn parse_stop_orders(data: &Value) -> Vec<RawOrder> {
    let items = data
        .get("items")
        .and_then(Value::as_array)
        .or_else(|| data.as_array());
    items
        .into_iter()
        .flatten()
        .filter_map(|o| {
            let side = field_str(o, "side");
            let stop = field_str(o, "stop");
            let raw_type = field_str(o, "type");
            let order_type = match (side.as_deref(), stop.as_deref()) {
                (Some("sell"), Some("loss")) => Some("STOP_LOSS".to_string()),
                (Some("sell"), Some("entry")) => Some("TAKE_PROFIT".to_string()),
                _ => raw_type.clone(),
            };
            let description = [raw_type, stop.map(|s| format!("stop {}", s)), field_str(o, "remark")]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            Some(RawOrder {
                symbol: field_str(o, "symbol")?,
                order_type,
                status: field_str(o, "status"),
                side,
                price: non_zero(field_decimal(o, "price")),
                trigger_price: non_zero(field_decimal(o, "stopPrice")),
                working_type: None,
                description,
            })
        })
        .collect()
}

pub fn parse_fills(data: &Value) -> Vec<TradeFill> {
    let items = data
        .get("items")
        .and_then(Value::as_array)
        .or_else(|| data.as_array());
    let mut fills: Vec<TradeFill> = items
        .into_iter()
        .flatten()
        .filter_map(|f| {
            let side = match field_str(f, "side")?.as_str() {
                "buy" => FillSide::Buy,
                "sell" => FillSide::Sell,
                _ => return None,
            };
            Some(TradeFill {
                symbol: strip_symbol(&field_str(f, "symbol")?),
                side,
                amount: field_decimal(f, "size")?,
                price: field_decimal(f, "price")?,
                timestamp: f.get("createdAt").and_then(Value::as_i64).unwrap_or(0),
            })
        })
        .collect();
    fills.sort_by_key(|f| f.timestamp);
    fills
}

pub fn parse_level1(symbol: &str, data: &Value) -> ExchangeResult<Ticker> {
    let last = field_decimal(data, "price")
        .ok_or_else(|| ExchangeError::from_payload(Platform::KuCoin, "ticker", "missing price"))?;
    Ok(Ticker {
        symbol: symbol.to_string(),
        last,
        bid: field_decimal(data, "bestBid"),
        ask: field_decimal(data, "bestAsk"),
        ..Default::default()
    })
}

#[async_trait]
impl ExchangeAdapter for KuCoinAdapter {
    fn platform(&self) -> Platform {
        Platform::KuCoin
    }

    fn is_configured(&self) -> bool {
        self.credentials.is_complete() && self.credentials.passphrase.is_some()
    }

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let url = format!(
            "{}{}?symbol={}-USDT",
            self.base_url,
            LEVEL1_PATH,
            strip_symbol(symbol)
        );
        let data = unwrap_envelope(send_json(Platform::KuCoin, self.client.get(&url)).await?)?;
        parse_level1(symbol, &data)
    }

    async fn get_balance(&self) -> ExchangeResult<Balance> {
        let data = self.private_get(ACCOUNTS_PATH).await?;
        Ok(parse_accounts(&data))
    }

    async fn get_positions(&self) -> ExchangeResult<Vec<RawPosition>> {
        if !self.is_configured() {
            return Err(ExchangeError::not_configured(Platform::KuCoin));
        }
        Ok(Vec::new())
    }

    async fn get_orders(&self) -> ExchangeResult<Vec<RawOrder>> {
        let data = self.private_get(STOP_ORDERS_PATH).await?;
        Ok(parse_stop_orders(&data))
    }

    async fn get_trade_history(&self) -> ExchangeResult<Vec<TradeFill>> {
        let data = self.private_get(FILLS_PATH).await?;
        Ok(parse_fills(&data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{classify_order, OrderClass};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn creds() -> ExchangeCredentials {
        ExchangeCredentials {
            api_key: "key".into(),
            secret: "secret".into(),
            passphrase: Some("phrase".into()),
        }
    }

    #[test]
    fn test_sign_request() {
        let signed = sign_request(&creds(), 1700000000000, "GET", ACCOUNTS_PATH, "");
        assert_eq!(signed.timestamp, "1700000000000");
        assert_eq!(
            signed.signature,
            hmac_sha256_base64("secret", "1700000000000GET/api/v1/accounts?type=trade")
        );
        assert_eq!(signed.passphrase, hmac_sha256_base64("secret", "phrase"));
    }

    #[test]
    fn test_envelope_codes() {
        assert!(unwrap_envelope(json!({"code": "200000", "data": []})).is_ok());
        let err = unwrap_envelope(json!({"code": "429000", "msg": "Too Many Requests"})).unwrap_err();
        assert_eq!(err.kind(), Some(crate::error::ApiErrorKind::RateLimit));
    }

    #[test]
    fn test_parse_accounts_sums_currency() {
        let data = json!([
            {"currency": "SOL", "type": "trade", "balance": "3", "available": "2", "holds": "1"},
            {"currency": "SOL", "type": "trade", "balance": "1", "available": "1", "holds": "0"},
            {"currency": "USDT", "type": "trade", "balance": "50", "available": "50", "holds": "0"}
        ]);
        let balance = parse_accounts(&data);
        assert_eq!(balance.assets.len(), 2);
        assert_eq!(balance.assets[0].asset, "SOL");
        assert_eq!(balance.assets[0].total(), dec!(4));
    }

    #[test]
    fn test_stop_orders_map_to_protection() {
        let data = json!({"items": [
            {"symbol": "SOL-USDT", "side": "sell", "stop": "loss", "type": "market", "stopPrice": "120", "status": "NEW"},
            {"symbol": "SOL-USDT", "side": "sell", "stop": "entry", "type": "limit", "price": "200", "stopPrice": "199"},
            {"symbol": "ETH-USDT", "side": "buy", "stop": "entry", "type": "limit", "stopPrice": "2500"}
        ]});
        let orders = parse_stop_orders(&data);
        assert_eq!(classify_order(&orders[0]).class, OrderClass::StopLoss);
        assert_eq!(classify_order(&orders[1]).class, OrderClass::TakeProfit);
        let buy = classify_order(&orders[2]);
        assert!(buy.inferred);
    }

    #[test]
    fn test_parse_fills() {
        let data = json!({"items": [
            {"symbol": "SOL-USDT", "side": "buy", "price": "100", "size": "2", "createdAt": 1700000000000i64}
        ]});
        let fills = parse_fills(&data);
        assert_eq!(fills[0].symbol, "SOL");
        assert_eq!(fills[0].amount, dec!(2));
    }

    #[tokio::test]
    async fn test_missing_passphrase_is_not_configured() {
        let mut c = creds();
        c.passphrase = None;
        let adapter = KuCoinAdapter::new(c);
        assert!(!adapter.is_configured());
        assert!(adapter.get_balance().await.unwrap_err().is_recoverable());
    }
}
