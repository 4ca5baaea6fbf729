//! TAAPI.io RSI lookups (first link in the RSI chain)

use crate::indicators::RsiSource;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.taapi.io";

#[derive(Debug, Deserialize)]
struct IndicatorValue {
    value: f64,
}

#[derive(Clone)]
pub struct TaapiClient {
    client: Client,
    base_url: String,
    secret: String,
    exchange: String,
    interval: String,
}

impl TaapiClient {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            client: super::http_client(),
            base_url: DEFAULT_BASE_URL.to_string(),
            secret: secret.into(),
            exchange: "binance".into(),
            interval: "1h".into(),
        }
    }

    fn rsi_url(&self, symbol: &str) -> String {
        format!(
            "{}/rsi?secret={}&exchange={}&symbol={}/USDT&interval={}&period=14",
            self.base_url,
            self.secret,
            self.exchange,
            symbol.to_uppercase(),
            self.interval
        )
    }
}

#[async_trait]
impl RsiSource for TaapiClient {
    fn name(&self) -> &str {
        "taapi"
    }

    async fn rsi(&self, symbol: &str) -> Result<f64> {
        debug!(symbol, "Fetching RSI from TAAPI");
        let response = self.client.get(self.rsi_url(symbol)).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("TAAPI error {}: {}", status, body);
        }

        let value: IndicatorValue = response.json().await?;
        Ok(value.value)
    }
}
