//! LunarCrush social metrics, reduced to a 0..1 momentum value

use anyhow::Result;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://lunarcrush.com/api4";

#[derive(Clone)]
pub struct LunarCrushClient {
    client: Client,
    base_url: String,
    api_key: String,
}

/// Galaxy score (0..100) scaled to 0..1
pub fn momentum_from_payload(body: &Value) -> Option<f64> {
    let data = body.get("data").unwrap_or(body);
    let galaxy = data.get("galaxy_score")?.as_f64()?;
    Some((galaxy / 100.0).clamp(0.0, 1.0))
}

impl LunarCrushClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: super::http_client(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    pub async fn social_momentum(&self, symbol: &str) -> Result<f64> {
        let url = format!("{}/public/coins/{}/v1", self.base_url, symbol.to_uppercase());
        debug!(symbol, "Fetching LunarCrush social data");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LunarCrush API error {}: {}", status, body);
        }

        let body: Value = response.json().await?;
        momentum_from_payload(&body)
            .ok_or_else(|| anyhow::anyhow!("LunarCrush returned no galaxy score for {}", symbol))
    }
}
