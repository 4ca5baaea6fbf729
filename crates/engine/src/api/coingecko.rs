//! CoinGecko `simple/price` client used to value spot holdings

use super::PriceSource;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// Ticker -> CoinGecko id for assets where the two differ or collide
const COIN_IDS: &[(&str, &str)] = &[
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("SOL", "solana"),
    ("XRP", "ripple"),
    ("ADA", "cardano"),
    ("DOGE", "dogecoin"),
    ("DOT", "polkadot"),
    ("AVAX", "avalanche-2"),
    ("LINK", "chainlink"),
    ("MATIC", "matic-network"),
    ("LTC", "litecoin"),
    ("ATOM", "cosmos"),
    ("XLM", "stellar"),
    ("XMR", "monero"),
    ("ETC", "ethereum-classic"),
    ("ZEC", "zcash"),
    ("UNI", "uniswap"),
    ("NEAR", "near"),
    ("APT", "aptos"),
    ("ARB", "arbitrum"),
    ("OP", "optimism"),
    ("SUI", "sui"),
    ("TON", "the-open-network"),
    ("TRX", "tron"),
    ("STX", "blockstack"),
    ("JUP", "jupiter-exchange-solana"),
    ("FORTH", "ampleforth-governance-token"),
    ("SUPER", "superfarm"),
    ("SC", "siacoin"),
    ("PEPE", "pepe"),
    ("SHIB", "shiba-inu"),
    ("KAS", "kaspa"),
    ("INJ", "injective-protocol"),
    ("TIA", "celestia"),
    ("HYPE", "hyperliquid"),
];

pub fn coin_id(symbol: &str) -> Option<&'static str> {
    let upper = symbol.to_uppercase();
    COIN_IDS
        .iter()
        .find(|(ticker, _)| *ticker == upper)
        .map(|(_, id)| *id)
}

#[derive(Clone)]
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
}

impl Default for CoinGeckoClient {
    fn default() -> Self {
        Self::new()
    }
}

/// `{ "solana": { "usd": 150.2 } }` -> ticker -> price
pub fn parse_simple_price(body: &Value, ids: &[(String, &str)]) -> HashMap<String, Decimal> {
    ids.iter()
        .filter_map(|(symbol, id)| {
            let price = body.get(*id)?.get("usd")?;
            let price = super::json_decimal(price)?;
            Some((symbol.clone(), price))
        })
        .collect()
}

impl CoinGeckoClient {
    pub fn new() -> Self {
        Self {
            client: super::http_client(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Batch lookup; unknown tickers are silently absent from the result
    pub async fn usd_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>> {
        let ids: Vec<(String, &str)> = symbols
            .iter()
            .filter_map(|s| coin_id(s).map(|id| (s.to_uppercase(), id)))
            .collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let joined = ids.iter().map(|(_, id)| *id).collect::<Vec<_>>().join(",");
        let url = format!("{}/simple/price?ids={}&vs_currencies=usd", self.base_url, joined);
        debug!(count = ids.len(), "Fetching CoinGecko prices");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("CoinGecko API error {}: {}", status, body);
        }

        let body: Value = response.json().await?;
        Ok(parse_simple_price(&body, &ids))
    }
}

#[async_trait]
impl PriceSource for CoinGeckoClient {
    fn name(&self) -> &str {
        "coingecko"
    }

    async fn usd_price(&self, symbol: &str) -> Result<Option<Decimal>> {
        let prices = self.usd_prices(&[symbol.to_string()]).await?;
        Ok(prices.get(&symbol.to_uppercase()).copied())
    }

    async fn usd_prices_for(&self, symbols: &[String]) -> HashMap<String, Decimal> {
        match self.usd_prices(symbols).await {
            Ok(prices) => prices,
            Err(e) => {
                warn!(error = %e, "CoinGecko batch price lookup failed");
                HashMap::new()
            }
        }
    }
}
