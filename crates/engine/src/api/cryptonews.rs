//! CryptoNews API client (ticker news and general headlines)

use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://cryptonews-api.com/api/v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub title: String,
    #[serde(default)]
    pub news_url: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    /// "Positive" / "Negative" / "Neutral" as tagged by the provider
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub tickers: Vec<String>,
}

impl NewsArticle {
    pub fn is_positive(&self) -> bool {
        self.sentiment
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("positive"))
    }

    /// Does the article mention `symbol` in its tickers or title?
    pub fn mentions(&self, symbol: &str) -> bool {
        let symbol = symbol.to_uppercase();
        self.tickers.iter().any(|t| t.eq_ignore_ascii_case(&symbol))
            || self
                .title
                .to_uppercase()
                .split(|c: char| !c.is_ascii_alphanumeric())
                .any(|word| word == symbol)
    }
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    #[serde(default)]
    data: Vec<NewsArticle>,
}

#[derive(Clone)]
pub struct CryptoNewsClient {
    client: Client,
    base_url: String,
    token: String,
}

impl CryptoNewsClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: super::http_client(),
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
        }
    }

    async fn fetch(&self, url: String) -> Result<Vec<NewsArticle>> {
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("CryptoNews API error {}: {}", status, body);
        }

        let news: NewsResponse = response.json().await?;
        debug!(count = news.data.len(), "Fetched news articles");
        Ok(news.data)
    }

    /// Latest articles tagged with `symbol`
    pub async fn ticker_news(&self, symbol: &str, items: u32) -> Result<Vec<NewsArticle>> {
        let url = format!(
            "{}?tickers={}&items={}&page=1&token={}",
            self.base_url,
            symbol.to_uppercase(),
            items,
            self.token
        );
        self.fetch(url).await
    }

    /// General market headlines
    pub async fn general_news(&self, items: u32) -> Result<Vec<NewsArticle>> {
        let url = format!(
            "{}/category?section=general&items={}&page=1&token={}",
            self.base_url, items, self.token
        );
        self.fetch(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_response() {
        let body = r#"{"data": [
            {"title": "Solana ETF approval nears", "news_url": "https://x.test/a", "sentiment": "Positive", "tickers": ["SOL"]},
            {"title": "Market wrap"}
        ]}"#;
        let news: NewsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(news.data.len(), 2);
        assert!(news.data[0].is_positive());
        assert!(!news.data[1].is_positive());
    }

    #[test]
    fn test_mentions() {
        let article = NewsArticle {
            title: "Why BTC and ETH rallied today".into(),
            news_url: None,
            source_name: None,
            date: None,
            sentiment: None,
            tickers: vec![],
        };
        assert!(article.mentions("eth"));
        assert!(!article.mentions("ET"));
    }
}
