//! Multi-exchange aggregation: Adapter -> Normalizer -> Matcher per exchange.
//!
//! Exchanges are polled sequentially. A failing exchange contributes no
//! positions; its error is kept in the registry so the status endpoint can
//! show it.

use crate::api::{
    BinanceClient, BingXAdapter, BlofinAdapter, CoinGeckoClient, ExchangeAdapter, KrakenAdapter,
    KuCoinAdapter, PriceSource,
};
use crate::config::SentinelConfig;
use crate::error::{ExchangeError, ExchangeResult};
use crate::matcher::{annotate_positions, summarize_orders, OrderSummary, RiskPolicy};
use crate::normalizer::{normalize_positions, normalize_spot_balances, spot_symbols, NormalizerPolicy};
use crate::types::{NormalizedPosition, Platform, PortfolioSnapshot};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeStatus {
    Connected,
    /// No credentials; only public market data works
    PublicOnly,
    ApiError,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExchangeReport {
    pub platform: Platform,
    pub status: ExchangeStatus,
    pub positions: usize,
    pub orders: OrderSummary,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ExchangeReport {
    fn unchecked(platform: Platform, configured: bool) -> Self {
        Self {
            platform,
            status: if configured {
                ExchangeStatus::Connected
            } else {
                ExchangeStatus::PublicOnly
            },
            positions: 0,
            orders: OrderSummary::default(),
            error: None,
            checked_at: Utc::now(),
        }
    }
}

/// Registered adapters plus the outcome of the last poll of each
pub struct ExchangeRegistry {
    adapters: Vec<Arc<dyn ExchangeAdapter>>,
    reports: RwLock<HashMap<Platform, ExchangeReport>>,
}

impl ExchangeRegistry {
    pub fn new(adapters: Vec<Arc<dyn ExchangeAdapter>>) -> Self {
        let reports = adapters
            .iter()
            .map(|a| (a.platform(), ExchangeReport::unchecked(a.platform(), a.is_configured())))
            .collect();
        Self {
            adapters,
            reports: RwLock::new(reports),
        }
    }

    /// One adapter per supported exchange; unconfigured ones stay public-only
    pub fn from_config(config: &SentinelConfig) -> Self {
        let adapters: Vec<Arc<dyn ExchangeAdapter>> = vec![
            Arc::new(BingXAdapter::new(config.credentials_for(Platform::BingX))),
            Arc::new(KrakenAdapter::new(config.credentials_for(Platform::Kraken))),
            Arc::new(BlofinAdapter::new(config.credentials_for(Platform::Blofin))),
            Arc::new(KuCoinAdapter::new(config.credentials_for(Platform::KuCoin))),
        ];
        Self::new(adapters)
    }

    pub fn adapters(&self) -> &[Arc<dyn ExchangeAdapter>] {
        &self.adapters
    }

    pub fn adapter(&self, platform: Platform) -> Option<Arc<dyn ExchangeAdapter>> {
        self.adapters.iter().find(|a| a.platform() == platform).cloned()
    }

    pub fn record(&self, report: ExchangeReport) {
        self.reports.write().insert(report.platform, report);
    }

    /// Reports in `Platform::ALL` order
    pub fn status(&self) -> Vec<ExchangeReport> {
        let reports = self.reports.read();
        Platform::ALL
            .iter()
            .filter_map(|p| reports.get(p).cloned())
            .collect()
    }
}

pub struct PortfolioService {
    registry: Arc<ExchangeRegistry>,
    /// Tried in order; later sources only fill symbols earlier ones missed
    price_sources: Vec<Arc<dyn PriceSource>>,
    normalizer: NormalizerPolicy,
    risk: RiskPolicy,
}

impl PortfolioService {
    pub fn new(
        registry: Arc<ExchangeRegistry>,
        price_sources: Vec<Arc<dyn PriceSource>>,
        normalizer: NormalizerPolicy,
        risk: RiskPolicy,
    ) -> Self {
        Self {
            registry,
            price_sources,
            normalizer,
            risk,
        }
    }

    /// CoinGecko first, then Binance spot tickers
    pub fn from_config(config: &SentinelConfig, registry: Arc<ExchangeRegistry>) -> Self {
        Self::new(
            registry,
            vec![Arc::new(CoinGeckoClient::new()), Arc::new(BinanceClient::new())],
            config.normalizer.clone(),
            config.risk.clone(),
        )
    }

    pub fn registry(&self) -> &Arc<ExchangeRegistry> {
        &self.registry
    }

    pub fn risk_policy(&self) -> &RiskPolicy {
        &self.risk
    }

    /// Poll every configured exchange and merge the results
    pub async fn collect(&self) -> PortfolioSnapshot {
        let mut positions = Vec::new();
        let mut reports = Vec::new();

        for adapter in self.registry.adapters() {
            let platform = adapter.platform();
            let mut report = ExchangeReport::unchecked(platform, adapter.is_configured());

            if adapter.is_configured() {
                match self.collect_exchange(adapter.as_ref()).await {
                    Ok((exchange_positions, orders)) => {
                        info!(exchange = %platform, positions = exchange_positions.len(), "Exchange collected");
                        report.positions = exchange_positions.len();
                        report.orders = orders;
                        positions.extend(exchange_positions);
                    }
                    Err(e) => {
                        warn!(exchange = %platform, error = %e, "Exchange collection failed");
                        report.status = ExchangeStatus::ApiError;
                        report.error = Some(e.to_string());
                    }
                }
            } else {
                debug!(exchange = %platform, "Skipping unconfigured exchange");
            }

            self.registry.record(report.clone());
            reports.push(report);
        }

        PortfolioSnapshot {
            positions,
            reports,
            generated_at: Utc::now(),
        }
    }

    /// Normalized and annotated positions for a single exchange
    pub async fn collect_exchange(
        &self,
        adapter: &dyn ExchangeAdapter,
    ) -> ExchangeResult<(Vec<NormalizedPosition>, OrderSummary)> {
        let platform = adapter.platform();
        if !adapter.is_configured() {
            return Err(ExchangeError::not_configured(platform));
        }

        let mut positions = if platform.is_spot() {
            let balance = adapter.get_balance().await?;
            let fills = adapter.get_trade_history().await.unwrap_or_else(|e| {
                warn!(exchange = %platform, error = %e, "Trade history unavailable, entries unknown");
                Vec::new()
            });
            let symbols = spot_symbols(&balance, &self.normalizer);
            let prices = self.spot_prices(adapter, &symbols).await;
            normalize_spot_balances(platform, &balance, &fills, &prices, &self.normalizer, &self.risk)
        } else {
            let raws = adapter.get_positions().await?;
            normalize_positions(platform, &raws, &self.risk)
        };

        // Positions without order data are reported unprotected
        let orders = adapter.get_orders().await.unwrap_or_else(|e| {
            warn!(exchange = %platform, error = %e, "Open orders unavailable");
            Vec::new()
        });
        annotate_positions(&mut positions, &orders, &self.risk);

        Ok((positions, summarize_orders(&orders)))
    }

    /// Price sources in order, then the exchange's own ticker
    async fn spot_prices(&self, adapter: &dyn ExchangeAdapter, symbols: &[String]) -> HashMap<String, Decimal> {
        let mut prices: HashMap<String, Decimal> = HashMap::new();

        for source in &self.price_sources {
            let missing = missing_symbols(symbols, &prices);
            if missing.is_empty() {
                break;
            }
            for (symbol, price) in source.usd_prices_for(&missing).await {
                if price > Decimal::ZERO {
                    prices.entry(symbol).or_insert(price);
                }
            }
        }

        for symbol in missing_symbols(symbols, &prices) {
            match adapter.get_ticker(&symbol).await {
                Ok(t) if t.last > Decimal::ZERO => {
                    prices.insert(symbol, t.last);
                }
                Ok(_) => {}
                Err(e) => debug!(symbol = %symbol, error = %e, "No price for spot asset"),
            }
        }

        prices
    }
}

fn missing_symbols(symbols: &[String], prices: &HashMap<String, Decimal>) -> Vec<String> {
    symbols
        .iter()
        .filter(|s| !prices.contains_key(s.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetBalance, Balance, RawOrder, RawPosition, RiskTier, Ticker};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct StubAdapter {
        platform: Platform,
        configured: bool,
        fail_positions: bool,
    }

    #[async_trait]
    impl ExchangeAdapter for StubAdapter {
        fn platform(&self) -> Platform {
            self.platform
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
            Ok(Ticker {
                symbol: symbol.into(),
                last: if symbol == "DOT" { dec!(7) } else { dec!(0) },
                ..Default::default()
            })
        }

        async fn get_balance(&self) -> ExchangeResult<Balance> {
            Ok(Balance {
                assets: vec![
                    AssetBalance { asset: "XXBT".into(), free: dec!(0.5), locked: dec!(0) },
                    AssetBalance { asset: "DOT".into(), free: dec!(10), locked: dec!(0) },
                    AssetBalance { asset: "ZUSD".into(), free: dec!(1000), locked: dec!(0) },
                ],
                total_usd: None,
            })
        }

        async fn get_positions(&self) -> ExchangeResult<Vec<RawPosition>> {
            if self.fail_positions {
                return Err(ExchangeError::api(
                    self.platform,
                    crate::error::ApiErrorKind::Authentication,
                    "bad signature",
                ));
            }
            Ok(vec![RawPosition {
                symbol: "ETH-USDT".into(),
                side: Some("LONG".into()),
                quantity: dec!(2),
                entry_price: Some(dec!(2000)),
                mark_price: Some(dec!(2200)),
                unrealized_pnl: Some(dec!(400)),
                notional: Some(dec!(4400)),
                leverage: Some(dec!(5)),
            }])
        }

        async fn get_orders(&self) -> ExchangeResult<Vec<RawOrder>> {
            Ok(vec![RawOrder {
                symbol: "ETH-USDT".into(),
                order_type: Some("STOP_MARKET".into()),
                status: Some("NEW".into()),
                trigger_price: Some(dec!(1800)),
                ..Default::default()
            }])
        }
    }

    struct FixedPrices;

    #[async_trait]
    impl PriceSource for FixedPrices {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn usd_price(&self, symbol: &str) -> anyhow::Result<Option<Decimal>> {
            Ok((symbol == "BTC").then_some(dec!(60000)))
        }
    }

    fn service(adapters: Vec<Arc<dyn ExchangeAdapter>>) -> PortfolioService {
        PortfolioService::new(
            Arc::new(ExchangeRegistry::new(adapters)),
            vec![Arc::new(FixedPrices)],
            NormalizerPolicy::default(),
            RiskPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_collect_merges_and_fails_open() {
        let svc = service(vec![
            Arc::new(StubAdapter { platform: Platform::BingX, configured: true, fail_positions: false }),
            Arc::new(StubAdapter { platform: Platform::Blofin, configured: true, fail_positions: true }),
            Arc::new(StubAdapter { platform: Platform::KuCoin, configured: false, fail_positions: false }),
        ]);

        let snapshot = svc.collect().await;
        assert_eq!(snapshot.positions.len(), 1);

        let eth = &snapshot.positions[0];
        assert_eq!(eth.symbol, "ETH");
        assert!(eth.has_stop_loss());
        assert_eq!(eth.stop_loss_price, Some(dec!(1800)));
        assert_eq!(eth.risk_tier(), RiskTier::Medium);

        let status = svc.registry().status();
        assert_eq!(status[0].status, ExchangeStatus::Connected);
        assert_eq!(status[0].orders.stop_loss, 1);
        assert_eq!(status[1].status, ExchangeStatus::ApiError);
        assert!(status[1].error.as_deref().unwrap_or("").contains("bad signature"));
        assert_eq!(status[2].status, ExchangeStatus::PublicOnly);
    }

    #[tokio::test]
    async fn test_spot_valuation_with_ticker_fallback() {
        let svc = service(vec![Arc::new(StubAdapter {
            platform: Platform::Kraken,
            configured: true,
            fail_positions: false,
        })]);

        let snapshot = svc.collect().await;
        let by_symbol: HashMap<_, _> = snapshot
            .positions
            .iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();

        assert_eq!(snapshot.positions.len(), 2);
        assert_eq!(by_symbol["BTC"].margin_usd(), dec!(30000));
        assert_eq!(by_symbol["DOT"].mark_price, dec!(7));
        assert_eq!(by_symbol["DOT"].margin_usd(), dec!(70));
    }

    #[tokio::test]
    async fn test_collect_exchange_requires_credentials() {
        let svc = service(vec![]);
        let adapter = StubAdapter { platform: Platform::BingX, configured: false, fail_positions: false };
        let err = svc.collect_exchange(&adapter).await.unwrap_err();
        assert!(err.is_recoverable());
    }
}
