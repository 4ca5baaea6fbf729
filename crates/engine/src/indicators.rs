//! Local technical indicators and RSI sources
//!
//! Indicators are computed with the `ta` crate over klines from the Binance
//! public API. `RsiSource` implementations are chained so a failing upstream
//! falls through to the next one; callers substitute a simulated value when
//! every source fails.

use crate::api::binance::BinanceClient;
use crate::types::Kline;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use ta::indicators::{
    BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex,
};
use ta::Next;
use tracing::debug;

/// Fewer bars than this and EMA50 is meaningless
pub const MIN_BARS: usize = 50;
pub const RSI_PERIOD: usize = 14;
pub const NEUTRAL_RSI: f64 = 50.0;
/// Upper bound of the technical sub-score
pub const MAX_TECHNICAL_SCORE: f64 = 40.0;

fn close_f64(kline: &Kline) -> f64 {
    kline.close.to_f64().unwrap_or(0.0)
}

/// Last values of each indicator over a kline series
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub ema20: f64,
    pub ema50: f64,
    pub current_price: f64,
}

/// Run RSI14, MACD(12,26,9), BB(20,2) and EMA20/50 over `klines`
pub fn compute_indicators(klines: &[Kline]) -> Option<IndicatorSnapshot> {
    if klines.len() < MIN_BARS {
        return None;
    }

    let mut rsi = RelativeStrengthIndex::new(RSI_PERIOD).ok()?;
    let mut macd = MovingAverageConvergenceDivergence::new(12, 26, 9).ok()?;
    let mut bb = BollingerBands::new(20, 2.0).ok()?;
    let mut ema20 = ExponentialMovingAverage::new(20).ok()?;
    let mut ema50 = ExponentialMovingAverage::new(50).ok()?;

    let mut snap = IndicatorSnapshot {
        rsi: NEUTRAL_RSI,
        macd: 0.0,
        macd_signal: 0.0,
        macd_histogram: 0.0,
        bb_upper: 0.0,
        bb_middle: 0.0,
        bb_lower: 0.0,
        ema20: 0.0,
        ema50: 0.0,
        current_price: 0.0,
    };

    for kline in klines {
        let close = close_f64(kline);
        snap.rsi = rsi.next(close);
        let m = macd.next(close);
        snap.macd = m.macd;
        snap.macd_signal = m.signal;
        snap.macd_histogram = m.histogram;
        let b = bb.next(close);
        snap.bb_upper = b.upper;
        snap.bb_middle = b.average;
        snap.bb_lower = b.lower;
        snap.ema20 = ema20.next(close);
        snap.ema50 = ema50.next(close);
        snap.current_price = close;
    }

    Some(snap)
}

/// RSI over the full series, `None` when there are not enough bars
pub fn local_rsi(klines: &[Kline], period: usize) -> Option<f64> {
    if klines.len() <= period {
        return None;
    }
    let mut rsi = RelativeStrengthIndex::new(period).ok()?;
    klines.iter().map(|k| rsi.next(close_f64(k))).last()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RsiZone {
    OversoldBullish,
    AccumulationZone,
    Neutral,
    OverboughtBearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BandPosition {
    OversoldBounce,
    AboveMiddle,
    BelowMiddle,
    OverboughtRejection,
    Unknown,
}

/// Indicator readings turned into bullish signal points
#[derive(Debug, Clone, Serialize)]
pub struct TechnicalSignals {
    pub rsi_zone: RsiZone,
    pub macd_bullish: bool,
    pub band: BandPosition,
    pub uptrend: Option<bool>,
    pub bullish_signals: f64,
    pub technical_score: f64,
    pub indicators: IndicatorSnapshot,
}

pub fn process_signals(ind: &IndicatorSnapshot) -> TechnicalSignals {
    let mut points = 0.0;

    let rsi_zone = if ind.rsi < 30.0 {
        points += 1.0;
        RsiZone::OversoldBullish
    } else if ind.rsi < 45.0 {
        points += 0.5;
        RsiZone::AccumulationZone
    } else if ind.rsi > 70.0 {
        RsiZone::OverboughtBearish
    } else {
        RsiZone::Neutral
    };

    let macd_bullish = ind.macd_histogram > 0.0;
    if macd_bullish {
        points += 1.0;
    }

    let band = if ind.current_price > 0.0 && ind.bb_lower > 0.0 && ind.bb_upper > 0.0 {
        if ind.current_price <= ind.bb_lower {
            points += 1.0;
            BandPosition::OversoldBounce
        } else if ind.current_price >= ind.bb_upper {
            BandPosition::OverboughtRejection
        } else if ind.current_price > ind.bb_middle {
            points += 0.3;
            BandPosition::AboveMiddle
        } else {
            BandPosition::BelowMiddle
        }
    } else {
        BandPosition::Unknown
    };

    let uptrend = if ind.ema20 > 0.0 && ind.ema50 > 0.0 {
        let up = ind.ema20 > ind.ema50;
        if up {
            points += 1.0;
        }
        Some(up)
    } else {
        None
    };

    TechnicalSignals {
        rsi_zone,
        macd_bullish,
        band,
        uptrend,
        bullish_signals: points,
        technical_score: (points * 10.0).min(MAX_TECHNICAL_SCORE),
        indicators: *ind,
    }
}

/// Anything that can report a current RSI for a ticker
#[async_trait]
pub trait RsiSource: Send + Sync {
    fn name(&self) -> &str;

    async fn rsi(&self, symbol: &str) -> anyhow::Result<f64>;
}

/// Tries each source in order and returns the first success
pub struct RsiChain {
    sources: Vec<Box<dyn RsiSource>>,
}

impl RsiChain {
    pub fn new(sources: Vec<Box<dyn RsiSource>>) -> Self {
        Self { sources }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl RsiSource for RsiChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn rsi(&self, symbol: &str) -> anyhow::Result<f64> {
        let mut last_err = None;
        for source in &self.sources {
            match source.rsi(symbol).await {
                Ok(v) if v.is_finite() => {
                    debug!(symbol, source = source.name(), rsi = v, "RSI resolved");
                    return Ok(v);
                }
                Ok(v) => {
                    last_err = Some(anyhow::anyhow!("{} returned non-finite RSI {}", source.name(), v));
                }
                Err(e) => {
                    debug!(symbol, source = source.name(), error = %e, "RSI source failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no RSI sources configured")))
    }
}

/// Indicators computed locally from Binance klines
#[derive(Clone)]
pub struct LocalIndicators {
    binance: BinanceClient,
    rsi_interval: String,
    technical_interval: String,
}

impl Default for LocalIndicators {
    fn default() -> Self {
        Self::new(BinanceClient::new())
    }
}

impl LocalIndicators {
    pub fn new(binance: BinanceClient) -> Self {
        Self {
            binance,
            rsi_interval: "1h".into(),
            technical_interval: "4h".into(),
        }
    }

    fn pair(symbol: &str) -> String {
        format!("{}USDT", symbol.to_uppercase())
    }

    /// Technical sub-score inputs over the last 100 four-hour candles
    pub async fn technical_signals(&self, symbol: &str) -> anyhow::Result<TechnicalSignals> {
        let klines = self
            .binance
            .get_klines(&Self::pair(symbol), &self.technical_interval, Some(100))
            .await?;
        let snapshot = compute_indicators(&klines).ok_or_else(|| {
            anyhow::anyhow!("insufficient price data for {} ({} bars)", symbol, klines.len())
        })?;
        Ok(process_signals(&snapshot))
    }
}

#[async_trait]
impl RsiSource for LocalIndicators {
    fn name(&self) -> &str {
        "local"
    }

    async fn rsi(&self, symbol: &str) -> anyhow::Result<f64> {
        let klines = self
            .binance
            .get_klines(&Self::pair(symbol), &self.rsi_interval, Some(100))
            .await?;
        local_rsi(&klines, RSI_PERIOD)
            .ok_or_else(|| anyhow::anyhow!("insufficient klines for {} RSI", symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn klines_from(closes: impl IntoIterator<Item = i64>) -> Vec<Kline> {
        closes
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                let price = Decimal::from(c);
                Kline {
                    open_time: i as i64 * 60_000,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: Decimal::ONE,
                    close_time: i as i64 * 60_000 + 59_999,
                }
            })
            .collect()
    }

    fn snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            rsi: 50.0,
            macd: 0.0,
            macd_signal: 0.0,
            macd_histogram: 0.0,
            bb_upper: 110.0,
            bb_middle: 100.0,
            bb_lower: 90.0,
            ema20: 100.0,
            ema50: 101.0,
            current_price: 95.0,
        }
    }

    #[test]
    fn test_too_few_bars() {
        assert!(compute_indicators(&klines_from(1..40)).is_none());
        assert!(local_rsi(&klines_from(1..10), 14).is_none());
    }

    #[test]
    fn test_uptrend_indicators() {
        let snap = compute_indicators(&klines_from(100..180)).unwrap();
        assert!(snap.rsi > 70.0);
        assert!(snap.ema20 > snap.ema50);
        assert_eq!(snap.current_price, 179.0);
    }

    #[test]
    fn test_downtrend_rsi_is_low() {
        let rsi = local_rsi(&klines_from((100..160).rev()), 14).unwrap();
        assert!(rsi < 30.0);
    }

    #[test]
    fn test_neutral_snapshot_scores_zero() {
        let signals = process_signals(&snapshot());
        assert_eq!(signals.rsi_zone, RsiZone::Neutral);
        assert_eq!(signals.band, BandPosition::BelowMiddle);
        assert_eq!(signals.uptrend, Some(false));
        assert_eq!(signals.technical_score, 0.0);
    }

    #[test]
    fn test_all_bullish_caps_at_forty() {
        let mut ind = snapshot();
        ind.rsi = 25.0;
        ind.macd_histogram = 0.5;
        ind.current_price = 89.0;
        ind.ema20 = 102.0;
        let signals = process_signals(&ind);
        assert_eq!(signals.bullish_signals, 4.0);
        assert_eq!(signals.technical_score, MAX_TECHNICAL_SCORE);
    }

    #[test]
    fn test_partial_points() {
        let mut ind = snapshot();
        ind.rsi = 40.0;
        ind.current_price = 105.0;
        let signals = process_signals(&ind);
        assert_eq!(signals.rsi_zone, RsiZone::AccumulationZone);
        assert_eq!(signals.band, BandPosition::AboveMiddle);
        assert!((signals.technical_score - 8.0).abs() < 1e-9);
    }

    struct Fixed(anyhow::Result<f64>);

    #[async_trait]
    impl RsiSource for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn rsi(&self, _symbol: &str) -> anyhow::Result<f64> {
            match &self.0 {
                Ok(v) => Ok(*v),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            }
        }
    }

    #[tokio::test]
    async fn test_chain_falls_through() {
        let chain = RsiChain::new(vec![
            Box::new(Fixed(Err(anyhow::anyhow!("rate limited")))),
            Box::new(Fixed(Ok(f64::NAN))),
            Box::new(Fixed(Ok(64.0))),
        ]);
        assert_eq!(chain.rsi("SOL").await.unwrap(), 64.0);
    }

    #[tokio::test]
    async fn test_empty_chain_errors() {
        let chain = RsiChain::new(Vec::new());
        assert!(chain.rsi("SOL").await.is_err());
    }
}
