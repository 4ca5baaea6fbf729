//! Position alert rules
//!
//! Each poll cycle every normalized position is checked against fixed
//! thresholds. RSI comes from an [`RsiSource`]; when it fails, a value is
//! simulated from PnL so a run never stalls on market data.

use crate::indicators::{RsiSource, NEUTRAL_RSI};
use crate::types::{NormalizedPosition, Platform, PositionSide};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub overbought_rsi: f64,
    pub overbought_strong_rsi: f64,
    pub overbought_extreme_rsi: f64,
    pub oversold_rsi: f64,
    pub oversold_strong_rsi: f64,
    pub oversold_extreme_rsi: f64,
    /// Losing trade below this PnL %
    pub losing_pct: Decimal,
    pub losing_severe_pct: Decimal,
    pub losing_critical_pct: Decimal,
    /// Unprotected positions above this margin get a no-stop-loss alert
    pub no_stop_loss_margin: Decimal,
    pub high_profit_pct: Decimal,
    pub high_profit_strong_pct: Decimal,
    pub high_profit_excellent_pct: Decimal,
    pub high_profit_massive_pct: Decimal,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            overbought_rsi: 72.0,
            overbought_strong_rsi: 78.0,
            overbought_extreme_rsi: 85.0,
            oversold_rsi: 28.0,
            oversold_strong_rsi: 22.0,
            oversold_extreme_rsi: 15.0,
            losing_pct: dec!(-8),
            losing_severe_pct: dec!(-15),
            losing_critical_pct: dec!(-25),
            no_stop_loss_margin: dec!(150),
            high_profit_pct: dec!(35),
            high_profit_strong_pct: dec!(50),
            high_profit_excellent_pct: dec!(75),
            high_profit_massive_pct: dec!(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Overbought,
    Oversold,
    LosingTrade,
    NoStopLoss,
    HighProfit,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Overbought => "overbought",
            AlertKind::Oversold => "oversold",
            AlertKind::LosingTrade => "losing_trade",
            AlertKind::NoStopLoss => "no_stop_loss",
            AlertKind::HighProfit => "high_profit",
        }
    }

    fn summary_label(&self) -> &'static str {
        match self {
            AlertKind::Overbought => "Overbought",
            AlertKind::Oversold => "Oversold",
            AlertKind::LosingTrade => "Losing",
            AlertKind::NoStopLoss => "No SL",
            AlertKind::HighProfit => "High Profit",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Moderate,
    Medium,
    Good,
    Strong,
    High,
    Severe,
    Excellent,
    Extreme,
    Critical,
    Massive,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Moderate => "MODERATE",
            Severity::Medium => "MEDIUM",
            Severity::Good => "GOOD",
            Severity::Strong => "STRONG",
            Severity::High => "HIGH",
            Severity::Severe => "SEVERE",
            Severity::Excellent => "EXCELLENT",
            Severity::Extreme => "EXTREME",
            Severity::Critical => "CRITICAL",
            Severity::Massive => "MASSIVE",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub symbol: String,
    pub platform: Platform,
    pub message: String,
    pub rsi: Option<f64>,
    pub pnl_pct: Decimal,
    pub margin_usd: Decimal,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
}

/// RSI guess from PnL when no market data is available
pub fn simulated_rsi(pnl_pct: f64) -> f64 {
    if !pnl_pct.is_finite() {
        return NEUTRAL_RSI;
    }
    if pnl_pct > 25.0 {
        (50.0 + pnl_pct * 1.2).min(85.0)
    } else if pnl_pct < -15.0 {
        (50.0 + pnl_pct * 1.8).max(15.0)
    } else {
        50.0 + pnl_pct * 0.6
    }
}

pub struct AlertAnalyzer {
    thresholds: AlertThresholds,
}

impl Default for AlertAnalyzer {
    fn default() -> Self {
        Self::new(AlertThresholds::default())
    }
}

impl AlertAnalyzer {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Resolve RSI per position, then apply every rule
    pub async fn analyze(&self, positions: &[NormalizedPosition], rsi_source: &dyn RsiSource) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for pos in positions {
            let pnl = pos.unrealized_pnl_pct().to_f64().unwrap_or(0.0);
            let rsi = match rsi_source.rsi(&pos.symbol).await {
                Ok(v) => v,
                Err(e) => {
                    let simulated = simulated_rsi(pnl);
                    debug!(symbol = %pos.symbol, error = %e, rsi = simulated, "Using simulated RSI");
                    simulated
                }
            };
            alerts.extend(self.evaluate(pos, rsi, Utc::now()));
        }
        info!(positions = positions.len(), alerts = alerts.len(), "Position analysis complete");
        alerts
    }

    /// All alerts one position triggers at the given RSI
    pub fn evaluate(&self, pos: &NormalizedPosition, rsi: f64, now: DateTime<Utc>) -> Vec<Alert> {
        let t = &self.thresholds;
        let pnl = pos.unrealized_pnl_pct();
        let margin = pos.margin_usd();
        let mut alerts = Vec::new();

        let alert = |kind: AlertKind, severity: Severity, rsi: Option<f64>, message: String| Alert {
            kind,
            symbol: pos.symbol.clone(),
            platform: pos.platform,
            message,
            rsi,
            pnl_pct: pnl,
            margin_usd: margin,
            severity,
            created_at: now,
        };

        if rsi > t.overbought_rsi {
            let (severity, action) = if rsi > t.overbought_extreme_rsi {
                (Severity::Extreme, "Exit most of the position, trail a stop on the remainder")
            } else if rsi > t.overbought_strong_rsi {
                (Severity::Strong, "Take partial profits and move the stop to break-even")
            } else {
                (Severity::Moderate, "Tighten stops and consider partial profit-taking")
            };
            alerts.push(alert(
                AlertKind::Overbought,
                severity,
                Some(rsi),
                format!(
                    "**${} Overbought** (RSI {:.1}, {})\nPnL **{:+.1}%** | Size ${:.0}\nAction: {}",
                    pos.symbol, rsi, severity, pnl, margin, action
                ),
            ));
        } else if rsi < t.oversold_rsi {
            let (severity, action) = if rsi < t.oversold_extreme_rsi {
                (Severity::Extreme, "High-probability bounce zone, add only with a tight stop")
            } else if rsi < t.oversold_strong_rsi {
                (Severity::Strong, "Wait for a volume spike and the first green candle")
            } else {
                (Severity::Moderate, "Watch for bullish divergence or a support hold")
            };
            alerts.push(alert(
                AlertKind::Oversold,
                severity,
                Some(rsi),
                format!(
                    "**${} Oversold** (RSI {:.1}, {})\nPnL **{:+.1}%** | Entry ${}\nStrategy: {}",
                    pos.symbol, rsi, severity, pnl, pos.entry_price, action
                ),
            ));
        }

        if pnl < t.losing_pct {
            let (severity, suggestion) = if pnl > t.losing_severe_pct {
                (Severity::Moderate, "Set a stop near -12%; add only on strong support")
            } else if pnl > t.losing_critical_pct {
                (Severity::Severe, "Set a tight stop at the current level or cut at -20%")
            } else {
                (Severity::Critical, "Consider cutting the loss now; risk/reward is heavily skewed")
            };
            alerts.push(alert(
                AlertKind::LosingTrade,
                severity,
                None,
                format!(
                    "**${} Loss** (${:.0})\nDown **{:.1}%** | Severity **{}**\nStrategy: {}\nEntry ${} | Mark ${}",
                    pos.symbol, margin, pnl, severity, suggestion, pos.entry_price, pos.mark_price
                ),
            ));
        }

        if margin > t.no_stop_loss_margin && !pos.has_stop_loss() && pos.side != PositionSide::Hodl {
            let severity = if margin > dec!(1000) {
                Severity::High
            } else if margin > dec!(500) {
                Severity::Medium
            } else {
                Severity::Moderate
            };
            let suggestion = if pnl > Decimal::ZERO {
                "Set a trailing stop at break-even or better to lock profits"
            } else if pnl > dec!(-5) {
                "Set a stop at -8% to limit downside"
            } else {
                "Set a stop immediately at -10% max"
            };
            alerts.push(alert(
                AlertKind::NoStopLoss,
                severity,
                None,
                format!(
                    "**${} No Stop Loss** (${:.0}) | Risk **{}**\nAction: {}\nPnL **{:+.1}%** | {} @ {}x",
                    pos.symbol, margin, severity, suggestion, pnl, pos.side, pos.leverage.round_dp(0)
                ),
            ));
        }

        if pnl > t.high_profit_pct {
            let (severity, action) = if pnl > t.high_profit_massive_pct {
                (Severity::Massive, "Take most profits, trail a stop on the rest")
            } else if pnl > t.high_profit_excellent_pct {
                (Severity::Excellent, "Take substantial profits and trail the remainder")
            } else if pnl > t.high_profit_strong_pct {
                (Severity::Strong, "Secure some profits while letting the winner run")
            } else {
                (Severity::Good, "Move the stop to break-even, consider partial profits")
            };
            let profit = (margin * pnl / dec!(100)).round_dp(0);
            alerts.push(alert(
                AlertKind::HighProfit,
                severity,
                None,
                format!(
                    "**${} Profit** (+{:.1}%, {})\nUnrealized ${} on ${:.0}\nAction: {}",
                    pos.symbol, pnl, severity, profit, margin, action
                ),
            ));
        }

        alerts
    }
}

/// Per-cycle bundle written to `latest_alerts.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertBatch {
    pub timestamp: DateTime<Utc>,
    pub total_alerts: usize,
    pub alert_types: BTreeMap<AlertKind, usize>,
    pub alerts: Vec<Alert>,
    pub summary_parts: Vec<String>,
}

impl AlertBatch {
    /// `None` when there is nothing to report
    pub fn prepare(alerts: Vec<Alert>) -> Option<Self> {
        if alerts.is_empty() {
            return None;
        }
        let mut alert_types: BTreeMap<AlertKind, usize> = BTreeMap::new();
        for a in &alerts {
            *alert_types.entry(a.kind).or_default() += 1;
        }
        let summary_parts = alert_types
            .iter()
            .map(|(kind, count)| format!("{}: {}", kind.summary_label(), count))
            .collect();
        Some(Self {
            timestamp: Utc::now(),
            total_alerts: alerts.len(),
            alert_types,
            alerts,
            summary_parts,
        })
    }

    /// Discord message: summary line followed by each alert
    pub fn render(&self) -> String {
        let mut out = format!(
            "**Portfolio Alerts** ({}) | {}\n",
            self.timestamp.format("%Y-%m-%d %H:%M UTC"),
            self.summary_parts.join(" | ")
        );
        for alert in &self.alerts {
            out.push('\n');
            out.push_str(&alert.message);
            out.push('\n');
        }
        out
    }
}
