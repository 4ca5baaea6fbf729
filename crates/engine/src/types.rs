//! Exchange-neutral types shared by adapters, normalizer, matcher and alerts

use crate::matcher::{derive_risk_tier, RiskPolicy};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    BingX,
    Kraken,
    Blofin,
    KuCoin,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::BingX,
        Platform::Kraken,
        Platform::Blofin,
        Platform::KuCoin,
    ];

    /// Lowercase key used in URLs and env var names
    pub fn key(&self) -> &'static str {
        match self {
            Platform::BingX => "bingx",
            Platform::Kraken => "kraken",
            Platform::Blofin => "blofin",
            Platform::KuCoin => "kucoin",
        }
    }

    /// Spot exchanges report balances, not leveraged positions
    pub fn is_spot(&self) -> bool {
        matches!(self, Platform::Kraken | Platform::KuCoin)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::BingX => "BingX",
            Platform::Kraken => "Kraken",
            Platform::Blofin => "Blofin",
            Platform::KuCoin => "KuCoin",
        };
        f.write_str(name)
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown exchange '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
    /// Spot holding with no leverage or explicit entry record
    Hodl,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
            PositionSide::Hodl => "HODL",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskTier::Low => "LOW",
            RiskTier::Medium => "MEDIUM",
            RiskTier::High => "HIGH",
        })
    }
}

/// Position as reported by an exchange, before normalization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPosition {
    pub symbol: String,
    pub side: Option<String>,
    pub quantity: Decimal,
    pub entry_price: Option<Decimal>,
    pub mark_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub notional: Option<Decimal>,
    pub leverage: Option<Decimal>,
}

/// Open order as reported by an exchange
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOrder {
    pub symbol: String,
    pub order_type: Option<String>,
    pub status: Option<String>,
    pub side: Option<String>,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub working_type: Option<String>,
    /// Free-text fields of the order (client id, tags, raw type strings),
    /// used only by the fallback classifier
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl AssetBalance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub assets: Vec<AssetBalance>,
    /// Account equity in USD when the exchange reports it directly
    pub total_usd: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillSide {
    Buy,
    Sell,
}

/// Executed trade from account history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeFill {
    pub symbol: String,
    pub side: FillSide,
    pub amount: Decimal,
    pub price: Decimal,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub change_pct: Option<Decimal>,
}

/// A single candlestick (OHLCV)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

/// Canonical position record.
///
/// `unrealized_pnl_pct`, `margin_usd`, the protection flags and `risk_tier` are
/// private: they only change through methods that recompute the tier, so the
/// tier is always a function of its inputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedPosition {
    pub symbol: String,
    pub platform: Platform,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub leverage: Decimal,
    unrealized_pnl_pct: Decimal,
    margin_usd: Decimal,
    has_stop_loss: bool,
    has_take_profit: bool,
    risk_tier: RiskTier,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    /// True when a protection flag came from the free-text fallback classifier
    pub protection_inferred: bool,
}

/// Constructor input for [`NormalizedPosition`]
#[derive(Debug, Clone)]
pub struct PositionInit {
    pub symbol: String,
    pub platform: Platform,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub leverage: Decimal,
    pub unrealized_pnl_pct: Decimal,
    pub margin_usd: Decimal,
}

impl NormalizedPosition {
    pub fn new(init: PositionInit, policy: &RiskPolicy) -> Self {
        let mut pos = Self {
            symbol: init.symbol,
            platform: init.platform,
            side: init.side,
            quantity: init.quantity,
            entry_price: init.entry_price.max(Decimal::ZERO),
            mark_price: init.mark_price.max(Decimal::ZERO),
            leverage: init.leverage.max(Decimal::ONE),
            unrealized_pnl_pct: init.unrealized_pnl_pct,
            margin_usd: init.margin_usd.max(Decimal::ZERO),
            has_stop_loss: false,
            has_take_profit: false,
            risk_tier: RiskTier::Medium,
            stop_loss_price: None,
            take_profit_price: None,
            protection_inferred: false,
        };
        pos.recompute_risk(policy);
        pos
    }

    pub fn unrealized_pnl_pct(&self) -> Decimal {
        self.unrealized_pnl_pct
    }

    pub fn margin_usd(&self) -> Decimal {
        self.margin_usd
    }

    pub fn has_stop_loss(&self) -> bool {
        self.has_stop_loss
    }

    pub fn has_take_profit(&self) -> bool {
        self.has_take_profit
    }

    pub fn risk_tier(&self) -> RiskTier {
        self.risk_tier
    }

    pub fn set_protection(&mut self, has_stop_loss: bool, has_take_profit: bool, policy: &RiskPolicy) {
        self.has_stop_loss = has_stop_loss;
        self.has_take_profit = has_take_profit;
        self.recompute_risk(policy);
    }

    pub fn set_exposure(&mut self, unrealized_pnl_pct: Decimal, margin_usd: Decimal, policy: &RiskPolicy) {
        self.unrealized_pnl_pct = unrealized_pnl_pct;
        self.margin_usd = margin_usd.max(Decimal::ZERO);
        self.recompute_risk(policy);
    }

    pub fn recompute_risk(&mut self, policy: &RiskPolicy) {
        self.risk_tier = derive_risk_tier(
            self.margin_usd,
            self.has_stop_loss,
            self.has_take_profit,
            self.unrealized_pnl_pct,
            policy,
        );
    }

    /// Flat CSV row for the snapshot store
    pub fn to_row(&self) -> persistence::PositionRow {
        persistence::PositionRow {
            symbol: self.symbol.clone(),
            platform: self.platform.to_string(),
            side: self.side.to_string(),
            entry_price: self.entry_price,
            mark_price: self.mark_price,
            unrealized_pnl_pct: self.unrealized_pnl_pct.round_dp(2),
            margin_usd: self.margin_usd.round_dp(2),
            leverage: self.leverage,
            has_stop_loss: self.has_stop_loss,
            has_take_profit: self.has_take_profit,
            risk_tier: self.risk_tier.to_string(),
        }
    }

    pub fn to_history_record(&self, run_id: &str) -> persistence::repository::PositionHistoryRecord {
        persistence::repository::PositionHistoryRecord {
            id: None,
            run_id: run_id.to_string(),
            platform: self.platform.to_string(),
            symbol: self.symbol.clone(),
            side: self.side.to_string(),
            entry_price: self.entry_price.to_string(),
            mark_price: self.mark_price.to_string(),
            unrealized_pnl_pct: self.unrealized_pnl_pct.to_string(),
            margin_usd: self.margin_usd.to_string(),
            leverage: self.leverage.to_string(),
            has_stop_loss: self.has_stop_loss,
            has_take_profit: self.has_take_profit,
            risk_tier: self.risk_tier.to_string(),
            created_at: None,
        }
    }
}

/// Output of one aggregation pass over all exchanges
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSnapshot {
    pub positions: Vec<NormalizedPosition>,
    pub reports: Vec<crate::portfolio::ExchangeReport>,
    pub generated_at: DateTime<Utc>,
}

impl PortfolioSnapshot {
    pub fn total_margin(&self) -> Decimal {
        self.positions.iter().map(|p| p.margin_usd()).sum()
    }

    pub fn high_risk_count(&self) -> usize {
        self.positions
            .iter()
            .filter(|p| p.risk_tier() == RiskTier::High)
            .count()
    }
}
