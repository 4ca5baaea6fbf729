//! Conditional-order matcher: flags stop-loss / take-profit coverage per
//! position and derives the risk tier.
//!
//! Order types are matched against a fixed vocabulary. Orders with a trigger
//! price but an unrecognized type go through a free-text fallback which is
//! best-effort only: it can mislabel a take-profit as a stop-loss and the
//! result must be confirmed per exchange. Such matches are tagged `inferred`.

use crate::normalizer::strip_symbol;
use crate::types::{NormalizedPosition, RawOrder, RiskTier};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

const STOP_LOSS_TYPES: &[&str] = &[
    "STOP",
    "STOP_MARKET",
    "STOP_LOSS",
    "STOP_LIMIT",
    "STOP_LOSS_LIMIT",
    "SL",
];
const TAKE_PROFIT_TYPES: &[&str] = &[
    "TAKE_PROFIT",
    "TAKE_PROFIT_MARKET",
    "TAKE_PROFIT_LIMIT",
    "TP",
];
const INACTIVE_STATUSES: &[&str] = &["FILLED", "CANCELLED", "CANCELED", "EXPIRED", "REJECTED"];

#[derive(Debug, Clone)]
pub struct RiskPolicy {
    /// Unprotected positions above this USD size are HIGH risk
    pub high_margin_usd: Decimal,
    /// Unprotected positions losing more than this percentage are HIGH risk
    pub max_loss_pct: Decimal,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            high_margin_usd: dec!(1000),
            max_loss_pct: dec!(10),
        }
    }
}

/// Pure risk tier derivation.
///
/// - SL and TP: LOW
/// - exactly one: MEDIUM
/// - neither, and margin above the limit or loss beyond the limit: HIGH
/// - otherwise MEDIUM
pub fn derive_risk_tier(
    margin_usd: Decimal,
    has_stop_loss: bool,
    has_take_profit: bool,
    unrealized_pnl_pct: Decimal,
    policy: &RiskPolicy,
) -> RiskTier {
    match (has_stop_loss, has_take_profit) {
        (true, true) => RiskTier::Low,
        (true, false) | (false, true) => RiskTier::Medium,
        (false, false) => {
            if margin_usd > policy.high_margin_usd || unrealized_pnl_pct < -policy.max_loss_pct {
                RiskTier::High
            } else {
                RiskTier::Medium
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderClass {
    StopLoss,
    TakeProfit,
    Trailing,
    Regular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub class: OrderClass,
    /// Set when the class came from the free-text fallback
    pub inferred: bool,
}

impl Classification {
    fn exact(class: OrderClass) -> Self {
        Self { class, inferred: false }
    }

    fn inferred(class: OrderClass) -> Self {
        Self { class, inferred: true }
    }
}

/// Whether an order can still trigger
pub fn is_active(order: &RawOrder) -> bool {
    match order.status.as_deref() {
        Some(status) => !INACTIVE_STATUSES.contains(&status.trim().to_uppercase().as_str()),
        None => true,
    }
}

pub fn classify_order(order: &RawOrder) -> Classification {
    let order_type = order
        .order_type
        .as_deref()
        .unwrap_or_default()
        .trim()
        .to_uppercase()
        .replace(['-', ' '], "_");

    if STOP_LOSS_TYPES.contains(&order_type.as_str()) {
        return Classification::exact(OrderClass::StopLoss);
    }
    if TAKE_PROFIT_TYPES.contains(&order_type.as_str()) {
        return Classification::exact(OrderClass::TakeProfit);
    }
    if order_type.starts_with("TRAILING") {
        return Classification::exact(OrderClass::Trailing);
    }

    let free_text = format!("{} {}", order_type, order.description.to_uppercase());
    let looks_conditional = order.trigger_price.is_some()
        || free_text.contains("STOP")
        || free_text.contains("TRIGGER");

    if looks_conditional {
        if free_text.contains("PROFIT") {
            Classification::inferred(OrderClass::TakeProfit)
        } else {
            Classification::inferred(OrderClass::StopLoss)
        }
    } else {
        Classification::exact(OrderClass::Regular)
    }
}

/// Per-class counts over a list of orders
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderSummary {
    pub total: usize,
    pub active: usize,
    pub stop_loss: usize,
    pub take_profit: usize,
    pub trailing: usize,
    pub inferred: usize,
}

pub fn summarize_orders(orders: &[RawOrder]) -> OrderSummary {
    let mut summary = OrderSummary {
        total: orders.len(),
        ..Default::default()
    };
    for order in orders.iter().filter(|o| is_active(o)) {
        summary.active += 1;
        let c = classify_order(order);
        match c.class {
            OrderClass::StopLoss => summary.stop_loss += 1,
            OrderClass::TakeProfit => summary.take_profit += 1,
            OrderClass::Trailing => summary.trailing += 1,
            OrderClass::Regular => {}
        }
        if c.inferred {
            summary.inferred += 1;
        }
    }
    summary
}

/// Annotate positions with SL/TP coverage from orders on the same exchange.
/// A trailing stop counts as stop-loss coverage.
pub fn annotate_positions(
    positions: &mut [NormalizedPosition],
    orders: &[RawOrder],
    policy: &RiskPolicy,
) {
    for pos in positions.iter_mut() {
        let mut has_sl = false;
        let mut has_tp = false;
        let mut inferred = false;

        for order in orders
            .iter()
            .filter(|o| is_active(o) && strip_symbol(&o.symbol) == pos.symbol)
        {
            let c = classify_order(order);
            let level = order.trigger_price.or(order.price);
            match c.class {
                OrderClass::StopLoss | OrderClass::Trailing => {
                    has_sl = true;
                    pos.stop_loss_price = pos.stop_loss_price.or(level);
                }
                OrderClass::TakeProfit => {
                    has_tp = true;
                    pos.take_profit_price = pos.take_profit_price.or(level);
                }
                OrderClass::Regular => continue,
            }
            inferred |= c.inferred;
        }

        pos.protection_inferred = inferred;
        pos.set_protection(has_sl, has_tp, policy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize_positions;
    use crate::types::{Platform, RawPosition};

    fn order(symbol: &str, order_type: &str) -> RawOrder {
        RawOrder {
            symbol: symbol.into(),
            order_type: Some(order_type.into()),
            status: Some("NEW".into()),
            trigger_price: Some(dec!(45000)),
            ..Default::default()
        }
    }

    fn btc_position() -> Vec<NormalizedPosition> {
        let raw = RawPosition {
            symbol: "BTC-USDT".into(),
            side: Some("LONG".into()),
            quantity: dec!(0.1),
            entry_price: Some(dec!(50000)),
            mark_price: Some(dec!(55000)),
            unrealized_pnl: Some(dec!(500)),
            notional: Some(dec!(5000)),
            leverage: Some(dec!(10)),
        };
        normalize_positions(Platform::BingX, &[raw], &RiskPolicy::default())
    }

    #[test]
    fn test_risk_tier_table() {
        let p = RiskPolicy::default();
        assert_eq!(derive_risk_tier(dec!(5000), true, true, dec!(-50), &p), RiskTier::Low);
        assert_eq!(derive_risk_tier(dec!(5000), true, false, dec!(0), &p), RiskTier::Medium);
        assert_eq!(derive_risk_tier(dec!(5000), false, true, dec!(0), &p), RiskTier::Medium);
        assert_eq!(derive_risk_tier(dec!(1001), false, false, dec!(0), &p), RiskTier::High);
        assert_eq!(derive_risk_tier(dec!(100), false, false, dec!(-10.5), &p), RiskTier::High);
        assert_eq!(derive_risk_tier(dec!(100), false, false, dec!(-3), &p), RiskTier::Medium);
    }

    #[test]
    fn test_risk_tier_boundaries_are_strict() {
        let p = RiskPolicy::default();
        assert_eq!(derive_risk_tier(dec!(1000), false, false, dec!(-10), &p), RiskTier::Medium);
    }

    #[test]
    fn test_vocabulary_case_insensitive() {
        assert_eq!(classify_order(&order("BTC", "stop_market")).class, OrderClass::StopLoss);
        assert_eq!(classify_order(&order("BTC", "Take_Profit_Market")).class, OrderClass::TakeProfit);
        assert_eq!(classify_order(&order("BTC", "stop-loss")).class, OrderClass::StopLoss);
        assert_eq!(classify_order(&order("BTC", "take-profit-limit")).class, OrderClass::TakeProfit);
        assert_eq!(classify_order(&order("BTC", "TRAILING_STOP_MARKET")).class, OrderClass::Trailing);
        assert!(!classify_order(&order("BTC", "STOP")).inferred);
    }

    #[test]
    fn test_fallback_is_flagged_as_inferred() {
        let mut o = order("BTC", "CONDITIONAL");
        o.description = "clientOrderId=tp-ladder-1 PROFIT".into();
        let c = classify_order(&o);
        assert_eq!(c.class, OrderClass::TakeProfit);
        assert!(c.inferred);

        let mut o = order("BTC", "CONDITIONAL");
        o.description = "bracket".into();
        let c = classify_order(&o);
        assert_eq!(c.class, OrderClass::StopLoss);
        assert!(c.inferred);
    }

    #[test]
    fn test_plain_limit_order_is_regular() {
        let o = RawOrder {
            symbol: "BTC-USDT".into(),
            order_type: Some("LIMIT".into()),
            price: Some(dec!(40000)),
            ..Default::default()
        };
        assert_eq!(classify_order(&o), Classification::exact(OrderClass::Regular));
    }

    #[test]
    fn test_both_orders_make_low_risk() {
        let mut positions = btc_position();
        let orders = vec![order("BTC-USDT", "STOP_MARKET"), order("BTC-USDT", "TAKE_PROFIT_MARKET")];
        annotate_positions(&mut positions, &orders, &RiskPolicy::default());

        let pos = &positions[0];
        assert!(pos.has_stop_loss());
        assert!(pos.has_take_profit());
        assert_eq!(pos.risk_tier(), RiskTier::Low);
        assert_eq!(pos.stop_loss_price, Some(dec!(45000)));
        assert!(!pos.protection_inferred);
    }

    #[test]
    fn test_no_orders_large_margin_is_high_risk() {
        let mut positions = btc_position();
        annotate_positions(&mut positions, &[], &RiskPolicy::default());
        assert!(!positions[0].has_stop_loss());
        assert_eq!(positions[0].risk_tier(), RiskTier::High);
    }

    #[test]
    fn test_orders_for_other_symbols_and_inactive_ignored() {
        let mut positions = btc_position();
        let mut filled = order("BTC-USDT", "TAKE_PROFIT");
        filled.status = Some("FILLED".into());
        let orders = vec![order("ETH-USDT", "STOP_MARKET"), filled];
        annotate_positions(&mut positions, &orders, &RiskPolicy::default());
        assert!(!positions[0].has_stop_loss());
        assert!(!positions[0].has_take_profit());
    }

    #[test]
    fn test_summary_counts() {
        let mut cancelled = order("BTC", "STOP");
        cancelled.status = Some("canceled".into());
        let mut guessed = order("BTC", "UNKNOWN");
        guessed.description = "trigger".into();
        let orders = vec![
            order("BTC", "STOP"),
            order("BTC", "TAKE_PROFIT"),
            order("BTC", "TRAILING_TP_SL"),
            cancelled,
            guessed,
        ];
        let s = summarize_orders(&orders);
        assert_eq!(s.total, 5);
        assert_eq!(s.active, 4);
        assert_eq!(s.stop_loss, 2);
        assert_eq!(s.take_profit, 1);
        assert_eq!(s.trailing, 1);
        assert_eq!(s.inferred, 1);
    }
}
