//! Position normalizer: maps exchange-specific positions and spot balances
//! into [`NormalizedPosition`] records.

use crate::matcher::RiskPolicy;
use crate::types::{
    Balance, FillSide, NormalizedPosition, Platform, PositionInit, PositionSide, RawPosition,
    TradeFill,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Spot holdings at or below this amount are dust
pub const MIN_SPOT_AMOUNT: Decimal = dec!(0.001);

/// Stablecoins, fiat and fee credits never reported as positions
pub const DEFAULT_EXCLUDED_ASSETS: &[&str] = &[
    "USD", "USDT", "USDC", "BUSD", "DAI", "TUSD", "USDD", "FRAX", "USDE", "FDUSD", "PYUSD", "GUSD",
    "USDP", "LUSD", "EUR", "GBP", "CAD", "JPY", "AUD", "CHF", "KFEE",
];

/// Quote suffixes removed from concatenated pairs ("BTCUSDT" -> "BTC")
const QUOTE_SUFFIXES: &[&str] = &["USDT", "USDC", "PERP", "USD"];

/// Kraken legacy asset codes
const ASSET_ALIASES: &[(&str, &str)] = &[
    ("XXBT", "BTC"),
    ("XBT", "BTC"),
    ("XETH", "ETH"),
    ("XXRP", "XRP"),
    ("XLTC", "LTC"),
    ("XXLM", "XLM"),
    ("XXDG", "DOGE"),
    ("XDG", "DOGE"),
    ("XZEC", "ZEC"),
    ("XXMR", "XMR"),
    ("XETC", "ETC"),
    ("ZUSD", "USD"),
    ("ZEUR", "EUR"),
    ("ZGBP", "GBP"),
    ("ZCAD", "CAD"),
    ("ZJPY", "JPY"),
];

#[derive(Debug, Clone)]
pub struct NormalizerPolicy {
    pub min_spot_amount: Decimal,
    pub excluded_assets: BTreeSet<String>,
}

impl Default for NormalizerPolicy {
    fn default() -> Self {
        Self {
            min_spot_amount: MIN_SPOT_AMOUNT,
            excluded_assets: DEFAULT_EXCLUDED_ASSETS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl NormalizerPolicy {
    pub fn is_excluded(&self, symbol: &str) -> bool {
        self.excluded_assets.contains(&strip_symbol(symbol))
    }
}

/// Reduce any exchange symbol to its bare base ticker.
///
/// Handles `BTC/USDT:USDT`, `BTC-USDT`, `BTC_USDT`, `BTCUSDT`, `XXBT`, `SOL.F`.
/// Applied until a fixpoint, so it is idempotent.
pub fn strip_symbol(raw: &str) -> String {
    let mut current = raw.trim().to_uppercase();
    loop {
        let next = strip_once(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

fn strip_once(s: &str) -> String {
    // Settlement currency: "BTC/USDT:USDT"
    let s = s.split(':').next().unwrap_or(s);
    // Pair separators
    let s = s.split(['/', '-', '_']).find(|p| !p.is_empty()).unwrap_or(s);
    // Kraken staking/flex suffixes: "SOL.F", "DOT.S"
    let s = match s.split_once('.') {
        Some((base, suffix)) if !base.is_empty() && suffix.len() <= 2 => base,
        _ => s,
    };

    if let Some((_, canonical)) = ASSET_ALIASES.iter().find(|(alias, _)| *alias == s) {
        return canonical.to_string();
    }
    // "FDUSD" and friends are tickers, not pairs
    if DEFAULT_EXCLUDED_ASSETS.contains(&s) {
        return s.to_string();
    }

    for suffix in QUOTE_SUFFIXES {
        if let Some(base) = s.strip_suffix(suffix) {
            if base.len() >= 2 {
                return base.to_string();
            }
        }
    }

    s.to_string()
}

/// `unrealized_pnl / notional * 100`, or 0 when notional is zero
pub fn pnl_pct_from_notional(unrealized_pnl: Decimal, notional: Decimal) -> Decimal {
    if notional.is_zero() {
        return Decimal::ZERO;
    }
    unrealized_pnl / notional.abs() * dec!(100)
}

/// Price-based PnL %, signed for shorts. 0 when either price is unknown.
pub fn pnl_pct_from_prices(entry: Decimal, mark: Decimal, side: PositionSide) -> Decimal {
    if entry <= Decimal::ZERO || mark <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let pct = (mark - entry) / entry * dec!(100);
    match side {
        PositionSide::Short => -pct,
        PositionSide::Long | PositionSide::Hodl => pct,
    }
}

fn parse_side(raw: &RawPosition) -> PositionSide {
    match raw.side.as_deref().map(|s| s.trim().to_uppercase()) {
        Some(s) if s == "LONG" || s == "BUY" => PositionSide::Long,
        Some(s) if s == "SHORT" || s == "SELL" => PositionSide::Short,
        _ if raw.quantity < Decimal::ZERO => PositionSide::Short,
        _ => PositionSide::Long,
    }
}

/// Merge multiple lots of the same symbol and side: quantities, notionals and
/// PnL are summed; entry becomes the quantity-weighted average.
pub fn merge_lots(raws: &[RawPosition]) -> Vec<RawPosition> {
    let mut merged: BTreeMap<(String, PositionSide), RawPosition> = BTreeMap::new();
    // Σ(|qty| * entry) and Σ|qty| with a known entry, per key
    let mut weights: HashMap<(String, PositionSide), (Decimal, Decimal)> = HashMap::new();

    for raw in raws {
        let key = (strip_symbol(&raw.symbol), parse_side(raw));
        let qty = raw.quantity.abs();

        if let Some(entry) = raw.entry_price.filter(|e| *e > Decimal::ZERO) {
            let w = weights.entry(key.clone()).or_default();
            w.0 += qty * entry;
            w.1 += qty;
        }

        match merged.get_mut(&key) {
            None => {
                merged.insert(key, raw.clone());
            }
            Some(acc) => {
                acc.quantity += raw.quantity;
                acc.mark_price = raw.mark_price.or(acc.mark_price);
                acc.unrealized_pnl = sum_opt(acc.unrealized_pnl, raw.unrealized_pnl);
                acc.notional = sum_opt(
                    acc.notional.map(|n| n.abs()),
                    raw.notional.map(|n| n.abs()),
                );
                acc.leverage = match (acc.leverage, raw.leverage) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
            }
        }
    }

    merged
        .into_iter()
        .map(|(key, mut raw)| {
            if let Some((cost, qty)) = weights.get(&key) {
                if !qty.is_zero() {
                    raw.entry_price = Some(cost / qty);
                }
            }
            raw
        })
        .collect()
}

fn sum_opt(a: Option<Decimal>, b: Option<Decimal>) -> Option<Decimal> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or_default() + b.unwrap_or_default()),
    }
}

/// Normalize one derivatives position. Closed (zero quantity) positions yield None.
pub fn normalize_derivative(
    platform: Platform,
    raw: &RawPosition,
    policy: &RiskPolicy,
) -> Option<NormalizedPosition> {
    if raw.quantity.is_zero() {
        return None;
    }

    let side = parse_side(raw);
    let entry = raw.entry_price.unwrap_or_default();
    let mark = raw.mark_price.unwrap_or_default();
    let notional = raw
        .notional
        .map(|n| n.abs())
        .unwrap_or_else(|| raw.quantity.abs() * mark);

    let pnl_pct = match raw.unrealized_pnl {
        Some(pnl) => pnl_pct_from_notional(pnl, notional),
        None => pnl_pct_from_prices(entry, mark, side),
    };

    Some(NormalizedPosition::new(
        PositionInit {
            symbol: strip_symbol(&raw.symbol),
            platform,
            side,
            quantity: raw.quantity.abs(),
            entry_price: entry,
            mark_price: mark,
            leverage: raw.leverage.unwrap_or(Decimal::ONE),
            unrealized_pnl_pct: pnl_pct,
            margin_usd: notional,
        },
        policy,
    ))
}

/// Merge lots, then normalize every open derivatives position
pub fn normalize_positions(
    platform: Platform,
    raws: &[RawPosition],
    policy: &RiskPolicy,
) -> Vec<NormalizedPosition> {
    merge_lots(raws)
        .iter()
        .filter_map(|raw| normalize_derivative(platform, raw, policy))
        .collect()
}

/// Weighted-average cost basis from buy fills
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostBasis {
    pub total_bought: Decimal,
    pub total_cost: Decimal,
}

impl CostBasis {
    pub fn avg_entry(&self) -> Option<Decimal> {
        if self.total_bought > Decimal::ZERO {
            Some(self.total_cost / self.total_bought)
        } else {
            None
        }
    }
}

/// `total_cost / total_bought` per base symbol, from buy fills only
pub fn cost_basis(fills: &[TradeFill]) -> HashMap<String, CostBasis> {
    let mut basis: HashMap<String, CostBasis> = HashMap::new();
    for fill in fills.iter().filter(|f| f.side == FillSide::Buy) {
        if fill.amount <= Decimal::ZERO || fill.price <= Decimal::ZERO {
            continue;
        }
        let entry = basis.entry(strip_symbol(&fill.symbol)).or_default();
        entry.total_bought += fill.amount;
        entry.total_cost += fill.amount * fill.price;
    }
    basis
}

/// Spot balances -> HODL positions.
///
/// Lots of the same asset are summed, excluded assets and dust are dropped.
/// Entry comes from `fills` when available, mark from `prices` (base symbol -> USD).
pub fn normalize_spot_balances(
    platform: Platform,
    balance: &Balance,
    fills: &[TradeFill],
    prices: &HashMap<String, Decimal>,
    policy: &NormalizerPolicy,
    risk: &RiskPolicy,
) -> Vec<NormalizedPosition> {
    let mut amounts: BTreeMap<String, Decimal> = BTreeMap::new();
    for asset in &balance.assets {
        *amounts.entry(strip_symbol(&asset.asset)).or_default() += asset.total();
    }

    let basis = cost_basis(fills);

    amounts
        .into_iter()
        .filter(|(symbol, amount)| {
            !policy.excluded_assets.contains(symbol) && *amount > policy.min_spot_amount
        })
        .map(|(symbol, amount)| {
            let entry = basis
                .get(&symbol)
                .and_then(CostBasis::avg_entry)
                .unwrap_or_default();
            let mark = prices.get(&symbol).copied().unwrap_or_default();
            NormalizedPosition::new(
                PositionInit {
                    unrealized_pnl_pct: pnl_pct_from_prices(entry, mark, PositionSide::Hodl),
                    margin_usd: amount * mark,
                    symbol,
                    platform,
                    side: PositionSide::Hodl,
                    quantity: amount,
                    entry_price: entry,
                    mark_price: mark,
                    leverage: Decimal::ONE,
                },
                risk,
            )
        })
        .collect()
}

/// Base symbols a spot balance would report, for price lookups
pub fn spot_symbols(balance: &Balance, policy: &NormalizerPolicy) -> Vec<String> {
    let mut symbols: BTreeSet<String> = BTreeSet::new();
    for asset in &balance.assets {
        let symbol = strip_symbol(&asset.asset);
        if !policy.excluded_assets.contains(&symbol) {
            symbols.insert(symbol);
        }
    }
    symbols.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetBalance, RiskTier};

    fn raw_btc() -> RawPosition {
        RawPosition {
            symbol: "BTC-USDT".into(),
            side: Some("LONG".into()),
            quantity: dec!(0.1),
            entry_price: Some(dec!(50000)),
            mark_price: Some(dec!(55000)),
            unrealized_pnl: Some(dec!(500)),
            notional: Some(dec!(5000)),
            leverage: Some(dec!(10)),
        }
    }

    fn asset(name: &str, free: Decimal) -> AssetBalance {
        AssetBalance {
            asset: name.into(),
            free,
            locked: Decimal::ZERO,
        }
    }

    #[test]
    fn test_strip_symbol_variants() {
        assert_eq!(strip_symbol("BTC/USDT:USDT"), "BTC");
        assert_eq!(strip_symbol("BTC-USDT"), "BTC");
        assert_eq!(strip_symbol("btc_usdt"), "BTC");
        assert_eq!(strip_symbol("ETHUSDT"), "ETH");
        assert_eq!(strip_symbol("XXBT"), "BTC");
        assert_eq!(strip_symbol("XBTUSD"), "BTC");
        assert_eq!(strip_symbol("SOL.F"), "SOL");
        assert_eq!(strip_symbol("ZUSD"), "USD");
        assert_eq!(strip_symbol("USDT"), "USDT");
    }

    #[test]
    fn test_strip_symbol_idempotent() {
        for raw in ["BTC/USDT:USDT", "BTC-USDT", "XXBT", "SOL.F", "DOGEUSDT", "USD", "PEPE"] {
            let once = strip_symbol(raw);
            assert_eq!(strip_symbol(&once), once, "not idempotent for {raw}");
        }
        assert_eq!(strip_symbol("BTC/USDT:USDT"), strip_symbol("BTC-USDT"));
    }

    #[test]
    fn test_bingx_end_to_end_position() {
        let policy = RiskPolicy::default();
        let positions = normalize_positions(Platform::BingX, &[raw_btc()], &policy);
        assert_eq!(positions.len(), 1);

        let pos = &positions[0];
        assert_eq!(pos.symbol, "BTC");
        assert_eq!(pos.side, PositionSide::Long);
        assert_eq!(pos.unrealized_pnl_pct(), dec!(10));
        assert!(!pos.has_stop_loss());
        assert_eq!(pos.margin_usd(), dec!(5000));
        // No protection and margin above 1000
        assert_eq!(pos.risk_tier(), RiskTier::High);
    }

    #[test]
    fn test_zero_notional_gives_zero_pct() {
        let mut raw = raw_btc();
        raw.notional = Some(Decimal::ZERO);
        let pos = normalize_derivative(Platform::BingX, &raw, &RiskPolicy::default()).unwrap();
        assert_eq!(pos.unrealized_pnl_pct(), Decimal::ZERO);
    }

    #[test]
    fn test_missing_prices_give_zero_pct() {
        let raw = RawPosition {
            symbol: "ARB-USDT".into(),
            quantity: dec!(100),
            ..Default::default()
        };
        let pos = normalize_derivative(Platform::Blofin, &raw, &RiskPolicy::default()).unwrap();
        assert_eq!(pos.entry_price, Decimal::ZERO);
        assert_eq!(pos.unrealized_pnl_pct(), Decimal::ZERO);
        assert_eq!(pos.leverage, Decimal::ONE);
    }

    #[test]
    fn test_short_side_from_negative_quantity() {
        let raw = RawPosition {
            symbol: "ETH-USDT".into(),
            quantity: dec!(-2),
            entry_price: Some(dec!(2000)),
            mark_price: Some(dec!(1900)),
            ..Default::default()
        };
        let pos = normalize_derivative(Platform::BingX, &raw, &RiskPolicy::default()).unwrap();
        assert_eq!(pos.side, PositionSide::Short);
        assert_eq!(pos.quantity, dec!(2));
        assert_eq!(pos.unrealized_pnl_pct(), dec!(5));
    }

    #[test]
    fn test_closed_position_skipped() {
        let mut raw = raw_btc();
        raw.quantity = Decimal::ZERO;
        assert!(normalize_derivative(Platform::BingX, &raw, &RiskPolicy::default()).is_none());
    }

    #[test]
    fn test_duplicate_lots_are_merged_with_weighted_entry() {
        let lot_a = RawPosition {
            symbol: "SOL-USDT".into(),
            side: Some("LONG".into()),
            quantity: dec!(10),
            entry_price: Some(dec!(100)),
            mark_price: Some(dec!(120)),
            unrealized_pnl: Some(dec!(200)),
            notional: Some(dec!(1200)),
            leverage: Some(dec!(5)),
        };
        let lot_b = RawPosition {
            symbol: "SOL/USDT:USDT".into(),
            quantity: dec!(30),
            entry_price: Some(dec!(110)),
            unrealized_pnl: Some(dec!(300)),
            notional: Some(dec!(3600)),
            leverage: Some(dec!(3)),
            ..lot_a.clone()
        };

        let merged = merge_lots(&[lot_a, lot_b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].quantity, dec!(40));
        // (10*100 + 30*110) / 40
        assert_eq!(merged[0].entry_price, Some(dec!(107.5)));
        assert_eq!(merged[0].notional, Some(dec!(4800)));
        assert_eq!(merged[0].unrealized_pnl, Some(dec!(500)));
        assert_eq!(merged[0].leverage, Some(dec!(5)));
    }

    #[test]
    fn test_opposite_sides_not_merged() {
        let long = raw_btc();
        let mut short = raw_btc();
        short.side = Some("SHORT".into());
        assert_eq!(merge_lots(&[long, short]).len(), 2);
    }

    #[test]
    fn test_merged_lots_ordered_by_symbol_then_side() {
        let mut short = raw_btc();
        short.side = Some("SHORT".into());
        let long = raw_btc();
        let mut eth = raw_btc();
        eth.symbol = "ETH-USDT".into();

        let merged = merge_lots(&[short, eth, long]);
        let keys: Vec<(String, PositionSide)> = merged
            .iter()
            .map(|r| (strip_symbol(&r.symbol), parse_side(r)))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("BTC".to_string(), PositionSide::Long),
                ("BTC".to_string(), PositionSide::Short),
                ("ETH".to_string(), PositionSide::Long),
            ]
        );
    }

    #[test]
    fn test_spot_dust_and_stables_excluded() {
        let balance = Balance {
            assets: vec![
                asset("SOL", dec!(0.0005)),
                asset("USDT", dec!(2500)),
                asset("ZUSD", dec!(100)),
                asset("XXBT", dec!(0.25)),
            ],
            total_usd: None,
        };
        let positions = normalize_spot_balances(
            Platform::Kraken,
            &balance,
            &[],
            &HashMap::new(),
            &NormalizerPolicy::default(),
            &RiskPolicy::default(),
        );
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "BTC");
        assert_eq!(positions[0].side, PositionSide::Hodl);
        // No fills, no price: entry and pct are zero, not an error
        assert_eq!(positions[0].entry_price, Decimal::ZERO);
        assert_eq!(positions[0].unrealized_pnl_pct(), Decimal::ZERO);
    }

    #[test]
    fn test_every_excluded_asset_is_filtered() {
        let policy = NormalizerPolicy::default();
        let balance = Balance {
            assets: policy
                .excluded_assets
                .iter()
                .map(|s| asset(s, dec!(1000)))
                .collect(),
            total_usd: None,
        };
        let positions = normalize_spot_balances(
            Platform::KuCoin,
            &balance,
            &[],
            &HashMap::new(),
            &policy,
            &RiskPolicy::default(),
        );
        assert!(positions.is_empty());
    }

    #[test]
    fn test_spot_weighted_entry_from_fills() {
        let fills = vec![
            TradeFill {
                symbol: "SOL/USD".into(),
                side: FillSide::Buy,
                amount: dec!(2),
                price: dec!(100),
                timestamp: 1,
            },
            TradeFill {
                symbol: "SOLUSD".into(),
                side: FillSide::Buy,
                amount: dec!(6),
                price: dec!(140),
                timestamp: 2,
            },
            TradeFill {
                symbol: "SOL/USD".into(),
                side: FillSide::Sell,
                amount: dec!(1),
                price: dec!(500),
                timestamp: 3,
            },
        ];
        let balance = Balance {
            assets: vec![asset("SOL", dec!(3)), asset("SOL.F", dec!(4))],
            total_usd: None,
        };
        let prices = HashMap::from([("SOL".to_string(), dec!(195))]);

        let positions = normalize_spot_balances(
            Platform::Kraken,
            &balance,
            &fills,
            &prices,
            &NormalizerPolicy::default(),
            &RiskPolicy::default(),
        );
        assert_eq!(positions.len(), 1);
        let sol = &positions[0];
        assert_eq!(sol.quantity, dec!(7));
        // (2*100 + 6*140) / 8 = 130
        assert_eq!(sol.entry_price, dec!(130));
        assert_eq!(sol.unrealized_pnl_pct(), dec!(50));
        assert_eq!(sol.margin_usd(), dec!(1365));
    }

    #[test]
    fn test_spot_symbols_for_pricing() {
        let balance = Balance {
            assets: vec![asset("XETH", dec!(1)), asset("USDC", dec!(5)), asset("ETH", dec!(2))],
            total_usd: None,
        };
        assert_eq!(spot_symbols(&balance, &NormalizerPolicy::default()), vec!["ETH"]);
    }
}
