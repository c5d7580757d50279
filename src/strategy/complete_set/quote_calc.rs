//! Sizing, dynamic edge, and exposure math for the complete-set engine.
//!
//! Grounded in `strategy/split_arb.rs`'s cheap-side/max-hedge-price
//! arithmetic, generalized per `SPEC_FULL.md` §4.5/§4.6 into standalone pure
//! functions so they can be unit tested without a running engine.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::config::CompleteSetConfig;
use super::models::{MarketInventory, OrderState};

/// Time-scaled sizing step table: (seconds_remaining_floor, fraction_of_base_size).
/// Earlier in the window we size up; as expiry nears we taper down to reduce
/// the chance of holding an unhedged leg into settlement.
const TIME_FACTOR_STEPS: &[(i64, Decimal)] = &[
    (240, dec!(1.00)),
    (120, dec!(0.75)),
    (60, dec!(0.50)),
    (30, dec!(0.25)),
    (0, dec!(0.10)),
];

/// Returns the size multiplier for a given number of seconds remaining in
/// the market window.
pub fn time_factor(seconds_remaining: i64) -> Decimal {
    for (floor, factor) in TIME_FACTOR_STEPS {
        if seconds_remaining >= *floor {
            return *factor;
        }
    }
    TIME_FACTOR_STEPS.last().map(|(_, f)| *f).unwrap_or(Decimal::ZERO)
}

/// Spread-width breakpoints (as a fraction of price) past which the
/// required edge steps up, per `spec.md` §4.5: base / 1.5x / 2x at 0%, 6%,
/// 10% spread.
const EDGE_SPREAD_BREAKPOINTS: &[(Decimal, Decimal)] = &[
    (dec!(0.10), dec!(2.0)),
    (dec!(0.06), dec!(1.5)),
    (dec!(0.00), dec!(1.0)),
];

/// Dynamic edge requirement: widens with the quoted spread width so we don't
/// chase thin, crossable books into adverse selection.
pub fn dynamic_edge(cfg: &CompleteSetConfig, spread: Decimal) -> Decimal {
    for (floor, multiplier) in EDGE_SPREAD_BREAKPOINTS {
        if spread >= *floor {
            return cfg.min_edge * *multiplier;
        }
    }
    cfg.min_edge
}

/// Breakdown of capital currently committed, used to gate new order
/// placement against `max_total_bankroll_fraction`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExposureBreakdown {
    /// Notional of resting (unfilled) orders.
    pub orders_notional: Decimal,
    /// Notional reserved against known hedge fills still pending a cross leg.
    pub reserved_hedges: Decimal,
    /// Mark-to-cost notional of shares held on one side with no opposing leg.
    pub unhedged_exposure: Decimal,
    /// Notional of fully hedged (merge-ready) share pairs, valued at cost.
    pub hedged_locked: Decimal,
}

impl ExposureBreakdown {
    pub fn total(&self) -> Decimal {
        self.orders_notional + self.reserved_hedges + self.unhedged_exposure + self.hedged_locked
    }
}

/// Computes the four-component exposure breakdown across all open orders
/// and inventories. `mid_price_fn` supplies a live mark for the unhedged
/// side; absent a live quote it falls back to the inventory's own VWAP.
pub fn compute_exposure(
    orders: &[OrderState],
    inventories: &[&MarketInventory],
) -> ExposureBreakdown {
    let mut breakdown = ExposureBreakdown::default();

    for order in orders {
        if order.is_fully_matched() {
            continue;
        }
        breakdown.orders_notional += order.notional();
        breakdown.reserved_hedges += order.reserved_hedge_notional;
    }

    for inv in inventories {
        let hedged = inv.hedged();
        if hedged > Decimal::ZERO {
            let up_vwap = inv.up_vwap().unwrap_or(Decimal::ZERO);
            let down_vwap = inv.down_vwap().unwrap_or(Decimal::ZERO);
            breakdown.hedged_locked += hedged * (up_vwap + down_vwap);
        }
        // One unhedged share reserves a full dollar: the cost already paid
        // for the leg (`|I|*vwap`) plus the reserve needed to afford the
        // future hedge leg (`|I|*(1-vwap)`) — the two sum to a flat
        // `|I|*1.00` regardless of vwap (spec.md §4.5/§8).
        let imbalance = inv.imbalance();
        if !imbalance.is_zero() {
            breakdown.unhedged_exposure += imbalance.abs();
        }
    }

    breakdown
}

/// Computes shares to offer for a balanced complete-set order per
/// `spec.md` §4.5's five-step sizing algorithm.
///
/// 1. `expensive = max(up_price, down_price)` — the per-leg reference so
///    both legs fit the same budget.
/// 2. Base shares = `bankroll * order_fraction / expensive`, floored to
///    cents.
/// 3. Scaled by the time factor (`TIME_FACTOR_STEPS`).
/// 4. Capped by remaining bankroll headroom:
///    `remaining = bankroll*total_fraction - exposure`.
/// 5. Rejected (returns `None`) if below `min_order_size`.
pub fn size_balanced_order(
    cfg: &CompleteSetConfig,
    order_fraction: Decimal,
    up_price: Decimal,
    down_price: Decimal,
    seconds_remaining: i64,
    exposure: Decimal,
    min_order_size: Decimal,
) -> Option<Decimal> {
    let expensive = up_price.max(down_price);
    if expensive <= Decimal::ZERO {
        return None;
    }

    let base_shares = (cfg.bankroll_usd * order_fraction / expensive)
        .round_dp_with_strategy(2, rust_decimal::RoundingStrategy::ToZero);
    let scaled = base_shares * time_factor(seconds_remaining);

    let remaining = cfg.bankroll_usd * cfg.max_total_bankroll_fraction - exposure;
    if remaining <= Decimal::ZERO {
        return None;
    }
    let cap_by_headroom = remaining / expensive;

    let shares = scaled.min(cap_by_headroom).max(Decimal::ZERO);
    if shares < min_order_size {
        None
    } else {
        Some(shares)
    }
}

/// True if placing a new order of `additional_notional` would breach the
/// configured total-bankroll ceiling.
pub fn would_breach_bankroll_cap(
    cfg: &CompleteSetConfig,
    current: ExposureBreakdown,
    additional_notional: Decimal,
) -> bool {
    let cap = cfg.bankroll_usd * cfg.max_total_bankroll_fraction;
    current.total() + additional_notional > cap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_factor_tapers_near_expiry() {
        assert_eq!(time_factor(300), dec!(1.00));
        assert_eq!(time_factor(90), dec!(0.50));
        assert_eq!(time_factor(5), dec!(0.10));
    }

    #[test]
    fn dynamic_edge_widens_with_spread() {
        let cfg = CompleteSetConfig::default();
        let tight = dynamic_edge(&cfg, dec!(0.01));
        let wide = dynamic_edge(&cfg, dec!(0.10));
        assert!(wide > tight);
        assert!(tight >= cfg.min_edge);
    }

    #[test]
    fn exposure_breaks_down_hedged_vs_unhedged() {
        let mut inv = MarketInventory::default();
        inv.up_shares = dec!(100);
        inv.up_cost = dec!(40);
        inv.down_shares = dec!(60);
        inv.down_cost = dec!(18);
        let breakdown = compute_exposure(&[], &[&inv]);
        // hedged = 60 shares at (0.40 + 0.30) = 42
        assert_eq!(breakdown.hedged_locked, dec!(42));
        // unhedged = 40 imbalance shares reserved at $1/share = 40
        assert_eq!(breakdown.unhedged_exposure, dec!(40));
    }

    #[test]
    fn size_balanced_order_caps_by_headroom() {
        let cfg = CompleteSetConfig::default();
        // Expensive side 0.50, tiny headroom left: should cap down instead
        // of returning the full time-scaled size.
        let shares = size_balanced_order(
            &cfg,
            dec!(0.20),
            dec!(0.50),
            dec!(0.48),
            300,
            cfg.bankroll_usd * cfg.max_total_bankroll_fraction - dec!(5),
            dec!(1),
        );
        assert_eq!(shares, Some(dec!(10)));
    }

    #[test]
    fn size_balanced_order_rejects_below_min_size() {
        let cfg = CompleteSetConfig::default();
        let shares = size_balanced_order(&cfg, dec!(0.20), dec!(0.50), dec!(0.48), 0, Decimal::ZERO, dec!(1000));
        assert!(shares.is_none());
    }

    #[test]
    fn sized_order_always_affords_its_own_hedge_leg() {
        // A sizing call that returns Some(N) must leave enough bankroll
        // headroom for the follow-up hedge leg: e + N*max(up,down)*2 has to
        // clear the same bankroll cap the sizing call itself respected.
        let cfg = CompleteSetConfig::default();
        let up_price = dec!(0.45);
        let down_price = dec!(0.40);
        let current = ExposureBreakdown::default();

        let shares = size_balanced_order(&cfg, dec!(0.02), up_price, down_price, 300, current.total(), dec!(1))
            .expect("sizing should produce a non-nil order here");

        let hedge_leg_notional = shares * up_price.max(down_price) * dec!(2);
        assert!(!would_breach_bankroll_cap(&cfg, current, hedge_leg_notional));
    }

    #[test]
    fn bankroll_cap_blocks_oversize_order() {
        let cfg = CompleteSetConfig::default();
        let cap = cfg.bankroll_usd * cfg.max_total_bankroll_fraction;
        let current = ExposureBreakdown {
            orders_notional: cap - dec!(10),
            ..Default::default()
        };
        assert!(would_breach_bankroll_cap(&cfg, current, dec!(20)));
        assert!(!would_breach_bankroll_cap(&cfg, current, dec!(5)));
    }
}
