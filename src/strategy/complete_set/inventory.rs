//! Per-market position tracking for the complete-set engine.
//!
//! Grounded in `strategy/split_arb.rs`'s `PartialPosition`/`HedgedPosition`
//! bookkeeping, generalized per `SPEC_FULL.md` §4.3 to track both legs of a
//! single market continuously rather than transitioning between two fixed
//! position types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::domain::Side;

use super::models::MarketInventory;

/// Result of clearing a market's inventory at resolution: the realized loss
/// (if any) booked for unmerged, unhedged residual shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearOutcome {
    pub residual_loss: Decimal,
    pub residual_shares: Decimal,
}

/// Tracks `MarketInventory` per market slug.
#[derive(Debug, Default)]
pub struct InventoryTracker {
    markets: HashMap<String, MarketInventory>,
}

impl InventoryTracker {
    pub fn new() -> Self {
        Self {
            markets: HashMap::new(),
        }
    }

    pub fn get(&self, slug: &str) -> Option<&MarketInventory> {
        self.markets.get(slug)
    }

    pub fn entry(&mut self, slug: &str) -> &mut MarketInventory {
        self.markets.entry(slug.to_string()).or_default()
    }

    /// Records a buy fill on one side. Any real fill clears the bootstrap
    /// flag for that side — a bootstrapped position is a placeholder, not a
    /// confirmed on-book fill, so the first genuine fill must always replace it.
    pub fn record_fill(&mut self, slug: &str, side: Side, shares: Decimal, price: Decimal) {
        let inv = self.entry(slug);
        match side {
            Side::Up => {
                inv.up_shares += shares;
                inv.up_cost += shares * price;
                inv.filled_up_shares += shares;
                inv.bootstrapped_up = false;
            }
            Side::Down => {
                inv.down_shares += shares;
                inv.down_cost += shares * price;
                inv.filled_down_shares += shares;
                inv.bootstrapped_down = false;
            }
        }
        inv.last_fill_at = Some(Utc::now());
        debug!(
            slug,
            side = side.as_str(),
            %shares,
            %price,
            "recorded fill"
        );
    }

    /// Records a sell fill (unhedged exit), reducing shares and cost
    /// pro-rata so the remaining VWAP is unchanged, and returns the realized
    /// PnL booked on the sold shares: `shares*(price - vwap)` (`spec.md` §4.3).
    pub fn record_sell_fill(&mut self, slug: &str, side: Side, shares: Decimal, price: Decimal) -> Decimal {
        let inv = self.entry(slug);
        let (held, cost) = match side {
            Side::Up => (inv.up_shares, inv.up_cost),
            Side::Down => (inv.down_shares, inv.down_cost),
        };
        if held <= Decimal::ZERO {
            warn!(slug, side = side.as_str(), "sell fill with no inventory");
            return Decimal::ZERO;
        }
        let sold = shares.min(held);
        let vwap = cost / held;
        let cost_removed = cost * sold / held;
        match side {
            Side::Up => {
                inv.up_shares -= sold;
                inv.up_cost -= cost_removed;
            }
            Side::Down => {
                inv.down_shares -= sold;
                inv.down_cost -= cost_removed;
            }
        }
        sold * (price - vwap)
    }

    /// Reduces both sides by `merged_shares` after an on-chain merge,
    /// preserving VWAP on the remainder and crediting the merge proceeds.
    pub fn reduce_merged(&mut self, slug: &str, merged_shares: Decimal) -> Decimal {
        let inv = self.entry(slug);
        if merged_shares <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let up_cost_removed = if inv.up_shares > Decimal::ZERO {
            inv.up_cost * merged_shares / inv.up_shares
        } else {
            Decimal::ZERO
        };
        let down_cost_removed = if inv.down_shares > Decimal::ZERO {
            inv.down_cost * merged_shares / inv.down_shares
        } else {
            Decimal::ZERO
        };

        inv.up_shares -= merged_shares;
        inv.down_shares -= merged_shares;
        inv.up_cost -= up_cost_removed;
        inv.down_cost -= down_cost_removed;
        inv.filled_up_shares -= merged_shares;
        inv.filled_down_shares -= merged_shares;

        // Exact-zero invariant: full reduction must never leave floating dust.
        if inv.up_shares <= Decimal::ZERO {
            inv.up_shares = Decimal::ZERO;
            inv.up_cost = Decimal::ZERO;
        }
        if inv.down_shares <= Decimal::ZERO {
            inv.down_shares = Decimal::ZERO;
            inv.down_cost = Decimal::ZERO;
        }
        if inv.filled_up_shares <= Decimal::ZERO {
            inv.filled_up_shares = Decimal::ZERO;
        }
        if inv.filled_down_shares <= Decimal::ZERO {
            inv.filled_down_shares = Decimal::ZERO;
        }

        let proceeds = merged_shares - (up_cost_removed + down_cost_removed);
        inv.prior_merge_pnl += proceeds;
        inv.last_merge_at = Some(Utc::now());
        proceeds
    }

    /// Removes a market from the active set per `spec.md` §4.3's
    /// `clear_market(slug, up_bid?, down_bid?)`: the market is dropped from
    /// trading (rotated out of discovery, or force-cleared on shutdown)
    /// *before* on-chain resolution is known — it does not learn which side
    /// won. Hedged residual (`min(up,down)`) is booked at
    /// `hedged*(1 - (up_vwap+down_vwap))`, the same formula a merge would
    /// realize. The unhedged remainder is assumed worthless and booked as a
    /// loss equal to its cost (§4.3, §9 REDESIGN FLAG — the Python
    /// `inventory.py` only logs this case without booking it). `up_bid`/
    /// `down_bid` are accepted for an operator-facing logged estimate only
    /// and never change the booked PnL, per spec.
    ///
    /// Per `SPEC_FULL.md` §9's resolved Open Question: this books only the
    /// residual still held here. `prior_merge_pnl` (already realized by
    /// prior `reduce_merged` calls) is never re-added.
    pub fn clear_market(
        &mut self,
        slug: &str,
        up_bid: Option<Decimal>,
        down_bid: Option<Decimal>,
    ) -> ClearOutcome {
        let Some(inv) = self.markets.remove(slug) else {
            return ClearOutcome {
                residual_loss: Decimal::ZERO,
                residual_shares: Decimal::ZERO,
            };
        };

        let hedged = inv.up_shares.min(inv.down_shares);
        let up_vwap = inv.up_vwap().unwrap_or(Decimal::ZERO);
        let down_vwap = inv.down_vwap().unwrap_or(Decimal::ZERO);
        let mut realized = Decimal::ZERO;
        if hedged > Decimal::ZERO {
            realized += hedged * (Decimal::ONE - (up_vwap + down_vwap));
        }

        let imbalance = inv.imbalance();
        let unhedged_shares = imbalance.abs();
        if imbalance > Decimal::ZERO {
            // Unhedged Up residual: the leg cost is written off entirely.
            let unhedged_cost = inv.up_cost - (hedged * up_vwap);
            realized -= unhedged_cost;
        } else if imbalance < Decimal::ZERO {
            let unhedged_cost = inv.down_cost - (hedged * down_vwap);
            realized -= unhedged_cost;
        }

        if let (Some(up_bid), Some(down_bid)) = (up_bid, down_bid) {
            debug!(
                slug,
                %up_bid,
                %down_bid,
                hedged = %hedged,
                unhedged = %unhedged_shares,
                "clear_market: final-bid estimate logged (not booked)"
            );
        }

        ClearOutcome {
            residual_loss: realized,
            residual_shares: unhedged_shares,
        }
    }

    pub fn remove(&mut self, slug: &str) -> Option<MarketInventory> {
        self.markets.remove(slug)
    }

    pub fn active_slugs(&self) -> impl Iterator<Item = &String> {
        self.markets.keys()
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

/// Syncs a market's inventory against a best-effort external balance read
/// (on-chain CTF balance or CLOB position snapshot), correcting drift from
/// missed fill notifications. `mid_price_fn` lets callers plug in a live mid
/// price instead of the spec's historical 0.50 fallback.
pub fn sync_inventory(
    inv: &mut MarketInventory,
    observed_up: Decimal,
    observed_down: Decimal,
    mid_price_fn: impl Fn(Side) -> Option<Decimal>,
) {
    if (inv.up_shares - observed_up).abs() > Decimal::new(1, 6) {
        let price = mid_price_fn(Side::Up).unwrap_or(Decimal::new(50, 2));
        inv.up_cost = observed_up * price;
        inv.up_shares = observed_up;
        inv.bootstrapped_up = true;
    }
    if (inv.down_shares - observed_down).abs() > Decimal::new(1, 6) {
        let price = mid_price_fn(Side::Down).unwrap_or(Decimal::new(50, 2));
        inv.down_cost = observed_down * price;
        inv.down_shares = observed_down;
        inv.bootstrapped_down = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn record_fill_clears_bootstrap_flag() {
        let mut tracker = InventoryTracker::new();
        tracker.entry("m1").bootstrapped_up = true;
        tracker.record_fill("m1", Side::Up, dec!(10), dec!(0.40));
        assert!(!tracker.get("m1").unwrap().bootstrapped_up);
    }

    #[test]
    fn record_sell_fill_books_pnl_against_vwap() {
        let mut tracker = InventoryTracker::new();
        tracker.record_fill("m1", Side::Up, dec!(100), dec!(0.40));
        let pnl = tracker.record_sell_fill("m1", Side::Up, dec!(40), dec!(0.55));
        // sold 40 @ 0.55 vs vwap 0.40 -> 40*0.15 = 6 profit.
        assert_eq!(pnl, dec!(6));
        let inv = tracker.get("m1").unwrap();
        assert_eq!(inv.up_shares, dec!(60));
        assert_eq!(inv.up_vwap(), Some(dec!(0.40)));
    }

    #[test]
    fn reduce_merged_zeroes_out_exactly() {
        let mut tracker = InventoryTracker::new();
        tracker.record_fill("m1", Side::Up, dec!(100), dec!(0.40));
        tracker.record_fill("m1", Side::Down, dec!(100), dec!(0.30));
        let proceeds = tracker.reduce_merged("m1", dec!(100));
        let inv = tracker.get("m1").unwrap();
        assert_eq!(inv.up_shares, Decimal::ZERO);
        assert_eq!(inv.down_shares, Decimal::ZERO);
        assert_eq!(inv.up_cost, Decimal::ZERO);
        assert_eq!(inv.down_cost, Decimal::ZERO);
        assert_eq!(inv.filled_up_shares, Decimal::ZERO);
        assert_eq!(inv.filled_down_shares, Decimal::ZERO);
        assert_eq!(inv.up_shares.to_string(), "0");
        assert_eq!(inv.filled_up_shares.to_string(), "0");
        // 100 merged -> $100 proceeds, minus $40 + $30 cost = $30 profit.
        assert_eq!(proceeds, dec!(30));
    }

    #[test]
    fn reduce_merged_partial_preserves_vwap() {
        let mut tracker = InventoryTracker::new();
        tracker.record_fill("m1", Side::Up, dec!(100), dec!(0.40));
        tracker.record_fill("m1", Side::Down, dec!(100), dec!(0.30));
        tracker.reduce_merged("m1", dec!(40));
        let inv = tracker.get("m1").unwrap();
        assert_eq!(inv.up_shares, dec!(60));
        assert_eq!(inv.up_vwap(), Some(dec!(0.40)));
        assert_eq!(inv.down_vwap(), Some(dec!(0.30)));
        assert_eq!(inv.filled_up_shares, dec!(60));
        assert_eq!(inv.filled_down_shares, dec!(60));
    }

    #[test]
    fn clear_market_books_only_residual_not_prior_merge_pnl() {
        let mut tracker = InventoryTracker::new();
        tracker.record_fill("m1", Side::Up, dec!(100), dec!(0.40));
        tracker.record_fill("m1", Side::Down, dec!(100), dec!(0.30));
        tracker.reduce_merged("m1", dec!(100)); // fully merged, nothing left
        let outcome = tracker.clear_market("m1", None, None);
        assert_eq!(outcome.residual_shares, Decimal::ZERO);
        assert_eq!(outcome.residual_loss, Decimal::ZERO);
    }

    #[test]
    fn clear_market_books_loss_on_unhedged_residual() {
        let mut tracker = InventoryTracker::new();
        tracker.record_fill("m1", Side::Down, dec!(50), dec!(0.30));
        // No hedge at all: residual pnl = -15 (the full Down cost written off).
        let outcome = tracker.clear_market("m1", None, None);
        assert_eq!(outcome.residual_loss, dec!(-15));
        assert_eq!(outcome.residual_shares, dec!(50));
    }

    #[test]
    fn clear_market_books_hedged_proceeds_plus_unhedged_loss() {
        let mut tracker = InventoryTracker::new();
        tracker.record_fill("m1", Side::Up, dec!(100), dec!(0.40));
        tracker.record_fill("m1", Side::Down, dec!(60), dec!(0.30));
        // hedged=60 @ (1 - 0.70) = 18; unhedged 40 Up shares cost 40*0.40=16 written off.
        let outcome = tracker.clear_market("m1", Some(dec!(0.5)), Some(dec!(0.5)));
        assert_eq!(outcome.residual_loss, dec!(18) - dec!(16));
        assert_eq!(outcome.residual_shares, dec!(40));
    }
}
