//! Domain records for the complete-set arbitrage engine.
//!
//! Grounded in `examples/original_source/src/complete_set/models.py`, generalized
//! to Rust's typed-enum style the way `domain::market` and `domain::order` do.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::Side;

/// Market timeframe this engine is willing to trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    Min5,
    Min15,
    Hour1,
}

impl Timeframe {
    pub fn window_secs(&self) -> i64 {
        match self {
            Timeframe::Min5 => 300,
            Timeframe::Min15 => 900,
            Timeframe::Hour1 => 3600,
        }
    }

    pub fn slug_tag(&self) -> &'static str {
        match self {
            Timeframe::Min5 => "5m",
            Timeframe::Min15 => "15m",
            Timeframe::Hour1 => "1h",
        }
    }

    pub fn market_type(&self) -> &'static str {
        match self {
            Timeframe::Min5 => "updown-5m",
            Timeframe::Min15 => "updown-15m",
            Timeframe::Hour1 => "up-or-down-1h",
        }
    }
}

/// A binary Up/Down market as discovered via the Gamma/CLOB APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteSetMarket {
    pub slug: String,
    /// The underlying reference asset this window trades against, e.g.
    /// `"BTC"`. Used to key the reference-price feed map, which is one
    /// feed per asset — `market_type` is the timeframe bucket, not the
    /// asset, so it cannot serve as that key.
    pub asset: String,
    pub condition_id: String,
    pub up_token_id: String,
    pub down_token_id: String,
    pub end_time: DateTime<Utc>,
    pub market_type: String,
    pub neg_risk: bool,
    pub discovered_at: DateTime<Utc>,
}

impl CompleteSetMarket {
    pub fn token_id(&self, side: Side) -> &str {
        match side {
            Side::Up => &self.up_token_id,
            Side::Down => &self.down_token_id,
        }
    }

    pub fn seconds_to_end(&self, now: DateTime<Utc>) -> i64 {
        (self.end_time - now).num_seconds()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }
}

/// Snapshot of one outcome token's order book top.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TopOfBook {
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub best_bid_size: Option<Decimal>,
    pub best_ask_size: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

impl TopOfBook {
    pub fn is_empty(&self) -> bool {
        self.best_bid.is_none() && self.best_ask.is_none()
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) if ask >= bid => Some(ask - bid),
            _ => None,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.updated_at > ttl
    }
}

/// Accumulated position for one market. See `spec.md` §3/§8 for the invariants
/// this type must uphold: VWAP consistency, exact-zero on full reduction, and
/// bootstrap-flag clearing on any real fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInventory {
    pub up_shares: Decimal,
    pub down_shares: Decimal,
    pub up_cost: Decimal,
    pub down_cost: Decimal,
    pub filled_up_shares: Decimal,
    pub filled_down_shares: Decimal,
    pub bootstrapped_up: bool,
    pub bootstrapped_down: bool,
    pub last_fill_at: Option<DateTime<Utc>>,
    pub last_merge_at: Option<DateTime<Utc>>,
    pub prior_merge_pnl: Decimal,
}

impl Default for MarketInventory {
    fn default() -> Self {
        Self {
            up_shares: Decimal::ZERO,
            down_shares: Decimal::ZERO,
            up_cost: Decimal::ZERO,
            down_cost: Decimal::ZERO,
            filled_up_shares: Decimal::ZERO,
            filled_down_shares: Decimal::ZERO,
            bootstrapped_up: false,
            bootstrapped_down: false,
            last_fill_at: None,
            last_merge_at: None,
            prior_merge_pnl: Decimal::ZERO,
        }
    }
}

impl MarketInventory {
    pub fn up_vwap(&self) -> Option<Decimal> {
        if self.up_shares > Decimal::ZERO {
            Some(self.up_cost / self.up_shares)
        } else {
            None
        }
    }

    pub fn down_vwap(&self) -> Option<Decimal> {
        if self.down_shares > Decimal::ZERO {
            Some(self.down_cost / self.down_shares)
        } else {
            None
        }
    }

    pub fn vwap(&self, side: Side) -> Option<Decimal> {
        match side {
            Side::Up => self.up_vwap(),
            Side::Down => self.down_vwap(),
        }
    }

    pub fn shares(&self, side: Side) -> Decimal {
        match side {
            Side::Up => self.up_shares,
            Side::Down => self.down_shares,
        }
    }

    pub fn hedged(&self) -> Decimal {
        self.up_shares.min(self.down_shares)
    }

    pub fn imbalance(&self) -> Decimal {
        self.up_shares - self.down_shares
    }

    pub fn has_any(&self) -> bool {
        self.up_shares > Decimal::ZERO || self.down_shares > Decimal::ZERO
    }
}

/// Either outcome share the settlement coordinator is working with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Time-in-force for an order placed by the complete-set engine — a subset of
/// `domain::order::TimeInForce` (no IOC here, `spec.md` §4.4 only uses GTC/FOK).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Gtc,
    Fok,
}

/// One open or recently-terminal order tracked by the Order Manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderState {
    /// Empty string represents a sentinel: placed but id unknown.
    pub order_id: String,
    pub token_id: String,
    pub direction: Side,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub price: Decimal,
    pub size: Decimal,
    pub matched_size: Decimal,
    pub placed_at: DateTime<Utc>,
    pub last_status_check_at: DateTime<Utc>,
    pub reserved_hedge_notional: Decimal,
    pub entry_dynamic_edge: Option<Decimal>,
    pub consumed_crossing: Decimal,
}

impl OrderState {
    pub fn is_sentinel(&self) -> bool {
        self.order_id.is_empty()
    }

    pub fn remaining(&self) -> Decimal {
        (self.size - self.matched_size).max(Decimal::ZERO)
    }

    pub fn is_fully_matched(&self) -> bool {
        self.matched_size >= self.size
    }

    pub fn notional(&self) -> Decimal {
        self.price * self.remaining()
    }
}

/// A market retired from the active set whose inventory still needs on-chain
/// settlement after resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRedemption {
    pub slug: String,
    pub condition_id: String,
    pub neg_risk: bool,
    pub eligible_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn inventory_default_is_canonical_zero() {
        let inv = MarketInventory::default();
        assert_eq!(inv.up_shares, Decimal::ZERO);
        assert_eq!(inv.up_vwap(), None);
        assert_eq!(inv.hedged(), Decimal::ZERO);
    }

    #[test]
    fn vwap_consistency_after_add() {
        let mut inv = MarketInventory::default();
        inv.up_shares += dec!(100);
        inv.up_cost += dec!(40);
        assert_eq!(inv.up_vwap(), Some(dec!(0.40)));
    }

    #[test]
    fn order_state_sentinel_detection() {
        let mut order = sentinel_order();
        assert!(order.is_sentinel());
        order.order_id = "abc123".to_string();
        assert!(!order.is_sentinel());
    }

    #[test]
    fn order_state_remaining_never_negative() {
        let mut order = sentinel_order();
        order.size = dec!(10);
        order.matched_size = dec!(15);
        assert_eq!(order.remaining(), Decimal::ZERO);
    }

    fn sentinel_order() -> OrderState {
        OrderState {
            order_id: String::new(),
            token_id: "tok".to_string(),
            direction: Side::Up,
            side: OrderSide::Buy,
            kind: OrderKind::Gtc,
            price: dec!(0.40),
            size: dec!(100),
            matched_size: Decimal::ZERO,
            placed_at: Utc::now(),
            last_status_check_at: Utc::now(),
            reserved_hedge_notional: Decimal::ZERO,
            entry_dynamic_edge: None,
            consumed_crossing: Decimal::ZERO,
        }
    }
}
