//! Order lifecycle management (`spec.md` §4.4).
//!
//! Grounded in `adapters/polymarket_clob.rs`'s `submit_order`/`get_order`/
//! `cancel_order`/`infer_order_status` shape, narrowed to the `ClobClient`
//! contract in `exchange.rs`. Multiple orders per token are tracked in
//! per-token queues (FIFO — oldest order first), matching `cancel_order`'s
//! "pop the first local order" behaviour in `spec.md` §4.4. `simulate_fills`
//! is this crate's own depth-aware dry-run fill model (no live-mode
//! analogue exists to ground it on beyond the TOB-crossing check already
//! used for live placement decisions in `engine.rs`).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::domain::Side;
use crate::error::{PloyError, Result};

use super::exchange::{is_terminal_status, ClobClient, PlaceOrderArgs};
use super::models::{OrderKind, OrderSide, OrderState, TopOfBook};

/// Orders untouched for longer than this are force-cancelled (`spec.md`
/// §4.4/§5).
pub const STALE_ORDER_TIMEOUT: chrono::Duration = chrono::Duration::hours(2);

/// Outcome of a single placement attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementOutcome {
    Placed { order_id: String },
    /// Placement failed; a sentinel may or may not have been recorded —
    /// see the unified rule in `spec.md` §4.4/§9.
    Failed { reason: String, sentinel_inserted: bool },
}

/// Why an order was removed from tracking — threaded through to the event
/// bus / persistence layer as the cancellation reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Chase,
    HedgeCompleteCleanup,
    StaleTimeout,
    PreResolutionBuffer,
    Shutdown,
    MarketRetired,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::Chase => "CHASE_CANCEL",
            CancelReason::HedgeCompleteCleanup => "HEDGE_COMPLETE_CLEANUP",
            CancelReason::StaleTimeout => "STALE_TIMEOUT",
            CancelReason::PreResolutionBuffer => "PRE_RESOLUTION_BUFFER",
            CancelReason::Shutdown => "SHUTDOWN",
            CancelReason::MarketRetired => "MARKET_RETIRED",
        }
    }
}

/// Is this a balance/allowance rejection (per `spec.md` §4.4/§7, these never
/// get a sentinel — the engine just retries next tick)?
fn is_balance_error(reason: &str) -> bool {
    let lower = reason.to_ascii_lowercase();
    lower.contains("balance") || lower.contains("allowance") || lower.contains("insufficient")
}

/// Tracks open/recently-terminal orders keyed by token id, and reconciles
/// against the remote order list.
pub struct OrderManager<C> {
    clob: Arc<C>,
    dry_run: bool,
    /// token_id -> FIFO queue of locally tracked orders.
    orders: HashMap<String, Vec<OrderState>>,
}

impl<C: ClobClient> OrderManager<C> {
    pub fn new(clob: Arc<C>, dry_run: bool) -> Self {
        Self {
            clob,
            dry_run,
            orders: HashMap::new(),
        }
    }

    pub fn orders_for(&self, token_id: &str) -> &[OrderState] {
        self.orders.get(token_id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn all_orders(&self) -> impl Iterator<Item = &OrderState> {
        self.orders.values().flatten()
    }

    /// Places one order. Returns `true` on success, per `spec.md` §4.4's
    /// placement contract. On failure, inserts a sentinel iff the unified
    /// rule holds: GTC AND not a balance/allowance error (a null-id FOK
    /// retry is never useful since FOK is terminal by nature).
    #[allow(clippy::too_many_arguments)]
    pub async fn place_order(
        &mut self,
        market_slug: &str,
        token_id: &str,
        direction: Side,
        price: Decimal,
        size: Decimal,
        reason: &str,
        kind: OrderKind,
        side: OrderSide,
        reserved_hedge_notional: Decimal,
        entry_dynamic_edge: Option<Decimal>,
    ) -> PlacementOutcome {
        let (size, rejected) = if kind == OrderKind::Fok {
            round_for_fok(price, size, side)
        } else {
            (size, false)
        };
        if rejected {
            return PlacementOutcome::Failed {
                reason: "FOK size below minimum notional and side cannot bump".to_string(),
                sentinel_inserted: false,
            };
        }

        let args = PlaceOrderArgs {
            token_id: token_id.to_string(),
            side,
            kind,
            price,
            size,
        };

        let now = Utc::now();
        match self.clob.post_order(args).await {
            Ok(ack) if ack.order_id.is_empty() => {
                // FOK with a null order id: treated as not-filled, no sentinel.
                debug!(market_slug, token_id, "FOK order returned empty id, treated as not-filled");
                PlacementOutcome::Failed {
                    reason: "empty order id".to_string(),
                    sentinel_inserted: false,
                }
            }
            Ok(ack) => {
                info!(market_slug, token_id, order_id = %ack.order_id, %price, %size, reason, "order placed");
                let state = OrderState {
                    order_id: ack.order_id.clone(),
                    token_id: token_id.to_string(),
                    direction,
                    side,
                    kind,
                    price,
                    size,
                    matched_size: Decimal::ZERO,
                    placed_at: now,
                    last_status_check_at: now,
                    reserved_hedge_notional,
                    entry_dynamic_edge,
                    consumed_crossing: Decimal::ZERO,
                };
                self.orders.entry(token_id.to_string()).or_default().push(state);
                PlacementOutcome::Placed {
                    order_id: ack.order_id,
                }
            }
            Err(e) => {
                let msg = e.to_string();
                let balance_err = is_balance_error(&msg);
                // Unified sentinel rule (spec.md §9): sentinel iff GTC AND
                // non-balance-error. FOK never gets one (terminal by nature).
                let sentinel_inserted = kind == OrderKind::Gtc && !balance_err;
                if sentinel_inserted {
                    let sentinel = OrderState {
                        order_id: String::new(),
                        token_id: token_id.to_string(),
                        direction,
                        side,
                        kind,
                        price,
                        size,
                        matched_size: Decimal::ZERO,
                        placed_at: now,
                        last_status_check_at: now,
                        reserved_hedge_notional,
                        entry_dynamic_edge,
                        consumed_crossing: Decimal::ZERO,
                    };
                    self.orders.entry(token_id.to_string()).or_default().push(sentinel);
                    error!(market_slug, token_id, error = %msg, "order placement failed, sentinel inserted");
                } else if balance_err {
                    warn!(market_slug, token_id, error = %msg, "order placement failed (balance/allowance), will retry");
                } else {
                    error!(market_slug, token_id, error = %msg, "order placement failed");
                }
                PlacementOutcome::Failed {
                    reason: msg,
                    sentinel_inserted,
                }
            }
        }
    }

    /// Live-mode fill sweep: polls each tracked order by id, fires a
    /// callback on any increase in `matched_size`, and drops terminal /
    /// fully-matched orders.
    pub async fn poll_fills(&mut self, mut on_fill: impl FnMut(&OrderState, Decimal)) {
        if self.dry_run {
            return;
        }
        let mut drop_list: Vec<(String, usize)> = Vec::new();
        for (token_id, queue) in self.orders.iter_mut() {
            for (idx, order) in queue.iter_mut().enumerate() {
                if order.is_sentinel() {
                    continue;
                }
                match self.clob.get_order(&order.order_id).await {
                    Ok(status) => {
                        order.last_status_check_at = Utc::now();
                        if status.matched_size > order.matched_size {
                            let delta = status.matched_size - order.matched_size;
                            order.matched_size = status.matched_size;
                            on_fill(order, delta);
                        }
                        if is_terminal_status(&status.status) || order.is_fully_matched() {
                            drop_list.push((token_id.clone(), idx));
                        }
                    }
                    Err(e) => {
                        debug!(token_id, order_id = %order.order_id, error = %e, "order status poll failed, skipping");
                    }
                }
            }
        }
        self.drop_indices(drop_list);
    }

    /// Bulk fill detection: fetches all open remote orders in one request;
    /// for locally tracked orders present in the response, updates in place;
    /// for ones absent, falls back to a per-order status check.
    pub async fn poll_fills_bulk(&mut self, mut on_fill: impl FnMut(&OrderState, Decimal)) {
        if self.dry_run {
            return;
        }
        let remote = match self.clob.get_orders().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "bulk order fetch failed, falling back per-order");
                self.poll_fills(on_fill).await;
                return;
            }
        };
        let remote_by_id: HashMap<&str, _> =
            remote.iter().map(|r| (r.order_id.as_str(), r)).collect();

        let mut drop_list: Vec<(String, usize)> = Vec::new();
        let mut fallback_checks: Vec<(String, usize)> = Vec::new();
        for (token_id, queue) in self.orders.iter_mut() {
            for (idx, order) in queue.iter_mut().enumerate() {
                if order.is_sentinel() {
                    continue;
                }
                if let Some(r) = remote_by_id.get(order.order_id.as_str()) {
                    order.last_status_check_at = Utc::now();
                    if r.matched_size > order.matched_size {
                        let delta = r.matched_size - order.matched_size;
                        order.matched_size = r.matched_size;
                        on_fill(order, delta);
                    }
                    if is_terminal_status(&r.status) || order.is_fully_matched() {
                        drop_list.push((token_id.clone(), idx));
                    }
                } else {
                    fallback_checks.push((token_id.clone(), idx));
                }
            }
        }
        self.drop_indices(drop_list);

        for (token_id, idx) in fallback_checks {
            let order_id = self
                .orders
                .get(&token_id)
                .and_then(|q| q.get(idx))
                .map(|o| o.order_id.clone());
            let Some(order_id) = order_id else { continue };
            if let Ok(status) = self.clob.get_order(&order_id).await {
                if let Some(order) = self.orders.get_mut(&token_id).and_then(|q| q.get_mut(idx)) {
                    order.last_status_check_at = Utc::now();
                    if status.matched_size > order.matched_size {
                        let delta = status.matched_size - order.matched_size;
                        order.matched_size = status.matched_size;
                        on_fill(order, delta);
                    }
                    if is_terminal_status(&status.status) || order.is_fully_matched() {
                        self.drop_indices(vec![(token_id.clone(), idx)]);
                    }
                }
            }
        }
    }

    /// Dry-run fill model (`spec.md` §4.4 item (a)): advances `matched_size`
    /// for resting GTC orders whose price crosses the live top-of-book,
    /// consuming at most the liquidity available at that level per tick.
    /// `top_of_book` is expected to serve already-prefetched data for this
    /// tick (no network I/O here). Sentinels and FOK orders are skipped —
    /// FOK either fills or is rejected at placement and never rests.
    pub async fn simulate_fills(
        &mut self,
        mut top_of_book: impl FnMut(&str) -> Option<TopOfBook>,
        mut on_fill: impl FnMut(&OrderState, Decimal),
    ) {
        if !self.dry_run {
            return;
        }
        let mut drop_list: Vec<(String, usize)> = Vec::new();
        for (token_id, queue) in self.orders.iter_mut() {
            if queue.is_empty() {
                continue;
            }
            let Some(tob) = top_of_book(token_id) else { continue };
            for (idx, order) in queue.iter_mut().enumerate() {
                if order.is_sentinel() || order.kind == OrderKind::Fok || order.is_fully_matched() {
                    continue;
                }
                let (crosses, available) = match order.side {
                    OrderSide::Buy => (
                        tob.best_ask.map(|ask| ask <= order.price).unwrap_or(false),
                        tob.best_ask_size.unwrap_or(Decimal::ZERO),
                    ),
                    OrderSide::Sell => (
                        tob.best_bid.map(|bid| bid >= order.price).unwrap_or(false),
                        tob.best_bid_size.unwrap_or(Decimal::ZERO),
                    ),
                };
                if !crosses {
                    continue;
                }
                let fill_amount = order.remaining().min(available);
                if fill_amount <= Decimal::ZERO {
                    continue;
                }
                order.matched_size += fill_amount;
                order.consumed_crossing += fill_amount;
                order.last_status_check_at = Utc::now();
                on_fill(order, fill_amount);
                if order.is_fully_matched() {
                    drop_list.push((token_id.clone(), idx));
                }
            }
        }
        self.drop_indices(drop_list);
    }

    /// Cancels the oldest order on a token. In live mode, first re-checks
    /// remote status so a just-arrived fill is dispatched before cancel; if
    /// already fully matched, skips the cancel call entirely.
    pub async fn cancel_order(
        &mut self,
        token_id: &str,
        reason: CancelReason,
        mut on_fill: impl FnMut(&OrderState, Decimal),
    ) {
        let Some(queue) = self.orders.get_mut(token_id) else { return };
        if queue.is_empty() {
            return;
        }
        let mut order = queue.remove(0);
        if queue.is_empty() {
            self.orders.remove(token_id);
        }

        if order.is_sentinel() {
            return;
        }

        if !self.dry_run {
            if let Ok(status) = self.clob.get_order(&order.order_id).await {
                if status.matched_size > order.matched_size {
                    let delta = status.matched_size - order.matched_size;
                    order.matched_size = status.matched_size;
                    on_fill(&order, delta);
                }
            }
            if order.is_fully_matched() {
                debug!(token_id, order_id = %order.order_id, "order already fully matched, skipping cancel call");
                return;
            }
            if let Err(e) = self.clob.cancel(&order.order_id).await {
                warn!(token_id, order_id = %order.order_id, error = %e, "cancel call failed");
            }
        }
        info!(token_id, order_id = %order.order_id, reason = reason.as_str(), "order cancelled");
    }

    /// Cancels both UP and DOWN orders for a market's token ids.
    pub async fn cancel_market_orders(
        &mut self,
        up_token_id: &str,
        down_token_id: &str,
        reason: CancelReason,
        mut on_fill: impl FnMut(&OrderState, Decimal),
    ) {
        while !self.orders_for(up_token_id).is_empty() {
            self.cancel_order(up_token_id, reason, &mut on_fill).await;
        }
        while !self.orders_for(down_token_id).is_empty() {
            self.cancel_order(down_token_id, reason, &mut on_fill).await;
        }
    }

    /// Drains every tracked order (used on shutdown).
    pub async fn cancel_all(&mut self, reason: CancelReason) {
        let token_ids: Vec<String> = self.orders.keys().cloned().collect();
        for token_id in token_ids {
            while !self.orders_for(&token_id).is_empty() {
                self.cancel_order(&token_id, reason, |_, _| {}).await;
            }
        }
        if !self.dry_run {
            if let Err(e) = self.clob.cancel_all().await {
                warn!(error = %e, "cancel_all call failed");
            }
        }
    }

    /// Cancels any order older than `STALE_ORDER_TIMEOUT`.
    pub async fn cancel_stale(&mut self, now: DateTime<Utc>) {
        let stale: Vec<String> = self
            .orders
            .iter()
            .filter(|(_, q)| q.iter().any(|o| now - o.placed_at > STALE_ORDER_TIMEOUT))
            .map(|(t, _)| t.clone())
            .collect();
        for token_id in stale {
            self.cancel_order(&token_id, CancelReason::StaleTimeout, |_, _| {})
                .await;
        }
    }

    /// Periodic reconciliation: fetches all open remote orders; upgrades
    /// local sentinels matching by token id with the real order id; logs
    /// any remote order untracked locally as an orphan.
    pub async fn reconcile(&mut self) {
        if self.dry_run {
            return;
        }
        let remote = match self.clob.get_orders().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "reconciliation fetch failed");
                return;
            }
        };

        let mut claimed: std::collections::HashSet<String> = std::collections::HashSet::new();
        for (token_id, queue) in self.orders.iter_mut() {
            for order in queue.iter_mut() {
                if !order.is_sentinel() {
                    claimed.insert(order.order_id.clone());
                    continue;
                }
                if let Some(r) = remote
                    .iter()
                    .find(|r| &r.asset_id == token_id && !claimed.contains(&r.order_id))
                {
                    order.order_id = r.order_id.clone();
                    order.matched_size = r.matched_size;
                    claimed.insert(r.order_id.clone());
                    info!(token_id, order_id = %r.order_id, "sentinel upgraded via reconciliation");
                }
            }
        }

        for r in &remote {
            if !claimed.contains(&r.order_id) {
                warn!(order_id = %r.order_id, asset_id = %r.asset_id, "orphan remote order not tracked locally");
            }
        }
    }

    fn drop_indices(&mut self, mut drops: Vec<(String, usize)>) {
        drops.sort_by(|a, b| b.1.cmp(&a.1));
        for (token_id, idx) in drops {
            if let Some(queue) = self.orders.get_mut(&token_id) {
                if idx < queue.len() {
                    queue.remove(idx);
                }
                if queue.is_empty() {
                    self.orders.remove(&token_id);
                }
            }
        }
    }
}

/// Polymarket's minimum notional for a marketable FOK BUY order, per
/// `examples/original_source/src/shared/order_mgr.py`'s `min_notional =
/// Decimal("1")`.
const FOK_MIN_NOTIONAL: Decimal = Decimal::ONE;

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Rounds a FOK marketable order's size to the tick that keeps `price*size`
/// at exactly 2 decimal places, then bumps to meet the minimum notional.
/// SELL-side can't bump and is rejected (returns `rejected=true`) if still
/// below minimum, matching
/// `examples/original_source/src/shared/order_mgr.py`'s
/// `step = Decimal(100 // gcd(int(price*100), 100)) / Decimal(100)`.
fn round_for_fok(price: Decimal, size: Decimal, side: OrderSide) -> (Decimal, bool) {
    if price <= Decimal::ZERO {
        return (size, false);
    }
    let cents = (price * Decimal::ONE_HUNDRED).trunc().to_i64().unwrap_or(0);
    let g = gcd(cents, 100).max(1);
    let step = Decimal::new(100 / g, 0) / Decimal::ONE_HUNDRED;

    let rounded = (size / step).trunc() * step;
    if rounded <= Decimal::ZERO {
        return (Decimal::ZERO, true);
    }

    let notional = price * rounded;
    if notional >= FOK_MIN_NOTIONAL {
        return (rounded, false);
    }

    match side {
        OrderSide::Buy => {
            let bumped = (FOK_MIN_NOTIONAL / price / step).ceil() * step;
            (bumped, false)
        }
        OrderSide::Sell => (rounded, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::complete_set::exchange::fake::FakeClobClient;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn manager(dry_run: bool) -> OrderManager<FakeClobClient> {
        OrderManager::new(Arc::new(FakeClobClient::default()), dry_run)
    }

    #[test]
    fn round_for_fok_bumps_buy_to_one_dollar_notional() {
        // $0.40 x 2 = $0.80 notional, below the $1 minimum; BUY bumps up.
        let (size, rejected) = round_for_fok(dec!(0.40), dec!(2), OrderSide::Buy);
        assert!(!rejected);
        assert!(price_times_size_is_at_least_one_dollar(dec!(0.40), size));
        assert!(dec!(0.40) * size >= Decimal::ONE);
    }

    #[test]
    fn round_for_fok_rejects_sell_below_one_dollar_notional() {
        let (_, rejected) = round_for_fok(dec!(0.40), dec!(2), OrderSide::Sell);
        assert!(rejected);
    }

    #[test]
    fn round_for_fok_accepts_size_already_at_one_dollar_notional() {
        // $0.50 x 2 = $1.00 exactly, at the boundary: no bump, no rejection.
        let (size, rejected) = round_for_fok(dec!(0.50), dec!(2), OrderSide::Sell);
        assert!(!rejected);
        assert_eq!(size, dec!(2));
    }

    #[test]
    fn round_for_fok_uses_gcd_tick_for_odd_priced_shares() {
        // price=0.37 -> cents=37, gcd(37,100)=1 -> step=1 whole share (any
        // fractional share would push price*size past 2 decimal places).
        let (size, _) = round_for_fok(dec!(0.37), dec!(10.9), OrderSide::Buy);
        assert_eq!(size, dec!(10));

        // price=0.40 -> cents=40, gcd(40,100)=20 -> step=0.05.
        let (size, _) = round_for_fok(dec!(0.40), dec!(10.07), OrderSide::Buy);
        assert_eq!(size, dec!(10.05));
    }

    fn price_times_size_is_at_least_one_dollar(price: Decimal, size: Decimal) -> bool {
        price * size >= Decimal::ONE
    }

    #[tokio::test]
    async fn place_order_tracks_state_on_success() {
        let mut mgr = manager(true);
        let outcome = mgr
            .place_order(
                "m1",
                "tok1",
                Side::Up,
                dec!(0.40),
                dec!(100),
                "entry",
                OrderKind::Gtc,
                OrderSide::Buy,
                Decimal::ZERO,
                None,
            )
            .await;
        assert!(matches!(outcome, PlacementOutcome::Placed { .. }));
        assert_eq!(mgr.orders_for("tok1").len(), 1);
    }

    #[tokio::test]
    async fn placement_rejection_inserts_sentinel_for_gtc_non_balance_error() {
        let clob = Arc::new(FakeClobClient::default());
        *clob.reject_next.lock().unwrap() = Some("order too aggressive".to_string());
        let mut mgr = OrderManager::new(clob, true);
        let outcome = mgr
            .place_order(
                "m1",
                "tok1",
                Side::Up,
                dec!(0.40),
                dec!(100),
                "entry",
                OrderKind::Gtc,
                OrderSide::Buy,
                Decimal::ZERO,
                None,
            )
            .await;
        assert!(matches!(
            outcome,
            PlacementOutcome::Failed {
                sentinel_inserted: true,
                ..
            }
        ));
        assert!(mgr.orders_for("tok1")[0].is_sentinel());
    }

    #[tokio::test]
    async fn placement_rejection_no_sentinel_for_balance_error() {
        let clob = Arc::new(FakeClobClient::default());
        *clob.reject_next.lock().unwrap() = Some("insufficient balance".to_string());
        let mut mgr = OrderManager::new(clob, true);
        let outcome = mgr
            .place_order(
                "m1",
                "tok1",
                Side::Up,
                dec!(0.40),
                dec!(100),
                "entry",
                OrderKind::Gtc,
                OrderSide::Buy,
                Decimal::ZERO,
                None,
            )
            .await;
        assert!(matches!(
            outcome,
            PlacementOutcome::Failed {
                sentinel_inserted: false,
                ..
            }
        ));
        assert!(mgr.orders_for("tok1").is_empty());
    }

    #[tokio::test]
    async fn placement_rejection_no_sentinel_for_fok() {
        let clob = Arc::new(FakeClobClient::default());
        *clob.reject_next.lock().unwrap() = Some("crossed".to_string());
        let mut mgr = OrderManager::new(clob, true);
        let outcome = mgr
            .place_order(
                "m1",
                "tok1",
                Side::Up,
                dec!(0.40),
                dec!(100),
                "hedge",
                OrderKind::Fok,
                OrderSide::Buy,
                Decimal::ZERO,
                None,
            )
            .await;
        assert!(matches!(
            outcome,
            PlacementOutcome::Failed {
                sentinel_inserted: false,
                ..
            }
        ));
        assert!(mgr.orders_for("tok1").is_empty());
    }

    #[tokio::test]
    async fn cancel_order_pops_oldest_first() {
        let clob = Arc::new(FakeClobClient::default());
        let mut mgr = OrderManager::new(clob, true);
        mgr.place_order(
            "m1", "tok1", Side::Up, dec!(0.40), dec!(100), "a", OrderKind::Gtc, OrderSide::Buy,
            Decimal::ZERO, None,
        )
        .await;
        mgr.place_order(
            "m1", "tok1", Side::Up, dec!(0.41), dec!(50), "b", OrderKind::Gtc, OrderSide::Buy,
            Decimal::ZERO, None,
        )
        .await;
        assert_eq!(mgr.orders_for("tok1").len(), 2);
        let first_price = mgr.orders_for("tok1")[0].price;
        mgr.cancel_order("tok1", CancelReason::Chase, |_, _| {}).await;
        assert_eq!(mgr.orders_for("tok1").len(), 1);
        assert_ne!(mgr.orders_for("tok1")[0].price, first_price);
    }

    #[tokio::test]
    async fn poll_fills_dispatches_delta_and_drops_on_full_match() {
        let clob = Arc::new(FakeClobClient::default());
        let mut mgr = OrderManager::new(clob.clone(), false);
        let outcome = mgr
            .place_order(
                "m1", "tok1", Side::Up, dec!(0.40), dec!(100), "a", OrderKind::Gtc, OrderSide::Buy,
                Decimal::ZERO, None,
            )
            .await;
        let PlacementOutcome::Placed { order_id } = outcome else { panic!() };
        clob.fill(&order_id, dec!(100), "MATCHED");

        let mut total_delta = Decimal::ZERO;
        mgr.poll_fills(|_, delta| total_delta += delta).await;
        assert_eq!(total_delta, dec!(100));
        assert!(mgr.orders_for("tok1").is_empty());
    }

    #[tokio::test]
    async fn simulate_fills_consumes_crossing_liquidity_up_to_available_size() {
        let mut mgr = manager(true);
        mgr.place_order(
            "m1", "tok1", Side::Up, dec!(0.40), dec!(100), "entry", OrderKind::Gtc, OrderSide::Buy,
            Decimal::ZERO, None,
        )
        .await;

        let tob = TopOfBook {
            best_bid: Some(dec!(0.38)),
            best_ask: Some(dec!(0.39)),
            best_bid_size: Some(dec!(500)),
            best_ask_size: Some(dec!(30)),
            updated_at: Utc::now(),
        };
        let mut total_delta = Decimal::ZERO;
        mgr.simulate_fills(|_| Some(tob), |_, delta| total_delta += delta).await;
        assert_eq!(total_delta, dec!(30));
        assert_eq!(mgr.orders_for("tok1")[0].matched_size, dec!(30));
        assert_eq!(mgr.orders_for("tok1")[0].consumed_crossing, dec!(30));
    }

    #[tokio::test]
    async fn simulate_fills_skips_when_ask_does_not_cross() {
        let mut mgr = manager(true);
        mgr.place_order(
            "m1", "tok1", Side::Up, dec!(0.40), dec!(100), "entry", OrderKind::Gtc, OrderSide::Buy,
            Decimal::ZERO, None,
        )
        .await;
        let tob = TopOfBook {
            best_bid: Some(dec!(0.44)),
            best_ask: Some(dec!(0.45)),
            best_bid_size: Some(dec!(500)),
            best_ask_size: Some(dec!(500)),
            updated_at: Utc::now(),
        };
        let mut total_delta = Decimal::ZERO;
        mgr.simulate_fills(|_| Some(tob), |_, delta| total_delta += delta).await;
        assert_eq!(total_delta, Decimal::ZERO);
    }

    #[test]
    fn stale_timeout_is_two_hours() {
        assert_eq!(STALE_ORDER_TIMEOUT, chrono::Duration::hours(2));
    }
}
