//! Merge/redeem settlement coordination (`spec.md` §4.7).
//!
//! Grounded in `adapters/transaction_manager.rs`'s gas-cap-before-sign and
//! receipt-wait shape and `platform/contracts.rs`'s CTF/NegRisk call
//! encoding, narrowed to the `OnChainClient` contract in `exchange.rs`.
//! Per-slug in-flight serialization (`spec.md` §5/§4.7) is enforced by
//! `SettlementCoordinator` itself via an in-memory set rather than the
//! caller — at most one submission per slug is ever outstanding.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::error::Result;

use super::exchange::OnChainClient;
use super::models::{MarketInventory, PendingRedemption};

/// Consecutive merge failures before a slug stops retrying (`spec.md` §4.7/§7).
pub const MAX_MERGE_FAILURES: u32 = 5;
/// Redeem attempts before a `PendingRedemption` is dropped (`spec.md` §4.7).
pub const MAX_REDEEM_ATTEMPTS: u32 = 3;
pub const REDEEM_BACKOFF: chrono::Duration = chrono::Duration::seconds(30);

#[derive(Debug, Clone, Copy, Default)]
struct MergeState {
    last_attempt_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

/// Outcome of one merge attempt this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Merge completed; carries the merged share amount.
    Merged(Decimal),
    /// Below minimum merge shares or on-chain balance; not an error, retry later.
    SkippedBelowMinimum,
    /// Cooldown or pre-resolution buffer still active.
    Skipped(&'static str),
    /// Gas above cap, missing receipt, or call failure; counts against the
    /// consecutive-failure cap.
    Failed(String),
    /// Too many consecutive failures — give up on this slug.
    Abandoned,
}

/// Outcome of one redeem attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemOutcome {
    Redeemed,
    NotYetEligible,
    Failed(String),
    Dropped,
}

/// Coordinates on-chain merge and redeem submissions, one in flight per
/// slug at a time.
pub struct SettlementCoordinator<O> {
    chain: Arc<O>,
    dry_run: bool,
    merge_cooldown: chrono::Duration,
    min_merge_shares: Decimal,
    max_gas_price_gwei: Decimal,
    merge_state: HashMap<String, MergeState>,
    in_flight: HashSet<String>,
}

impl<O: OnChainClient> SettlementCoordinator<O> {
    pub fn new(
        chain: Arc<O>,
        dry_run: bool,
        merge_cooldown_sec: u64,
        min_merge_shares: Decimal,
        max_gas_price_gwei: Decimal,
    ) -> Self {
        Self {
            chain,
            dry_run,
            merge_cooldown: chrono::Duration::seconds(merge_cooldown_sec as i64),
            min_merge_shares,
            max_gas_price_gwei,
            merge_state: HashMap::new(),
            in_flight: HashSet::new(),
        }
    }

    pub fn is_abandoned(&self, slug: &str) -> bool {
        self.merge_state
            .get(slug)
            .map(|s| s.consecutive_failures >= MAX_MERGE_FAILURES)
            .unwrap_or(false)
    }

    /// Attempts to merge a hedged pair for `slug`. `inv` is the local
    /// inventory (used only to decide whether it's worth trying — the
    /// actual merge amount is the minimum of the *on-chain* balances, read
    /// fresh here, never the local inventory which may exceed what's
    /// actually settled).
    pub async fn try_merge(
        &mut self,
        slug: &str,
        condition_id: &str,
        neg_risk: bool,
        up_token_id: &str,
        down_token_id: &str,
        inv: &MarketInventory,
        seconds_to_end: i64,
        no_new_orders_sec: i64,
        now: DateTime<Utc>,
    ) -> MergeOutcome {
        if self.in_flight.contains(slug) {
            return MergeOutcome::Skipped("in_flight");
        }
        if inv.hedged() < self.min_merge_shares {
            return MergeOutcome::SkippedBelowMinimum;
        }
        if seconds_to_end < no_new_orders_sec {
            return MergeOutcome::Skipped("pre_resolution_buffer");
        }
        let state = self.merge_state.entry(slug.to_string()).or_default();
        if state.consecutive_failures >= MAX_MERGE_FAILURES {
            return MergeOutcome::Abandoned;
        }
        if let Some(last) = state.last_attempt_at {
            if now - last < self.merge_cooldown {
                return MergeOutcome::Skipped("cooldown");
            }
        }

        self.in_flight.insert(slug.to_string());
        let result = self
            .attempt_merge(condition_id, neg_risk, up_token_id, down_token_id)
            .await;
        self.in_flight.remove(slug);

        let state = self.merge_state.entry(slug.to_string()).or_default();
        state.last_attempt_at = Some(now);
        match result {
            Ok(Some(amount)) => {
                state.consecutive_failures = 0;
                info!(slug, %amount, "merge succeeded");
                MergeOutcome::Merged(amount)
            }
            Ok(None) => {
                debug!(slug, "on-chain balance below merge minimum, will retry");
                MergeOutcome::SkippedBelowMinimum
            }
            Err(e) => {
                state.consecutive_failures += 1;
                let failures = state.consecutive_failures;
                if failures >= MAX_MERGE_FAILURES {
                    error!(slug, error = %e, failures, "merge abandoned after consecutive failures");
                    MergeOutcome::Abandoned
                } else {
                    warn!(slug, error = %e, failures, "merge attempt failed, will retry after cooldown");
                    MergeOutcome::Failed(e.to_string())
                }
            }
        }
    }

    async fn attempt_merge(
        &self,
        condition_id: &str,
        neg_risk: bool,
        up_token_id: &str,
        down_token_id: &str,
    ) -> Result<Option<Decimal>> {
        let gas = self.chain.current_gas_price_gwei().await?;
        if gas > self.max_gas_price_gwei {
            return Err(crate::error::PloyError::GasAboveCap(format!(
                "{} > cap {}",
                gas, self.max_gas_price_gwei
            )));
        }

        let up_balance = self.chain.erc1155_balance(up_token_id).await?;
        let down_balance = self.chain.erc1155_balance(down_token_id).await?;
        let mergeable = up_balance.min(down_balance);
        if mergeable < self.min_merge_shares {
            return Ok(None);
        }

        if !self.chain.is_approved_for_all(neg_risk).await? {
            self.chain.set_approval_for_all(neg_risk).await?;
        }

        if self.dry_run {
            return Ok(Some(mergeable));
        }

        self.chain
            .merge_positions(condition_id, neg_risk, mergeable)
            .await?;
        Ok(Some(mergeable))
    }

    /// Queues a market (no longer active) for redemption once eligible.
    pub fn queue_redemption(
        &self,
        slug: &str,
        condition_id: &str,
        neg_risk: bool,
        end_time: DateTime<Utc>,
        buffer: chrono::Duration,
    ) -> PendingRedemption {
        PendingRedemption {
            slug: slug.to_string(),
            condition_id: condition_id.to_string(),
            neg_risk,
            eligible_at: end_time + buffer,
            attempts: 0,
            last_attempt_at: None,
        }
    }

    /// Attempts to redeem one pending redemption. Returns the new attempt
    /// count via the mutated `pending.attempts` and whether it should be
    /// dropped.
    pub async fn try_redeem(
        &mut self,
        pending: &mut PendingRedemption,
        up_token_id: &str,
        down_token_id: &str,
        now: DateTime<Utc>,
    ) -> RedeemOutcome {
        if now < pending.eligible_at {
            return RedeemOutcome::NotYetEligible;
        }
        if let Some(last) = pending.last_attempt_at {
            if now - last < REDEEM_BACKOFF {
                return RedeemOutcome::NotYetEligible;
            }
        }
        if self.in_flight.contains(&pending.slug) {
            return RedeemOutcome::NotYetEligible;
        }

        self.in_flight.insert(pending.slug.clone());
        let result = self
            .attempt_redeem(&pending.condition_id, pending.neg_risk, up_token_id, down_token_id)
            .await;
        self.in_flight.remove(&pending.slug);

        pending.attempts += 1;
        pending.last_attempt_at = Some(now);
        match result {
            Ok(()) => {
                info!(slug = %pending.slug, "redeem succeeded");
                RedeemOutcome::Redeemed
            }
            Err(e) => {
                if pending.attempts >= MAX_REDEEM_ATTEMPTS {
                    error!(slug = %pending.slug, error = %e, attempts = pending.attempts, "redeem dropped after max attempts");
                    RedeemOutcome::Dropped
                } else {
                    warn!(slug = %pending.slug, error = %e, attempts = pending.attempts, "redeem attempt failed, will retry");
                    RedeemOutcome::Failed(e.to_string())
                }
            }
        }
    }

    async fn attempt_redeem(
        &self,
        condition_id: &str,
        neg_risk: bool,
        up_token_id: &str,
        down_token_id: &str,
    ) -> Result<()> {
        let gas = self.chain.current_gas_price_gwei().await?;
        if gas > self.max_gas_price_gwei {
            return Err(crate::error::PloyError::GasAboveCap(format!(
                "{} > cap {}",
                gas, self.max_gas_price_gwei
            )));
        }
        let up_balance = self.chain.erc1155_balance(up_token_id).await?;
        let down_balance = self.chain.erc1155_balance(down_token_id).await?;
        let amount = up_balance.max(down_balance);

        if self.dry_run {
            return Ok(());
        }
        self.chain.redeem_positions(condition_id, neg_risk, amount).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::complete_set::exchange::fake::FakeOnChainClient;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn coordinator(chain: Arc<FakeOnChainClient>) -> SettlementCoordinator<FakeOnChainClient> {
        SettlementCoordinator::new(chain, true, 15, dec!(5), dec!(300))
    }

    fn inv_hedged(n: Decimal) -> MarketInventory {
        let mut inv = MarketInventory::default();
        inv.up_shares = n;
        inv.down_shares = n;
        inv.up_cost = n * dec!(0.40);
        inv.down_cost = n * dec!(0.55);
        inv
    }

    #[tokio::test]
    async fn merge_uses_onchain_balance_not_local_inventory() {
        let chain = Arc::new(FakeOnChainClient::default());
        chain.balances.lock().unwrap().insert("up".to_string(), dec!(178));
        chain.balances.lock().unwrap().insert("down".to_string(), dec!(178));
        let mut coord = coordinator(chain);
        let inv = inv_hedged(dec!(500)); // local inventory overstates the balance
        let outcome = coord
            .try_merge("m1", "cond1", false, "up", "down", &inv, 400, 20, Utc::now())
            .await;
        assert_eq!(outcome, MergeOutcome::Merged(dec!(178)));
    }

    #[tokio::test]
    async fn merge_skipped_below_minimum_is_not_a_failure() {
        let chain = Arc::new(FakeOnChainClient::default());
        chain.balances.lock().unwrap().insert("up".to_string(), dec!(2));
        chain.balances.lock().unwrap().insert("down".to_string(), dec!(2));
        let mut coord = coordinator(chain);
        let inv = inv_hedged(dec!(10));
        let outcome = coord
            .try_merge("m1", "cond1", false, "up", "down", &inv, 400, 20, Utc::now())
            .await;
        assert_eq!(outcome, MergeOutcome::SkippedBelowMinimum);
        assert!(!coord.is_abandoned("m1"));
    }

    #[tokio::test]
    async fn merge_respects_pre_resolution_buffer() {
        let chain = Arc::new(FakeOnChainClient::default());
        let mut coord = coordinator(chain);
        let inv = inv_hedged(dec!(10));
        let outcome = coord
            .try_merge("m1", "cond1", false, "up", "down", &inv, 10, 20, Utc::now())
            .await;
        assert_eq!(outcome, MergeOutcome::Skipped("pre_resolution_buffer"));
    }

    #[tokio::test]
    async fn merge_abandons_after_five_consecutive_failures() {
        let chain = Arc::new(FakeOnChainClient::default());
        chain.balances.lock().unwrap().insert("up".to_string(), dec!(100));
        chain.balances.lock().unwrap().insert("down".to_string(), dec!(100));
        *chain.gas_price_gwei.lock().unwrap() = dec!(9999); // forces GasAboveCap failures
        let mut coord = SettlementCoordinator::new(chain, true, 0, dec!(5), dec!(300));
        let inv = inv_hedged(dec!(100));
        let mut last = MergeOutcome::SkippedBelowMinimum;
        for _ in 0..MAX_MERGE_FAILURES {
            last = coord
                .try_merge("m1", "cond1", false, "up", "down", &inv, 400, 20, Utc::now())
                .await;
        }
        assert_eq!(last, MergeOutcome::Abandoned);
        assert!(coord.is_abandoned("m1"));
    }

    #[tokio::test]
    async fn redeem_drops_after_three_failures() {
        let chain = Arc::new(FakeOnChainClient::default());
        *chain.gas_price_gwei.lock().unwrap() = dec!(9999);
        let mut coord = SettlementCoordinator::new(chain, false, 15, dec!(5), dec!(300));
        let mut pending = PendingRedemption {
            slug: "m1".to_string(),
            condition_id: "cond1".to_string(),
            neg_risk: false,
            eligible_at: Utc::now() - chrono::Duration::seconds(1),
            attempts: 0,
            last_attempt_at: None,
        };
        let mut now = Utc::now();
        let mut last = RedeemOutcome::NotYetEligible;
        for _ in 0..MAX_REDEEM_ATTEMPTS {
            last = coord.try_redeem(&mut pending, "up", "down", now).await;
            now += REDEEM_BACKOFF + chrono::Duration::seconds(1);
        }
        assert_eq!(last, RedeemOutcome::Dropped);
        assert_eq!(pending.attempts, MAX_REDEEM_ATTEMPTS);
    }
}
