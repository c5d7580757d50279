//! Configuration for the complete-set arbitrage engine.
//!
//! Grounded in `config.rs`'s `#[serde(default = "default_fn")]` + `validate()`
//! pattern (see `EventEdgeAgentConfig`), layered through the same
//! `config::Environment::with_prefix("PLOY")` mechanism as `AppConfig::load_from`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// Settings governing one running instance of the complete-set engine.
/// Field set follows `SPEC_FULL.md` §6 verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteSetConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_bankroll_usd")]
    pub bankroll_usd: Decimal,
    #[serde(default = "default_max_total_bankroll_fraction")]
    pub max_total_bankroll_fraction: Decimal,
    #[serde(default = "default_max_order_bankroll_fraction")]
    pub max_order_bankroll_fraction: Decimal,

    #[serde(default = "default_order_fraction")]
    pub order_fraction: Decimal,

    #[serde(default = "default_min_edge")]
    pub min_edge: Decimal,
    #[serde(default = "default_min_merge_shares")]
    pub min_merge_shares: Decimal,
    #[serde(default = "default_min_merge_profit_usd")]
    pub min_merge_profit_usd: Decimal,
    #[serde(default = "default_merge_cooldown_sec")]
    pub merge_cooldown_sec: u64,
    #[serde(default = "default_no_new_orders_sec")]
    pub no_new_orders_sec: i64,

    #[serde(default = "default_min_seconds_to_end")]
    pub min_seconds_to_end: i64,
    #[serde(default = "default_max_seconds_to_end")]
    pub max_seconds_to_end: i64,

    #[serde(default = "default_min_entry_price")]
    pub min_entry_price: Decimal,
    #[serde(default = "default_max_entry_price")]
    pub max_entry_price: Decimal,

    #[serde(default = "default_max_hedge_chase_cents")]
    pub max_hedge_chase_cents: Decimal,
    #[serde(default = "default_abandon_edge_threshold")]
    pub abandon_edge_threshold: Decimal,
    #[serde(default = "default_min_btc_ticks")]
    pub min_btc_ticks: u32,

    #[serde(default = "default_refresh_millis")]
    pub refresh_millis: u64,
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<String>,

    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: Decimal,
    #[serde(default = "default_matic_price_usd")]
    pub matic_price_usd: Decimal,
    #[serde(default = "default_redeem_delay_sec")]
    pub redeem_delay_sec: u64,
    #[serde(default = "default_redeem_max_attempts")]
    pub redeem_max_attempts: u32,

    #[serde(default)]
    pub compound: bool,
    #[serde(default = "default_compound_interval_sec")]
    pub compound_interval_sec: u64,

    #[serde(default = "default_grid_step")]
    pub grid_step: Decimal,
    #[serde(default = "default_grid_sizes")]
    pub grid_sizes: Vec<Decimal>,

    #[serde(default)]
    pub stop_hunt_enabled: bool,
    #[serde(default = "default_stop_hunt_move_pct")]
    pub stop_hunt_move_pct: Decimal,
    #[serde(default = "default_stop_hunt_reversion_secs")]
    pub stop_hunt_reversion_secs: i64,
    #[serde(default = "default_sh_entry_start_sec")]
    pub sh_entry_start_sec: i64,
    #[serde(default = "default_sh_entry_end_sec")]
    pub sh_entry_end_sec: i64,
    #[serde(default = "default_max_range_pct")]
    pub max_range_pct: Decimal,

    #[serde(default)]
    pub mr_enabled: bool,
    #[serde(default = "default_mr_deviation_pct")]
    pub mr_deviation_pct: Decimal,

    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    #[serde(default = "default_volume_short_sec")]
    pub volume_short_sec: i64,
    #[serde(default = "default_volume_medium_sec")]
    pub volume_medium_sec: i64,

    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
}

impl CompleteSetConfig {
    /// Collects every violated invariant instead of failing fast on the
    /// first one, matching `EventEdgeAgentConfig::validate`.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.bankroll_usd <= Decimal::ZERO {
            errors.push(format!(
                "bankroll_usd must be > 0, got {}",
                self.bankroll_usd
            ));
        }
        if !(Decimal::ZERO..=Decimal::ONE).contains(&self.max_total_bankroll_fraction) {
            errors.push(format!(
                "max_total_bankroll_fraction must be in [0, 1], got {}",
                self.max_total_bankroll_fraction
            ));
        }
        if !(Decimal::ZERO..=Decimal::ONE).contains(&self.max_order_bankroll_fraction) {
            errors.push(format!(
                "max_order_bankroll_fraction must be in [0, 1], got {}",
                self.max_order_bankroll_fraction
            ));
        }
        if self.max_order_bankroll_fraction > self.max_total_bankroll_fraction {
            errors.push(
                "max_order_bankroll_fraction cannot exceed max_total_bankroll_fraction"
                    .to_string(),
            );
        }
        if self.min_edge < Decimal::ZERO {
            errors.push(format!("min_edge must be >= 0, got {}", self.min_edge));
        }
        if self.min_merge_shares <= Decimal::ZERO {
            errors.push(format!(
                "min_merge_shares must be > 0, got {}",
                self.min_merge_shares
            ));
        }
        if self.min_entry_price <= Decimal::ZERO || self.min_entry_price >= Decimal::ONE {
            errors.push(format!(
                "min_entry_price must be in (0, 1), got {}",
                self.min_entry_price
            ));
        }
        if self.max_entry_price <= Decimal::ZERO || self.max_entry_price >= Decimal::ONE {
            errors.push(format!(
                "max_entry_price must be in (0, 1), got {}",
                self.max_entry_price
            ));
        }
        if self.min_entry_price >= self.max_entry_price {
            errors.push("min_entry_price must be < max_entry_price".to_string());
        }
        if self.min_seconds_to_end >= self.max_seconds_to_end {
            errors.push("min_seconds_to_end must be < max_seconds_to_end".to_string());
        }
        if self.abandon_edge_threshold < Decimal::ZERO {
            errors.push("abandon_edge_threshold must be >= 0".to_string());
        }
        if self.refresh_millis == 0 {
            errors.push("refresh_millis must be > 0".to_string());
        }
        if self.assets.is_empty() {
            errors.push("assets must not be empty".to_string());
        }
        let valid_timeframes = ["5m", "15m", "1h"];
        for tf in &self.timeframes {
            if !valid_timeframes.contains(&tf.as_str()) {
                errors.push(format!(
                    "timeframes entries must be one of {:?}, got \"{}\"",
                    valid_timeframes, tf
                ));
            }
        }
        if self.max_gas_price_gwei <= Decimal::ZERO {
            errors.push("max_gas_price_gwei must be > 0".to_string());
        }
        if self.grid_sizes.is_empty() {
            errors.push("grid_sizes must not be empty".to_string());
        }
        if self.volume_short_sec <= 0 || self.volume_medium_sec <= self.volume_short_sec {
            errors.push(
                "volume_medium_sec must be > volume_short_sec and both must be > 0".to_string(),
            );
        }
        if self.chain_id == 0 {
            errors.push("chain_id must be set".to_string());
        }
        if !(Decimal::ZERO..=Decimal::ONE).contains(&self.order_fraction) {
            errors.push(format!(
                "order_fraction must be in [0, 1], got {}",
                self.order_fraction
            ));
        }
        if self.sh_entry_end_sec >= self.sh_entry_start_sec {
            errors.push("sh_entry_end_sec must be < sh_entry_start_sec".to_string());
        }
        if self.max_range_pct < Decimal::ZERO {
            errors.push("max_range_pct must be >= 0".to_string());
        }
        if self.event_bus_capacity == 0 {
            errors.push("event_bus_capacity must be > 0".to_string());
        }
        if self.retention_days <= 0 {
            errors.push("retention_days must be > 0".to_string());
        }

        errors
    }
}

impl Default for CompleteSetConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bankroll_usd: default_bankroll_usd(),
            max_total_bankroll_fraction: default_max_total_bankroll_fraction(),
            max_order_bankroll_fraction: default_max_order_bankroll_fraction(),
            order_fraction: default_order_fraction(),
            min_edge: default_min_edge(),
            min_merge_shares: default_min_merge_shares(),
            min_merge_profit_usd: default_min_merge_profit_usd(),
            merge_cooldown_sec: default_merge_cooldown_sec(),
            no_new_orders_sec: default_no_new_orders_sec(),
            min_seconds_to_end: default_min_seconds_to_end(),
            max_seconds_to_end: default_max_seconds_to_end(),
            min_entry_price: default_min_entry_price(),
            max_entry_price: default_max_entry_price(),
            max_hedge_chase_cents: default_max_hedge_chase_cents(),
            abandon_edge_threshold: default_abandon_edge_threshold(),
            min_btc_ticks: default_min_btc_ticks(),
            refresh_millis: default_refresh_millis(),
            dry_run: true,
            assets: default_assets(),
            timeframes: default_timeframes(),
            max_gas_price_gwei: default_max_gas_price_gwei(),
            matic_price_usd: default_matic_price_usd(),
            redeem_delay_sec: default_redeem_delay_sec(),
            redeem_max_attempts: default_redeem_max_attempts(),
            compound: false,
            compound_interval_sec: default_compound_interval_sec(),
            grid_step: default_grid_step(),
            grid_sizes: default_grid_sizes(),
            stop_hunt_enabled: false,
            stop_hunt_move_pct: default_stop_hunt_move_pct(),
            stop_hunt_reversion_secs: default_stop_hunt_reversion_secs(),
            sh_entry_start_sec: default_sh_entry_start_sec(),
            sh_entry_end_sec: default_sh_entry_end_sec(),
            max_range_pct: default_max_range_pct(),
            mr_enabled: false,
            mr_deviation_pct: default_mr_deviation_pct(),
            event_bus_capacity: default_event_bus_capacity(),
            retention_days: default_retention_days(),
            volume_short_sec: default_volume_short_sec(),
            volume_medium_sec: default_volume_medium_sec(),
            rpc_url: default_rpc_url(),
            chain_id: default_chain_id(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_bankroll_usd() -> Decimal {
    dec!(500)
}
fn default_max_total_bankroll_fraction() -> Decimal {
    dec!(0.8)
}
fn default_max_order_bankroll_fraction() -> Decimal {
    dec!(0.1)
}
fn default_order_fraction() -> Decimal {
    dec!(0.20)
}
fn default_min_edge() -> Decimal {
    dec!(0.02)
}
fn default_min_merge_shares() -> Decimal {
    dec!(5)
}
fn default_min_merge_profit_usd() -> Decimal {
    dec!(0.05)
}
fn default_merge_cooldown_sec() -> u64 {
    15
}
fn default_no_new_orders_sec() -> i64 {
    20
}
fn default_min_seconds_to_end() -> i64 {
    15
}
fn default_max_seconds_to_end() -> i64 {
    3600
}
fn default_min_entry_price() -> Decimal {
    dec!(0.10)
}
fn default_max_entry_price() -> Decimal {
    dec!(0.48)
}
fn default_max_hedge_chase_cents() -> Decimal {
    dec!(0.03)
}
fn default_abandon_edge_threshold() -> Decimal {
    dec!(0.01)
}
fn default_min_btc_ticks() -> u32 {
    3
}
fn default_refresh_millis() -> u64 {
    750
}
fn default_assets() -> Vec<String> {
    vec!["BTC".to_string(), "ETH".to_string()]
}
fn default_timeframes() -> Vec<String> {
    vec!["5m".to_string(), "15m".to_string()]
}
fn default_max_gas_price_gwei() -> Decimal {
    dec!(300)
}
fn default_matic_price_usd() -> Decimal {
    dec!(0.50)
}
fn default_redeem_delay_sec() -> u64 {
    30
}
fn default_redeem_max_attempts() -> u32 {
    3
}
fn default_compound_interval_sec() -> u64 {
    3600
}
fn default_grid_step() -> Decimal {
    dec!(0.01)
}
fn default_grid_sizes() -> Vec<Decimal> {
    vec![dec!(25), dec!(50), dec!(100)]
}
fn default_stop_hunt_move_pct() -> Decimal {
    dec!(0.002)
}
fn default_stop_hunt_reversion_secs() -> i64 {
    20
}
fn default_sh_entry_start_sec() -> i64 {
    240
}
fn default_sh_entry_end_sec() -> i64 {
    60
}
fn default_max_range_pct() -> Decimal {
    dec!(0.02)
}
fn default_mr_deviation_pct() -> Decimal {
    dec!(0.0015)
}
fn default_event_bus_capacity() -> usize {
    1024
}
fn default_retention_days() -> i64 {
    30
}
fn default_volume_short_sec() -> i64 {
    30
}
fn default_volume_medium_sec() -> i64 {
    120
}
fn default_rpc_url() -> String {
    "https://polygon-rpc.com".to_string()
}
fn default_chain_id() -> u64 {
    137
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = CompleteSetConfig::default();
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
    }

    #[test]
    fn rejects_inverted_entry_price_band() {
        let mut cfg = CompleteSetConfig::default();
        cfg.min_entry_price = dec!(0.9);
        cfg.max_entry_price = dec!(0.1);
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.contains("min_entry_price")));
    }

    #[test]
    fn rejects_empty_assets() {
        let mut cfg = CompleteSetConfig::default();
        cfg.assets.clear();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.contains("assets")));
    }

    #[test]
    fn rejects_unknown_timeframe() {
        let mut cfg = CompleteSetConfig::default();
        cfg.timeframes.push("1d".to_string());
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.contains("timeframes")));
    }
}
