//! Stop-hunt and mean-reversion directional signals.
//!
//! Grounded in `adapters/binance_ws.rs`'s `SpotPrice::momentum`/`volatility`
//! primitives and `strategy/signal.rs`'s detector shape, generalized per
//! `SPEC_FULL.md` §4.6 into pure functions gated by window position, range,
//! cheapness, and tick count so a thinly-updated reference feed can't fire
//! on noise and a late entry can't walk into the pre-resolution buffer.

use rust_decimal::Decimal;

use super::config::CompleteSetConfig;
use super::models::TopOfBook;
use super::reference_price::{CandleState, VolumeImbalanceState};

/// A directional lean produced by one signal detector, with a human-readable
/// reason string for logging/telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalLean {
    pub side_up: bool,
    pub reason: String,
}

/// The cheap-ask threshold a side's ask must clear to be eligible for
/// entry: `(1 - min_edge) / 2`, per `spec.md` §4.6 item 4.
pub fn max_first_leg(cfg: &CompleteSetConfig) -> Decimal {
    (Decimal::ONE - cfg.min_edge) / Decimal::TWO
}

/// Shared entry gates for both stop-hunt and mean-reversion: window
/// position, pre-resolution buffer, trending-regime range, and tick count.
/// Returns `Some(reason)` for the first gate that rejects, `None` if all
/// pass.
fn common_gate(
    cfg: &CompleteSetConfig,
    candle: &CandleState,
    seconds_to_end: i64,
) -> Option<String> {
    if candle.tick_count < cfg.min_btc_ticks {
        return Some(format!("({}/{})", candle.tick_count, cfg.min_btc_ticks));
    }
    if seconds_to_end < cfg.no_new_orders_sec {
        return Some(format!(
            "in pre-resolution buffer: seconds_to_end={} < no_new_orders_sec={}",
            seconds_to_end, cfg.no_new_orders_sec
        ));
    }
    if !(cfg.sh_entry_end_sec..=cfg.sh_entry_start_sec).contains(&seconds_to_end) {
        return Some(format!(
            "outside entry window: seconds_to_end={} not in [{}, {}]",
            seconds_to_end, cfg.sh_entry_end_sec, cfg.sh_entry_start_sec
        ));
    }
    let Some(range_pct) = candle.range_pct() else {
        return Some("candle open_price is zero".to_string());
    };
    if range_pct > cfg.max_range_pct {
        return Some(format!(
            "trending regime: range_pct={:.4} > max_range_pct={:.4}",
            range_pct, cfg.max_range_pct
        ));
    }
    None
}

/// Picks a direction given volume imbalance and the two top-of-books: if
/// the imbalance is conclusive and that side is cheap, use it; otherwise
/// fall back to whichever side's ask is cheaper. Returns `None` if neither
/// side clears the cheap threshold.
fn pick_direction(
    volume: &VolumeImbalanceState,
    up_tob: &TopOfBook,
    down_tob: &TopOfBook,
    cheap_threshold: Decimal,
    imbalance_threshold: Decimal,
) -> Option<(bool, &'static str)> {
    let up_ask = up_tob.best_ask;
    let down_ask = down_tob.best_ask;
    let up_cheap = up_ask.map(|a| a <= cheap_threshold).unwrap_or(false);
    let down_cheap = down_ask.map(|a| a <= cheap_threshold).unwrap_or(false);
    if !up_cheap && !down_cheap {
        return None;
    }

    if let Some(imbalance_up) = volume.conclusive(imbalance_threshold) {
        if imbalance_up && up_cheap {
            return Some((true, "volume imbalance (up)"));
        }
        if !imbalance_up && down_cheap {
            return Some((false, "volume imbalance (down)"));
        }
    }

    match (up_ask, down_ask) {
        (Some(u), Some(d)) => {
            if u <= d {
                Some((true, "cheaper side (up)"))
            } else {
                Some((false, "cheaper side (down)"))
            }
        }
        (Some(_), None) if up_cheap => Some((true, "cheaper side (up)")),
        (None, Some(_)) if down_cheap => Some((false, "cheaper side (down)")),
        _ => None,
    }
}

/// Stop-hunt: a sharp move away from the window-open anchor, entered only
/// in the early-mid window while the range is still tight, per `spec.md`
/// §4.6. `SKIP` is represented as `Ok(None)` with `reason` carrying the
/// rejection explanation; callers log it for operator visibility.
pub fn stop_hunt_signal(
    cfg: &CompleteSetConfig,
    candle: &CandleState,
    volume: &VolumeImbalanceState,
    up_tob: &TopOfBook,
    down_tob: &TopOfBook,
    seconds_to_end: i64,
) -> Result<SignalLean, String> {
    if let Some(reason) = common_gate(cfg, candle, seconds_to_end) {
        return Err(reason);
    }
    let deviation = candle
        .deviation_from_open()
        .ok_or_else(|| "candle open_price is zero".to_string())?;
    if deviation.abs() < cfg.stop_hunt_move_pct {
        return Err(format!(
            "move too small: |{:.4}| < stop_hunt_move_pct={:.4}",
            deviation, cfg.stop_hunt_move_pct
        ));
    }
    let cheap = max_first_leg(cfg);
    let Some((side_up, why)) = pick_direction(volume, up_tob, down_tob, cheap, cfg.stop_hunt_move_pct) else {
        return Err(format!("neither side cheap enough (threshold={:.4})", cheap));
    };
    Ok(SignalLean {
        side_up,
        reason: format!("stop_hunt dev={:.4} dir={}", deviation, why),
    })
}

/// Mean-reversion: price has drifted from the window-open anchor by more
/// than `mr_deviation_pct`, entered under the same window/buffer/range
/// gates as stop-hunt, per `spec.md` §4.6.
pub fn mean_reversion_signal(
    cfg: &CompleteSetConfig,
    candle: &CandleState,
    volume: &VolumeImbalanceState,
    up_tob: &TopOfBook,
    down_tob: &TopOfBook,
    seconds_to_end: i64,
) -> Result<SignalLean, String> {
    if let Some(reason) = common_gate(cfg, candle, seconds_to_end) {
        return Err(reason);
    }
    let deviation = candle
        .deviation_from_open()
        .ok_or_else(|| "candle open_price is zero".to_string())?;
    if deviation.abs() < cfg.mr_deviation_pct {
        return Err(format!(
            "deviation too small: |{:.4}| < mr_deviation_pct={:.4}",
            deviation, cfg.mr_deviation_pct
        ));
    }
    let cheap = max_first_leg(cfg);
    let Some((side_up, why)) = pick_direction(volume, up_tob, down_tob, cheap, cfg.mr_deviation_pct) else {
        return Err(format!("neither side cheap enough (threshold={:.4})", cheap));
    };
    Ok(SignalLean {
        side_up,
        reason: format!("mean_reversion dev={:.4} dir={}", deviation, why),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn candle(open: Decimal, current: Decimal, high: Decimal, low: Decimal, ticks: u32) -> CandleState {
        CandleState {
            open_price: open,
            current_price: current,
            high,
            low,
            last_update: Utc::now(),
            tick_count: ticks,
        }
    }

    fn tob(ask: Decimal) -> TopOfBook {
        TopOfBook {
            best_bid: Some(ask - dec!(0.01)),
            best_ask: Some(ask),
            best_bid_size: Some(dec!(100)),
            best_ask_size: Some(dec!(100)),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn max_first_leg_follows_min_edge() {
        let cfg = CompleteSetConfig::default();
        // default min_edge 0.02 -> (1-0.02)/2 = 0.49
        assert_eq!(max_first_leg(&cfg), dec!(0.49));
    }

    #[test]
    fn stop_hunt_gated_below_min_ticks() {
        let cfg = CompleteSetConfig::default();
        let c = candle(dec!(100), dec!(99), dec!(100), dec!(99), 1);
        let volume = VolumeImbalanceState::default();
        let err = stop_hunt_signal(&cfg, &c, &volume, &tob(dec!(0.40)), &tob(dec!(0.40)), 150).unwrap_err();
        assert!(err.contains("1/3") || err.contains("1/"), "{}", err);
    }

    #[test]
    fn stop_hunt_gated_in_pre_resolution_buffer() {
        let cfg = CompleteSetConfig::default();
        let c = candle(dec!(100), dec!(98.9), dec!(100), dec!(98.9), 5);
        let volume = VolumeImbalanceState::default();
        let err = stop_hunt_signal(&cfg, &c, &volume, &tob(dec!(0.40)), &tob(dec!(0.40)), 10).unwrap_err();
        assert!(err.contains("pre-resolution"), "{}", err);
    }

    #[test]
    fn stop_hunt_gated_outside_entry_window() {
        let cfg = CompleteSetConfig::default();
        let c = candle(dec!(100), dec!(98.9), dec!(100), dec!(98.9), 5);
        let volume = VolumeImbalanceState::default();
        // beyond sh_entry_start_sec (default 240)
        let err = stop_hunt_signal(&cfg, &c, &volume, &tob(dec!(0.40)), &tob(dec!(0.40)), 300).unwrap_err();
        assert!(err.contains("entry window"), "{}", err);
    }

    #[test]
    fn stop_hunt_fires_on_sharp_move_with_cheap_side() {
        let cfg = CompleteSetConfig::default();
        let c = candle(dec!(100), dec!(98.9), dec!(100), dec!(98.9), 5);
        let volume = VolumeImbalanceState::default();
        let signal = stop_hunt_signal(&cfg, &c, &volume, &tob(dec!(0.40)), &tob(dec!(0.55)), 150).unwrap();
        assert!(signal.side_up);
    }

    #[test]
    fn stop_hunt_rejects_when_neither_side_cheap() {
        let cfg = CompleteSetConfig::default();
        let c = candle(dec!(100), dec!(98.9), dec!(100), dec!(98.9), 5);
        let volume = VolumeImbalanceState::default();
        let err = stop_hunt_signal(&cfg, &c, &volume, &tob(dec!(0.60)), &tob(dec!(0.60)), 150).unwrap_err();
        assert!(err.contains("cheap"), "{}", err);
    }

    #[test]
    fn stop_hunt_rejects_when_range_too_wide() {
        let cfg = CompleteSetConfig::default();
        let c = candle(dec!(100), dec!(98.9), dec!(101), dec!(98), 5);
        let volume = VolumeImbalanceState::default();
        let err = stop_hunt_signal(&cfg, &c, &volume, &tob(dec!(0.40)), &tob(dec!(0.40)), 150).unwrap_err();
        assert!(err.contains("trending"), "{}", err);
    }

    #[test]
    fn mean_reversion_prefers_conclusive_volume_imbalance() {
        let cfg = CompleteSetConfig::default();
        let c = candle(dec!(100), dec!(100.2), dec!(100.2), dec!(100), 5);
        let volume = VolumeImbalanceState {
            short_imbalance: dec!(0.8),
            short_total: dec!(1000),
            medium_imbalance: dec!(0.8),
            medium_total: dec!(1000),
        };
        let signal = mean_reversion_signal(&cfg, &c, &volume, &tob(dec!(0.40)), &tob(dec!(0.45)), 150).unwrap();
        assert!(signal.reason.contains("volume imbalance"));
        assert!(signal.side_up);
    }

    #[test]
    fn mean_reversion_falls_back_to_cheaper_side_without_conclusive_volume() {
        let cfg = CompleteSetConfig::default();
        let c = candle(dec!(100), dec!(100.2), dec!(100.2), dec!(100), 5);
        let volume = VolumeImbalanceState::default();
        let signal = mean_reversion_signal(&cfg, &c, &volume, &tob(dec!(0.45)), &tob(dec!(0.40)), 150).unwrap();
        assert!(!signal.side_up);
        assert!(signal.reason.contains("cheaper side"));
    }
}
