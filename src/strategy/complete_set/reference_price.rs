//! Reference BTC/ETH spot price feed and trade-flow imbalance tracker.
//!
//! Grounded in `adapters/binance_kline_ws.rs`'s stream/reconnect shape,
//! generalized per `SPEC_FULL.md` §4.2 into a per-window candle-state
//! snapshot plus rolling volume-imbalance buckets. `adapters/
//! binance_agg_trade_ws.rs` has no teacher counterpart — it's new code
//! modeled on that same reconnect shape to carry aggTrade ticks instead
//! of klines, since volume-imbalance buckets need taker-side classification
//! that kline candles don't expose.
//! The snapshot is published through a `tokio::sync::watch` channel so
//! readers on the tick task never block on the feed's WS loop, matching
//! `spec.md` §5's "publish-once-per-update, readers never see a torn read"
//! requirement.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::adapters::binance_agg_trade_ws::{AggTradeTick, BinanceAggTradeWebSocket};
use crate::adapters::binance_ws::{BinanceWebSocket, PriceUpdate};
use crate::adapters::chainlink_rtds::ChainlinkPriceCache;

/// Per-window candle state for the asset this feed tracks. `open_price` is
/// set once at window start and never moves; everything else updates on
/// every tick until `last_update` goes stale.
#[derive(Debug, Clone, Copy)]
pub struct CandleState {
    pub open_price: Decimal,
    pub current_price: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub last_update: DateTime<Utc>,
    pub tick_count: u32,
}

impl CandleState {
    pub fn new(open_price: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            open_price,
            current_price: open_price,
            high: open_price,
            low: open_price,
            last_update: now,
            tick_count: 0,
        }
    }

    /// `(current - open) / open`, signed.
    pub fn deviation_from_open(&self) -> Option<Decimal> {
        if self.open_price.is_zero() {
            return None;
        }
        Some((self.current_price - self.open_price) / self.open_price)
    }

    /// `(high - low) / open`.
    pub fn range_pct(&self) -> Option<Decimal> {
        if self.open_price.is_zero() {
            return None;
        }
        Some((self.high - self.low) / self.open_price)
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.last_update > chrono::Duration::seconds(10)
    }

    fn apply_tick(&mut self, price: Decimal, now: DateTime<Utc>) {
        self.current_price = price;
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.last_update = now;
        self.tick_count = self.tick_count.saturating_add(1);
    }
}

/// One 1-second taker-volume bucket: buy vs sell notional.
#[derive(Debug, Clone, Copy, Default)]
struct VolumeBucket {
    second: i64,
    buy: Decimal,
    sell: Decimal,
}

/// Rolling short/medium window imbalance derived from buckets.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeImbalanceState {
    pub short_imbalance: Decimal,
    pub short_total: Decimal,
    pub medium_imbalance: Decimal,
    pub medium_total: Decimal,
}

impl VolumeImbalanceState {
    /// True when the short-window imbalance is decisively one-sided.
    pub fn conclusive(&self, threshold: Decimal) -> Option<bool> {
        if self.short_total.is_zero() {
            return None;
        }
        if self.short_imbalance.abs() < threshold {
            return None;
        }
        Some(self.short_imbalance > Decimal::ZERO)
    }
}

/// Accumulates taker buy/sell volume into 1s buckets and derives rolling
/// imbalance ratios over two configurable windows.
struct VolumeAccumulator {
    buckets: VecDeque<VolumeBucket>,
    short_secs: i64,
    medium_secs: i64,
}

impl VolumeAccumulator {
    fn new(short_secs: i64, medium_secs: i64) -> Self {
        Self {
            buckets: VecDeque::new(),
            short_secs,
            medium_secs,
        }
    }

    fn record(&mut self, tick: &AggTradeTick) {
        let second = tick.trade_time.timestamp();
        let notional = tick.price * tick.quantity;
        if let Some(back) = self.buckets.back_mut() {
            if back.second == second {
                if tick.is_taker_buy {
                    back.buy += notional;
                } else {
                    back.sell += notional;
                }
                self.evict(second);
                return;
            }
        }
        let mut bucket = VolumeBucket {
            second,
            ..Default::default()
        };
        if tick.is_taker_buy {
            bucket.buy = notional;
        } else {
            bucket.sell = notional;
        }
        self.buckets.push_back(bucket);
        self.evict(second);
    }

    fn evict(&mut self, now_second: i64) {
        let horizon = now_second - self.medium_secs;
        while let Some(front) = self.buckets.front() {
            if front.second < horizon {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn snapshot(&self, now_second: i64) -> VolumeImbalanceState {
        let short_floor = now_second - self.short_secs;
        let medium_floor = now_second - self.medium_secs;
        let (mut s_buy, mut s_sell, mut m_buy, mut m_sell) =
            (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO, Decimal::ZERO);
        for b in &self.buckets {
            if b.second >= medium_floor {
                m_buy += b.buy;
                m_sell += b.sell;
            }
            if b.second >= short_floor {
                s_buy += b.buy;
                s_sell += b.sell;
            }
        }
        let short_total = s_buy + s_sell;
        let medium_total = m_buy + m_sell;
        VolumeImbalanceState {
            short_imbalance: if short_total.is_zero() {
                Decimal::ZERO
            } else {
                (s_buy - s_sell) / short_total
            },
            short_total,
            medium_imbalance: if medium_total.is_zero() {
                Decimal::ZERO
            } else {
                (m_buy - m_sell) / medium_total
            },
            medium_total,
        }
    }
}

/// Combined snapshot handed to the signal evaluator and dashboard each tick.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceSnapshot {
    pub candle: CandleState,
    pub volume: VolumeImbalanceState,
}

/// Streams spot price + trade-flow imbalance for one asset and exposes a
/// lock-free snapshot read. Runs its own reconnecting WS loops as
/// `tokio::spawn`ed background tasks; the tick loop never awaits this type.
pub struct ReferencePriceFeed {
    symbol: String,
    tx: watch::Sender<ReferenceSnapshot>,
    rx: watch::Receiver<ReferenceSnapshot>,
    window_epoch: Arc<AtomicU32>,
}

impl ReferencePriceFeed {
    /// `symbol` is a Binance pair, e.g. `"BTCUSDT"`.
    pub fn new(symbol: &str, window_open: Decimal, volume_short_sec: i64, volume_medium_sec: i64) -> Self {
        let now = Utc::now();
        let initial = ReferenceSnapshot {
            candle: CandleState::new(window_open, now),
            volume: VolumeImbalanceState::default(),
        };
        let (tx, rx) = watch::channel(initial);
        let _ = (volume_short_sec, volume_medium_sec);
        Self {
            symbol: symbol.to_string(),
            tx,
            rx,
            window_epoch: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Lock-free read of the latest snapshot. Never blocks.
    pub fn snapshot(&self) -> ReferenceSnapshot {
        *self.rx.borrow()
    }

    /// Starts a new window: resets `open_price`/high/low/tick_count but
    /// keeps the current price as the immediate anchor. Called by the
    /// engine when it detects a market-window rollover (not by the feed
    /// itself, which has no notion of Polymarket window boundaries).
    pub fn set_market_window(&self, open_price: Decimal) {
        self.window_epoch.fetch_add(1, Ordering::SeqCst);
        self.tx.send_modify(|snap| {
            snap.candle = CandleState::new(open_price, Utc::now());
        });
    }

    /// Spawns the kline (spot price) and aggTrade (volume) reconnecting WS
    /// loops. Returns immediately; the loops run until the process exits.
    pub fn spawn(self: Arc<Self>, volume_short_sec: i64, volume_medium_sec: i64) {
        let price_feed = self.clone();
        let symbol = self.symbol.clone();
        tokio::spawn(async move {
            let ws = BinanceWebSocket::new(vec![symbol]);
            let mut sub = ws.subscribe();
            let ws_task = tokio::spawn(async move {
                if let Err(e) = ws.run().await {
                    warn!("reference price kline stream ended: {}", e);
                }
            });
            loop {
                match sub.recv().await {
                    Ok(update) => price_feed.on_price_update(update),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "reference price feed subscriber lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            ws_task.abort();
        });

        let volume_feed = self.clone();
        let symbol = volume_feed.symbol.clone();
        tokio::spawn(async move {
            let ws = BinanceAggTradeWebSocket::new(vec![symbol]);
            let mut sub = ws.subscribe();
            let ws_task = tokio::spawn(async move {
                if let Err(e) = ws.run().await {
                    warn!("reference volume stream ended: {}", e);
                }
            });
            let mut accumulator = VolumeAccumulator::new(volume_short_sec, volume_medium_sec);
            loop {
                match sub.recv().await {
                    Ok((_symbol, tick)) => {
                        accumulator.record(&tick);
                        let snap = accumulator.snapshot(tick.trade_time.timestamp());
                        volume_feed.tx.send_modify(|s| s.volume = snap);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "volume imbalance subscriber lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            ws_task.abort();
        });

        info!(symbol = %self.symbol, "reference price feed spawned");
    }

    fn on_price_update(&self, update: PriceUpdate) {
        debug!(price = %update.price, "reference price tick");
        self.tx.send_modify(|snap| {
            snap.candle.apply_tick(update.price, update.timestamp);
        });
    }
}

/// Resolves the window-open anchor from the Chainlink RTDS oracle cache
/// when available, falling back to the stream/REST spot price — per
/// `spec.md` §4.2's "ideally read from the same on-chain oracle Polymarket
/// uses for settlement; fall back to stream/REST price." Polymarket's own
/// RTDS feed (`chainlink_rtds.rs`) is the settlement-anchor source here
/// rather than a raw on-chain `latestRoundData()` call, since it is the
/// live feed Polymarket itself anchors window opens to.
pub async fn resolve_window_open(
    oracle_cache: Option<&ChainlinkPriceCache>,
    oracle_symbol: &str,
    fallback: Decimal,
) -> Decimal {
    if let Some(cache) = oracle_cache {
        if let Some(spot) = cache.get(oracle_symbol).await {
            return spot.price;
        }
        warn!(symbol = oracle_symbol, "oracle cache miss, falling back to stream price");
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    #[test]
    fn candle_state_tracks_high_low_and_deviation() {
        let now = Utc::now();
        let mut candle = CandleState::new(dec!(100), now);
        candle.apply_tick(dec!(102), now + ChronoDuration::seconds(1));
        candle.apply_tick(dec!(98), now + ChronoDuration::seconds(2));
        assert_eq!(candle.high, dec!(102));
        assert_eq!(candle.low, dec!(98));
        assert_eq!(candle.tick_count, 2);
        assert_eq!(candle.deviation_from_open(), Some(dec!(-0.02)));
        assert_eq!(candle.range_pct(), Some(dec!(0.04)));
    }

    #[test]
    fn candle_state_goes_stale_after_ten_seconds() {
        let now = Utc::now();
        let candle = CandleState::new(dec!(100), now);
        assert!(!candle.is_stale(now + ChronoDuration::seconds(5)));
        assert!(candle.is_stale(now + ChronoDuration::seconds(11)));
    }

    #[test]
    fn volume_accumulator_computes_signed_imbalance() {
        let mut acc = VolumeAccumulator::new(30, 120);
        let base = Utc::now();
        acc.record(&AggTradeTick {
            price: dec!(100),
            quantity: dec!(10),
            is_taker_buy: true,
            trade_time: base,
        });
        acc.record(&AggTradeTick {
            price: dec!(100),
            quantity: dec!(2),
            is_taker_buy: false,
            trade_time: base,
        });
        let snap = acc.snapshot(base.timestamp());
        // buy=1000 sell=200 -> imbalance = 800/1200 = 0.6666...
        assert!(snap.short_imbalance > dec!(0.6));
        assert_eq!(snap.short_total, dec!(1200));
    }

    #[test]
    fn volume_imbalance_conclusive_requires_threshold() {
        let state = VolumeImbalanceState {
            short_imbalance: dec!(0.1),
            short_total: dec!(100),
            medium_imbalance: dec!(0.1),
            medium_total: dec!(100),
        };
        assert_eq!(state.conclusive(dec!(0.2)), None);
        let strong = VolumeImbalanceState {
            short_imbalance: dec!(0.5),
            ..state
        };
        assert_eq!(strong.conclusive(dec!(0.2)), Some(true));
    }
}
