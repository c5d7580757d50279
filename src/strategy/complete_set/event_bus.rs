//! Non-blocking event bus feeding the dashboard broadcaster and persistence
//! writer (`spec.md` §4.9).
//!
//! Grounded in `persistence/event_store.rs`'s typed-event/metadata shape,
//! rebuilt around a bounded `tokio::sync::mpsc` channel with put-nowait
//! semantics so producers (the tick loop) never block, per `spec.md` §5's
//! "every mutation happens on the main scheduler" and §4.9's "never block
//! producer" requirement.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::warn;

/// One typed event flowing through the bus. Variants mirror `spec.md`
/// §4.9's enumerated event types exactly.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    TickSnapshot {
        active_markets: usize,
        ts: DateTime<Utc>,
    },
    BtcPrice {
        symbol: String,
        price: Decimal,
        ts: DateTime<Utc>,
    },
    VolumeState {
        short_imbalance: Decimal,
        medium_imbalance: Decimal,
        ts: DateTime<Utc>,
    },
    OrderPlaced {
        slug: String,
        order_id: String,
        price: Decimal,
        size: Decimal,
    },
    OrderFilled {
        slug: String,
        order_id: String,
        price: Decimal,
        delta: Decimal,
    },
    OrderCancelled {
        slug: String,
        order_id: String,
        reason: String,
    },
    HedgeComplete {
        slug: String,
        up_shares: Decimal,
        down_shares: Decimal,
    },
    MergeComplete {
        slug: String,
        merged_shares: Decimal,
        tx_hash: String,
    },
    MarketEntered {
        slug: String,
    },
    MarketExited {
        slug: String,
        realized_pnl: Decimal,
    },
    PnlSnapshot {
        session_realized_pnl: Decimal,
        ts: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// The event-type tag used for per-type throttling and the
    /// `event_type` persistence column.
    pub fn type_tag(&self) -> &'static str {
        match self {
            EngineEvent::TickSnapshot { .. } => "tick_snapshot",
            EngineEvent::BtcPrice { .. } => "btc_price",
            EngineEvent::VolumeState { .. } => "volume_state",
            EngineEvent::OrderPlaced { .. } => "order_placed",
            EngineEvent::OrderFilled { .. } => "order_filled",
            EngineEvent::OrderCancelled { .. } => "order_cancelled",
            EngineEvent::HedgeComplete { .. } => "hedge_complete",
            EngineEvent::MergeComplete { .. } => "merge_complete",
            EngineEvent::MarketEntered { .. } => "market_entered",
            EngineEvent::MarketExited { .. } => "market_exited",
            EngineEvent::PnlSnapshot { .. } => "pnl_snapshot",
        }
    }
}

/// The producer handle: clone-able, non-blocking, drop-on-full.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<EngineEvent>,
    dropped: Arc<AtomicU64>,
}

/// The single-consumer receiving end, paired 1:1 with an `EventBus`.
pub struct EventBusReceiver {
    rx: mpsc::Receiver<EngineEvent>,
    dropped: Arc<AtomicU64>,
}

/// Creates a bounded event bus. `capacity` is the FIFO depth; beyond it,
/// `publish` drops the event rather than blocking the producer.
pub fn event_bus(capacity: usize) -> (EventBus, EventBusReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        EventBus {
            tx,
            dropped: dropped.clone(),
        },
        EventBusReceiver { rx, dropped },
    )
}

impl EventBus {
    /// Put-nowait publish: on a full queue, increments the drop counter and
    /// discards the event. Logs every 100th drop (never every drop — that
    /// would itself become a producer-blocking hazard under sustained
    /// overflow). Never blocks.
    pub fn publish(&self, event: EngineEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) | Err(mpsc::error::TrySendError::Closed(_)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if n % 100 == 0 {
                    warn!(dropped_total = n, "event bus full, dropping events");
                }
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventBusReceiver {
    /// Receives the next event, or `None` once every `EventBus` clone has
    /// been dropped.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        self.rx.recv().await
    }

    /// Non-blocking drain of whatever is currently queued.
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        self.rx.try_recv().ok()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Minimum interval between dashboard broadcasts per event type
/// (`spec.md` §4.9's throttle table).
pub fn throttle_interval(type_tag: &str) -> std::time::Duration {
    match type_tag {
        "tick_snapshot" => std::time::Duration::from_millis(500),
        "btc_price" => std::time::Duration::from_secs(1),
        "volume_state" => std::time::Duration::from_secs(2),
        "pnl_snapshot" => std::time::Duration::from_secs(10),
        _ => std::time::Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overflow_drops_excess_and_consumer_sees_capacity_events() {
        let (bus, mut rx) = event_bus(10);
        for _ in 0..15 {
            bus.publish(EngineEvent::TickSnapshot {
                active_markets: 1,
                ts: Utc::now(),
            });
        }
        assert_eq!(bus.dropped_count(), 5);

        let mut received = 0;
        while rx.rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 10);
    }

    #[test]
    fn throttle_table_matches_spec() {
        assert_eq!(throttle_interval("tick_snapshot"), std::time::Duration::from_millis(500));
        assert_eq!(throttle_interval("btc_price"), std::time::Duration::from_secs(1));
        assert_eq!(throttle_interval("volume_state"), std::time::Duration::from_secs(2));
        assert_eq!(throttle_interval("pnl_snapshot"), std::time::Duration::from_secs(10));
    }

    #[test]
    fn event_type_tags_are_stable() {
        assert_eq!(
            EngineEvent::MarketEntered {
                slug: "m1".to_string()
            }
            .type_tag(),
            "market_entered"
        );
    }
}
