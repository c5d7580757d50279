//! Market discovery and top-of-book caching (`spec.md` §4.1).
//!
//! Grounded in `services/discovery.rs`'s scan-and-upsert shape and
//! `adapters/polymarket_clob.rs`'s `get_order_book`/batched-book pattern,
//! narrowed to the `ClobClient`/`DiscoveryClient` contracts in
//! `exchange.rs` so slug generation and TTL-cache logic can be unit tested
//! without a live network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::exchange::{ClobClient, DiscoveryClient};
use super::models::{CompleteSetMarket, Timeframe, TopOfBook};

/// Top-of-book cache TTL. Strictly less than the fastest configured tick
/// period per `spec.md` §3.
pub const TOB_CACHE_TTL: Duration = Duration::from_millis(400);

/// Generates deterministic candidate slugs for the previous/current/next
/// window on a fixed grid, per `spec.md` §4.1's
/// `btc-updown-15m-<epoch>`-aligned formula.
pub fn candidate_slugs(asset: &str, tf: Timeframe, now: DateTime<Utc>) -> Vec<String> {
    let window = tf.window_secs();
    let now_epoch = now.timestamp();
    let current_window_start = now_epoch - now_epoch.rem_euclid(window);
    let asset_lower = asset.to_ascii_lowercase();
    [-1i64, 0, 1]
        .iter()
        .map(|offset| {
            let epoch = current_window_start + offset * window;
            format!("{}-{}-{}", asset_lower, tf.market_type(), epoch)
        })
        .collect()
}

/// One cached top-of-book entry.
#[derive(Debug, Clone, Copy)]
struct CachedBook {
    tob: TopOfBook,
    fetched_at: DateTime<Utc>,
}

/// Discovers active Up/Down markets and serves cached/batched order-book
/// reads. Owns no engine state beyond its own cache; the engine holds the
/// discovered market set.
pub struct MarketDataClient<C, D> {
    clob: Arc<C>,
    discovery: Arc<D>,
    cache: HashMap<String, CachedBook>,
}

impl<C: ClobClient, D: DiscoveryClient> MarketDataClient<C, D> {
    pub fn new(clob: Arc<C>, discovery: Arc<D>) -> Self {
        Self {
            clob,
            discovery,
            cache: HashMap::new(),
        }
    }

    /// Enumerates candidate slugs for every (asset, timeframe) pair and
    /// resolves each via the discovery client. Per-slug failures are
    /// logged and skipped; they never remove already-known markets (the
    /// caller is responsible for merging this result into its active set,
    /// not replacing it wholesale on a partial failure).
    pub async fn discover(
        &self,
        assets: &[String],
        timeframes: &[Timeframe],
        now: DateTime<Utc>,
    ) -> Vec<CompleteSetMarket> {
        let mut found = Vec::new();
        let mut seen_slugs = std::collections::HashSet::new();

        for asset in assets {
            for tf in timeframes {
                for slug in candidate_slugs(asset, *tf, now) {
                    if !seen_slugs.insert(slug.clone()) {
                        continue;
                    }
                    match self.discovery.resolve_slug(&slug).await {
                        Ok(Some(m)) if m.end_time > now => {
                            found.push(CompleteSetMarket {
                                slug: m.slug,
                                asset: asset.clone(),
                                condition_id: m.condition_id,
                                up_token_id: m.up_token_id,
                                down_token_id: m.down_token_id,
                                end_time: m.end_time,
                                market_type: tf.market_type().to_string(),
                                neg_risk: m.neg_risk,
                                discovered_at: now,
                            });
                        }
                        Ok(Some(_)) => {
                            debug!(slug, "discovered market already past end_time, skipping");
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(slug, error = %e, "discovery lookup failed, skipping this slug");
                        }
                    }
                }
            }
        }
        found
    }

    /// Returns a cached top-of-book entry if fresh, otherwise fetches one
    /// book. `None` means "empty book" (no bids or asks) or a network
    /// failure — the engine treats both as "skip this market this tick."
    pub async fn get_top_of_book(&mut self, token_id: &str, now: DateTime<Utc>) -> Option<TopOfBook> {
        if let Some(cached) = self.cache.get(token_id) {
            let age = now.signed_duration_since(cached.fetched_at);
            if age < chrono::Duration::from_std(TOB_CACHE_TTL).unwrap_or_default() {
                return Some(cached.tob);
            }
        }

        match self.clob.get_order_book(token_id).await {
            Ok(Some(book)) if !book.is_empty() => {
                let tob = TopOfBook {
                    best_bid: book.best_bid().map(|l| l.price),
                    best_ask: book.best_ask().map(|l| l.price),
                    best_bid_size: book.best_bid().map(|l| l.size),
                    best_ask_size: book.best_ask().map(|l| l.size),
                    updated_at: now,
                };
                self.cache.insert(
                    token_id.to_string(),
                    CachedBook {
                        tob,
                        fetched_at: now,
                    },
                );
                Some(tob)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(token_id, error = %e, "order book fetch failed");
                None
            }
        }
    }

    /// Synchronous read of whatever is currently cached for `token_id`,
    /// ignoring TTL. Used by the dry-run fill simulator, which runs later in
    /// the same tick as `prefetch_order_books` and must not re-hit the
    /// network mid-tick.
    pub fn peek_top_of_book(&self, token_id: &str) -> Option<TopOfBook> {
        self.cache.get(token_id).map(|c| c.tob)
    }

    /// Batch-fetches both outcome tokens for every given market in one
    /// request and populates the cache. Response order is not assumed —
    /// each book is keyed by its own `asset_id`.
    pub async fn prefetch_order_books(&mut self, markets: &[CompleteSetMarket], now: DateTime<Utc>) {
        let mut token_ids = Vec::with_capacity(markets.len() * 2);
        for m in markets {
            token_ids.push(m.up_token_id.clone());
            token_ids.push(m.down_token_id.clone());
        }
        if token_ids.is_empty() {
            return;
        }
        match self.clob.get_order_books(&token_ids).await {
            Ok(books) => {
                for book in books {
                    if book.is_empty() {
                        continue;
                    }
                    let tob = TopOfBook {
                        best_bid: book.best_bid().map(|l| l.price),
                        best_ask: book.best_ask().map(|l| l.price),
                        best_bid_size: book.best_bid().map(|l| l.size),
                        best_ask_size: book.best_ask().map(|l| l.size),
                        updated_at: now,
                    };
                    self.cache.insert(
                        book.asset_id.clone(),
                        CachedBook {
                            tob,
                            fetched_at: now,
                        },
                    );
                }
            }
            Err(e) => warn!(error = %e, "batch order book prefetch failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::complete_set::exchange::fake::{FakeClobClient, FakeOnChainClient};
    use crate::strategy::complete_set::exchange::{BookLevel, DiscoveredMarket, OrderBook};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    #[test]
    fn candidate_slugs_cover_prev_current_next_window() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 20, 0).unwrap();
        let slugs = candidate_slugs("BTC", Timeframe::Min15, now);
        assert_eq!(slugs.len(), 3);
        assert!(slugs[1].contains("btc-updown-15m-"));
    }

    struct FakeDiscovery {
        markets: Mutex<HashMap<String, DiscoveredMarket>>,
    }

    #[async_trait]
    impl DiscoveryClient for FakeDiscovery {
        async fn resolve_slug(&self, slug: &str) -> crate::error::Result<Option<DiscoveredMarket>> {
            Ok(self.markets.lock().unwrap().get(slug).cloned())
        }
    }

    impl Clone for DiscoveredMarket {
        fn clone(&self) -> Self {
            DiscoveredMarket {
                slug: self.slug.clone(),
                condition_id: self.condition_id.clone(),
                up_token_id: self.up_token_id.clone(),
                down_token_id: self.down_token_id.clone(),
                end_time: self.end_time,
                neg_risk: self.neg_risk,
            }
        }
    }

    #[tokio::test]
    async fn get_top_of_book_caches_within_ttl() {
        let clob = Arc::new(FakeClobClient::default());
        clob.set_book(
            "tok1",
            OrderBook {
                asset_id: "tok1".to_string(),
                bids: vec![BookLevel {
                    price: dec!(0.40),
                    size: dec!(100),
                }],
                asks: vec![BookLevel {
                    price: dec!(0.42),
                    size: dec!(100),
                }],
            },
        );
        let discovery = Arc::new(FakeDiscovery {
            markets: Mutex::new(HashMap::new()),
        });
        let _ = FakeOnChainClient::default();
        let mut client = MarketDataClient::new(clob.clone(), discovery);
        let now = Utc::now();
        let tob = client.get_top_of_book("tok1", now).await.unwrap();
        assert_eq!(tob.best_bid, Some(dec!(0.40)));

        // Clear the underlying book; cached read should still see the old value.
        clob.books.lock().unwrap().clear();
        let cached = client
            .get_top_of_book("tok1", now + chrono::Duration::milliseconds(100))
            .await;
        assert_eq!(cached.unwrap().best_bid, Some(dec!(0.40)));

        // Past TTL, the cleared book now resolves to None.
        let expired = client
            .get_top_of_book("tok1", now + chrono::Duration::milliseconds(500))
            .await;
        assert!(expired.is_none());
    }

    #[tokio::test]
    async fn empty_book_parses_as_none() {
        let clob = Arc::new(FakeClobClient::default());
        clob.set_book(
            "tok2",
            OrderBook {
                asset_id: "tok2".to_string(),
                bids: vec![],
                asks: vec![],
            },
        );
        let discovery = Arc::new(FakeDiscovery {
            markets: Mutex::new(HashMap::new()),
        });
        let mut client = MarketDataClient::new(clob, discovery);
        assert!(client.get_top_of_book("tok2", Utc::now()).await.is_none());
    }
}
