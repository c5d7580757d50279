//! Narrow external-collaborator contracts the complete-set engine depends on.
//!
//! `spec.md` §1 treats the CLOB REST API, the Gamma discovery API, and the
//! on-chain RPC surface as external collaborators specified only as the
//! contract the core needs. Grounded in `exchange/traits.rs`'s
//! `async_trait` exchange-abstraction shape, narrowed to exactly the
//! operations `SPEC_FULL.md` §6 enumerates so the engine can be driven by a
//! `FakeExchangeClient` in tests without a live network
//! (`SPEC_FULL.md` §10.4).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::Result;

use super::models::{OrderKind, OrderSide};

/// One price level in an order book response.
#[derive(Debug, Clone, Copy)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// `{bids, asks, asset_id}` per `spec.md` §6's CLOB API contract. Bids/asks
/// are assumed sorted best-first by the client producing this value.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub asset_id: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// Arguments to place one order, mirroring `spec.md` §4.4's placement
/// contract inputs.
#[derive(Debug, Clone)]
pub struct PlaceOrderArgs {
    pub token_id: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub price: Decimal,
    pub size: Decimal,
}

/// `{orderID}` on success, per `spec.md` §6.
#[derive(Debug, Clone)]
pub struct PlaceOrderAck {
    pub order_id: String,
}

/// One entry from `get_orders()`: `{id, asset_id, price, matched_size, status}`.
#[derive(Debug, Clone)]
pub struct RemoteOrder {
    pub order_id: String,
    pub asset_id: String,
    pub price: Decimal,
    pub matched_size: Decimal,
    pub status: String,
}

/// `{status, matched_size}` from `get_order(order_id)`.
#[derive(Debug, Clone)]
pub struct RemoteOrderStatus {
    pub status: String,
    pub matched_size: Decimal,
}

/// Status strings containing any of these substrings are terminal
/// (`spec.md` §6).
pub const TERMINAL_STATUS_MARKERS: &[&str] =
    &["FILLED", "CANCELED", "CANCELLED", "EXPIRED", "REJECTED", "DONE"];

pub fn is_terminal_status(status: &str) -> bool {
    let upper = status.to_ascii_uppercase();
    TERMINAL_STATUS_MARKERS.iter().any(|m| upper.contains(m))
}

/// `get_balance_allowance({asset_type=CONDITIONAL, token_id})` response.
#[derive(Debug, Clone, Copy)]
pub struct BalanceAllowance {
    pub balance: Decimal,
}

/// The CLOB order-placement/read/cancel surface the Order Manager and
/// Market Data Client depend on.
#[async_trait]
pub trait ClobClient: Send + Sync {
    async fn get_order_book(&self, token_id: &str) -> Result<Option<OrderBook>>;
    async fn get_order_books(&self, token_ids: &[String]) -> Result<Vec<OrderBook>>;
    async fn post_order(&self, args: PlaceOrderArgs) -> Result<PlaceOrderAck>;
    async fn get_orders(&self) -> Result<Vec<RemoteOrder>>;
    async fn get_order(&self, order_id: &str) -> Result<RemoteOrderStatus>;
    async fn cancel(&self, order_id: &str) -> Result<()>;
    async fn cancel_all(&self) -> Result<()>;
    async fn get_balance_allowance(&self, token_id: &str) -> Result<BalanceAllowance>;
}

/// One event from the Gamma discovery feed, already reduced to the fields
/// `spec.md` §6 requires (the client is responsible for the
/// map-or-object duck-typed parsing called out in §9).
#[derive(Debug, Clone)]
pub struct DiscoveredMarket {
    pub slug: String,
    pub condition_id: String,
    pub up_token_id: String,
    pub down_token_id: String,
    pub end_time: DateTime<Utc>,
    pub neg_risk: bool,
}

#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// Resolve one candidate slug to a market, or `None` if it doesn't
    /// exist / isn't a recognizable binary Up/Down market yet.
    async fn resolve_slug(&self, slug: &str) -> Result<Option<DiscoveredMarket>>;
}

/// Result of a merge or redeem submission.
#[derive(Debug, Clone)]
pub struct SettlementReceipt {
    pub tx_hash: String,
    pub confirmed_at: DateTime<Utc>,
}

/// The on-chain surface the Settlement Coordinator depends on: ERC-1155
/// balance reads/approvals and the CTF / NegRisk merge+redeem calls routed
/// through the proxy wallet, per `spec.md` §6/§4.7.
#[async_trait]
pub trait OnChainClient: Send + Sync {
    async fn current_gas_price_gwei(&self) -> Result<Decimal>;
    async fn erc1155_balance(&self, token_id: &str) -> Result<Decimal>;
    async fn is_approved_for_all(&self, neg_risk: bool) -> Result<bool>;
    async fn set_approval_for_all(&self, neg_risk: bool) -> Result<SettlementReceipt>;
    async fn merge_positions(
        &self,
        condition_id: &str,
        neg_risk: bool,
        amount: Decimal,
    ) -> Result<SettlementReceipt>;
    async fn redeem_positions(
        &self,
        condition_id: &str,
        neg_risk: bool,
        amount: Decimal,
    ) -> Result<SettlementReceipt>;
}

#[cfg(test)]
pub mod fake {
    //! In-memory fakes implementing the three contracts above, for engine,
    //! order-manager, and settlement tests that need a controllable book
    //! and order-status sequence without a live network
    //! (`SPEC_FULL.md` §10.4).

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeClobClient {
        pub books: Mutex<HashMap<String, OrderBook>>,
        pub orders: Mutex<HashMap<String, RemoteOrder>>,
        pub next_order_id: Mutex<u64>,
        pub reject_next: Mutex<Option<String>>,
    }

    impl FakeClobClient {
        pub fn set_book(&self, token_id: &str, book: OrderBook) {
            self.books.lock().unwrap().insert(token_id.to_string(), book);
        }

        pub fn fill(&self, order_id: &str, matched_size: Decimal, status: &str) {
            if let Some(o) = self.orders.lock().unwrap().get_mut(order_id) {
                o.matched_size = matched_size;
                o.status = status.to_string();
            }
        }
    }

    #[async_trait]
    impl ClobClient for FakeClobClient {
        async fn get_order_book(&self, token_id: &str) -> Result<Option<OrderBook>> {
            Ok(self.books.lock().unwrap().get(token_id).cloned())
        }

        async fn get_order_books(&self, token_ids: &[String]) -> Result<Vec<OrderBook>> {
            let books = self.books.lock().unwrap();
            Ok(token_ids
                .iter()
                .filter_map(|t| books.get(t).cloned())
                .collect())
        }

        async fn post_order(&self, args: PlaceOrderArgs) -> Result<PlaceOrderAck> {
            if let Some(reason) = self.reject_next.lock().unwrap().take() {
                return Err(crate::error::PloyError::OrderRejected(reason));
            }
            let mut next = self.next_order_id.lock().unwrap();
            *next += 1;
            let order_id = format!("fake-order-{}", *next);
            self.orders.lock().unwrap().insert(
                order_id.clone(),
                RemoteOrder {
                    order_id: order_id.clone(),
                    asset_id: args.token_id,
                    price: args.price,
                    matched_size: Decimal::ZERO,
                    status: "LIVE".to_string(),
                },
            );
            Ok(PlaceOrderAck { order_id })
        }

        async fn get_orders(&self) -> Result<Vec<RemoteOrder>> {
            Ok(self.orders.lock().unwrap().values().cloned().collect())
        }

        async fn get_order(&self, order_id: &str) -> Result<RemoteOrderStatus> {
            let orders = self.orders.lock().unwrap();
            let order = orders
                .get(order_id)
                .ok_or_else(|| crate::error::PloyError::OrderRejected("not found".to_string()))?;
            Ok(RemoteOrderStatus {
                status: order.status.clone(),
                matched_size: order.matched_size,
            })
        }

        async fn cancel(&self, order_id: &str) -> Result<()> {
            self.orders.lock().unwrap().remove(order_id);
            Ok(())
        }

        async fn cancel_all(&self) -> Result<()> {
            self.orders.lock().unwrap().clear();
            Ok(())
        }

        async fn get_balance_allowance(&self, _token_id: &str) -> Result<BalanceAllowance> {
            Ok(BalanceAllowance {
                balance: Decimal::ZERO,
            })
        }
    }

    #[derive(Default)]
    pub struct FakeOnChainClient {
        pub gas_price_gwei: Mutex<Decimal>,
        pub balances: Mutex<HashMap<String, Decimal>>,
        pub approved: Mutex<bool>,
        pub fail_merge: Mutex<bool>,
    }

    #[async_trait]
    impl OnChainClient for FakeOnChainClient {
        async fn current_gas_price_gwei(&self) -> Result<Decimal> {
            Ok(*self.gas_price_gwei.lock().unwrap())
        }

        async fn erc1155_balance(&self, token_id: &str) -> Result<Decimal> {
            Ok(*self
                .balances
                .lock()
                .unwrap()
                .get(token_id)
                .unwrap_or(&Decimal::ZERO))
        }

        async fn is_approved_for_all(&self, _neg_risk: bool) -> Result<bool> {
            Ok(*self.approved.lock().unwrap())
        }

        async fn set_approval_for_all(&self, _neg_risk: bool) -> Result<SettlementReceipt> {
            *self.approved.lock().unwrap() = true;
            Ok(SettlementReceipt {
                tx_hash: "0xapprove".to_string(),
                confirmed_at: Utc::now(),
            })
        }

        async fn merge_positions(
            &self,
            _condition_id: &str,
            _neg_risk: bool,
            _amount: Decimal,
        ) -> Result<SettlementReceipt> {
            if *self.fail_merge.lock().unwrap() {
                return Err(crate::error::PloyError::MissingReceipt(
                    "merge tx".to_string(),
                ));
            }
            Ok(SettlementReceipt {
                tx_hash: "0xmerge".to_string(),
                confirmed_at: Utc::now(),
            })
        }

        async fn redeem_positions(
            &self,
            _condition_id: &str,
            _neg_risk: bool,
            _amount: Decimal,
        ) -> Result<SettlementReceipt> {
            Ok(SettlementReceipt {
                tx_hash: "0xredeem".to_string(),
                confirmed_at: Utc::now(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_status_matches_any_marker() {
        assert!(is_terminal_status("MATCHED_AND_FILLED"));
        assert!(is_terminal_status("canceled"));
        assert!(!is_terminal_status("LIVE"));
    }
}
