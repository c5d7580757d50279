//! Live `ClobClient`/`DiscoveryClient` backed by `adapters::PolymarketClient`.
//!
//! Grounded in `adapters/polymarket_clob.rs`'s `PolymarketClient`, which
//! already wraps the official `polymarket-client-sdk` CLOB and Gamma
//! clients. This adapter is a thin translation layer: it maps the narrow
//! `exchange.rs` contract types the complete-set engine speaks onto
//! `PolymarketClient`'s existing request/response shapes, the same way
//! `strategy/claimer.rs` adapts `PolymarketClient::get_positions` into its
//! own `RedeemablePosition` shape.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::adapters::polymarket_clob::PolymarketClient;
use crate::domain::order::{OrderRequest as DomainOrderRequest, OrderSide as DomainOrderSide, TimeInForce};
use crate::domain::Side;
use crate::error::{PloyError, Result};

use super::exchange::{
    BalanceAllowance, BookLevel, ClobClient, DiscoveredMarket, DiscoveryClient, OrderBook,
    PlaceOrderAck, PlaceOrderArgs, RemoteOrder, RemoteOrderStatus,
};
use super::models::{OrderKind, OrderSide};

/// Wraps a `PolymarketClient` to satisfy the complete-set engine's narrow
/// CLOB contract.
pub struct LiveClobClient {
    inner: PolymarketClient,
}

impl LiveClobClient {
    pub fn new(inner: PolymarketClient) -> Self {
        Self { inner }
    }
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal> {
    value
        .parse()
        .map_err(|e| PloyError::Internal(format!("failed to parse {} '{}': {}", field, value, e)))
}

#[async_trait]
impl ClobClient for LiveClobClient {
    async fn get_order_book(&self, token_id: &str) -> Result<Option<OrderBook>> {
        match self.inner.get_order_book(token_id).await {
            Ok(resp) => {
                let to_levels = |levels: Vec<super::super::super::adapters::polymarket_clob::OrderBookLevel>| -> Result<Vec<BookLevel>> {
                    levels
                        .into_iter()
                        .map(|l| {
                            Ok(BookLevel {
                                price: parse_decimal("price", &l.price)?,
                                size: parse_decimal("size", &l.size)?,
                            })
                        })
                        .collect()
                };
                Ok(Some(OrderBook {
                    asset_id: resp.asset_id,
                    bids: to_levels(resp.bids)?,
                    asks: to_levels(resp.asks)?,
                }))
            }
            Err(PloyError::MarketDataUnavailable(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_order_books(&self, token_ids: &[String]) -> Result<Vec<OrderBook>> {
        let mut books = Vec::with_capacity(token_ids.len());
        for token_id in token_ids {
            if let Some(book) = self.get_order_book(token_id).await? {
                books.push(book);
            }
        }
        Ok(books)
    }

    async fn post_order(&self, args: PlaceOrderArgs) -> Result<PlaceOrderAck> {
        let order_side = match args.side {
            OrderSide::Buy => DomainOrderSide::Buy,
            OrderSide::Sell => DomainOrderSide::Sell,
        };
        let shares: u64 = args
            .size
            .trunc()
            .try_into()
            .map_err(|_| PloyError::Internal(format!("order size {} out of range", args.size)))?;

        // The complete-set exchange contract doesn't carry a directional
        // Up/Down tag on a single order; it's only used downstream for
        // domain-level order tracking, which the engine does itself.
        let mut request = DomainOrderRequest::buy_limit(args.token_id, Side::Up, shares, args.price);
        request.order_side = order_side;
        request.time_in_force = match args.kind {
            OrderKind::Gtc => TimeInForce::GTC,
            OrderKind::Fok => TimeInForce::FOK,
        };

        let resp = self.inner.submit_order(&request).await?;
        Ok(PlaceOrderAck { order_id: resp.id })
    }

    async fn get_orders(&self) -> Result<Vec<RemoteOrder>> {
        let orders = self.inner.get_open_orders().await?;
        orders
            .into_iter()
            .map(|o| {
                Ok(RemoteOrder {
                    order_id: o.id,
                    asset_id: o.asset_id.unwrap_or_default(),
                    price: o
                        .price
                        .as_deref()
                        .map(|p| parse_decimal("price", p))
                        .transpose()?
                        .unwrap_or(Decimal::ZERO),
                    matched_size: o
                        .size_matched
                        .as_deref()
                        .map(|s| parse_decimal("size_matched", s))
                        .transpose()?
                        .unwrap_or(Decimal::ZERO),
                    status: o.status,
                })
            })
            .collect()
    }

    async fn get_order(&self, order_id: &str) -> Result<RemoteOrderStatus> {
        let order = self.inner.get_order(order_id).await?;
        Ok(RemoteOrderStatus {
            status: order.status,
            matched_size: order
                .size_matched
                .as_deref()
                .map(|s| parse_decimal("size_matched", s))
                .transpose()?
                .unwrap_or(Decimal::ZERO),
        })
    }

    async fn cancel(&self, order_id: &str) -> Result<()> {
        self.inner.cancel_order(order_id).await?;
        Ok(())
    }

    async fn cancel_all(&self) -> Result<()> {
        // `PolymarketClient` cancels per-token; the engine only ever calls
        // `cancel_all` to tear down a single market's resting orders, so
        // cancel every order currently tracked instead of per-token looping.
        for order in self.inner.get_open_orders().await? {
            self.inner.cancel_order(&order.id).await?;
        }
        Ok(())
    }

    async fn get_balance_allowance(&self, token_id: &str) -> Result<BalanceAllowance> {
        let balance = self.inner.get_token_balance(token_id).await?;
        Ok(BalanceAllowance { balance })
    }
}

/// Wraps a `PolymarketClient` to satisfy the complete-set engine's narrow
/// Gamma discovery contract, resolving a candidate slug to its binary
/// Up/Down token pair.
pub struct LiveDiscoveryClient {
    inner: PolymarketClient,
}

impl LiveDiscoveryClient {
    pub fn new(inner: PolymarketClient) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl DiscoveryClient for LiveDiscoveryClient {
    async fn resolve_slug(&self, slug: &str) -> Result<Option<DiscoveredMarket>> {
        let results = match self.inner.search_markets(slug).await {
            Ok(r) => r,
            Err(PloyError::MarketDataUnavailable(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let Some(summary) = results.into_iter().find(|m| m.slug.as_deref() == Some(slug)) else {
            return Ok(None);
        };

        let condition_id = summary.condition_id.clone();
        let market = self.inner.get_market(&condition_id).await?;
        if market.tokens.len() != 2 {
            return Ok(None);
        }

        let up = market
            .tokens
            .iter()
            .find(|t| t.outcome.eq_ignore_ascii_case("up") || t.outcome.eq_ignore_ascii_case("yes"));
        let down = market
            .tokens
            .iter()
            .find(|t| t.outcome.eq_ignore_ascii_case("down") || t.outcome.eq_ignore_ascii_case("no"));
        let (Some(up), Some(down)) = (up, down) else {
            return Ok(None);
        };

        let end_time = market
            .end_date_iso
            .as_ref()
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc));
        let Some(end_time) = end_time else {
            return Ok(None);
        };

        Ok(Some(DiscoveredMarket {
            slug: slug.to_string(),
            condition_id,
            up_token_id: up.token_id.clone(),
            down_token_id: down.token_id.clone(),
            end_time,
            neg_risk: market.neg_risk.unwrap_or(false),
        }))
    }
}
