//! Complete-set Up/Down arbitrage engine.
//!
//! This module tree implements the tick loop, order lifecycle manager,
//! inventory/position tracker, exposure/sizing calculator, signal
//! evaluator, merge/redeem settlement coordinator, and event bus described
//! in `SPEC_FULL.md`. External collaborators (CLOB REST, Gamma discovery,
//! on-chain RPC) are accessed only through the narrow traits in
//! `exchange.rs`, so the whole stack is unit-testable against in-memory
//! fakes without a live network.

pub mod clob_adapter;
pub mod config;
pub mod engine;
pub mod event_bus;
pub mod exchange;
pub mod inventory;
pub mod market_data;
pub mod models;
pub mod onchain_adapter;
pub mod order_manager;
pub mod persistence;
pub mod quote_calc;
pub mod reference_price;
pub mod signals;
pub mod settlement;

pub use clob_adapter::{LiveClobClient, LiveDiscoveryClient};
pub use config::CompleteSetConfig;
pub use engine::StrategyEngine;
pub use event_bus::{event_bus, EngineEvent, EventBus, EventBusReceiver};
pub use models::{CompleteSetMarket, MarketInventory, OrderKind, OrderSide, OrderState, Timeframe, TopOfBook};
pub use onchain_adapter::{connect, LiveOnChainClient};
