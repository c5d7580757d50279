pub mod binance_agg_trade_ws;
pub mod binance_ws;
pub mod chainlink_rtds;
pub mod polymarket_clob;

pub use binance_agg_trade_ws::{AggTradeTick, BinanceAggTradeWebSocket};
pub use binance_ws::{BinanceWebSocket, PriceCache, PriceUpdate, SpotPrice};
pub use chainlink_rtds::{ChainlinkPriceCache, ChainlinkRtds, ChainlinkSpot, ChainlinkUpdate};
pub use polymarket_clob::{
    AccountSummary, BalanceResponse, GammaEventInfo, MarketResponse, MarketSummary, OrderResponse,
    PolymarketClient, PositionResponse, TradeResponse,
};
