//! Binance WebSocket adapter for raw `aggTrade` taker-side volume.
//!
//! Mirrors the connection/reconnect shape of `binance_kline_ws.rs`, but
//! unlike `binance_ws::BinanceWebSocket` (which discards the buyer/seller
//! maker flag after extracting price) this adapter keeps `is_buyer_maker` so
//! callers can accumulate taker buy/sell volume imbalance.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::{PloyError, Result};

const BINANCE_WS_HOST: &str = "stream.binance.com";
const BINANCE_WS_PORT: u16 = 9443;
const MAX_RECONNECT_DELAY_SECS: u64 = 60;
const CHANNEL_CAPACITY: usize = 2000;

#[derive(Debug, Deserialize)]
struct CombinedStream<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct RawAggTrade {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    trade_time: i64,
    /// True when the buyer is the market maker — i.e. this trade was a
    /// taker *sell*. False means a taker *buy*.
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

/// One taker trade, classified by aggressor side.
#[derive(Debug, Clone, Copy)]
pub struct AggTradeTick {
    pub price: Decimal,
    pub quantity: Decimal,
    pub is_taker_buy: bool,
    pub trade_time: DateTime<Utc>,
}

/// Streams `aggTrade` events for the configured symbols and republishes them
/// as `AggTradeTick`s on a broadcast channel.
pub struct BinanceAggTradeWebSocket {
    ws_url: String,
    symbols: Vec<String>,
    update_tx: broadcast::Sender<(String, AggTradeTick)>,
}

impl BinanceAggTradeWebSocket {
    pub fn new(symbols: Vec<String>) -> Self {
        let (update_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            ws_url: format!(
                "wss://{}:{}/stream?streams=",
                BINANCE_WS_HOST, BINANCE_WS_PORT
            ),
            symbols,
            update_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(String, AggTradeTick)> {
        self.update_tx.subscribe()
    }

    fn build_url(&self) -> String {
        let streams: Vec<String> = self
            .symbols
            .iter()
            .map(|s| format!("{}@aggTrade", s.to_lowercase()))
            .collect();
        format!("{}{}", self.ws_url, streams.join("/"))
    }

    pub async fn run(&self) -> Result<()> {
        let mut attempt: u32 = 0;
        let max_delay = Duration::from_secs(MAX_RECONNECT_DELAY_SECS);

        info!(symbols = ?self.symbols, "starting Binance aggTrade WS");

        loop {
            match self.connect_and_stream().await {
                Ok(()) => {
                    info!("Binance aggTrade WS connection closed normally");
                    attempt = 0;
                }
                Err(e) => {
                    warn!("Binance aggTrade WS error: {}", e);
                    attempt += 1;
                }
            }
            let delay = Duration::from_secs(1 << attempt.min(6)).min(max_delay);
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_and_stream(&self) -> Result<()> {
        let url = self.build_url();
        let (ws_stream, _) = connect_async(&url).await?;

        use futures_util::StreamExt;
        let (_, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            let msg = msg?;
            if let Message::Text(text) = msg {
                self.handle_message(&text);
            }
        }
        Ok(())
    }

    fn handle_message(&self, text: &str) {
        let parsed: Result<CombinedStream<RawAggTrade>, _> = serde_json::from_str(text);
        let Ok(envelope) = parsed else {
            debug!("unparseable aggTrade message, skipping");
            return;
        };
        let raw = envelope.data;
        let Ok(price) = raw.price.parse::<Decimal>() else {
            return;
        };
        let Ok(quantity) = raw.quantity.parse::<Decimal>() else {
            return;
        };
        let trade_time = Utc
            .timestamp_millis_opt(raw.trade_time)
            .single()
            .unwrap_or_else(Utc::now);

        let tick = AggTradeTick {
            price,
            quantity,
            is_taker_buy: !raw.buyer_is_maker,
            trade_time,
        };

        if let Err(e) = self.update_tx.send((raw.symbol, tick)) {
            debug!("no aggTrade subscribers: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_joins_symbol_streams() {
        let ws = BinanceAggTradeWebSocket::new(vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
        let url = ws.build_url();
        assert!(url.contains("btcusdt@aggTrade"));
        assert!(url.contains("ethusdt@aggTrade"));
    }

    #[test]
    fn handle_message_classifies_taker_side() {
        let ws = BinanceAggTradeWebSocket::new(vec!["BTCUSDT".to_string()]);
        let mut rx = ws.subscribe();
        let msg = r#"{"stream":"btcusdt@aggTrade","data":{"s":"BTCUSDT","p":"65000.50","q":"0.01","T":1700000000000,"m":false}}"#;
        ws.handle_message(msg);
        let (symbol, tick) = rx.try_recv().unwrap();
        assert_eq!(symbol, "BTCUSDT");
        assert!(tick.is_taker_buy);
    }
}
