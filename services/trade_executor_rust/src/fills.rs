//! Fill confirmation over the exchange WebSocket stream.
//!
//! The socket pump and the accumulation logic are separate pieces: the pump
//! authenticates the upgrade, subscribes to the fill and order channels, and
//! forwards parsed events into a bounded channel; [`await_order_outcome`] is
//! a channel-fed state machine that filters to one order id, deduplicates by
//! fill id, and resolves on a terminal status or the deadline.
//!
//! A deadline expiry is a normal outcome, not an error: the accumulated
//! fills are returned and the order is left alone (the exchange owns
//! cancellation).

use chrono::{DateTime, Utc};
use log::{debug, warn};
use predict_rust_core::clients::RequestSigner;
use predict_rust_core::error::ExchangeError;
use predict_rust_core::models::{price, Action, Fill, OrderStatus, Side};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One parsed message off the stream.
#[derive(Debug, Clone)]
pub enum FillStreamEvent {
    Fill(Fill),
    OrderUpdate { order_id: String, status: OrderStatus },
}

/// How one order's confirmation wait ended.
#[derive(Debug)]
pub enum OrderOutcome {
    /// The exchange reported a terminal status.
    Terminal {
        status: OrderStatus,
        fills: Vec<Fill>,
    },
    /// The deadline elapsed first. Whatever arrived is recorded.
    TimedOutPartial { fills: Vec<Fill> },
}

impl OrderOutcome {
    pub fn fills(&self) -> &[Fill] {
        match self {
            OrderOutcome::Terminal { fills, .. } => fills,
            OrderOutcome::TimedOutPartial { fills } => fills,
        }
    }
}

/// Accumulate events for `order_id` until a terminal status or `deadline`.
///
/// Channel closure without a terminal status is treated like a timeout: the
/// partial fills are still the truth of what confirmed.
pub async fn await_order_outcome(
    rx: &mut mpsc::Receiver<FillStreamEvent>,
    order_id: &str,
    deadline: Instant,
) -> OrderOutcome {
    let mut fills: Vec<Fill> = Vec::new();
    let mut seen_fill_ids: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            _ = sleep_until(deadline) => {
                debug!("Fill wait for {} hit deadline with {} fills", order_id, fills.len());
                return OrderOutcome::TimedOutPartial { fills };
            }
            event = rx.recv() => match event {
                None => {
                    warn!("Fill stream closed before {} reached a terminal status", order_id);
                    return OrderOutcome::TimedOutPartial { fills };
                }
                Some(FillStreamEvent::Fill(fill)) => {
                    if fill.order_id != order_id {
                        continue;
                    }
                    // Transports redeliver; fill_id is the dedupe key.
                    if seen_fill_ids.insert(fill.fill_id.clone()) {
                        fills.push(fill);
                    }
                }
                Some(FillStreamEvent::OrderUpdate { order_id: id, status }) => {
                    if id == order_id && status.is_terminal() {
                        return OrderOutcome::Terminal { status, fills };
                    }
                }
            }
        }
    }
}

/// Deadline for one order's confirmation wait. When the order carries an
/// exchange-side expiration, the wait extends past it by `margin` so the
/// exchange's own cancel/expire message has time to arrive.
pub fn outcome_deadline(
    base_wait: Duration,
    expiration: Option<DateTime<Utc>>,
    margin: Duration,
) -> Instant {
    let mut wait = base_wait;
    if let Some(exp) = expiration {
        if let Ok(until_exp) = (exp - Utc::now()).to_std() {
            wait = wait.max(until_exp + margin);
        }
    }
    Instant::now() + wait
}

// ============================================================================
// Socket pump
// ============================================================================

#[derive(Debug, Deserialize)]
struct WireWsMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    msg: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireFill {
    order_id: String,
    #[serde(alias = "trade_id")]
    fill_id: String,
    #[serde(default)]
    ticker: String,
    side: Side,
    action: Action,
    count: u32,
    price: serde_json::Value,
    #[serde(default, alias = "ts")]
    created_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct WireOrderUpdate {
    order_id: String,
    status: String,
}

fn parse_event(text: &str) -> Option<FillStreamEvent> {
    let message: WireWsMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!("Unparseable stream message: {} ({})", text, e);
            return None;
        }
    };

    match message.kind.as_str() {
        "fill" => {
            let wire: WireFill = serde_json::from_value(message.msg).ok()?;
            let fill_price = price::normalize(&wire.price).ok()?;
            Some(FillStreamEvent::Fill(Fill {
                order_id: wire.order_id,
                fill_id: wire.fill_id,
                ticker: wire.ticker,
                side: wire.side,
                action: wire.action,
                count: wire.count,
                price: fill_price,
                created_at: wire.created_time.unwrap_or_else(Utc::now),
            }))
        }
        "order" | "order_update" => {
            let wire: WireOrderUpdate = serde_json::from_value(message.msg).ok()?;
            let status = match wire.status.as_str() {
                "resting" => OrderStatus::Resting,
                "pending" => OrderStatus::Pending,
                "executed" => OrderStatus::Executed,
                "canceled" | "cancelled" => OrderStatus::Canceled,
                "expired" => OrderStatus::Expired,
                other => {
                    debug!("Unknown order status on stream: {}", other);
                    return None;
                }
            };
            Some(FillStreamEvent::OrderUpdate {
                order_id: wire.order_id,
                status,
            })
        }
        // Heartbeats, subscription acks
        _ => None,
    }
}

/// Opens authenticated fill/order subscriptions for one credential.
pub struct FillListener {
    ws_url: String,
    signer: Arc<RequestSigner>,
}

impl FillListener {
    pub fn new(ws_url: impl Into<String>, signer: Arc<RequestSigner>) -> Self {
        Self {
            ws_url: ws_url.into(),
            signer,
        }
    }

    /// Connect, authenticate the upgrade, subscribe once, and start the pump.
    /// The pump runs until the socket closes or the returned receiver is
    /// dropped, whichever comes first.
    pub async fn open(&self) -> Result<mpsc::Receiver<FillStreamEvent>, ExchangeError> {
        let mut request = self
            .ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| ExchangeError::Transport(format!("bad WebSocket URL: {}", e)))?;

        let ws_path = request.uri().path().to_string();
        let timestamp_ms = Utc::now().timestamp_millis();
        let auth = self.signer.sign_ws_handshake(&ws_path, timestamp_ms);
        for (name, value) in auth.pairs() {
            let header = HeaderValue::from_str(value)
                .map_err(|e| ExchangeError::Authentication(format!("bad header value: {}", e)))?;
            request.headers_mut().insert(name, header);
        }

        let (socket, _) = connect_async(request)
            .await
            .map_err(|e| ExchangeError::Transport(format!("WebSocket connect failed: {}", e)))?;
        let (mut write, mut read) = socket.split();

        let subscribe = serde_json::json!({
            "cmd": "subscribe",
            "params": {"channels": ["fill", "order"]}
        });
        write
            .send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|e| ExchangeError::Transport(format!("subscribe failed: {}", e)))?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Receiver gone: the attempt detached, stop pumping
                    _ = tx.closed() => break,
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = parse_event(&text) {
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if write.send(Message::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Fill stream read error: {}", e);
                            break;
                        }
                    }
                }
            }
            // Receiver sees the close as channel end
        });

        Ok(rx)
    }
}
