//! Exchange REST client with RSA-PSS authentication.
//!
//! One client per credential. Every call is signed; responses are normalized
//! into domain types at this boundary (cents and decimal strings never leak
//! past it).

use crate::clients::signer::{RequestSigner, SignatureHeaders};
use crate::error::ExchangeError;
use crate::models::{price, Order, OrderStatus};
use crate::orderbook::{OrderbookLevel, OrderbookSnapshot};
use chrono::{DateTime, Utc};
use log::{debug, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Path prefix included in the signed message (the exchange signs the full
/// API path, not just the endpoint suffix).
const API_PATH_PREFIX: &str = "/trade-api/v2";

#[derive(Clone)]
pub struct ExchangeClient {
    client: Client,
    base_url: String,
    signer: Arc<RequestSigner>,
}

impl std::fmt::Debug for ExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeClient")
            .field("base_url", &self.base_url)
            .field("key_id", &self.signer.key_id())
            .finish()
    }
}

/// Domain-level order submission; converted to the wire form internally.
#[derive(Debug, Clone)]
pub struct OrderSubmission {
    pub ticker: String,
    pub side: crate::models::Side,
    pub action: crate::models::Action,
    pub order_type: crate::models::OrderType,
    pub count: u32,
    /// Limit price in dollars for the requested side.
    pub price: f64,
    /// Idempotency token; the exchange deduplicates on it, which is why the
    /// placement write is never auto-retried.
    pub client_order_id: String,
    pub expiration_ts: Option<i64>,
}

#[derive(Debug, Serialize)]
struct WireOrderRequest {
    ticker: String,
    action: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    yes_price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    no_price: Option<i64>,
    client_order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiration_ts: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WireOrder {
    order_id: String,
    #[serde(default)]
    client_order_id: Option<String>,
    #[serde(default)]
    ticker: Option<String>,
    status: String,
    #[serde(default)]
    remaining_count: Option<u32>,
    #[serde(default, alias = "fill_count")]
    filled_count: Option<u32>,
    #[serde(default)]
    yes_price: Option<serde_json::Value>,
    #[serde(default)]
    no_price: Option<serde_json::Value>,
    #[serde(default, alias = "created_time")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    expiration_time: Option<DateTime<Utc>>,
}

impl WireOrder {
    fn into_order(self, fallback_client_order_id: &str) -> Result<Order, ExchangeError> {
        let status = match self.status.as_str() {
            "resting" => OrderStatus::Resting,
            "pending" => OrderStatus::Pending,
            "executed" => OrderStatus::Executed,
            "canceled" | "cancelled" => OrderStatus::Canceled,
            "expired" => OrderStatus::Expired,
            other => {
                return Err(ExchangeError::Malformed(format!(
                    "unknown order status: {:?}",
                    other
                )))
            }
        };
        let yes_price = match &self.yes_price {
            Some(v) => price::normalize(v)?,
            None => 0.0,
        };
        let no_price = match &self.no_price {
            Some(v) => price::normalize(v)?,
            None => 0.0,
        };
        Ok(Order {
            order_id: self.order_id,
            client_order_id: self
                .client_order_id
                .unwrap_or_else(|| fallback_client_order_id.to_string()),
            ticker: self.ticker.unwrap_or_default(),
            status,
            remaining_count: self.remaining_count.unwrap_or(0),
            filled_count: self.filled_count.unwrap_or(0),
            yes_price,
            no_price,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            expiration_time: self.expiration_time,
        })
    }
}

/// Market metadata relevant to sizing.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketInfo {
    pub ticker: String,
    pub status: String,
    #[serde(default)]
    pub open_interest: u64,
}

impl ExchangeClient {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        private_key_pem: &str,
    ) -> Result<Self, ExchangeError> {
        let signer = RequestSigner::from_pem(key_id, private_key_pem)?;
        let client = Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::Transport(format!("failed to build HTTP client: {}", e)))?;

        let key_id = signer.key_id();
        let key_suffix = if key_id.len() > 4 {
            &key_id[key_id.len() - 4..]
        } else {
            key_id
        };
        info!("Exchange client initialized (key: ...{})", key_suffix);

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer: Arc::new(signer),
        })
    }

    pub fn signer(&self) -> Arc<RequestSigner> {
        Arc::clone(&self.signer)
    }

    /// Auth headers for a WebSocket upgrade to `ws_path`.
    pub fn ws_auth_headers(&self, ws_path: &str) -> SignatureHeaders {
        self.signer.sign_ws_handshake(ws_path, now_ms())
    }

    async fn authenticated_request(
        &self,
        method: &str,
        endpoint: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ExchangeError> {
        let timestamp_ms = now_ms();
        let full_path = format!("{}{}", API_PATH_PREFIX, endpoint);
        let headers = self.signer.sign(method, &full_path, timestamp_ms);

        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = match method {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "DELETE" => self.client.delete(&url),
            other => {
                return Err(ExchangeError::Transport(format!(
                    "unsupported HTTP method: {}",
                    other
                )))
            }
        };

        request = request
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        for (name, value) in headers.pairs() {
            request = request.header(name, value);
        }
        if let Some(json_body) = body {
            request = request.json(&json_body);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(ExchangeError::Authentication(format!(
                    "exchange refused signature ({}): {}",
                    status, message
                )));
            }
            return Err(ExchangeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let data: serde_json::Value = resp.json().await?;
        Ok(data)
    }

    /// Fetch the current bid ladders for one market.
    pub async fn get_orderbook(&self, ticker: &str) -> Result<OrderbookSnapshot, ExchangeError> {
        let endpoint = format!("/markets/{}/orderbook", ticker);
        let data = self.authenticated_request("GET", &endpoint, None).await?;

        let book = data
            .get("orderbook")
            .ok_or_else(|| ExchangeError::Malformed("missing orderbook field".to_string()))?;
        let yes_bids = parse_ladder(book.get("yes"))?;
        let no_bids = parse_ladder(book.get("no"))?;
        debug!(
            "Orderbook {}: {} yes levels, {} no levels",
            ticker,
            yes_bids.len(),
            no_bids.len()
        );
        Ok(OrderbookSnapshot::new(ticker, yes_bids, no_bids))
    }

    /// Fetch market metadata (status, open interest).
    pub async fn get_market(&self, ticker: &str) -> Result<MarketInfo, ExchangeError> {
        let endpoint = format!("/markets/{}", ticker);
        let data = self.authenticated_request("GET", &endpoint, None).await?;
        let market = data
            .get("market")
            .ok_or_else(|| ExchangeError::Malformed("missing market field".to_string()))?;
        serde_json::from_value(market.clone())
            .map_err(|e| ExchangeError::Malformed(format!("bad market payload: {}", e)))
    }

    /// Current available balance in dollars.
    pub async fn get_balance(&self) -> Result<f64, ExchangeError> {
        let data = self
            .authenticated_request("GET", "/portfolio/balance", None)
            .await?;
        let cents = data
            .get("balance")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ExchangeError::Malformed("missing balance field".to_string()))?;
        Ok(price::from_cents(cents))
    }

    /// Place one order. Not idempotent at the transport level; the
    /// `client_order_id` is the dedupe token, so callers must not retry this.
    pub async fn place_order(&self, submission: &OrderSubmission) -> Result<Order, ExchangeError> {
        let price_cents = price::to_cents(submission.price);
        let wire = WireOrderRequest {
            ticker: submission.ticker.clone(),
            action: submission.action.as_str().to_string(),
            side: submission.side.as_str().to_string(),
            order_type: submission.order_type.as_str().to_string(),
            count: submission.count,
            yes_price: (submission.side == crate::models::Side::Yes).then_some(price_cents),
            no_price: (submission.side == crate::models::Side::No).then_some(price_cents),
            client_order_id: submission.client_order_id.clone(),
            expiration_ts: submission.expiration_ts,
        };

        info!(
            "Placing order: {} {} x{} @ {}c on {} (client_order_id={})",
            wire.action, wire.side, wire.count, price_cents, wire.ticker, wire.client_order_id
        );

        let body = serde_json::to_value(&wire)
            .map_err(|e| ExchangeError::Malformed(format!("unserializable order: {}", e)))?;
        let data = self
            .authenticated_request("POST", "/portfolio/orders", Some(body))
            .await?;

        let wire_order: WireOrder = data
            .get("order")
            .cloned()
            .ok_or_else(|| ExchangeError::Malformed("missing order field".to_string()))
            .and_then(|v| {
                serde_json::from_value(v)
                    .map_err(|e| ExchangeError::Malformed(format!("bad order payload: {}", e)))
            })?;
        wire_order.into_order(&submission.client_order_id)
    }
}

fn parse_ladder(value: Option<&serde_json::Value>) -> Result<Vec<OrderbookLevel>, ExchangeError> {
    let rows = match value {
        Some(v) if !v.is_null() => v
            .as_array()
            .ok_or_else(|| ExchangeError::Malformed("orderbook side is not an array".to_string()))?,
        _ => return Ok(Vec::new()),
    };

    let mut levels = Vec::with_capacity(rows.len());
    for row in rows {
        let pair = row
            .as_array()
            .filter(|p| p.len() == 2)
            .ok_or_else(|| ExchangeError::Malformed(format!("bad orderbook level: {}", row)))?;
        let level_price = price::normalize(&pair[0])?;
        let quantity = pair[1]
            .as_u64()
            .ok_or_else(|| ExchangeError::Malformed(format!("bad level quantity: {}", pair[1])))?;
        levels.push(OrderbookLevel::new(level_price, quantity as u32));
    }
    Ok(levels)
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
