//! Audit logging for the trade executor.
//!
//! Structured JSON entries for every execution event, written to console and
//! optionally published to a Redis channel. Severity follows the error
//! taxonomy: business rejections warn, transport/auth failures error,
//! normal lifecycle events info.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use predict_rust_core::models::{channels, Side, TradeExecutionRecord, TradeIntent};
use predict_rust_core::redis::RedisBus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Execution request received
    ExecutionRequested,
    /// Order successfully placed
    OrderPlaced,
    /// Order fully filled
    OrderFilled,
    /// Order partially filled when the attempt closed
    OrderPartialFill,
    /// Sizing or balance constraints rejected the attempt
    OrderRejected,
    /// Transport or exchange failure
    OrderFailed,
    /// Exchange canceled or expired the order
    OrderCanceled,
    /// Fill wait deadline elapsed
    FillTimeout,
    /// Credential could not be loaded or was refused
    AuthenticationFailed,
    /// Shared rate-limit store unreachable, running on local buckets
    RateLimiterDegraded,
}

/// Structured audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filled_count: Option<u32>,
    /// Quantity-weighted average across the fill sequence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_fill_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AuditLogEntry {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            trade_id: None,
            user_id: None,
            ticker: None,
            side: None,
            order_id: None,
            contract_count: None,
            price: None,
            filled_count: None,
            average_fill_price: None,
            reason: None,
            metadata: None,
        }
    }

    pub fn from_intent(event_type: AuditEventType, trade_id: &str, intent: &TradeIntent) -> Self {
        let mut entry = Self::new(event_type);
        entry.trade_id = Some(trade_id.to_string());
        entry.user_id = Some(intent.user_id.clone());
        entry.ticker = Some(intent.ticker.clone());
        entry.side = Some(intent.side);
        entry.price = Some(intent.max_price);
        entry
    }

    pub fn from_record(event_type: AuditEventType, record: &TradeExecutionRecord) -> Self {
        let mut entry = Self::new(event_type);
        entry.trade_id = Some(record.trade_id.clone());
        entry.user_id = Some(record.user_id.clone());
        entry.ticker = Some(record.ticker.clone());
        entry.side = Some(record.side);
        entry.order_id = record.order.as_ref().map(|o| o.order_id.clone());
        entry.contract_count = record.sizing.as_ref().map(|s| s.contract_count);
        entry.price = Some(record.max_price);
        entry.filled_count = Some(record.total_filled());
        entry.average_fill_price = record.average_fill_price();
        entry.reason = record.error_message.clone();
        entry
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Audit logger that writes to console and Redis
pub struct AuditLogger {
    redis: Option<Arc<RedisBus>>,
    enabled: bool,
}

impl AuditLogger {
    pub fn new(redis: Option<Arc<RedisBus>>, enabled: bool) -> Self {
        Self { redis, enabled }
    }

    pub async fn log(&self, entry: AuditLogEntry) {
        if !self.enabled {
            return;
        }

        let json = entry.to_json();

        match entry.event_type {
            AuditEventType::OrderFailed | AuditEventType::AuthenticationFailed => {
                error!("[AUDIT] {}", json);
            }
            AuditEventType::OrderRejected
            | AuditEventType::FillTimeout
            | AuditEventType::RateLimiterDegraded => {
                warn!("[AUDIT] {}", json);
            }
            AuditEventType::ExecutionRequested
            | AuditEventType::OrderPlaced
            | AuditEventType::OrderFilled
            | AuditEventType::OrderPartialFill
            | AuditEventType::OrderCanceled => {
                info!("[AUDIT] {}", json);
            }
        }

        if let Some(redis) = &self.redis {
            if let Err(e) = redis.publish_str(channels::AUDIT_EVENTS, &json).await {
                debug!("Failed to publish audit event to Redis: {}", e);
            }
        }
    }

    pub async fn log_requested(&self, trade_id: &str, intent: &TradeIntent) {
        self.log(AuditLogEntry::from_intent(
            AuditEventType::ExecutionRequested,
            trade_id,
            intent,
        ))
        .await;
    }

    pub async fn log_record(&self, event_type: AuditEventType, record: &TradeExecutionRecord) {
        self.log(AuditLogEntry::from_record(event_type, record)).await;
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(None, true)
    }
}
