//! Durable execution-record store.
//!
//! The record is written once when an attempt opens and updated once when it
//! terminates; it is never deleted. Storage rides on Redis (already present
//! for the distributed limiter); an in-memory implementation backs tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use predict_rust_core::models::{channels, TradeExecutionRecord};
use predict_rust_core::redis::RedisBus;
use redis::AsyncCommands;
use std::collections::HashMap;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist the just-opened record, before any exchange call.
    async fn create(&self, record: &TradeExecutionRecord) -> Result<()>;
    /// Persist the terminal state of the record.
    async fn finalize(&self, record: &TradeExecutionRecord) -> Result<()>;
}

pub struct RedisRecordStore {
    bus: RedisBus,
    key_prefix: String,
}

impl RedisRecordStore {
    pub fn new(bus: RedisBus) -> Self {
        Self {
            bus,
            key_prefix: "trade_records".to_string(),
        }
    }

    fn key(&self, trade_id: &str) -> String {
        format!("{}:{}", self.key_prefix, trade_id)
    }

    async fn write(&self, record: &TradeExecutionRecord) -> Result<()> {
        let payload = serde_json::to_string(record).context("unserializable record")?;
        let mut conn = self.bus.get_connection().await?;
        conn.set::<_, _, ()>(self.key(&record.trade_id), payload)
            .await
            .context("failed to write execution record")?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for RedisRecordStore {
    async fn create(&self, record: &TradeExecutionRecord) -> Result<()> {
        debug!("Opening execution record {}", record.trade_id);
        self.write(record).await
    }

    async fn finalize(&self, record: &TradeExecutionRecord) -> Result<()> {
        self.write(record).await?;
        // Downstream consumers (position tracking, reporting) get the
        // finished record on the bus.
        self.bus
            .publish(channels::EXECUTION_RECORDS, record)
            .await
            .context("failed to publish finished record")?;
        Ok(())
    }
}

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, TradeExecutionRecord>>,
    created: Mutex<Vec<String>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, trade_id: &str) -> Option<TradeExecutionRecord> {
        self.records.lock().get(trade_id).cloned()
    }

    /// Trade ids in creation order.
    pub fn created_ids(&self) -> Vec<String> {
        self.created.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, record: &TradeExecutionRecord) -> Result<()> {
        self.created.lock().push(record.trade_id.clone());
        self.records
            .lock()
            .insert(record.trade_id.clone(), record.clone());
        Ok(())
    }

    async fn finalize(&self, record: &TradeExecutionRecord) -> Result<()> {
        self.records
            .lock()
            .insert(record.trade_id.clone(), record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use predict_rust_core::models::{Action, OrderType, Side, TradeIntent};

    fn intent() -> TradeIntent {
        TradeIntent {
            ticker: "TEST".to_string(),
            side: Side::Yes,
            action: Action::Buy,
            max_dollar_amount: 100.0,
            max_price: 0.60,
            order_type: OrderType::Market,
            use_bid_based_pricing: false,
            user_id: "u1".to_string(),
            idea_id: None,
            idea_version: None,
        }
    }

    #[tokio::test]
    async fn test_memory_store_create_then_finalize() {
        let store = MemoryRecordStore::new();
        let mut record = TradeExecutionRecord::open("t1", &intent());
        store.create(&record).await.unwrap();
        assert!(!store.get("t1").unwrap().success);

        record.finish_succeeded();
        store.finalize(&record).await.unwrap();
        let stored = store.get("t1").unwrap();
        assert!(stored.success);
        assert!(stored.completed_at.is_some());
        assert_eq!(store.created_ids(), vec!["t1".to_string()]);
        assert_eq!(store.len(), 1);
    }
}
