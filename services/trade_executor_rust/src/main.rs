use anyhow::Result;
use chrono::Utc;
use dotenv::dotenv;
use futures_util::StreamExt;
use log::{error, info, warn};
use predict_rust_core::models::{channels, TradeIntent};
use predict_rust_core::redis::RedisBus;
use std::sync::Arc;
use trade_executor_rust::audit::AuditLogger;
use trade_executor_rust::client_cache::ClientCache;
use trade_executor_rust::config::ExecutorConfig;
use trade_executor_rust::engine::{
    EnvCredentialStore, ExchangeMarketMetadata, ExchangePortfolio, TradeExecutor,
};
use trade_executor_rust::store::RedisRecordStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    info!("Starting Trade Executor Rust Service...");

    let config = ExecutorConfig::from_env();
    config.log_config();

    let redis = RedisBus::new().await?;
    let limiter_redis = if config.distributed_rate_limits {
        Some(redis.clone())
    } else {
        None
    };

    let credentials = Arc::new(EnvCredentialStore::from_env()?);
    let clients = Arc::new(ClientCache::new(&config, limiter_redis));
    let portfolio = Arc::new(ExchangePortfolio::new(
        credentials.clone(),
        clients.clone(),
    ));
    let metadata = Arc::new(ExchangeMarketMetadata::new(
        credentials.clone(),
        clients.clone(),
        "default",
    ));
    let records = Arc::new(RedisRecordStore::new(redis.clone()));
    let audit = Arc::new(AuditLogger::new(
        Some(Arc::new(redis.clone())),
        config.audit_log_enabled,
    ));

    let executor = Arc::new(TradeExecutor::new(
        credentials,
        portfolio,
        metadata,
        records,
        clients,
        audit,
        config,
    ));

    info!("Trade Executor ready");
    run(executor, redis).await
}

/// Listen for trade intents on the bus and run each to completion. Attempts
/// run concurrently; the per-credential rate limiters serialize what must
/// be serialized.
async fn run(executor: Arc<TradeExecutor>, redis: RedisBus) -> Result<()> {
    let mut pubsub = redis.subscribe(channels::EXECUTION_REQUESTS).await?;
    info!("Subscribed to {}", channels::EXECUTION_REQUESTS);

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: Vec<u8> = match msg.get_payload::<Vec<u8>>() {
            Ok(p) => p,
            Err(e) => {
                warn!("Trade intent: failed to read payload: {}", e);
                continue;
            }
        };

        let intent: TradeIntent = match serde_json::from_slice(&payload) {
            Ok(i) => i,
            Err(e) => {
                warn!("Trade intent: invalid JSON: {}", e);
                continue;
            }
        };

        let executor = executor.clone();
        tokio::spawn(async move {
            let started = Utc::now();
            let record = executor.execute(intent).await;
            let elapsed_ms = (Utc::now() - started).num_milliseconds();
            if record.success {
                info!(
                    "Trade {} completed in {}ms ({} contracts filled)",
                    record.trade_id,
                    elapsed_ms,
                    record.total_filled()
                );
            } else {
                error!(
                    "Trade {} failed in {}ms: {}",
                    record.trade_id,
                    elapsed_ms,
                    record
                        .error_message
                        .as_deref()
                        .unwrap_or("no reason recorded")
                );
            }
        });
    }

    Ok(())
}
