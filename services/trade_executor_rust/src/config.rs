//! Configuration for the trade executor service.
//!
//! Centralizes all tunables with safe defaults loaded from environment
//! variables.

use std::env;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    // Exchange endpoints
    /// REST base URL, including the API path prefix host-side
    pub exchange_base_url: String,
    /// WebSocket URL for the fill/order stream
    pub exchange_ws_url: String,

    // Rate limiting (tokens refill continuously at `capacity` per second)
    /// Read-bucket capacity per credential (default: 10/s)
    pub read_rate_capacity: f64,
    /// Write-bucket capacity per credential (default: 5/s)
    pub write_rate_capacity: f64,
    /// Back the buckets with Redis for cross-instance coordination
    pub distributed_rate_limits: bool,

    // Sizing
    /// Minimum exit-value / entry-cost ratio (default: 0.5)
    pub exit_liquidity_threshold: f64,
    /// Open-interest cap as a fraction of outstanding contracts (default: 1%)
    pub open_interest_limit_pct: f64,

    // Fill confirmation
    /// Base wait for fills after placement (default: 30s)
    pub fill_wait_secs: u64,
    /// Extra margin past an order's own expiration so the exchange's
    /// cancel message can arrive (default: 2s)
    pub fill_deadline_margin_secs: u64,

    // Transport
    /// Attempt cap for idempotent reads (default: 3)
    pub read_retry_attempts: u32,

    // Audit
    /// Whether audit logging is enabled (default: true)
    pub audit_log_enabled: bool,
}

impl ExecutorConfig {
    /// Load configuration from environment variables with safe defaults.
    pub fn from_env() -> Self {
        Self {
            exchange_base_url: env::var("EXCHANGE_BASE_URL")
                .unwrap_or_else(|_| "https://api.exchange.test/trade-api/v2".to_string()),

            exchange_ws_url: env::var("EXCHANGE_WS_URL")
                .unwrap_or_else(|_| "wss://api.exchange.test/trade-api/ws/v2".to_string()),

            read_rate_capacity: env::var("READ_RATE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10.0),

            write_rate_capacity: env::var("WRITE_RATE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5.0),

            distributed_rate_limits: env::var("DISTRIBUTED_RATE_LIMITS")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),

            exit_liquidity_threshold: env::var("EXIT_LIQUIDITY_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.5),

            open_interest_limit_pct: env::var("OPEN_INTEREST_LIMIT_PCT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.01),

            fill_wait_secs: env::var("FILL_WAIT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),

            fill_deadline_margin_secs: env::var("FILL_DEADLINE_MARGIN_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),

            read_retry_attempts: env::var("READ_RETRY_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),

            audit_log_enabled: env::var("AUDIT_LOG_ENABLED")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(true),
        }
    }

    /// Log current configuration (useful at startup)
    pub fn log_config(&self) {
        log::info!("ExecutorConfig loaded:");
        log::info!("  exchange_base_url: {}", self.exchange_base_url);
        log::info!("  exchange_ws_url: {}", self.exchange_ws_url);
        log::info!(
            "  rate capacities: read {}/s, write {}/s (distributed: {})",
            self.read_rate_capacity,
            self.write_rate_capacity,
            self.distributed_rate_limits
        );
        log::info!(
            "  exit_liquidity_threshold: {:.2}",
            self.exit_liquidity_threshold
        );
        log::info!(
            "  open_interest_limit_pct: {:.2}%",
            self.open_interest_limit_pct * 100.0
        );
        log::info!(
            "  fill wait: {}s (+{}s expiration margin)",
            self.fill_wait_secs,
            self.fill_deadline_margin_secs
        );
        log::info!("  read_retry_attempts: {}", self.read_retry_attempts);
        log::info!("  audit_log_enabled: {}", self.audit_log_enabled);
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
