//! Error taxonomy shared by the exchange client and the execution service.

use thiserror::Error;

/// Failures surfaced by the exchange REST/WebSocket client.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Credential could not be loaded or the exchange refused the signature.
    /// Fatal for the attempt; never retried.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network-level failure (DNS, connect, timeout, dropped body).
    #[error("transport error: {0}")]
    Transport(String),

    /// The exchange returned a non-success HTTP status.
    #[error("exchange API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Response arrived but did not match the expected wire shape.
    #[error("malformed exchange response: {0}")]
    Malformed(String),
}

impl ExchangeError {
    /// Business rejections are expected outcomes (insufficient balance,
    /// paused market, self-cross) and are folded into the execution record
    /// instead of being treated as faults.
    pub fn is_business_rejection(&self) -> bool {
        match self {
            ExchangeError::Api { status, message } => {
                if !(400..500).contains(status) || *status == 401 || *status == 403 {
                    return false;
                }
                let msg = message.to_lowercase();
                msg.contains("insufficient")
                    || msg.contains("balance")
                    || msg.contains("paused")
                    || msg.contains("closed")
                    || msg.contains("not tradeable")
                    || msg.contains("self_cross")
                    || msg.contains("self cross")
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        ExchangeError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_rejection_classification() {
        let rejected = ExchangeError::Api {
            status: 400,
            message: "insufficient_balance".to_string(),
        };
        assert!(rejected.is_business_rejection());

        let paused = ExchangeError::Api {
            status: 409,
            message: "market is paused".to_string(),
        };
        assert!(paused.is_business_rejection());

        let auth = ExchangeError::Api {
            status: 401,
            message: "invalid signature".to_string(),
        };
        assert!(!auth.is_business_rejection());

        let outage = ExchangeError::Api {
            status: 503,
            message: "service unavailable".to_string(),
        };
        assert!(!outage.is_business_rejection());

        let transport = ExchangeError::Transport("connection reset".to_string());
        assert!(!transport.is_business_rejection());
    }
}
