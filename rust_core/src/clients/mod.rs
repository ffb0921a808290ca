pub mod exchange;
pub mod signer;

// Re-export commonly used types
pub use exchange::{ExchangeClient, MarketInfo, OrderSubmission};
pub use signer::{RequestSigner, SignatureHeaders};
