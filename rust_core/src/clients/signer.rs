//! RSA-PSS request signing for exchange API authentication.
//!
//! The exchange authenticates each REST call and each WebSocket handshake
//! with three headers derived from a per-user RSA key pair:
//!
//! - `ACCESS-KEY`: the key id
//! - `ACCESS-TIMESTAMP`: unix milliseconds
//! - `ACCESS-SIGNATURE`: base64 RSA-PSS/SHA-256 over
//!   `"{timestamp}{METHOD}{path}"` with the query string stripped.
//!
//! PSS padding is randomized, so two signatures over the same message differ
//! while both verify.

use crate::error::ExchangeError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rsa::pkcs8::DecodePrivateKey;
use rsa::pss::{Signature, SigningKey};
use rsa::sha2::Sha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::RsaPrivateKey;

pub const HEADER_ACCESS_KEY: &str = "ACCESS-KEY";
pub const HEADER_ACCESS_SIGNATURE: &str = "ACCESS-SIGNATURE";
pub const HEADER_ACCESS_TIMESTAMP: &str = "ACCESS-TIMESTAMP";

/// The three authentication headers for one request.
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    pub access_key: String,
    pub signature: String,
    pub timestamp: String,
}

impl SignatureHeaders {
    /// Header pairs in wire order, for both reqwest and WS upgrade builders.
    pub fn pairs(&self) -> [(&'static str, &str); 3] {
        [
            (HEADER_ACCESS_KEY, self.access_key.as_str()),
            (HEADER_ACCESS_SIGNATURE, self.signature.as_str()),
            (HEADER_ACCESS_TIMESTAMP, self.timestamp.as_str()),
        ]
    }
}

/// Signs requests for one credential. Cheap to clone behind an Arc; the
/// parsed key is reused across calls.
pub struct RequestSigner {
    key_id: String,
    signing_key: SigningKey<Sha256>,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("key_id", &self.key_id)
            .finish()
    }
}

impl RequestSigner {
    /// Parse a PKCS#8 PEM private key. A malformed key is an authentication
    /// failure: fatal for the attempt, never retried.
    pub fn from_pem(key_id: impl Into<String>, private_key_pem: &str) -> Result<Self, ExchangeError> {
        // Env-sourced keys often carry escaped newlines
        let pem = private_key_pem.replace("\\n", "\n");
        let private_key = RsaPrivateKey::from_pkcs8_pem(&pem)
            .map_err(|e| ExchangeError::Authentication(format!("invalid private key PEM: {}", e)))?;

        Ok(Self {
            key_id: key_id.into(),
            signing_key: SigningKey::<Sha256>::new(private_key),
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Sign one request. The signed path never includes the query string;
    /// the method is upper-cased before signing.
    pub fn sign(&self, method: &str, path: &str, timestamp_ms: i64) -> SignatureHeaders {
        let path = path.split('?').next().unwrap_or(path);
        let message = format!("{}{}{}", timestamp_ms, method.to_uppercase(), path);

        let mut rng = rand::thread_rng();
        let signature: Signature = self.signing_key.sign_with_rng(&mut rng, message.as_bytes());

        SignatureHeaders {
            access_key: self.key_id.clone(),
            signature: BASE64.encode(signature.to_bytes()),
            timestamp: timestamp_ms.to_string(),
        }
    }

    /// WebSocket upgrades sign the fixed pair (GET, ws path).
    pub fn sign_ws_handshake(&self, ws_path: &str, timestamp_ms: i64) -> SignatureHeaders {
        self.sign("GET", ws_path, timestamp_ms)
    }
}
