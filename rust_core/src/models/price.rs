//! Wire price normalization.
//!
//! Exchange payloads carry prices as integer cents in some fields and
//! decimal strings in others. Everything past this boundary works in f64
//! dollars in [0, 1], so both forms are normalized here before any domain
//! type is built.

use crate::error::ExchangeError;
use serde_json::Value;

/// Convert integer cents to dollars.
pub fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Convert a dollar price to the integer-cents wire form.
pub fn to_cents(price: f64) -> i64 {
    (price * 100.0).round() as i64
}

/// Normalize a wire price value into f64 dollars.
///
/// Integer numbers are cents. Floats are already dollars. Strings parse as
/// decimals; a parsed value above 1.0 is taken to be cents (some endpoints
/// stringify the cent integer).
pub fn normalize(value: &Value) -> Result<f64, ExchangeError> {
    let dollars = match value {
        Value::Number(n) => {
            if let Some(cents) = n.as_i64() {
                from_cents(cents)
            } else if let Some(f) = n.as_f64() {
                f
            } else {
                return Err(ExchangeError::Malformed(format!(
                    "unrepresentable price number: {}",
                    n
                )));
            }
        }
        Value::String(s) => {
            let parsed: f64 = s.trim().parse().map_err(|_| {
                ExchangeError::Malformed(format!("unparseable price string: {:?}", s))
            })?;
            if parsed > 1.0 {
                from_cents(parsed.round() as i64)
            } else {
                parsed
            }
        }
        other => {
            return Err(ExchangeError::Malformed(format!(
                "unexpected price value: {}",
                other
            )))
        }
    };

    if !(0.0..=1.0).contains(&dollars) || !dollars.is_finite() {
        return Err(ExchangeError::Malformed(format!(
            "price out of range after normalization: {}",
            dollars
        )));
    }
    Ok(dollars)
}
