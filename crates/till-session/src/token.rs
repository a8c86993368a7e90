//! Bearer token inspection
//!
//! Decides whether a bearer credential is expired without verifying its
//! signature: the client only peeks at the expiry claim, the server remains
//! the authority. Any decode failure, missing claim, or malformed token is
//! treated as expired (fail closed).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;

/// Tokens expiring within this window of now are already considered
/// expired, so a request issued with one does not die mid-flight.
pub const EXPIRY_BUFFER: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: i64,
}

/// Extract the expiry claim from a bearer token.
///
/// Accepts both `payload.signature` and JWT `header.payload.signature`
/// shapes; the claim segment is the payload either way. Returns `None` for
/// anything that does not decode cleanly.
pub fn expiry(token: &str) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = token.split('.').collect();
    let payload_b64 = match parts.as_slice() {
        [payload, _signature] => *payload,
        [_header, payload, _signature] => *payload,
        _ => return None,
    };

    let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
    let claim: ExpiryClaim = serde_json::from_slice(&payload).ok()?;
    Utc.timestamp_opt(claim.exp, 0).single()
}

/// Whether the token is expired, applying [`EXPIRY_BUFFER`].
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now())
}

/// Expiry check against an explicit "now"; split out for tests.
pub fn is_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    match expiry(token) {
        Some(exp) => {
            let buffer = chrono::Duration::from_std(EXPIRY_BUFFER).unwrap_or_default();
            exp <= now + buffer
        }
        None => {
            tracing::debug!("token did not decode to an expiry claim; treating as expired");
            true
        }
    }
}
