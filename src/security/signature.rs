//! Webhook signature verification.
//!
//! Notifications are signed as
//! `sha256=hex(HMAC-SHA256(secret, message_id || timestamp || body))`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Notifications older than this are treated as replays.
pub const MAX_MESSAGE_AGE_SECS: i64 = 600;

/// Compute the signature header value for a notification.
pub fn sign(secret: &str, message_id: &str, timestamp: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(message_id.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body);

    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Check a signature header in constant time.
pub fn verify(secret: &str, message_id: &str, timestamp: &str, body: &[u8], header: &str) -> bool {
    let Some(expected) = sign(secret, message_id, timestamp, body) else {
        return false;
    };
    expected
        .as_bytes()
        .ct_eq(header.trim().to_ascii_lowercase().as_bytes())
        .into()
}

/// Whether an RFC 3339 message timestamp is recent enough to accept.
pub fn is_fresh(timestamp: &str, now: DateTime<Utc>) -> bool {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|sent| (now - sent.with_timezone(&Utc)).num_seconds().abs() <= MAX_MESSAGE_AGE_SECS)
        .unwrap_or(false)
}
