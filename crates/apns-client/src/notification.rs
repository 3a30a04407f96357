// Application-facing notification model shared by both protocol
// generations.
use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::payload::Payload;

/// A notification to deliver.
///
/// The HTTP/2 path reads `token` (a hex string) from the notification
/// itself; the binary path takes raw 32-byte tokens alongside the
/// notification in [`binary::Client::send`](crate::binary::Client::send) and
/// ignores `token`. `id` is the canonical UUID APNs echoes back on the
/// HTTP/2 path; the binary path assigns its own 32-bit ids at enqueue time.
#[derive(Debug, Clone, Default)]
pub struct Notification {
    /// Hex device token for the target device (HTTP/2 path).
    pub token: String,
    /// Canonical UUID identifying the notification (HTTP/2 path). Empty
    /// means "let APNs pick one".
    pub id: String,
    /// When the notification stops being worth delivering. `None` means
    /// deliver now or not at all; APNs will not store it.
    pub expiration: Option<SystemTime>,
    /// 10 delivers immediately, 5 lets the device batch for power. Any
    /// other value is treated as unset.
    pub priority: u8,
    /// Notification topic, typically the app bundle id. Required when the
    /// certificate carries multiple topics or when using a provider token.
    pub topic: String,
    /// Coalescing key: pending notifications with the same collapse id are
    /// replaced by the newest one. At most 64 bytes.
    pub collapse_id: String,
    pub payload: Payload,
}

impl Notification {
    /// Priority normalised to the accepted set, 0 when unset.
    pub fn priority(&self) -> u8 {
        match self.priority {
            5 | 10 => self.priority,
            _ => 0,
        }
    }

    /// True when an expiration was set and has already passed.
    pub fn is_expired(&self) -> bool {
        match self.expiration {
            Some(at) => at <= SystemTime::now(),
            None => false,
        }
    }

    /// Validates the notification for the binary path and returns the
    /// pieces of its framed form: encoded payload, expiration seconds (0
    /// for none), and normalised priority.
    pub(crate) fn framed_parts(&self, max_payload_size: usize) -> Result<(Bytes, u32, u8)> {
        if self.payload.is_empty() {
            return Err(Error::PayloadEmpty);
        }
        let payload = self.payload.encode()?;
        if payload.len() > max_payload_size {
            return Err(Error::PayloadTooLarge);
        }
        let expiration = match self.expiration {
            None => 0,
            Some(at) => {
                let unix = at
                    .duration_since(UNIX_EPOCH)
                    .map_err(|_| Error::NotificationExpired)?;
                if at <= SystemTime::now() {
                    return Err(Error::NotificationExpired);
                }
                unix.as_secs() as u32
            }
        };
        Ok((payload, expiration, self.priority()))
    }
}
