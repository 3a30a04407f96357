// Ordered queue of framed notifications awaiting send, plus the replay
// cache of what already went out.
use apns_wire::{DEVICE_TOKEN_LEN, FramedNotification};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::Result;
use crate::notification::Notification;

#[derive(Debug, Clone)]
pub(crate) struct QueueEntry {
    pub framed: FramedNotification,
    pub created: Instant,
    pub sent: Option<Instant>,
}

/// Pending notifications in send order, and an insertion-ordered cache of
/// sent entries kept for `cache_life_time` so an error reply can trigger a
/// replay. Ids are assigned here from a single wrapping counter; id 0 is
/// reserved for "not yet assigned".
#[derive(Debug)]
pub(crate) struct Queue {
    max_payload_size: usize,
    cache_life_time: Duration,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    pending: VecDeque<QueueEntry>,
    cache: Vec<QueueEntry>,
    counter: u32,
}

impl Queue {
    pub fn new(max_payload_size: usize, cache_life_time: Duration) -> Self {
        Self {
            max_payload_size,
            cache_life_time,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Validates the notification once, then appends one clone per token
    /// with a fresh id. Tokens of the wrong length are skipped silently.
    pub fn add<T: AsRef<[u8]>>(&self, notification: &Notification, tokens: &[T]) -> Result<()> {
        let (payload, expiration, priority) =
            notification.framed_parts(self.max_payload_size)?;
        let now = Instant::now();
        let mut inner = self.lock();
        for token in tokens {
            let Ok(token) = <[u8; DEVICE_TOKEN_LEN]>::try_from(token.as_ref()) else {
                continue;
            };
            inner.counter = next_id(inner.counter);
            let framed = FramedNotification {
                id: inner.counter,
                token,
                payload: payload.clone(),
                expiration,
                priority,
            };
            inner.pending.push_back(QueueEntry {
                framed,
                created: now,
                sent: None,
            });
        }
        Ok(())
    }

    /// Dequeues the oldest entry, stamping it sent and moving it into the
    /// replay cache.
    pub fn get(&self) -> Option<QueueEntry> {
        let mut inner = self.lock();
        let mut entry = inner.pending.pop_front()?;
        entry.sent = Some(Instant::now());
        inner.cache.push(entry.clone());
        Some(entry)
    }

    pub fn has_pending(&self) -> bool {
        !self.lock().pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn cached_len(&self) -> usize {
        self.lock().cache.len()
    }

    /// Re-enqueues at the head every cached entry with id `>= id` (`> id`
    /// when the faulted notification itself must not be replayed), in
    /// original order and keeping their ids, then truncates the cache.
    pub fn resend_from_id(&self, id: u32, exclude: bool) -> usize {
        let mut inner = self.lock();
        let Some(start) = inner
            .cache
            .iter()
            .position(|e| if exclude { e.framed.id > id } else { e.framed.id >= id })
        else {
            return 0;
        };
        let resend = inner.cache.split_off(start);
        let count = resend.len();
        for mut entry in resend.into_iter().rev() {
            entry.sent = None;
            inner.pending.push_front(entry);
        }
        debug!(count, from_id = id, exclude, "replaying cached notifications");
        count
    }

    /// Drops the cache prefix older than the configured lifetime. The cache
    /// is time-ordered by construction, so this is a prefix trim.
    pub fn prune(&self) -> usize {
        let Some(deadline) = Instant::now().checked_sub(self.cache_life_time) else {
            return 0;
        };
        let mut inner = self.lock();
        let keep_from = inner
            .cache
            .iter()
            .position(|e| e.created > deadline)
            .unwrap_or(inner.cache.len());
        if keep_from > 0 {
            inner.cache.drain(..keep_from);
        }
        keep_from
    }

    /// Abandons everything not yet written, for a non-waiting close.
    pub fn clear_pending(&self) -> usize {
        let mut inner = self.lock();
        let dropped = inner.pending.len();
        inner.pending.clear();
        dropped
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn set_counter(&self, value: u32) {
        self.lock().counter = value;
    }
}

fn next_id(counter: u32) -> u32 {
    // Wraps past the reserved 0.
    match counter {
        u32::MAX => 1,
        n => n + 1,
    }
}
