// Public client for the binary provider protocol.
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::conn::{Conn, Shared};
use super::frame_buffer::FrameBuffer;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::notification::Notification;

/// Client for the legacy binary gateway.
///
/// `send` never blocks on the network: notifications are validated,
/// enqueued, and drained by a background sender that batches them into
/// TCP-sized frames. Delivery errors are recovered internally by replaying
/// the affected suffix of the sent cache over a fresh connection.
pub struct Client {
    shared: Arc<Shared>,
    conn: Arc<Conn>,
    pruner: JoinHandle<()>,
}

impl Client {
    /// Dials the gateway for the configuration and starts the background
    /// tasks. The first dial is a single attempt so bad credentials or a
    /// dead network surface here rather than spinning silently.
    pub async fn connect(config: Config) -> Result<Self> {
        let shared = Arc::new(Shared::new(&config));
        let conn = Conn::new(Arc::clone(&shared), config);
        conn.connect_once().await?;

        let pruner = tokio::spawn({
            let shared = Arc::clone(&shared);
            let life_time = conn.config.tuning.cache_life_time;
            async move {
                let period = life_time.max(Duration::from_millis(10));
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let dropped = shared.queue.prune();
                    if dropped > 0 {
                        debug!(dropped, "dropped expired cache entries");
                    }
                }
            }
        });

        Ok(Self {
            shared,
            conn,
            pruner,
        })
    }

    /// Enqueues one clone of the notification per device token and wakes
    /// the sender. Validation failures are returned synchronously; tokens
    /// of the wrong length are skipped silently.
    pub fn send<T: AsRef<[u8]>>(&self, notification: &Notification, tokens: &[T]) -> Result<()> {
        if self.shared.is_closed() {
            return Err(Error::ClientIsClosed);
        }
        if let Some(fatal) = self.shared.fatal_error() {
            return Err(fatal);
        }
        self.shared.queue.add(notification, tokens)?;
        spawn_sender(&self.conn);
        Ok(())
    }

    /// Notifications waiting to be written.
    pub fn pending(&self) -> usize {
        self.shared.queue.pending_len()
    }

    /// Sent notifications still held for replay.
    pub fn cached(&self) -> usize {
        self.shared.queue.cached_len()
    }

    /// Closes the client. New sends are rejected immediately; with `wait`
    /// the call polls until the queue has drained before the stream is
    /// dropped, otherwise the stream is dropped at once.
    pub async fn close(&self, wait: bool) {
        self.shared.closed.store(true, Ordering::Release);
        if wait {
            while self.shared.queue.has_pending() || self.shared.sending.load(Ordering::Acquire) {
                if self.shared.fatal_error().is_some() {
                    warn!("closing with undeliverable notifications");
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        } else {
            let dropped = self.shared.queue.clear_pending();
            if dropped > 0 {
                warn!(dropped, "closed with notifications still queued");
            }
        }
        self.pruner.abort();
        self.conn.shutdown().await;
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.pruner.abort();
    }
}

/// Starts the sender unless one is already running. The flag flips back
/// only when the sender has fully drained and flushed, so concurrent sends
/// collapse into the running task.
pub(crate) fn spawn_sender(conn: &Arc<Conn>) {
    if conn
        .shared
        .sending
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }
    tokio::spawn(run_sender(Arc::clone(conn)));
}

async fn run_sender(conn: Arc<Conn>) {
    let tuning = conn.config.tuning.clone();
    let mut buffer = FrameBuffer::new(tuning.max_frame_size);
    loop {
        if !conn.shared.queue.has_pending() && buffer.is_empty() {
            break;
        }
        if let Err(err) = conn.ensure_connected().await {
            warn!(error = %err, "sender stopping");
            break;
        }
        match conn.shared.queue.get() {
            Some(entry) => {
                if buffer.would_overflow(&entry.framed)
                    && conn.flush(&mut buffer).await.is_err()
                {
                    // The batch and this entry are back in the queue; the
                    // next pass reconnects.
                    continue;
                }
                buffer.add(&entry.framed);
                if tuning.send_delay.is_zero() && conn.flush(&mut buffer).await.is_err() {
                    continue;
                }
            }
            None => {
                // Queue just drained: give callers one delay to add more
                // before the partial buffer goes out.
                tokio::time::sleep(tuning.send_delay).await;
                if conn.shared.queue.has_pending() {
                    continue;
                }
                let _ = conn.flush(&mut buffer).await;
                break;
            }
        }
    }
    conn.shared.sending.store(false, Ordering::Release);
    // Anything enqueued while the flag was being cleared needs a fresh
    // sender.
    if conn.shared.queue.has_pending()
        && conn.shared.fatal_error().is_none()
        && !conn.shared.is_closed()
    {
        spawn_sender(&conn);
    }
}
