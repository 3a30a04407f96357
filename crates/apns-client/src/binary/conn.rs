// Connection state machine for the binary gateway: owns the TLS stream,
// runs the error-frame reader, and serialises reconnects.
use apns_wire::ErrorReply;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info, warn};

use super::client::spawn_sender;
use super::frame_buffer::FrameBuffer;
use super::queue::Queue;
use crate::config::Config;
use crate::error::Error;
use crate::transport::{self, is_transient};

type Stream = TlsStream<TcpStream>;

/// State the client handle, the sender task and the reader task all need:
/// the queue with its replay cache, and the lifecycle flags.
pub(crate) struct Shared {
    pub queue: Queue,
    pub closed: AtomicBool,
    pub sending: AtomicBool,
    fatal: StdMutex<Option<String>>,
}

impl Shared {
    pub fn new(config: &Config) -> Self {
        Self {
            queue: Queue::new(
                config.tuning.max_payload_size,
                config.tuning.cache_life_time,
            ),
            closed: AtomicBool::new(false),
            sending: AtomicBool::new(false),
            fatal: StdMutex::new(None),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn record_fatal(&self, message: String) {
        let mut fatal = self.fatal.lock().unwrap_or_else(|e| e.into_inner());
        fatal.get_or_insert(message);
    }

    pub fn fatal_error(&self) -> Option<Error> {
        self.fatal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .map(Error::Gateway)
    }
}

/// Sole owner of the TLS stream. The writer half sits behind a lock taken
/// by the sender's flushes; each (re)connect bumps a generation so a stale
/// reader cannot tear down its successor's stream.
pub(crate) struct Conn {
    pub shared: Arc<Shared>,
    pub config: Config,
    writer: Mutex<Option<WriteHalf<Stream>>>,
    reconnect_lock: Mutex<()>,
    generation: AtomicU64,
    read_deadline: StdMutex<Instant>,
}

impl Conn {
    pub fn new(shared: Arc<Shared>, config: Config) -> Arc<Self> {
        Arc::new(Self {
            shared,
            config,
            writer: Mutex::new(None),
            reconnect_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            read_deadline: StdMutex::new(Instant::now()),
        })
    }

    /// Single dial attempt, used for the eager connect at construction.
    pub async fn connect_once(self: &Arc<Self>) -> Result<(), Error> {
        let _guard = self.reconnect_lock.lock().await;
        let addr = self.config.gateway_addr();
        info!(%addr, "connecting to gateway");
        let stream = transport::dial(
            &addr,
            self.config.identity.as_ref(),
            &self.config.extra_roots,
            self.config.tuning.connect_timeout,
        )
        .await?;
        self.install(stream).await;
        Ok(())
    }

    pub async fn ensure_connected(self: &Arc<Self>) -> Result<(), Error> {
        if self.writer.lock().await.is_some() {
            return Ok(());
        }
        self.reconnect().await
    }

    /// Dials until connected, backing off additively from the configured
    /// step up to its ceiling. Only a condition a retry cannot fix is
    /// returned as an error, and it is recorded as the client's terminal
    /// state.
    pub async fn reconnect(self: &Arc<Self>) -> Result<(), Error> {
        let _guard = self.reconnect_lock.lock().await;
        if self.writer.lock().await.is_some() {
            return Ok(());
        }
        let addr = self.config.gateway_addr();
        let tuning = &self.config.tuning;
        let mut delay = tuning.reconnect_step;
        loop {
            if self.shared.is_closed() && !self.shared.queue.has_pending() {
                return Err(Error::ClientIsClosed);
            }
            info!(%addr, "connecting to gateway");
            match transport::dial(
                &addr,
                self.config.identity.as_ref(),
                &self.config.extra_roots,
                tuning.connect_timeout,
            )
            .await
            {
                Ok(stream) => {
                    self.install(stream).await;
                    return Ok(());
                }
                Err(err) if is_transient(&err) => {
                    warn!(error = %err, delay = ?delay, "gateway dial failed, waiting");
                    tokio::time::sleep(delay).await;
                    delay = next_delay(delay, tuning.reconnect_step, tuning.max_reconnect_delay);
                }
                Err(err) => {
                    warn!(error = %err, "gateway unreachable");
                    let message = err.to_string();
                    self.shared.record_fatal(message.clone());
                    return Err(Error::Gateway(message));
                }
            }
        }
    }

    // Declared with an explicit boxed-future return (rather than `async fn`)
    // so its Send-ness is nominal at the signature: `run_reader` awaits this
    // method transitively (via `reconnect`) while this method spawns
    // `run_reader`, and that mutual recursion is only resolvable if one side
    // states Send up front instead of asking the compiler to infer it from
    // the other's body.
    fn install(self: &Arc<Self>, stream: Stream) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let (reader, writer) = tokio::io::split(stream);
            let generation = {
                // The generation moves under the writer lock so a stale
                // reader's teardown can never hit the stream it did not own.
                let mut guard = self.writer.lock().await;
                let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                *guard = Some(writer);
                generation
            };
            self.extend_read_deadline();
            tokio::spawn(run_reader(Arc::clone(self), reader, generation));
        })
    }

    /// Writes everything the buffer holds. On failure the flushed batch is
    /// queued for replay from the cache and the stream is dropped so the
    /// next pass reconnects.
    pub async fn flush(&self, buffer: &mut FrameBuffer) -> Result<(), Error> {
        if buffer.is_empty() {
            return Ok(());
        }
        let (bytes, ids) = buffer.take();
        let mut writer = self.writer.lock().await;
        let result = match writer.as_mut() {
            Some(stream) => {
                let write = stream.write_all(&bytes).await;
                match write {
                    Ok(()) => stream.flush().await,
                    Err(err) => Err(err),
                }
            }
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "not connected")),
        };
        match result {
            Ok(()) => {
                drop(writer);
                self.extend_read_deadline();
                debug!(count = ids.len(), bytes = bytes.len(), "sent notifications");
                Ok(())
            }
            Err(err) => {
                *writer = None;
                drop(writer);
                warn!(error = %err, count = ids.len(), "send failed, queueing batch for replay");
                if let Some(first) = ids.first() {
                    self.shared.queue.resend_from_id(*first, false);
                }
                Err(Error::Io(err))
            }
        }
    }

    /// Closes the current stream. `generation` guards against a reader
    /// from a previous connection tearing down its successor.
    pub async fn teardown(&self, generation: u64) {
        let mut writer = self.writer.lock().await;
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        if let Some(mut stream) = writer.take() {
            let _ = stream.shutdown().await;
        }
    }

    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        if let Some(mut stream) = writer.take() {
            let _ = stream.shutdown().await;
        }
    }

    fn extend_read_deadline(&self) {
        let deadline = Instant::now() + self.config.tuning.read_timeout;
        *self
            .read_deadline
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = deadline;
    }

    fn read_deadline(&self) -> Instant {
        *self
            .read_deadline
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

/// Reader task: blocks on the six-byte error reply. On a decoded reply the
/// replay decision is made here; on EOF or a socket error the connection is
/// re-established unless the client is closed or the wait was an idle
/// timeout.
async fn run_reader(conn: Arc<Conn>, mut reader: ReadHalf<Stream>, generation: u64) {
    let mut header = [0u8; apns_wire::ERROR_REPLY_LEN];
    loop {
        let deadline = conn.read_deadline();
        match tokio::time::timeout_at(deadline, reader.read_exact(&mut header)).await {
            Err(_elapsed) => {
                // A successful write may have pushed the deadline out while
                // this task slept on the old one.
                if conn.read_deadline() > Instant::now() {
                    continue;
                }
                debug!("connection idle, closing");
                conn.teardown(generation).await;
                return;
            }
            Ok(Err(err)) => {
                conn.teardown(generation).await;
                if conn.shared.is_closed() {
                    return;
                }
                if err.kind() == io::ErrorKind::UnexpectedEof {
                    info!("connection closed by server");
                } else {
                    warn!(error = %err, "gateway read failed");
                }
                reconnect_and_resume(conn).await;
                return;
            }
            Ok(Ok(_)) => {
                let Ok(reply) = ErrorReply::decode(&header) else {
                    continue;
                };
                handle_reply(&conn, reply);
                conn.teardown(generation).await;
                if conn.shared.is_closed() {
                    return;
                }
                reconnect_and_resume(conn).await;
                return;
            }
        }
    }
}

fn handle_reply(conn: &Arc<Conn>, reply: ErrorReply) {
    if reply.id != 0 {
        warn!(
            id = reply.id,
            status = reply.status_text(),
            "gateway rejected a notification"
        );
        // A real rejection drops the faulted notification from the replay;
        // a status-0 reply with an id keeps it in.
        conn.shared.queue.resend_from_id(reply.id, reply.status > 0);
    } else {
        info!(status = reply.status_text(), "gateway error");
    }
}

async fn reconnect_and_resume(conn: Arc<Conn>) {
    if conn.reconnect().await.is_err() {
        return;
    }
    if conn.shared.queue.has_pending() {
        spawn_sender(&conn);
    }
}

/// Additive backoff: each failure adds one step until the ceiling, with no
/// jitter.
fn next_delay(
    delay: std::time::Duration,
    step: std::time::Duration,
    max: std::time::Duration,
) -> std::time::Duration {
    if delay < max { (delay + step).min(max) } else { delay }
}
