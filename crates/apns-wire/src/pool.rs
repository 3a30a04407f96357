// Shared pool of scratch buffers for frame assembly.
use bytes::BytesMut;
use std::sync::{Mutex, OnceLock};

const DEFAULT_BUFFER_CAPACITY: usize = 4 * 1024;
const MAX_IDLE_BUFFERS: usize = 64;

/// Thread-safe pool of reusable `BytesMut` scratch buffers. Contents are
/// never inspected; callers take a cleared buffer and hand it back once the
/// filled part has been split off.
#[derive(Debug, Default)]
pub struct BufferPool {
    idle: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> BytesMut {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        idle.pop()
            .unwrap_or_else(|| BytesMut::with_capacity(DEFAULT_BUFFER_CAPACITY))
    }

    pub fn put(&self, mut buf: BytesMut) {
        buf.clear();
        if buf.capacity() == 0 {
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() < MAX_IDLE_BUFFERS {
            idle.push(buf);
        }
    }

    pub fn idle_len(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

static SHARED: OnceLock<BufferPool> = OnceLock::new();

/// Process-wide pool used by the frame encoders.
pub fn shared() -> &'static BufferPool {
    SHARED.get_or_init(BufferPool::new)
}
