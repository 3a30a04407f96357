// Size-bounded batching of framed notifications into one TCP write.
use apns_wire::FramedNotification;
use bytes::{Bytes, BytesMut};

/// Accumulates encoded frames up to `max_size` bytes, remembering the ids
/// they carry so a failed write can be replayed. The companion delay timer
/// lives in the send loop: the buffer itself only answers "would one more
/// frame overflow" and hands out its contents.
#[derive(Debug)]
pub(crate) struct FrameBuffer {
    buf: BytesMut,
    ids: Vec<u32>,
    max_size: usize,
}

impl FrameBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_size.min(64 * 1024)),
            ids: Vec::new(),
            max_size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn count(&self) -> usize {
        self.ids.len()
    }

    /// True when appending this frame would push the buffer past its size
    /// bound. An empty buffer never overflows: an oversized single frame
    /// must still make progress.
    pub fn would_overflow(&self, framed: &FramedNotification) -> bool {
        !self.buf.is_empty() && self.buf.len() + framed.frame_len() > self.max_size
    }

    pub fn add(&mut self, framed: &FramedNotification) {
        framed.encode_into(&mut self.buf);
        self.ids.push(framed.id);
    }

    /// Drains the buffer, returning the bytes to write and the ids they
    /// carry.
    pub fn take(&mut self) -> (Bytes, Vec<u32>) {
        (self.buf.split().freeze(), std::mem::take(&mut self.ids))
    }
}
