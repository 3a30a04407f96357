//! Client for the legacy binary provider protocol.
//!
//! # Purpose
//! Maintains one TLS connection to the gateway, batches framed
//! notifications into TCP-sized writes, and recovers from the asynchronous
//! error replies APNs sends back: rejected notifications are dropped while
//! everything queued after them is replayed from a bounded cache.
//!
//! # Design notes
//! Two cooperating tasks own the connection: a reader blocking on the
//! six-byte error frame and a sender draining the queue through the frame
//! buffer. Reconnects are serialised and back off additively. All errors on
//! this path are recovered internally except pre-flight validation and an
//! unclassifiable dial failure, which is terminal.
mod client;
mod conn;
mod feedback;
mod frame_buffer;
mod queue;

pub use apns_wire::FeedbackRecord;
pub use client::Client;
pub use feedback::feedback;
