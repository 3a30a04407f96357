//! Client for the HTTP/2 Provider API.
//!
//! Each push is an independent POST over a long-lived HTTP/2 transport;
//! rejections come back synchronously as [`ResponseError`](crate::ResponseError)
//! values. The [`Pool`] fans notifications out over a fixed number of
//! worker tasks.
mod client;
mod pool;

pub use client::{Client, HOST, HOST_SANDBOX, MAX_VOIP_PAYLOAD_SIZE};
pub use pool::{Pool, PoolResponse};
