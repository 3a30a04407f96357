// Wire formats for the legacy APNs binary protocol: framed notifications
// (command 2), the six-byte error reply, and feedback service records.
pub mod feedback;
pub mod frame;
pub mod pool;
pub mod status;

pub use feedback::FeedbackRecord;
pub use frame::{DEVICE_TOKEN_LEN, FRAME_COMMAND, FramedNotification};
pub use pool::BufferPool;
pub use status::{ERROR_REPLY_COMMAND, ERROR_REPLY_LEN, ErrorReply, status_text};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("incomplete frame")]
    Incomplete,
    #[error("unexpected command {0}")]
    BadCommand(u8),
    #[error("unexpected frame item {0}")]
    BadItem(u8),
    #[error("frame item length mismatch")]
    BadItemLength,
    #[error("device token must be {DEVICE_TOKEN_LEN} bytes")]
    BadTokenLength,
}
