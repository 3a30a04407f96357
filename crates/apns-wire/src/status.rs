// Error-reply codec for the binary gateway and its status table.
use bytes::{Buf, BufMut, BytesMut};

use crate::{Error, Result};

/// Command byte of an error reply from the gateway.
pub const ERROR_REPLY_COMMAND: u8 = 8;
/// An error reply is always exactly six bytes.
pub const ERROR_REPLY_LEN: usize = 6;

/// The reply APNs writes back on the notification stream before closing it:
/// a status code and the id of the notification it faulted. An id of zero
/// means the reply concerns the connection as a whole, not one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorReply {
    pub command: u8,
    pub status: u8,
    pub id: u32,
}

impl ErrorReply {
    pub fn new(status: u8, id: u32) -> Self {
        Self {
            command: ERROR_REPLY_COMMAND,
            status,
            id,
        }
    }

    pub fn decode(input: &[u8]) -> Result<Self> {
        if input.len() != ERROR_REPLY_LEN {
            return Err(Error::Incomplete);
        }
        let mut buf = input;
        Ok(Self {
            command: buf.get_u8(),
            status: buf.get_u8(),
            id: buf.get_u32(),
        })
    }

    pub fn encode(&self) -> [u8; ERROR_REPLY_LEN] {
        let mut buf = BytesMut::with_capacity(ERROR_REPLY_LEN);
        buf.put_u8(self.command);
        buf.put_u8(self.status);
        buf.put_u32(self.id);
        let mut out = [0u8; ERROR_REPLY_LEN];
        out.copy_from_slice(&buf);
        out
    }

    /// True when the reply faults a specific notification.
    pub fn faults_notification(&self) -> bool {
        self.id != 0 && self.status > 0
    }

    pub fn status_text(&self) -> &'static str {
        status_text(self.status)
    }
}

impl std::fmt::Display for ErrorReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.id != 0 {
            write!(f, "APNS {} [message id {}]", self.status_text(), self.id)
        } else {
            write!(f, "APNS {}", self.status_text())
        }
    }
}

/// Text for the known binary-protocol status codes.
pub fn status_text(status: u8) -> &'static str {
    match status {
        0 => "No Errors",
        1 => "Processing Error",
        2 => "Missing Device Token",
        3 => "Missing Topic",
        4 => "Missing Payload",
        5 => "Invalid Token Size",
        6 => "Invalid Topic Size",
        7 => "Invalid Payload Size",
        8 => "Invalid Token",
        10 => "Shutdown",
        // Undocumented, observed in the wild.
        128 => "Invalid Frame Item Id",
        _ => "Unknown error",
    }
}
