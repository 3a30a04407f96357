// Framed-notification encoding for the binary provider protocol (command 2).
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::pool;
use crate::{Error, Result};

/// Command byte opening every framed notification.
pub const FRAME_COMMAND: u8 = 2;
/// Raw device token length on the binary path.
pub const DEVICE_TOKEN_LEN: usize = 32;

const ITEM_TOKEN: u8 = 1;
const ITEM_PAYLOAD: u8 = 2;
const ITEM_ID: u8 = 3;
const ITEM_EXPIRATION: u8 = 4;
const ITEM_PRIORITY: u8 = 5;

const FRAME_HEADER_LEN: usize = 5;
const ITEM_HEADER_LEN: usize = 3;

/// A notification in its on-wire form: assigned id, raw device token,
/// pre-encoded payload, expiration and priority.
///
/// Optional items are omitted from the frame: the id when it is still
/// unassigned (0), the expiration when none was set, and the priority unless
/// it is one of the two values APNs accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedNotification {
    pub id: u32,
    pub token: [u8; DEVICE_TOKEN_LEN],
    pub payload: Bytes,
    pub expiration: u32,
    pub priority: u8,
}

impl FramedNotification {
    pub fn new(token: [u8; DEVICE_TOKEN_LEN], payload: Bytes) -> Self {
        Self {
            id: 0,
            token,
            payload,
            expiration: 0,
            priority: 0,
        }
    }

    /// Priority normalised to the accepted set: 5, 10, or 0 for unset.
    pub fn priority(&self) -> u8 {
        match self.priority {
            5 | 10 => self.priority,
            _ => 0,
        }
    }

    pub fn token_hex(&self) -> String {
        hex::encode(self.token)
    }

    /// The expiration as wall-clock time, `None` when unset.
    pub fn expiration_time(&self) -> Option<std::time::SystemTime> {
        if self.expiration == 0 {
            return None;
        }
        Some(
            std::time::UNIX_EPOCH
                + std::time::Duration::from_secs(u64::from(self.expiration)),
        )
    }

    pub fn is_expired(&self) -> bool {
        match self.expiration_time() {
            Some(at) => at <= std::time::SystemTime::now(),
            None => false,
        }
    }

    /// Length of the item section, excluding the five-byte frame header.
    pub fn items_len(&self) -> usize {
        let mut len = ITEM_HEADER_LEN + DEVICE_TOKEN_LEN;
        len += ITEM_HEADER_LEN + self.payload.len();
        if self.id > 0 {
            len += ITEM_HEADER_LEN + 4;
        }
        if self.expiration != 0 {
            len += ITEM_HEADER_LEN + 4;
        }
        if matches!(self.priority, 5 | 10) {
            len += ITEM_HEADER_LEN + 1;
        }
        len
    }

    /// Total encoded length including the frame header.
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_LEN + self.items_len()
    }

    /// Appends the complete frame (header and items) to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.frame_len());
        buf.put_u8(FRAME_COMMAND);
        buf.put_u32(self.items_len() as u32);

        buf.put_u8(ITEM_TOKEN);
        buf.put_u16(DEVICE_TOKEN_LEN as u16);
        buf.put_slice(&self.token);

        buf.put_u8(ITEM_PAYLOAD);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);

        if self.id > 0 {
            buf.put_u8(ITEM_ID);
            buf.put_u16(4);
            buf.put_u32(self.id);
        }
        if self.expiration != 0 {
            buf.put_u8(ITEM_EXPIRATION);
            buf.put_u16(4);
            buf.put_u32(self.expiration);
        }
        if matches!(self.priority, 5 | 10) {
            // The gateway expects the historical encoding here: the length
            // field reads 4 while a single value byte follows.
            buf.put_u8(ITEM_PRIORITY);
            buf.put_u16(4);
            buf.put_u8(self.priority);
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = pool::shared().get();
        self.encode_into(&mut buf);
        let out = buf.split().freeze();
        pool::shared().put(buf);
        out
    }

    /// Parses one complete frame. The input must hold exactly the frame
    /// header and its declared item section.
    pub fn decode(input: &[u8]) -> Result<Self> {
        let mut buf = input;
        if buf.remaining() < FRAME_HEADER_LEN {
            return Err(Error::Incomplete);
        }
        let command = buf.get_u8();
        if command != FRAME_COMMAND {
            return Err(Error::BadCommand(command));
        }
        let items_len = buf.get_u32() as usize;
        if buf.remaining() < items_len {
            return Err(Error::Incomplete);
        }
        let mut items = &buf[..items_len];

        let mut out = Self::new([0; DEVICE_TOKEN_LEN], Bytes::new());
        let mut saw_token = false;
        let mut saw_payload = false;
        while items.has_remaining() {
            if items.remaining() < ITEM_HEADER_LEN {
                return Err(Error::Incomplete);
            }
            let item = items.get_u8();
            let declared = items.get_u16() as usize;
            match item {
                ITEM_TOKEN => {
                    if declared != DEVICE_TOKEN_LEN || items.remaining() < DEVICE_TOKEN_LEN {
                        return Err(Error::BadTokenLength);
                    }
                    items.copy_to_slice(&mut out.token);
                    saw_token = true;
                }
                ITEM_PAYLOAD => {
                    if items.remaining() < declared {
                        return Err(Error::Incomplete);
                    }
                    out.payload = Bytes::copy_from_slice(&items[..declared]);
                    items.advance(declared);
                    saw_payload = true;
                }
                ITEM_ID => {
                    if declared != 4 || items.remaining() < 4 {
                        return Err(Error::BadItemLength);
                    }
                    out.id = items.get_u32();
                }
                ITEM_EXPIRATION => {
                    if declared != 4 || items.remaining() < 4 {
                        return Err(Error::BadItemLength);
                    }
                    out.expiration = items.get_u32();
                }
                ITEM_PRIORITY => {
                    // Single value byte regardless of the declared length.
                    if !items.has_remaining() {
                        return Err(Error::BadItemLength);
                    }
                    out.priority = items.get_u8();
                }
                other => return Err(Error::BadItem(other)),
            }
        }
        if !saw_token || !saw_payload {
            return Err(Error::Incomplete);
        }
        Ok(out)
    }
}

impl std::fmt::Display for FramedNotification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.token == [0; DEVICE_TOKEN_LEN] {
            write!(f, "untokened message [{}]", self.id)
        } else {
            write!(f, "{} [{}]", self.token_hex(), self.id)
        }
    }
}
