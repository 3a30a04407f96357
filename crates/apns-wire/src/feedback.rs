// Record format of the legacy feedback service.
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// Length of the fixed part of a feedback record: a timestamp and the token
/// length, followed by that many token bytes.
pub const FEEDBACK_HEADER_LEN: usize = 6;

/// One inactive-device report: when the OS last saw the app missing, and the
/// device token it was registered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRecord {
    pub timestamp: u32,
    pub token: Bytes,
}

impl FeedbackRecord {
    /// Splits the fixed header into the timestamp and the token length.
    pub fn decode_header(input: &[u8; FEEDBACK_HEADER_LEN]) -> (u32, usize) {
        let mut buf = &input[..];
        let timestamp = buf.get_u32();
        let token_len = buf.get_u16() as usize;
        (timestamp, token_len)
    }

    /// Decodes back-to-back records until the input is exhausted.
    pub fn decode_all(mut input: &[u8]) -> Result<Vec<Self>> {
        let mut records = Vec::new();
        while input.has_remaining() {
            if input.remaining() < FEEDBACK_HEADER_LEN {
                return Err(Error::Incomplete);
            }
            let timestamp = input.get_u32();
            let token_len = input.get_u16() as usize;
            if input.remaining() < token_len {
                return Err(Error::Incomplete);
            }
            let token = Bytes::copy_from_slice(&input[..token_len]);
            input.advance(token_len);
            records.push(Self { timestamp, token });
        }
        Ok(records)
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(FEEDBACK_HEADER_LEN + self.token.len());
        buf.put_u32(self.timestamp);
        buf.put_u16(self.token.len() as u16);
        buf.put_slice(&self.token);
    }

    pub fn token_hex(&self) -> String {
        hex::encode(&self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_all_round_trips() {
        let records = vec![
            FeedbackRecord {
                timestamp: 1_700_000_000,
                token: Bytes::from_static(&[0xAA; 32]),
            },
            FeedbackRecord {
                timestamp: 1_700_000_060,
                token: Bytes::from_static(&[0xBB; 32]),
            },
        ];
        let mut buf = BytesMut::new();
        for record in &records {
            record.encode_into(&mut buf);
        }
        let decoded = FeedbackRecord::decode_all(&buf).expect("decode");
        assert_eq!(decoded, records);
    }

    #[test]
    fn empty_input_yields_no_records() {
        assert!(FeedbackRecord::decode_all(&[]).expect("decode").is_empty());
    }

    #[test]
    fn truncated_token_is_an_error() {
        let mut buf = BytesMut::new();
        FeedbackRecord {
            timestamp: 1,
            token: Bytes::from_static(&[0xCC; 32]),
        }
        .encode_into(&mut buf);
        let err = FeedbackRecord::decode_all(&buf[..buf.len() - 4]).expect_err("truncated");
        assert!(matches!(err, Error::Incomplete));
    }

    #[test]
    fn header_split() {
        let mut buf = BytesMut::new();
        buf.put_u32(77);
        buf.put_u16(32);
        let header: [u8; FEEDBACK_HEADER_LEN] = buf[..].try_into().expect("header");
        assert_eq!(FeedbackRecord::decode_header(&header), (77, 32));
    }
}
