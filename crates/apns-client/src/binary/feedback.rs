// One-shot reader for the feedback service.
use apns_wire::FeedbackRecord;
use apns_wire::feedback::FEEDBACK_HEADER_LEN;
use bytes::Bytes;
use std::io;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::transport;

/// Connects to the feedback service with the configuration's TLS identity
/// and drains every inactive-device report. EOF is the normal end of the
/// stream; the connection is closed afterwards.
pub async fn feedback(config: &Config) -> Result<Vec<FeedbackRecord>> {
    let addr = config.feedback_addr();
    let mut stream = transport::dial(
        &addr,
        config.identity.as_ref(),
        &config.extra_roots,
        config.tuning.connect_timeout,
    )
    .await?;
    debug!(%addr, "feedback connection established");

    let mut records = Vec::new();
    let mut header = [0u8; FEEDBACK_HEADER_LEN];
    loop {
        match stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        }
        let (timestamp, token_len) = FeedbackRecord::decode_header(&header);
        let mut token = vec![0u8; token_len];
        match stream.read_exact(&mut token).await {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        }
        records.push(FeedbackRecord {
            timestamp,
            token: Bytes::from(token),
        });
    }
    debug!(count = records.len(), "feedback drained");
    Ok(records)
}
