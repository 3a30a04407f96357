// End-to-end scenarios against a mock binary gateway: clean delivery,
// error-triggered replay, shutdown without replay, and reconnecting
// through refused dials.
use anyhow::{Context, Result};
use apns_client::binary::{Client, feedback};
use apns_client::{Config, Notification, Payload, Tuning};
use apns_wire::{ErrorReply, FramedNotification};
use bytes::BytesMut;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use serde_json::json;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

fn make_acceptor() -> Result<(TlsAcceptor, CertificateDer<'static>)> {
    let cert = rcgen::generate_simple_self_signed(vec!["127.0.0.1".into()])
        .context("generate self-signed cert")?;
    let cert_der = cert.cert.der().clone();
    let key_der = PrivatePkcs8KeyDer::from(cert.signing_key.serialize_der());
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der.clone()], PrivateKeyDer::Pkcs8(key_der))
        .context("build server config")?;
    Ok((TlsAcceptor::from(Arc::new(config)), cert_der))
}

fn fast_tuning() -> Tuning {
    Tuning {
        send_delay: Duration::from_millis(20),
        reconnect_step: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(5),
        ..Tuning::default()
    }
}

fn test_config(port: u16, root: CertificateDer<'static>) -> Config {
    Config {
        bundle_id: "com.example.app".to_string(),
        sandbox: true,
        identity: None,
        tuning: fast_tuning(),
        gateway: Some(format!("127.0.0.1:{port}")),
        feedback_gateway: Some(format!("127.0.0.1:{port}")),
        extra_roots: vec![root],
    }
}

fn device_token(fill: u8) -> [u8; 32] {
    [fill; 32]
}

fn alert() -> Notification {
    Notification {
        payload: Payload::from(json!({"aps": {"alert": "Test"}})),
        ..Notification::default()
    }
}

/// Reads one complete frame off the stream; `None` on a clean EOF.
async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Option<FramedNotification>> {
    let mut header = [0u8; 5];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let body_len = u32::from_be_bytes(header[1..5].try_into().unwrap()) as usize;
    let mut frame = vec![0u8; 5 + body_len];
    frame[..5].copy_from_slice(&header);
    stream.read_exact(&mut frame[5..]).await?;
    Ok(Some(FramedNotification::decode(&frame).context("decode frame")?))
}

#[tokio::test]
async fn happy_path_delivers_in_order() -> Result<()> {
    let (acceptor, root) = make_acceptor()?;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await?;
        let mut stream = acceptor.accept(tcp).await?;
        let first = read_frame(&mut stream).await?.context("first frame")?;
        let second = read_frame(&mut stream).await?.context("second frame")?;
        anyhow::Ok((first, second, stream))
    });

    let client = Client::connect(test_config(port, root)).await?;
    client.send(&alert(), &[device_token(0xA1), device_token(0xA2)])?;

    let (first, second, _stream) = server.await??;
    assert_eq!(first.id, 1);
    assert_eq!(second.id, 2);
    assert_eq!(first.token, device_token(0xA1));
    assert_eq!(second.token, device_token(0xA2));
    let payload: serde_json::Value = serde_json::from_slice(&first.payload)?;
    assert_eq!(payload["aps"]["alert"], "Test");

    assert_eq!(client.pending(), 0);
    assert_eq!(client.cached(), 2);
    client.close(true).await;
    Ok(())
}

#[tokio::test]
async fn rejected_notification_is_dropped_and_the_rest_replayed() -> Result<()> {
    let (acceptor, root) = make_acceptor()?;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await?;
        let mut stream = acceptor.accept(tcp).await?;
        let mut first_ids = Vec::new();
        while first_ids.len() < 5 {
            let frame = read_frame(&mut stream).await?.context("frame")?;
            first_ids.push(frame.id);
        }
        // Fault notification 2 and drop the connection, as the gateway
        // does after reporting an error.
        stream
            .write_all(&ErrorReply::new(8, 2).encode())
            .await?;
        stream.shutdown().await?;

        let (tcp, _) = listener.accept().await?;
        let mut stream = acceptor.accept(tcp).await?;
        let mut second_ids = Vec::new();
        while second_ids.len() < 3 {
            let frame = read_frame(&mut stream).await?.context("replayed frame")?;
            second_ids.push(frame.id);
        }
        anyhow::Ok((first_ids, second_ids, stream))
    });

    let client = Client::connect(test_config(port, root)).await?;
    let tokens: Vec<[u8; 32]> = (1..=5).map(device_token).collect();
    client.send(&alert(), &tokens)?;

    let (first_ids, second_ids, _stream) = server.await??;
    assert_eq!(first_ids, vec![1, 2, 3, 4, 5]);
    // Notification 2 was faulted: everything after it is retransmitted,
    // the faulted one is not.
    assert_eq!(second_ids, vec![3, 4, 5]);

    client.close(true).await;
    Ok(())
}

#[tokio::test]
async fn shutdown_reconnects_without_replay() -> Result<()> {
    let (acceptor, root) = make_acceptor()?;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let (reconnected_tx, reconnected_rx) = tokio::sync::oneshot::channel();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await?;
        let mut stream = acceptor.accept(tcp).await?;
        let first = read_frame(&mut stream).await?.context("first frame")?;
        stream.write_all(&ErrorReply::new(0, 0).encode()).await?;
        stream.shutdown().await?;

        let (tcp, _) = listener.accept().await?;
        let mut stream = acceptor.accept(tcp).await?;
        let _ = reconnected_tx.send(());
        let mut ids = Vec::new();
        while ids.len() < 2 {
            let frame = read_frame(&mut stream).await?.context("frame")?;
            ids.push(frame.id);
        }
        anyhow::Ok((first.id, ids, stream))
    });

    let client = Client::connect(test_config(port, root)).await?;
    client.send(&alert(), &[device_token(0xB1)])?;

    // Wait until the client is back on a fresh connection, then keep
    // sending.
    reconnected_rx.await.context("reconnect signal")?;
    client.send(&alert(), &[device_token(0xB2), device_token(0xB3)])?;

    let (first_id, later_ids, _stream) = server.await??;
    assert_eq!(first_id, 1);
    // No replay happened: only the new notifications flow.
    assert_eq!(later_ids, vec![2, 3]);

    client.close(true).await;
    Ok(())
}

#[tokio::test]
async fn reconnect_retries_until_the_gateway_returns() -> Result<()> {
    let (acceptor, root) = make_acceptor()?;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let acceptor_clone = acceptor.clone();
    let server = tokio::spawn(async move {
        // First connection is dropped immediately, and so is the
        // listener: the next dials are refused.
        let (tcp, _) = listener.accept().await?;
        let stream = acceptor_clone.accept(tcp).await?;
        drop(stream);
        drop(listener);
        tokio::time::sleep(Duration::from_millis(150)).await;

        // The gateway comes back on the same port.
        let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await?;
        let (tcp, _) = listener.accept().await?;
        let mut stream = acceptor.accept(tcp).await?;
        let frame = read_frame(&mut stream).await?.context("frame")?;
        anyhow::Ok((frame, stream))
    });

    let client = Client::connect(test_config(port, root)).await?;
    // Give the client time to notice the EOF and start its dial loop.
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.send(&alert(), &[device_token(0xC1)])?;

    let (frame, _stream) = server.await??;
    assert_eq!(frame.id, 1);
    assert_eq!(frame.token, device_token(0xC1));

    client.close(true).await;
    Ok(())
}

#[tokio::test]
async fn feedback_drains_until_eof() -> Result<()> {
    let (acceptor, root) = make_acceptor()?;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await?;
        let mut stream = acceptor.accept(tcp).await?;
        let mut buf = BytesMut::new();
        apns_wire::FeedbackRecord {
            timestamp: 1_700_000_000,
            token: bytes::Bytes::copy_from_slice(&device_token(0xD1)),
        }
        .encode_into(&mut buf);
        apns_wire::FeedbackRecord {
            timestamp: 1_700_000_060,
            token: bytes::Bytes::copy_from_slice(&device_token(0xD2)),
        }
        .encode_into(&mut buf);
        stream.write_all(&buf).await?;
        stream.shutdown().await?;
        anyhow::Ok(())
    });

    let config = test_config(port, root);
    let records = feedback(&config).await?;
    server.await??;

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].timestamp, 1_700_000_000);
    assert_eq!(records[0].token.as_ref(), device_token(0xD1));
    assert_eq!(records[1].timestamp, 1_700_000_060);
    assert_eq!(records[1].token_hex(), hex::encode(device_token(0xD2)));
    Ok(())
}

#[tokio::test]
async fn concurrent_senders_share_one_id_sequence() -> Result<()> {
    let (acceptor, root) = make_acceptor()?;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    const SENDERS: usize = 4;
    const PER_SENDER: usize = 10;
    let total = SENDERS * PER_SENDER;

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await?;
        let mut stream = acceptor.accept(tcp).await?;
        let mut ids = Vec::new();
        while ids.len() < total {
            let frame = read_frame(&mut stream).await?.context("frame")?;
            ids.push(frame.id);
        }
        anyhow::Ok((ids, stream))
    });

    let client = Arc::new(Client::connect(test_config(port, root)).await?);
    let mut tasks = Vec::new();
    for sender in 0..SENDERS {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            for i in 0..PER_SENDER {
                client
                    .send(&alert(), &[device_token((sender * PER_SENDER + i) as u8)])
                    .expect("send");
            }
        }));
    }
    for task in tasks {
        task.await?;
    }

    let (mut ids, _stream) = server.await??;
    ids.sort_unstable();
    let expected: Vec<u32> = (1..=total as u32).collect();
    assert_eq!(ids, expected, "ids must be unique and contiguous");

    assert_eq!(client.pending(), 0);
    assert_eq!(client.cached(), total);
    client.close(true).await;
    Ok(())
}
