// TLS dialer shared by the binary gateway and feedback connections.
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig as TlsConfig, RootCertStore};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use crate::error::{Error, Result};

/// TLS client identity: the provider certificate chain and its private key.
#[derive(Debug)]
pub struct Identity {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl Clone for Identity {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl Identity {
    /// Builds an identity from PEM text: one or more certificate blocks and
    /// one private key block.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let chain = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<io::Result<Vec<_>>>()
            .map_err(|e| Error::Config(format!("parse certificate PEM: {e}")))?;
        if chain.is_empty() {
            return Err(Error::Config("no certificates found".into()));
        }
        let key = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(|e| Error::Config(format!("parse private key PEM: {e}")))?
            .ok_or_else(|| Error::Config("no private key found".into()))?;
        Ok(Self { chain, key })
    }

    /// PEM rendering of the key followed by the chain, the form the HTTP/2
    /// transport consumes.
    pub(crate) fn to_pem(&self) -> String {
        let tag = match &self.key {
            PrivateKeyDer::Pkcs8(_) => "PRIVATE KEY",
            PrivateKeyDer::Pkcs1(_) => "RSA PRIVATE KEY",
            PrivateKeyDer::Sec1(_) => "EC PRIVATE KEY",
            _ => "PRIVATE KEY",
        };
        let mut out = pem::encode(&pem::Pem::new(tag, self.key.secret_der().to_vec()));
        for cert in &self.chain {
            out.push_str(&pem::encode(&pem::Pem::new("CERTIFICATE", cert.to_vec())));
        }
        out
    }
}

/// Dials `addr` ("host:port") and completes a TLS handshake with SNI set to
/// the host, all within `connect_timeout`.
pub(crate) async fn dial(
    addr: &str,
    identity: Option<&Identity>,
    extra_roots: &[CertificateDer<'static>],
    connect_timeout: Duration,
) -> io::Result<TlsStream<TcpStream>> {
    let (host, _port) = addr
        .rsplit_once(':')
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("bad address {addr}")))?;

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    for der in extra_roots {
        roots
            .add(der.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    }
    let builder = TlsConfig::builder().with_root_certificates(roots);
    let tls = match identity {
        Some(identity) => builder
            .with_client_auth_cert(identity.chain.clone(), identity.key.clone_key())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?,
        None => builder.with_no_client_auth(),
    };
    let connector = TlsConnector::from(Arc::new(tls));
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let addr = addr.to_string();
    let handshake = async move {
        let tcp = TcpStream::connect(&addr).await?;
        tcp.set_nodelay(true)?;
        connector.connect(server_name, tcp).await
    };
    let stream = tokio::time::timeout(connect_timeout, handshake)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;

    let (_, session) = stream.get_ref();
    debug!(
        version = ?session.protocol_version(),
        cipher = ?session.negotiated_cipher_suite().map(|suite| suite.suite()),
        "TLS session established"
    );
    Ok(stream)
}

/// Errors worth retrying forever with backoff, as opposed to conditions a
/// redial cannot fix (bad TLS material, unresolvable names).
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::NetworkDown
    )
}
