// Provider certificate loading (PKCS#12) and introspection of the Apple
// push extensions.
use asn1_rs::{FromDer, Sequence, Utf8String};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use x509_parser::prelude::*;

use crate::error::{Error, Result};
use crate::transport::Identity;

const APPLE_WWDR_ISSUER_CN: &str =
    "Apple Worldwide Developer Relations Certification Authority";

const OID_COUNTRY: &str = "2.5.4.6";
const OID_COMMON_NAME: &str = "2.5.4.3";
const OID_ORG_NAME: &str = "2.5.4.10";
const OID_ORG_UNIT: &str = "2.5.4.11";
const OID_BUNDLE_ID: &str = "0.9.2342.19200300.100.1.1";
const OID_DEVELOPMENT: &str = "1.2.840.113635.100.6.3.1";
const OID_PRODUCTION: &str = "1.2.840.113635.100.6.3.2";
const OID_TOPICS: &str = "1.2.840.113635.100.6.3.6";

/// Loads a provider identity from a PKCS#12 file.
pub fn load_certificate(path: impl AsRef<Path>, password: &str) -> Result<Identity> {
    let data = std::fs::read(path)?;
    identity_from_pkcs12(&data, password)
}

/// Parses PKCS#12 bytes into a TLS identity. The chain gets a best-effort
/// verification: validity windows and in-bundle signature links are
/// enforced, while a chain that does not reach a known root is tolerated
/// so self-signed sandbox material still loads.
pub fn identity_from_pkcs12(data: &[u8], password: &str) -> Result<Identity> {
    let pfx = p12::PFX::parse(data)
        .map_err(|e| Error::Certificate(format!("parse PKCS#12: {e}")))?;
    // A wrong password shows up as a decryption failure on the bags.
    let certs = pfx
        .cert_x509_bags(password)
        .map_err(|e| Error::Certificate(format!("read certificate bags (bad password?): {e}")))?;
    if certs.is_empty() {
        return Err(Error::Certificate("PKCS#12 holds no certificate".into()));
    }
    let keys = pfx
        .key_bags(password)
        .map_err(|e| Error::Certificate(format!("read key bags: {e}")))?;
    let key = keys
        .into_iter()
        .next()
        .ok_or_else(|| Error::Certificate("PKCS#12 holds no private key".into()))?;

    let chain: Vec<CertificateDer<'static>> =
        certs.into_iter().map(CertificateDer::from).collect();
    verify_chain(&chain)?;
    CertificateInfo::from_der(&chain[0])?;
    Ok(Identity {
        chain,
        key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key)),
    })
}

/// Best-effort verification of a loaded chain. Every certificate must be
/// inside its validity window, and each link whose issuer is present in
/// the bundle must carry a valid signature from that issuer. An issuer
/// that is simply absent, or a self-signed certificate, is tolerated the
/// way an unknown-authority outcome is: sandbox chains rarely reach a
/// public root.
fn verify_chain(chain: &[CertificateDer<'static>]) -> Result<()> {
    let mut certs = Vec::with_capacity(chain.len());
    for der in chain {
        let (_, cert) = parse_x509_certificate(der.as_ref())
            .map_err(|e| Error::Certificate(format!("parse certificate: {e}")))?;
        certs.push(cert);
    }
    for cert in &certs {
        if !cert.validity().is_valid() {
            return Err(Error::Certificate(format!(
                "certificate not within its validity window: {}",
                cert.subject()
            )));
        }
    }
    for cert in &certs {
        if cert.subject() == cert.issuer() {
            continue;
        }
        let Some(issuer) = certs
            .iter()
            .find(|candidate| candidate.subject() == cert.issuer())
        else {
            continue;
        };
        cert.verify_signature(Some(issuer.public_key())).map_err(|_| {
            Error::Certificate(format!("bad issuer signature on {}", cert.subject()))
        })?;
    }
    Ok(())
}

/// What a provider certificate says about itself: subject fields, the app
/// bundle id, the topics it may push to, and which APNs environments it is
/// valid for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub common_name: String,
    pub org_name: String,
    pub org_unit: String,
    pub country: String,
    pub bundle_id: String,
    pub topics: Vec<String>,
    pub development: bool,
    pub production: bool,
    pub is_apple: bool,
    pub expire: SystemTime,
}

impl Default for CertificateInfo {
    fn default() -> Self {
        Self {
            common_name: String::new(),
            org_name: String::new(),
            org_unit: String::new(),
            country: String::new(),
            bundle_id: String::new(),
            topics: Vec::new(),
            development: false,
            production: false,
            is_apple: false,
            expire: UNIX_EPOCH,
        }
    }
}

impl CertificateInfo {
    pub fn from_identity(identity: &Identity) -> Result<Self> {
        Self::from_der(&identity.chain[0])
    }

    pub fn from_der(der: &CertificateDer<'_>) -> Result<Self> {
        let (_, cert) = parse_x509_certificate(der.as_ref())
            .map_err(|e| Error::Certificate(format!("parse certificate: {e}")))?;

        let mut info = Self {
            expire: unix_time(cert.validity().not_after.timestamp()),
            is_apple: cert
                .issuer()
                .iter_common_name()
                .next()
                .and_then(|cn| cn.as_str().ok())
                .is_some_and(|cn| cn == APPLE_WWDR_ISSUER_CN),
            ..Self::default()
        };

        for attr in cert.subject().iter_attributes() {
            let value = attr.as_str().unwrap_or_default().to_string();
            match attr.attr_type().to_id_string().as_str() {
                OID_COMMON_NAME => info.common_name = value,
                OID_ORG_NAME => info.org_name = value,
                OID_ORG_UNIT => info.org_unit = value,
                OID_COUNTRY => info.country = value,
                OID_BUNDLE_ID => info.bundle_id = value,
                _ => {}
            }
        }
        for ext in cert.extensions() {
            match ext.oid.to_id_string().as_str() {
                OID_DEVELOPMENT => info.development = true,
                OID_PRODUCTION => info.production = true,
                OID_TOPICS => info.topics = parse_topics(ext.value),
                _ => {}
            }
        }
        if !info.topics.is_empty() && !info.support(&info.bundle_id) {
            return Err(Error::Certificate(
                "certificate topics do not include the bundle id".into(),
            ));
        }
        Ok(info)
    }

    /// True when the certificate may push to `topic`.
    pub fn support(&self, topic: &str) -> bool {
        if self.topics.is_empty() {
            return topic == self.bundle_id;
        }
        self.topics.iter().any(|name| name == topic)
    }
}

impl std::fmt::Display for CertificateInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.common_name)
    }
}

/// The topics extension is a sequence of (topic, names) pairs. Parsing is
/// tolerant: stop at the first malformed pair, keeping what was read so
/// far, rather than rejecting the whole certificate.
fn parse_topics(input: &[u8]) -> Vec<String> {
    let Ok((_, outer)) = Sequence::from_der(input) else {
        return Vec::new();
    };
    let mut topics = Vec::new();
    let mut rest: &[u8] = outer.content.as_ref();
    while !rest.is_empty() {
        let Ok((after_topic, topic)) = Utf8String::from_der(rest) else {
            break;
        };
        topics.push(topic.string());
        let Ok((after_names, _names)) = Sequence::from_der(after_topic) else {
            break;
        };
        rest = after_names;
    }
    topics
}

fn unix_time(seconds: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(seconds.max(0) as u64)
}
