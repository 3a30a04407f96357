// Client configuration: credentials, gateway selection, and the tuning
// knobs that were historically process-wide.
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rustls::pki_types::CertificateDer;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::certificate::CertificateInfo;
use crate::error::{Error, Result};
use crate::transport::Identity;

/// Binary-protocol gateways.
pub const GATEWAY: &str = "gateway.push.apple.com:2195";
pub const GATEWAY_SANDBOX: &str = "gateway.sandbox.push.apple.com:2195";
/// Feedback service endpoints.
pub const FEEDBACK: &str = "feedback.push.apple.com:2196";
pub const FEEDBACK_SANDBOX: &str = "feedback.sandbox.push.apple.com:2196";

/// Timers, sizes and lifetimes for a client, fixed at construction. A
/// running client's limits cannot be changed.
#[derive(Debug, Clone)]
pub struct Tuning {
    /// Dial plus TLS handshake deadline.
    pub connect_timeout: Duration,
    /// First reconnect delay; every further failure adds the same step.
    pub reconnect_step: Duration,
    /// Ceiling for the reconnect delay.
    pub max_reconnect_delay: Duration,
    /// The gateway is assumed dead after this long without traffic; every
    /// successful write pushes the deadline out again.
    pub read_timeout: Duration,
    /// How long the sender waits for more notifications before flushing a
    /// partially filled frame buffer. Zero flushes after every append.
    pub send_delay: Duration,
    /// Upper bound on one buffered TCP write.
    pub max_frame_size: usize,
    /// How long sent notifications stay replayable.
    pub cache_life_time: Duration,
    /// Payload ceiling on the binary path.
    pub max_payload_size: usize,
    /// How long a cached provider JWT is reused before being re-signed.
    pub jwt_life_time: Duration,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            reconnect_step: Duration::from_secs(10),
            max_reconnect_delay: Duration::from_secs(30 * 60),
            read_timeout: Duration::from_secs(2 * 60),
            send_delay: Duration::from_millis(100),
            max_frame_size: 65_535,
            cache_life_time: Duration::from_secs(5 * 60),
            max_payload_size: 2_048,
            jwt_life_time: crate::provider_token::JWT_LIFE_TIME,
        }
    }
}

/// Connection configuration for the binary client and the feedback reader.
#[derive(Debug, Clone)]
pub struct Config {
    pub bundle_id: String,
    pub sandbox: bool,
    pub identity: Option<Identity>,
    pub tuning: Tuning,
    /// Gateway override, mainly for tests against a local mock.
    pub gateway: Option<String>,
    pub feedback_gateway: Option<String>,
    /// Additional trust anchors accepted during the TLS handshake.
    pub extra_roots: Vec<CertificateDer<'static>>,
}

impl Config {
    pub fn new(identity: Identity, sandbox: bool) -> Self {
        Self {
            bundle_id: String::new(),
            sandbox,
            identity: Some(identity),
            tuning: Tuning::default(),
            gateway: None,
            feedback_gateway: None,
            extra_roots: Vec::new(),
        }
    }

    /// Loads the JSON config file written by the config tool.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        let file: ConfigFile = serde_json::from_slice(data)?;
        file.into_config()
    }

    pub fn with_tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub(crate) fn gateway_addr(&self) -> String {
        if let Some(gateway) = &self.gateway {
            return gateway.clone();
        }
        if self.sandbox { GATEWAY_SANDBOX } else { GATEWAY }.to_string()
    }

    pub(crate) fn feedback_addr(&self) -> String {
        if let Some(gateway) = &self.feedback_gateway {
            return gateway.clone();
        }
        if self.sandbox { FEEDBACK_SANDBOX } else { FEEDBACK }.to_string()
    }
}

/// On-disk form of the configuration: PEM blocks carried as base64 strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "bundleId")]
    pub bundle_id: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sandbox: bool,
    pub certificate: Vec<String>,
    #[serde(rename = "privateKey")]
    pub private_key: String,
}

impl ConfigFile {
    /// Builds the on-disk form from PEM certificate and key files. When no
    /// bundle id is given it is read from the certificate subject.
    pub fn create(
        bundle_id: Option<&str>,
        cert_file: impl AsRef<Path>,
        key_file: impl AsRef<Path>,
        sandbox: bool,
    ) -> Result<Self> {
        let cert_pem = std::fs::read(cert_file)?;
        let key_pem = std::fs::read(key_file)?;

        let cert_blocks: Vec<pem::Pem> = pem::parse_many(&cert_pem)
            .map_err(|e| Error::Config(format!("parse certificate PEM: {e}")))?
            .into_iter()
            .filter(|block| block.tag() == "CERTIFICATE")
            .collect();
        if cert_blocks.is_empty() {
            return Err(Error::Config("no certificates found".into()));
        }
        let key_block = pem::parse_many(&key_pem)
            .map_err(|e| Error::Config(format!("parse key PEM: {e}")))?
            .into_iter()
            .find(|block| {
                block.tag() == "PRIVATE KEY" || block.tag().ends_with(" PRIVATE KEY")
            })
            .ok_or_else(|| Error::Config("no private key found".into()))?;

        let bundle_id = match bundle_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let leaf = CertificateDer::from(cert_blocks[0].contents().to_vec());
                CertificateInfo::from_der(&leaf)?.bundle_id
            }
        };

        // The pair must actually fit together before it gets persisted.
        let joined: String = cert_blocks.iter().map(pem::encode).collect();
        Identity::from_pem(joined.as_bytes(), pem::encode(&key_block).as_bytes())?;

        Ok(Self {
            kind: "apns".to_string(),
            bundle_id,
            sandbox,
            certificate: cert_blocks
                .iter()
                .map(|block| BASE64.encode(pem::encode(block)))
                .collect(),
            private_key: BASE64.encode(pem::encode(&key_block)),
        })
    }

    pub fn into_config(self) -> Result<Config> {
        let mut cert_pem = Vec::new();
        for encoded in &self.certificate {
            let block = BASE64
                .decode(encoded)
                .map_err(|e| Error::Config(format!("certificate base64: {e}")))?;
            cert_pem.extend_from_slice(&block);
            cert_pem.push(b'\n');
        }
        let key_pem = BASE64
            .decode(&self.private_key)
            .map_err(|e| Error::Config(format!("private key base64: {e}")))?;
        let identity = Identity::from_pem(&cert_pem, &key_pem)?;
        Ok(Config {
            bundle_id: self.bundle_id,
            sandbox: self.sandbox,
            identity: Some(identity),
            tuning: Tuning::default(),
            gateway: None,
            feedback_gateway: None,
            extra_roots: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, KeyPair};

    fn write_pems(dir: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("params");
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "Apple Push Services: com.example.app");
        dn.push(
            DnType::CustomDnType(vec![0, 9, 2342, 19200300, 100, 1, 1]),
            DnValue::Utf8String("com.example.app".to_string()),
        );
        params.distinguished_name = dn;
        let key = KeyPair::generate().expect("key");
        let cert = params.self_signed(&key).expect("cert");

        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        std::fs::write(&cert_path, cert.pem()).expect("write cert");
        std::fs::write(&key_path, key.serialize_pem()).expect("write key");
        (cert_path, key_path)
    }

    #[test]
    fn tuning_defaults_match_the_protocol() {
        let tuning = Tuning::default();
        assert_eq!(tuning.connect_timeout, Duration::from_secs(30));
        assert_eq!(tuning.reconnect_step, Duration::from_secs(10));
        assert_eq!(tuning.max_reconnect_delay, Duration::from_secs(1800));
        assert_eq!(tuning.read_timeout, Duration::from_secs(120));
        assert_eq!(tuning.send_delay, Duration::from_millis(100));
        assert_eq!(tuning.max_frame_size, 65_535);
        assert_eq!(tuning.cache_life_time, Duration::from_secs(300));
        assert_eq!(tuning.max_payload_size, 2_048);
        assert_eq!(tuning.jwt_life_time, Duration::from_secs(55 * 60));
    }

    #[test]
    fn gateway_selection() {
        let mut config = Config {
            bundle_id: String::new(),
            sandbox: false,
            identity: None,
            tuning: Tuning::default(),
            gateway: None,
            feedback_gateway: None,
            extra_roots: Vec::new(),
        };
        assert_eq!(config.gateway_addr(), GATEWAY);
        assert_eq!(config.feedback_addr(), FEEDBACK);
        config.sandbox = true;
        assert_eq!(config.gateway_addr(), GATEWAY_SANDBOX);
        assert_eq!(config.feedback_addr(), FEEDBACK_SANDBOX);
        config.gateway = Some("127.0.0.1:7777".into());
        assert_eq!(config.gateway_addr(), "127.0.0.1:7777");
    }

    #[test]
    fn create_and_reload_config_file() {
        let dir = std::env::temp_dir().join(format!("apns-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("tempdir");
        let (cert_path, key_path) = write_pems(&dir);

        let file = ConfigFile::create(None, &cert_path, &key_path, true).expect("create");
        assert_eq!(file.kind, "apns");
        assert_eq!(file.bundle_id, "com.example.app");
        assert!(file.sandbox);
        assert_eq!(file.certificate.len(), 1);

        let json = serde_json::to_string(&file).expect("json");
        assert!(json.contains("\"bundleId\":\"com.example.app\""));
        let config = Config::from_json(json.as_bytes()).expect("reload");
        assert_eq!(config.bundle_id, "com.example.app");
        assert!(config.sandbox);
        assert!(config.identity.is_some());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn explicit_bundle_id_wins() {
        let dir = std::env::temp_dir().join(format!("apns-config2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("tempdir");
        let (cert_path, key_path) = write_pems(&dir);
        let file =
            ConfigFile::create(Some("com.other.app"), &cert_path, &key_path, false).expect("create");
        assert_eq!(file.bundle_id, "com.other.app");
        // sandbox=false is omitted from the JSON, matching the legacy files.
        let json = serde_json::to_string(&file).expect("json");
        assert!(!json.contains("sandbox"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn bad_base64_is_a_config_error() {
        let file = ConfigFile {
            kind: "apns".into(),
            bundle_id: "b".into(),
            sandbox: false,
            certificate: vec!["!!!".into()],
            private_key: String::new(),
        };
        assert!(matches!(file.into_config(), Err(Error::Config(_))));
    }
}
