// HTTP/2 Provider API client: request shaping, header policy, and
// response decoding.
use std::error::Error as _;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::certificate::CertificateInfo;
use crate::config::Tuning;
use crate::error::{Error, ResponseError, Result};
use crate::notification::Notification;
use crate::provider_token::ProviderToken;
use crate::transport::Identity;

pub const HOST: &str = "https://api.push.apple.com";
pub const HOST_SANDBOX: &str = "https://api.development.push.apple.com";

/// Regular notification payload ceiling. VoIP callers may raise it to
/// [`MAX_VOIP_PAYLOAD_SIZE`] themselves.
const MAX_PAYLOAD_SIZE: usize = 4096;
pub const MAX_VOIP_PAYLOAD_SIZE: usize = 5120;

const USER_AGENT: &str = "mdigger-apns/3.1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_COLLAPSE_ID_LEN: usize = 64;

/// Client for the HTTP/2 Provider API, authenticated with either a
/// provider certificate or a provider token. Cloning shares the underlying
/// transport.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    info: Option<CertificateInfo>,
    provider_token: Option<Arc<ProviderToken>>,
    sandbox: bool,
    host_override: Option<String>,
    max_payload_size: usize,
}

impl Client {
    /// Certificate mode. The certificate decides which environments are
    /// reachable and supplies the default topic.
    pub fn new(identity: &Identity) -> Result<Self> {
        let info = CertificateInfo::from_identity(identity)?;
        let tls_identity = reqwest::Identity::from_pem(identity.to_pem().as_bytes())?;
        let http = Self::build_http(Some(tls_identity))?;
        Ok(Self {
            http,
            info: Some(info),
            provider_token: None,
            sandbox: false,
            host_override: None,
            max_payload_size: MAX_PAYLOAD_SIZE,
        })
    }

    /// Provider-token mode. Every request carries a bearer JWT whose
    /// refresh window comes from `tuning.jwt_life_time`; the topic must be
    /// set on each notification.
    pub fn with_provider_token(provider_token: ProviderToken, tuning: &Tuning) -> Result<Self> {
        let provider_token = provider_token.with_life_time(tuning.jwt_life_time);
        let http = Self::build_http(None)?;
        Ok(Self {
            http,
            info: None,
            provider_token: Some(Arc::new(provider_token)),
            sandbox: false,
            host_override: None,
            max_payload_size: MAX_PAYLOAD_SIZE,
        })
    }

    fn build_http(identity: Option<reqwest::Identity>) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .http2_prior_knowledge()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT);
        if let Some(identity) = identity {
            builder = builder.identity(identity);
        }
        Ok(builder.build()?)
    }

    /// Forces the sandbox environment even when the certificate would
    /// allow production.
    pub fn with_sandbox(mut self, sandbox: bool) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Raises the payload ceiling, e.g. to [`MAX_VOIP_PAYLOAD_SIZE`].
    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    /// Overrides the gateway URL. Intended for tests.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host_override = Some(host.into());
        self
    }

    pub fn certificate_info(&self) -> Option<&CertificateInfo> {
        self.info.as_ref()
    }

    fn host(&self) -> &str {
        if let Some(host) = &self.host_override {
            return host;
        }
        match &self.info {
            // A certificate that cannot reach production pins the sandbox,
            // as does an explicit sandbox request when development is
            // supported.
            Some(info) => {
                if !info.production || (self.sandbox && info.development) {
                    HOST_SANDBOX
                } else {
                    HOST
                }
            }
            None => {
                if self.sandbox {
                    HOST_SANDBOX
                } else {
                    HOST
                }
            }
        }
    }

    /// Sends one notification and returns the `apns-id` the gateway
    /// assigned (or echoed back). Malformed tokens and oversized payloads
    /// fail before any I/O.
    pub async fn push(&self, notification: &Notification) -> Result<String> {
        let payload = notification.payload.encode()?;
        if payload.len() > self.max_payload_size {
            return Err(ResponseError::new(413, "PayloadTooLarge").into());
        }
        let token = notification.token.as_str();
        if token.len() < 64 || token.len() > 200 || hex::decode(token).is_err() {
            return Err(ResponseError::new(400, "BadDeviceToken").into());
        }

        let url = format!("{}/3/device/{}", self.host(), token);
        let mut request = self
            .http
            .post(&url)
            .header("content-type", "application/json");
        if !notification.id.is_empty() {
            request = request.header("apns-id", &notification.id);
        }
        if let Some(value) = expiration_header(notification.expiration) {
            request = request.header("apns-expiration", value);
        }
        if notification.priority() == 5 {
            request = request.header("apns-priority", "5");
        }
        if let Some(topic) = topic_header(self.info.as_ref(), &notification.topic) {
            request = request.header("apns-topic", topic);
        }
        if !notification.collapse_id.is_empty()
            && notification.collapse_id.len() <= MAX_COLLAPSE_ID_LEN
        {
            request = request.header("apns-collapse-id", &notification.collapse_id);
        }
        if let Some(provider_token) = &self.provider_token {
            request = request.header("authorization", format!("bearer {}", provider_token.jwt()?));
        }

        let response = match request.body(payload).send().await {
            Ok(response) => response,
            Err(err) => return Err(decode_transport_error(err)),
        };
        let status = response.status().as_u16();
        let apns_id = response
            .headers()
            .get("apns-id")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if status != 200 {
            let body = response.bytes().await.unwrap_or_default();
            let mut err = ResponseError::decode(status, &body);
            err.apns_id = Some(apns_id);
            warn!(status, reason = %err.reason, "push rejected");
            return Err(err.into());
        }
        debug!(apns_id = %apns_id, "push accepted");
        Ok(apns_id)
    }
}

/// `apns-expiration` policy: unset means no header, a passed instant is
/// sent as "0" (expire immediately, do not store), anything else as unix
/// seconds.
fn expiration_header(expiration: Option<SystemTime>) -> Option<String> {
    let at = expiration?;
    if at <= SystemTime::now() {
        return Some("0".to_string());
    }
    let unix = at.duration_since(UNIX_EPOCH).ok()?;
    Some(unix.as_secs().to_string())
}

/// `apns-topic` policy: the caller's topic wins; otherwise a multi-topic
/// certificate falls back to its bundle id, and a single-topic certificate
/// (or token mode) sends no header.
fn topic_header(info: Option<&CertificateInfo>, topic: &str) -> Option<String> {
    if !topic.is_empty() {
        return Some(topic.to_string());
    }
    let info = info?;
    if info.topics.is_empty() {
        return None;
    }
    Some(info.bundle_id.clone())
}

/// A connection the server tore down with a GOAWAY sometimes carries
/// Apple's JSON reason in the debug payload; fish it out of the error
/// chain when present, else surface the transport error as-is.
fn decode_transport_error(err: reqwest::Error) -> Error {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        text.push_str("; ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}'))
        && start < end
        && let Ok(mut decoded) = serde_json::from_str::<ResponseError>(&text[start..=end])
        && !decoded.reason.is_empty()
    {
        decoded.status = 0;
        return Error::Response(decoded);
    }
    Error::Http(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;
    use bytes::Bytes;

    const GOOD_TOKEN: &str = "be311b5bada725b323b1a56e03ed25b4814d6b9edf5b02d3d605840860febb28";

    fn provider_token() -> ProviderToken {
        let key = rcgen::KeyPair::generate().expect("key");
        let mut provider_token = ProviderToken::new("W23G28NPJW", "67XV3VSJ95").expect("token");
        provider_token
            .set_private_key(&key.serialize_der())
            .expect("private key");
        provider_token
    }

    fn token_client() -> Client {
        Client::with_provider_token(provider_token(), &Tuning::default()).expect("client")
    }

    fn notification(token: &str, payload_len: usize) -> Notification {
        Notification {
            token: token.to_string(),
            payload: Payload::Bytes(Bytes::from(vec![b'x'; payload_len])),
            ..Notification::default()
        }
    }

    #[tokio::test]
    async fn short_and_long_tokens_fail_before_io() {
        let client = token_client();
        for token in [
            &"a".repeat(63),
            &"a".repeat(201),
            &"Z".repeat(64),
            &String::new(),
        ] {
            let err = client.push(&notification(token, 2)).await.expect_err("bad token");
            let Error::Response(response) = err else {
                panic!("expected response error");
            };
            assert_eq!(response.status, 400);
            assert_eq!(response.reason, "BadDeviceToken");
        }
    }

    #[tokio::test]
    async fn payload_limit_is_checked_before_the_token() {
        let client = token_client();
        // 4096 passes the size check and trips on the bad token instead.
        let err = client
            .push(&notification("ZZZZ", 4096))
            .await
            .expect_err("bad token");
        let Error::Response(response) = err else {
            panic!("expected response error");
        };
        assert_eq!(response.reason, "BadDeviceToken");

        // One more byte fails on size.
        let err = client
            .push(&notification(GOOD_TOKEN, 4097))
            .await
            .expect_err("too large");
        let Error::Response(response) = err else {
            panic!("expected response error");
        };
        assert_eq!(response.status, 413);
        assert_eq!(response.reason, "PayloadTooLarge");
    }

    #[tokio::test]
    async fn voip_limit_is_opt_in() {
        let client = token_client().with_max_payload_size(MAX_VOIP_PAYLOAD_SIZE);
        let err = client
            .push(&notification("ZZZZ", 5000))
            .await
            .expect_err("bad token, not size");
        let Error::Response(response) = err else {
            panic!("expected response error");
        };
        assert_eq!(response.reason, "BadDeviceToken");
    }

    #[test]
    fn expiration_header_policy() {
        assert_eq!(expiration_header(None), None);
        assert_eq!(
            expiration_header(Some(SystemTime::now() - Duration::from_micros(1))).as_deref(),
            Some("0")
        );
        let future = SystemTime::now() + Duration::from_secs(3600);
        let want = future
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            .to_string();
        assert_eq!(expiration_header(Some(future)).as_deref(), Some(&want[..]));
    }

    #[test]
    fn topic_header_policy() {
        let multi = CertificateInfo {
            bundle_id: "com.example.app".into(),
            topics: vec!["com.example.app".into(), "com.example.app.voip".into()],
            ..CertificateInfo::default()
        };
        let single = CertificateInfo {
            bundle_id: "com.example.app".into(),
            ..CertificateInfo::default()
        };
        assert_eq!(
            topic_header(Some(&multi), "custom.topic").as_deref(),
            Some("custom.topic")
        );
        assert_eq!(
            topic_header(Some(&multi), "").as_deref(),
            Some("com.example.app")
        );
        assert_eq!(topic_header(Some(&single), ""), None);
        assert_eq!(topic_header(None, ""), None);
        assert_eq!(topic_header(None, "t").as_deref(), Some("t"));
    }

    #[test]
    fn host_selection() {
        let client = token_client();
        assert_eq!(client.host(), HOST);
        let client = token_client().with_sandbox(true);
        assert_eq!(client.host(), HOST_SANDBOX);

        let mut dev_only = token_client();
        dev_only.info = Some(CertificateInfo {
            development: true,
            production: false,
            ..CertificateInfo::default()
        });
        assert_eq!(dev_only.host(), HOST_SANDBOX);

        let mut both = token_client();
        both.info = Some(CertificateInfo {
            development: true,
            production: true,
            ..CertificateInfo::default()
        });
        assert_eq!(both.host(), HOST);
        let both = both.with_sandbox(true);
        assert_eq!(both.host(), HOST_SANDBOX);

        let pinned = token_client().with_host("http://127.0.0.1:8999");
        assert_eq!(pinned.host(), "http://127.0.0.1:8999");
    }

    #[test]
    fn tuning_governs_the_jwt_refresh_window() {
        // A zero lifetime forces a fresh signature on every call; the
        // randomised ECDSA nonce makes the tokens distinct.
        let tuning = Tuning {
            jwt_life_time: Duration::ZERO,
            ..Tuning::default()
        };
        let client = Client::with_provider_token(provider_token(), &tuning).expect("client");
        let token = client.provider_token.as_ref().expect("token mode");
        let first = token.jwt().expect("jwt");
        let second = token.jwt().expect("jwt");
        assert_ne!(first, second);

        let client =
            Client::with_provider_token(provider_token(), &Tuning::default()).expect("client");
        let token = client.provider_token.as_ref().expect("token mode");
        let first = token.jwt().expect("jwt");
        let second = token.jwt().expect("jwt");
        assert_eq!(first, second);
    }

    #[test]
    fn goaway_reason_is_fished_out_of_the_text() {
        // Emulates the shape of an h2 GOAWAY debug payload reaching the
        // error chain.
        let text = r#"connection error: GOAWAY {"reason":"BadCertificateEnvironment"}"#;
        let (start, end) = (text.find('{').unwrap(), text.rfind('}').unwrap());
        let decoded: ResponseError = serde_json::from_str(&text[start..=end]).expect("decode");
        assert_eq!(decoded.reason, "BadCertificateEnvironment");
    }
}
