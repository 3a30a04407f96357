// Provider authentication tokens: ES256-signed JWTs with a cached value
// that is refreshed before Apple's one-hour expiry.
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Provider tokens older than this are rejected by APNs with
/// `ExpiredProviderToken`, so the cached JWT is regenerated a little before
/// the hour is up.
pub const JWT_LIFE_TIME: Duration = Duration::from_secs(55 * 60);

const ID_LEN: usize = 10;
const PEM_TAG: &str = "APNS TOKEN";

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    iat: u64,
}

struct CachedJwt {
    token: String,
    issued: Instant,
}

/// A provider authentication token: the team and key identifiers from the
/// developer account plus the ECDSA P-256 key APNs was given the public
/// half of.
///
/// `jwt` hands out a cached token until it ages past the configured
/// lifetime, then re-signs under an exclusive lock; concurrent callers see
/// either the old or the new token, never a torn value.
pub struct ProviderToken {
    team_id: String,
    key_id: String,
    encoding_key: Option<EncodingKey>,
    key_der: Vec<u8>,
    life_time: Duration,
    cache: Mutex<Option<CachedJwt>>,
}

impl ProviderToken {
    pub fn new(team_id: &str, key_id: &str) -> Result<Self> {
        if team_id.len() != ID_LEN {
            return Err(Error::BadTeamId);
        }
        if key_id.len() != ID_LEN {
            return Err(Error::BadKeyId);
        }
        Ok(Self {
            team_id: team_id.to_string(),
            key_id: key_id.to_string(),
            encoding_key: None,
            key_der: Vec::new(),
            life_time: JWT_LIFE_TIME,
            cache: Mutex::new(None),
        })
    }

    /// Overrides the cached-token lifetime. [`http::Client`](crate::http::Client)
    /// applies the [`Tuning`](crate::Tuning) value through this at
    /// construction; APNs itself accepts tokens for an hour.
    pub fn with_life_time(mut self, life_time: Duration) -> Self {
        self.life_time = life_time;
        self
    }

    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Reads the signing key from a PEM or DER file (PKCS#8 or SEC1).
    pub fn load_private_key(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let data = std::fs::read(path)?;
        self.set_private_key(&data)
    }

    /// Installs the signing key. PKCS#8 and SEC1 are accepted, PEM or DER;
    /// the key is normalised to PKCS#8 DER internally.
    pub fn set_private_key(&mut self, data: &[u8]) -> Result<()> {
        let der = normalize_key(data)?;
        let key =
            p256::SecretKey::from_pkcs8_der(&der).map_err(|_| Error::BadPrivateKey)?;
        let der = key.to_pkcs8_der().map_err(|_| Error::BadPrivateKey)?;
        self.encoding_key = Some(EncodingKey::from_ec_der(der.as_bytes()));
        self.key_der = der.as_bytes().to_vec();
        *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    /// Returns the bearer token for the `authorization` header, reusing the
    /// cached one while it is younger than the configured lifetime.
    pub fn jwt(&self) -> Result<String> {
        let Some(encoding_key) = &self.encoding_key else {
            return Err(Error::BadPrivateKey);
        };
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = cache.as_ref()
            && cached.issued.elapsed() <= self.life_time
        {
            return Ok(cached.token.clone());
        }
        let mut header = Header::new(Algorithm::ES256);
        header.typ = None;
        header.kid = Some(self.key_id.clone());
        let claims = Claims {
            iss: &self.team_id,
            iat: unix_now(),
        };
        let token = jsonwebtoken::encode(&header, &claims, encoding_key)?;
        *cache = Some(CachedJwt {
            token: token.clone(),
            issued: Instant::now(),
        });
        Ok(token)
    }

    /// Renders the token as a PEM block of type `APNS TOKEN`, with the team
    /// and key identifiers carried as block headers.
    pub fn write_pem(&self) -> Result<String> {
        if self.key_der.is_empty() {
            return Err(Error::BadPrivateKey);
        }
        let mut block = pem::Pem::new(PEM_TAG, self.key_der.clone());
        block
            .headers_mut()
            .add("teamID", &self.team_id)
            .map_err(|_| Error::BadProviderToken)?;
        block
            .headers_mut()
            .add("keyID", &self.key_id)
            .map_err(|_| Error::BadProviderToken)?;
        Ok(pem::encode(&block))
    }

    /// Restores a token written by [`write_pem`](Self::write_pem).
    pub fn from_pem(data: &[u8]) -> Result<Self> {
        let block = pem::parse(data).map_err(|_| Error::BadProviderToken)?;
        if block.tag() != PEM_TAG {
            return Err(Error::BadProviderToken);
        }
        let team_id = block
            .headers()
            .get("teamID")
            .ok_or(Error::BadProviderToken)?
            .to_string();
        let key_id = block
            .headers()
            .get("keyID")
            .ok_or(Error::BadProviderToken)?
            .to_string();
        let mut token = Self::new(&team_id, &key_id)?;
        token.set_private_key(block.contents())?;
        Ok(token)
    }
}

impl std::fmt::Display for ProviderToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.team_id, self.key_id)
    }
}

impl std::fmt::Debug for ProviderToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderToken")
            .field("team_id", &self.team_id)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize)]
struct JsonForm {
    #[serde(rename = "teamId")]
    team_id: String,
    #[serde(rename = "keyId")]
    key_id: String,
    #[serde(rename = "privateKey")]
    private_key: String,
}

impl Serialize for ProviderToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        JsonForm {
            team_id: self.team_id.clone(),
            key_id: self.key_id.clone(),
            private_key: BASE64.encode(&self.key_der),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ProviderToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let form = JsonForm::deserialize(deserializer)?;
        let mut token = Self::new(&form.team_id, &form.key_id).map_err(D::Error::custom)?;
        let der = BASE64
            .decode(&form.private_key)
            .map_err(D::Error::custom)?;
        token.set_private_key(&der).map_err(D::Error::custom)?;
        Ok(token)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Accepts PKCS#8 or SEC1, PEM or DER, and returns PKCS#8 DER.
fn normalize_key(data: &[u8]) -> Result<Vec<u8>> {
    if data.starts_with(b"-----") {
        let block = pem::parse(data).map_err(|_| Error::BadPrivateKey)?;
        return match block.tag() {
            "PRIVATE KEY" => Ok(block.contents().to_vec()),
            "EC PRIVATE KEY" => Ok(wrap_sec1(block.contents())),
            _ => Err(Error::BadPrivateKey),
        };
    }
    if data.first() != Some(&0x30) {
        return Err(Error::BadPrivateKey);
    }
    if der_version_is_zero(data) {
        Ok(data.to_vec())
    } else {
        Ok(wrap_sec1(data))
    }
}

/// PKCS#8 opens with version 0, SEC1 with version 1.
fn der_version_is_zero(data: &[u8]) -> bool {
    let offset = match data.get(1) {
        Some(len) if *len < 0x80 => 2,
        Some(0x81) => 3,
        Some(0x82) => 4,
        _ => return false,
    };
    data.get(offset..offset + 3) == Some(&[0x02, 0x01, 0x00])
}

fn der_len(len: usize) -> Vec<u8> {
    if len < 128 {
        vec![len as u8]
    } else if len < 256 {
        vec![0x81, len as u8]
    } else {
        vec![0x82, (len >> 8) as u8, len as u8]
    }
}

/// Wraps a SEC1 EC private key into a PKCS#8 PrivateKeyInfo for P-256.
fn wrap_sec1(sec1: &[u8]) -> Vec<u8> {
    // AlgorithmIdentifier { id-ecPublicKey, prime256v1 }
    const ALGORITHM: [u8; 21] = [
        0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08, 0x2a,
        0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07,
    ];
    let mut body = vec![0x02, 0x01, 0x00];
    body.extend_from_slice(&ALGORITHM);
    body.push(0x04);
    body.extend(der_len(sec1.len()));
    body.extend_from_slice(sec1);
    let mut out = vec![0x30];
    out.extend(der_len(body.len()));
    out.extend(body);
    out
}
