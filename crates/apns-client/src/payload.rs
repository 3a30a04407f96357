// Notification payload variants and their canonical byte form.
use bytes::Bytes;
use serde::Serialize;

use crate::error::Result;

/// The body of a notification. APNs only ever sees the encoded bytes; the
/// variants exist so callers can hand over whatever they already have
/// without re-encoding.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    Empty,
    /// Raw bytes, passed through untouched.
    Bytes(Bytes),
    /// A string, passed through as its UTF-8 bytes.
    Text(String),
    /// A fragment that is already serialised JSON.
    Json(Bytes),
    /// A JSON value serialised at send time.
    Value(serde_json::Value),
}

impl Payload {
    /// Wraps any serialisable value.
    pub fn serialize<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::Value(serde_json::to_value(value)?))
    }

    /// Canonical byte form sent on the wire.
    pub fn encode(&self) -> Result<Bytes> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Bytes(data) | Self::Json(data) => Ok(data.clone()),
            Self::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Self::Value(value) => Ok(Bytes::from(serde_json::to_vec(value)?)),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bytes(data) | Self::Json(data) => data.is_empty(),
            Self::Text(text) => text.is_empty(),
            Self::Value(value) => value.as_object().is_some_and(|map| map.is_empty()),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Self::Bytes(data)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(data))
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_variant_encodes() {
        let raw = br#"{"aps":{"alert":"Test"}}"#;
        let cases: Vec<Payload> = vec![
            Payload::Bytes(Bytes::from_static(raw)),
            Payload::Text(String::from_utf8(raw.to_vec()).unwrap()),
            Payload::Json(Bytes::from_static(raw)),
            Payload::Value(json!({"aps": {"alert": "Test"}})),
        ];
        for payload in cases {
            let encoded = payload.encode().expect("encode");
            let value: serde_json::Value = serde_json::from_slice(&encoded).expect("json");
            assert_eq!(value["aps"]["alert"], "Test");
        }
    }

    #[test]
    fn serializable_values_are_wrapped() {
        #[derive(Serialize)]
        struct Aps<'a> {
            alert: &'a str,
        }
        let payload = Payload::serialize(&Aps { alert: "hi" }).expect("serialize");
        let encoded = payload.encode().expect("encode");
        assert_eq!(encoded.as_ref(), br#"{"alert":"hi"}"#);
    }

    #[test]
    fn emptiness() {
        assert!(Payload::Empty.is_empty());
        assert!(Payload::Text(String::new()).is_empty());
        assert!(Payload::Value(json!({})).is_empty());
        assert!(!Payload::Value(json!({"aps": {}})).is_empty());
        assert!(!Payload::from("x").is_empty());
    }
}
