// Error taxonomy for both provider generations.
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    // Pre-flight validation, surfaced synchronously from send paths.
    #[error("payload is empty")]
    PayloadEmpty,
    #[error("payload is too large")]
    PayloadTooLarge,
    #[error("notification expired")]
    NotificationExpired,
    #[error("client is closed")]
    ClientIsClosed,

    // Configuration and credential errors, surfaced from constructors.
    #[error("bad provider token")]
    BadProviderToken,
    #[error("bad provider token team ID")]
    BadTeamId,
    #[error("bad provider token key ID")]
    BadKeyId,
    #[error("bad provider token private key")]
    BadPrivateKey,
    #[error("certificate: {0}")]
    Certificate(String),
    #[error("config: {0}")]
    Config(String),

    // The gateway could not be dialed for a reason retrying will not fix.
    // This is terminal for the binary client: the send loop stops and the
    // error is returned from the next call on the handle.
    #[error("gateway unreachable: {0}")]
    Gateway(String),

    // A decoded rejection from the HTTP/2 Provider API.
    #[error(transparent)]
    Response(#[from] ResponseError),

    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Rejection reported by the HTTP/2 Provider API: the HTTP status, Apple's
/// reason string, and (for `Unregistered`) the millisecond timestamp at which
/// the device token became invalid.
#[derive(thiserror::Error, Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[error("{reason} ({status})")]
pub struct ResponseError {
    #[serde(skip)]
    pub status: u16,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub timestamp: u64,
    /// The `apns-id` echoed by the failing response, when one was made.
    #[serde(skip)]
    pub apns_id: Option<String>,
}

impl ResponseError {
    pub fn new(status: u16, reason: &str) -> Self {
        Self {
            status,
            reason: reason.to_string(),
            timestamp: 0,
            apns_id: None,
        }
    }

    /// Decodes a `{"reason":..., "timestamp":...}` body.
    pub fn decode(status: u16, body: &[u8]) -> Self {
        let mut err: Self = serde_json::from_slice(body).unwrap_or_default();
        err.status = status;
        err
    }

    /// True when the reason concerns the device token itself, meaning the
    /// token should be dropped from the caller's database.
    pub fn is_token(&self) -> bool {
        matches!(
            self.reason.as_str(),
            "MissingDeviceToken" | "BadDeviceToken" | "DeviceTokenNotForTopic" | "Unregistered"
        )
    }

    /// The instant the token went stale, derived from the millisecond
    /// timestamp. `None` when the response carried no timestamp.
    pub fn time(&self) -> Option<SystemTime> {
        if self.timestamp == 0 {
            return None;
        }
        Some(UNIX_EPOCH + Duration::from_secs(self.timestamp / 1000))
    }

    /// Longer description of the reason, per Apple's documentation.
    pub fn description(&self) -> &'static str {
        match self.reason.as_str() {
            "BadCollapseId" => "The collapse identifier exceeds the maximum allowed size.",
            "BadDeviceToken" => {
                "The specified device token was bad. Verify that the request contains a valid \
                 token and that the token matches the environment."
            }
            "BadExpirationDate" => "The apns-expiration value is bad.",
            "BadMessageId" => "The apns-id value is bad.",
            "BadPriority" => "The apns-priority value is bad.",
            "BadTopic" => "The apns-topic value is bad.",
            "DeviceTokenNotForTopic" => "The device token does not match the specified topic.",
            "DuplicateHeaders" => "One or more headers were repeated.",
            "IdleTimeout" => "Idle time out.",
            "MissingDeviceToken" => {
                "The device token is not specified in the request path. Verify that the message \
                 is sent to a device token."
            }
            "MissingTopic" => {
                "The apns-topic header of the request was not specified and was required. The \
                 apns-topic header is mandatory when the client is connected using a certificate \
                 that supports multiple topics."
            }
            "PayloadEmpty" => "The message payload was empty.",
            "TopicDisallowed" => "Pushing to this topic is not allowed.",
            "BadCertificate" => "The certificate was bad.",
            "BadCertificateEnvironment" => {
                "The client certificate was for the wrong environment."
            }
            "ExpiredProviderToken" => "The provider token is stale and a new token should be generated.",
            "Forbidden" => "The specified action is not allowed.",
            "InvalidProviderToken" => {
                "The provider token is not valid or the token signature could not be verified."
            }
            "MissingProviderToken" => {
                "No provider certificate was used to connect to APNs and Authorization header \
                 was missing or no provider token was specified."
            }
            "BadPath" => "The request contained a bad :path value.",
            "MethodNotAllowed" => "The specified :method was not POST.",
            "Unregistered" => "The device token is inactive for the specified topic.",
            "PayloadTooLarge" => {
                "The message payload was too large. The maximum payload size is 4096 bytes."
            }
            "TooManyProviderTokenUpdates" => "The provider token is being updated too often.",
            "TooManyRequests" => "Too many requests were made consecutively to the same device token.",
            "InternalServerError" => "An internal server error occurred.",
            "ServiceUnavailable" => "The service is unavailable.",
            "Shutdown" => "The server is shutting down.",
            _ => "Unknown error.",
        }
    }
}
