//! Provider-side client library for the Apple Push Notification service.
//!
//! # Purpose
//! Delivers application notifications to Apple's gateways with the ordering,
//! retry, and failure semantics APNs requires. Two generations of the
//! provider protocol are covered: the legacy framed TCP protocol behind
//! [`binary::Client`], and the HTTP/2 Provider API behind [`http::Client`].
//!
//! # Design notes
//! Authentication is either a provider certificate (PKCS#12, see
//! [`certificate`]) or an ES256 provider token ([`ProviderToken`]). All
//! timers and limits live in [`Tuning`] and are fixed at construction.
pub mod binary;
pub mod certificate;
pub mod config;
pub mod error;
pub mod http;
pub mod notification;
pub mod payload;
pub mod provider_token;
pub mod transport;

pub use certificate::{CertificateInfo, load_certificate};
pub use config::{Config, Tuning};
pub use error::{Error, ResponseError, Result};
pub use notification::Notification;
pub use payload::Payload;
pub use provider_token::ProviderToken;
pub use transport::Identity;
