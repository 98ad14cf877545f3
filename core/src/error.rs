//! Error types for the curlkit client.
//!
//! # Design
//! Transport and HTTP failures are not `Err` values: a verb call always
//! completes and reports failure through the client's outcome fields, so
//! that a 4xx/5xx body can still be decoded. The enums here cover the few
//! places where an operation genuinely cannot proceed: building a client
//! around a transport that refuses to initialize, and a transport refusing
//! to accept an option.

use crate::http::OptionKey;

/// Errors returned while constructing or configuring a `Client`.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The transport could not be initialized, so no client can exist.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(#[source] TransportError),

    /// A decoder pattern is not a valid regular expression.
    #[error("invalid decoder pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Errors raised by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport has no working engine behind it.
    #[error("transport engine missing: {0}")]
    Missing(String),

    /// The transport rejected an option.
    #[error("option {0:?} rejected by transport")]
    UnsupportedOption(OptionKey),
}

/// A failed `perform`: the engine-level error code and message.
///
/// Codes follow libcurl numbering where an equivalent exists
/// (6 = host not resolved, 7 = connect failed, 28 = timeout).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transport error {code}: {message}")]
pub struct TransportFailure {
    pub code: i32,
    pub message: String,
}

impl TransportFailure {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
