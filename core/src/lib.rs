//! Synchronous, configurable HTTP client core.
//!
//! # Overview
//! A `Client` turns verb calls (`get`, `post`, `put`, `patch`, `delete`,
//! `head`, `options`) into transport options, hands them to a pluggable
//! `Transport`, then splits, parses and decodes what comes back. Failures
//! never surface as `Err` from a verb call: they land in the `Outcome`
//! fields (`curl_error`, `http_error`, `error_code`, ...).
//!
//! # Design
//! - The transport is the only component that does I/O. `UreqTransport`
//!   (feature `ureq-transport`) is bundled; the C ABI crate plugs in a host
//!   callback instead.
//! - Request assembly (`request`), header parsing (`response`) and body
//!   decoding (`decoder`) are pure and testable without a network.
//! - Each client owns its decoder map, so registering a custom decoder
//!   never leaks into another client.
//! - Query and form data are flattened into `a[b][c]` keys (`helper`).

pub mod client;
pub mod config;
pub mod decoder;
pub mod error;
pub mod helper;
pub mod http;
pub mod request;
pub mod response;
pub mod transport;
pub mod xml;

pub use client::{Client, Outcome, Phase};
pub use config::ClientConfig;
pub use decoder::{Decoded, Decoder, DecoderMap, JsonDecoder, XmlDecoder};
pub use error::{ClientError, TransportError, TransportFailure};
pub use http::{HeaderSet, HttpMethod, InfoKey, OptionKey, RequestBody, RequestOption, RequestOptions};
pub use request::Payload;
pub use response::{HeaderValue, ResponseHeaders};
pub use transport::Transport;
#[cfg(feature = "ureq-transport")]
pub use transport::UreqTransport;
pub use xml::XmlElement;
