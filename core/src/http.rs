//! Transport-facing request data: methods, option keys, headers and the
//! per-attempt transport result.
//!
//! # Design
//! Options are plain data keyed by `OptionKey`. The client hands each option
//! to the transport and only records the ones the transport accepted, so
//! `RequestOptions` always mirrors what the engine actually holds. All
//! fields use owned types so values can cross the FFI boundary without
//! lifetime concerns.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::TransportFailure;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a transport knob. One value per key is retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OptionKey {
    Url,
    CustomRequest,
    HttpGet,
    Post,
    NoBody,
    PostFields,
    HttpHeader,
    UserAgent,
    Timeout,
    FollowLocation,
    /// Include the response header block in the raw output.
    Header,
    /// Record the outgoing request headers.
    HeaderOut,
    SafeUpload,
    InFile,
    InFileSize,
}

/// A transport option together with its value.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOption {
    Url(String),
    CustomRequest(String),
    HttpGet(bool),
    Post(bool),
    NoBody(bool),
    PostFields(RequestBody),
    /// Serialized `Name: value` lines in wire order.
    HttpHeader(Vec<String>),
    UserAgent(String),
    Timeout(Duration),
    FollowLocation(bool),
    Header(bool),
    HeaderOut(bool),
    SafeUpload(bool),
    InFile(PathBuf),
    InFileSize(u64),
}

impl RequestOption {
    pub fn key(&self) -> OptionKey {
        match self {
            RequestOption::Url(_) => OptionKey::Url,
            RequestOption::CustomRequest(_) => OptionKey::CustomRequest,
            RequestOption::HttpGet(_) => OptionKey::HttpGet,
            RequestOption::Post(_) => OptionKey::Post,
            RequestOption::NoBody(_) => OptionKey::NoBody,
            RequestOption::PostFields(_) => OptionKey::PostFields,
            RequestOption::HttpHeader(_) => OptionKey::HttpHeader,
            RequestOption::UserAgent(_) => OptionKey::UserAgent,
            RequestOption::Timeout(_) => OptionKey::Timeout,
            RequestOption::FollowLocation(_) => OptionKey::FollowLocation,
            RequestOption::Header(_) => OptionKey::Header,
            RequestOption::HeaderOut(_) => OptionKey::HeaderOut,
            RequestOption::SafeUpload(_) => OptionKey::SafeUpload,
            RequestOption::InFile(_) => OptionKey::InFile,
            RequestOption::InFileSize(_) => OptionKey::InFileSize,
        }
    }
}

/// Options successfully applied to the transport, last write wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    inner: BTreeMap<OptionKey, RequestOption>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, option: RequestOption) {
        self.inner.insert(option.key(), option);
    }

    pub fn get(&self, key: OptionKey) -> Option<&RequestOption> {
        self.inner.get(&key)
    }

    pub fn contains(&self, key: OptionKey) -> bool {
        self.inner.contains_key(&key)
    }

    pub fn remove(&mut self, key: OptionKey) -> Option<RequestOption> {
        self.inner.remove(&key)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RequestOption> {
        self.inner.values()
    }

    pub fn url(&self) -> Option<&str> {
        match self.get(OptionKey::Url) {
            Some(RequestOption::Url(url)) => Some(url),
            _ => None,
        }
    }

    pub fn custom_request(&self) -> Option<&str> {
        match self.get(OptionKey::CustomRequest) {
            Some(RequestOption::CustomRequest(method)) => Some(method),
            _ => None,
        }
    }

    pub fn post_fields(&self) -> Option<&RequestBody> {
        match self.get(OptionKey::PostFields) {
            Some(RequestOption::PostFields(body)) => Some(body),
            _ => None,
        }
    }

    /// Method on the wire: the custom request if set, otherwise derived
    /// from the `NoBody` and `Post` flags.
    pub fn method(&self) -> &str {
        match self.custom_request() {
            Some(method) => method,
            None if self.flag(OptionKey::NoBody) => "HEAD",
            None if self.flag(OptionKey::Post) => "POST",
            None => "GET",
        }
    }

    pub fn header_lines(&self) -> &[String] {
        match self.get(OptionKey::HttpHeader) {
            Some(RequestOption::HttpHeader(lines)) => lines,
            _ => &[],
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self.get(OptionKey::Timeout) {
            Some(RequestOption::Timeout(timeout)) => Some(*timeout),
            _ => None,
        }
    }

    pub fn user_agent(&self) -> Option<&str> {
        match self.get(OptionKey::UserAgent) {
            Some(RequestOption::UserAgent(agent)) => Some(agent),
            _ => None,
        }
    }

    /// Value of a boolean option, `false` when unset.
    pub fn flag(&self, key: OptionKey) -> bool {
        matches!(
            self.get(key),
            Some(
                RequestOption::HttpGet(true)
                    | RequestOption::Post(true)
                    | RequestOption::NoBody(true)
                    | RequestOption::FollowLocation(true)
                    | RequestOption::Header(true)
                    | RequestOption::HeaderOut(true)
                    | RequestOption::SafeUpload(true)
            )
        )
    }
}

/// Request headers in insertion order.
///
/// Setting an existing name overwrites the value in place. Removal is an
/// empty value, which is still sent on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<(String, String)>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn merge<I, K, V>(&mut self, headers: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.set(name, value);
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.set(name, "");
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// `Name: value` lines in wire order.
    pub fn to_lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect()
    }
}

/// One part of a multipart payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FormPart {
    Text(String),
    File(PathBuf),
}

/// An encoded request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Form-encoded or JSON text, or a raw string passed through.
    Text(String),
    /// Structured multipart payload; at least one part is a file.
    Multipart(Vec<(String, FormPart)>),
}

impl RequestBody {
    pub fn is_empty(&self) -> bool {
        match self {
            RequestBody::Text(text) => text.is_empty(),
            RequestBody::Multipart(parts) => parts.is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RequestBody::Text(text) => Some(text),
            RequestBody::Multipart(_) => None,
        }
    }
}

/// Metadata a transport reports after `perform`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKey {
    ResponseCode,
    HeaderSize,
}

/// Everything one attempt produced at the transport layer.
///
/// Captured once per attempt and dropped when the attempt is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResult {
    /// Raw bytes, header block included; `None` when the transport failed.
    pub raw: Option<Vec<u8>>,
    pub failure: Option<TransportFailure>,
    pub header_size: usize,
    pub status_code: u16,
}
