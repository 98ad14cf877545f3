//! Splitting a raw transport blob into headers and body, and parsing the
//! header block.
//!
//! The header block size comes from the transport; the blob is never scanned
//! for the blank line. Header lines without a `:` are skipped rather than
//! rejected.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// A response header value; repeated headers collect into `Multi` in the
/// order they appeared.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Single(String),
    Multi(Vec<String>),
}

impl HeaderValue {
    /// The first value.
    pub fn first(&self) -> &str {
        match self {
            HeaderValue::Single(value) => value,
            HeaderValue::Multi(values) => values.first().map(String::as_str).unwrap_or(""),
        }
    }

    pub fn all(&self) -> Vec<&str> {
        match self {
            HeaderValue::Single(value) => vec![value.as_str()],
            HeaderValue::Multi(values) => values.iter().map(String::as_str).collect(),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            HeaderValue::Single(first) => {
                *self = HeaderValue::Multi(vec![std::mem::take(first), value]);
            }
            HeaderValue::Multi(values) => values.push(value),
        }
    }
}

/// Response headers keyed by lower-cased name, in first-seen order.
/// Serializes as a map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    entries: Vec<(String, HeaderValue)>,
}

impl ResponseHeaders {
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }

    /// First value of `name`, if present.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).map(HeaderValue::first)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn append(&mut self, name: String, value: String) {
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, existing)) => existing.push(value),
            None => self.entries.push((name, HeaderValue::Single(value))),
        }
    }
}

impl Serialize for ResponseHeaders {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Slice `raw` at `header_size` into header bytes and body bytes.
///
/// A header size past the end of `raw` is clamped.
pub fn split(raw: &[u8], header_size: usize) -> (&[u8], &[u8]) {
    raw.split_at(header_size.min(raw.len()))
}

/// Parse a header block into its status line and header map.
///
/// Returns `None` when the block holds no non-empty line.
pub fn parse_headers(header_bytes: &[u8]) -> Option<(String, ResponseHeaders)> {
    let text = String::from_utf8_lossy(header_bytes);
    let mut lines = text.split("\r\n").filter(|line| !line.is_empty());

    let status_line = lines.next()?.to_string();
    let mut headers = ResponseHeaders::default();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        headers.append(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }
    Some((status_line, headers))
}
