//! Response body decoders and content-type dispatch.
//!
//! # Design
//! A decoder never fails. When a body cannot be decoded it comes back as
//! `Decoded::Raw` with the original bytes, so a garbled or truncated
//! response never breaks the request pipeline. Callers tell the two apart
//! with `Decoded::is_decoded`.
//!
//! Content-type dispatch uses a `DecoderMap`: an ordered list of
//! `(pattern, decoder)` pairs owned by each client, seeded with the JSON and
//! XML decoders. The first pattern matching the response `content-type`
//! wins.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::xml::{self, XmlElement};

/// Media types handled by `JsonDecoder`, e.g. `application/json`,
/// `application/vnd.api+json`, `text/x-json`.
pub const JSON_PATTERN: &str =
    r"(?i)^(?:application|text)/(?:[a-z]+(?:[\.-][0-9a-z]+)*[\+\.]|x-)?json(?:-[a-z]+)?";

/// Media types handled by `XmlDecoder`, e.g. `text/xml`,
/// `application/atom+xml`.
pub const XML_PATTERN: &str = r"(?i)^(?:text/|application/(?:atom\+|rss\+)?)xml";

/// Default maximum nesting depth accepted by `JsonDecoder`. Also the
/// ceiling: a larger `depth` argument is clamped to it.
pub const DEFAULT_JSON_DEPTH: u64 = 512;

/// The outcome of decoding a response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Json(Value),
    Xml(XmlElement),
    /// The body, unchanged. Either no decoder applied or decoding failed.
    Raw(Vec<u8>),
}

impl Decoded {
    pub fn is_decoded(&self) -> bool {
        !matches!(self, Decoded::Raw(_))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Decoded::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_xml(&self) -> Option<&XmlElement> {
        match self {
            Decoded::Xml(element) => Some(element),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&[u8]> {
        match self {
            Decoded::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Raw body as text, lossily converted.
    pub fn raw_text(&self) -> Option<Cow<'_, str>> {
        self.as_raw().map(String::from_utf8_lossy)
    }
}

/// A body decoder.
///
/// `args` are the extra arguments configured on the client, in order; the
/// body is always passed separately as the first input.
pub trait Decoder: Send + Sync {
    fn decode(&self, body: &[u8], args: &[Value]) -> Decoded;

    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Decodes JSON into a `serde_json::Value`.
///
/// Arguments: `[assoc, depth, flags]`. `assoc` is accepted for
/// compatibility and has no effect since objects always decode to maps.
/// `depth` caps container nesting (default and maximum 512). `flags` is
/// ignored.
/// A `null` document counts as a failed decode.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(&self, body: &[u8], args: &[Value]) -> Decoded {
        let max_depth = args
            .get(1)
            .and_then(Value::as_u64)
            .map_or(DEFAULT_JSON_DEPTH, |depth| depth.min(DEFAULT_JSON_DEPTH));

        if nesting(body) > max_depth {
            tracing::debug!(max_depth, "json nesting exceeds limit, passing through");
            return Decoded::Raw(body.to_vec());
        }

        // serde_json stops at 128 levels on its own; the scan above bounds
        // the recursion instead.
        let mut de = serde_json::Deserializer::from_slice(body);
        de.disable_recursion_limit();
        let parsed = Value::deserialize(&mut de).and_then(|value| de.end().map(|()| value));

        match parsed {
            Ok(Value::Null) => Decoded::Raw(body.to_vec()),
            Ok(value) => Decoded::Json(value),
            Err(e) => {
                tracing::debug!(error = %e, "json decode failed, passing through");
                Decoded::Raw(body.to_vec())
            }
        }
    }

    fn name(&self) -> &str {
        "json"
    }
}

/// Deepest bracket nesting in a JSON text, ignoring brackets in strings.
fn nesting(body: &[u8]) -> u64 {
    let (mut depth, mut max) = (0u64, 0u64);
    let (mut in_string, mut escaped) = (false, false);
    for &b in body {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => {
                depth += 1;
                max = max.max(depth);
            }
            b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    max
}

/// Decodes XML into an `XmlElement` tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlDecoder;

impl Decoder for XmlDecoder {
    fn decode(&self, body: &[u8], _args: &[Value]) -> Decoded {
        let Ok(text) = std::str::from_utf8(body) else {
            return Decoded::Raw(body.to_vec());
        };
        match xml::parse(text) {
            Ok(root) => Decoded::Xml(root),
            Err(e) => {
                tracing::debug!(error = %e, "xml decode failed, passing through");
                Decoded::Raw(body.to_vec())
            }
        }
    }

    fn name(&self) -> &str {
        "xml"
    }
}

struct Binding {
    pattern: String,
    regex: Regex,
    decoder: Arc<dyn Decoder>,
}

/// Ordered content-type pattern to decoder bindings.
#[derive(Clone)]
pub struct DecoderMap {
    bindings: Vec<Arc<Binding>>,
}

impl DecoderMap {
    /// A map without any bindings.
    pub fn empty() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Register `decoder` for content types matching `pattern`.
    ///
    /// An already registered pattern keeps its position and gets the new
    /// decoder; a new pattern goes to the end.
    pub fn insert(&mut self, pattern: &str, decoder: Arc<dyn Decoder>) -> Result<(), regex::Error> {
        let regex = Regex::new(pattern)?;
        let binding = Arc::new(Binding {
            pattern: pattern.to_string(),
            regex,
            decoder,
        });
        match self.bindings.iter_mut().find(|b| b.pattern == pattern) {
            Some(existing) => *existing = binding,
            None => self.bindings.push(binding),
        }
        Ok(())
    }

    /// First decoder whose pattern matches `content_type`.
    pub fn find(&self, content_type: &str) -> Option<&Arc<dyn Decoder>> {
        self.bindings
            .iter()
            .find(|b| b.regex.is_match(content_type))
            .map(|b| &b.decoder)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|b| b.pattern.as_str())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl Default for DecoderMap {
    fn default() -> Self {
        let json: Arc<dyn Decoder> = Arc::new(JsonDecoder);
        let xml: Arc<dyn Decoder> = Arc::new(XmlDecoder);
        let bindings = [(JSON_PATTERN, json), (XML_PATTERN, xml)]
            .into_iter()
            .filter_map(|(pattern, decoder)| {
                Regex::new(pattern).ok().map(|regex| {
                    Arc::new(Binding {
                        pattern: pattern.to_string(),
                        regex,
                        decoder,
                    })
                })
            })
            .collect();
        Self { bindings }
    }
}

impl fmt::Debug for DecoderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.bindings.iter().map(|b| (&b.pattern, b.decoder.name())))
            .finish()
    }
}
