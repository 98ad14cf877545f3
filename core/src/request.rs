//! Turning a verb call into the URL, headers and transport options for one
//! request.
//!
//! # Design
//! `RequestBuilder` is plain data: it never talks to the transport. `build`
//! returns a `PreparedRequest` whose options the client applies. The rules
//! per verb are:
//!
//! | Verb    | Options                              | Data                       |
//! |---------|--------------------------------------|----------------------------|
//! | GET     | `CustomRequest`, `HttpGet`           | query merged into the URL  |
//! | POST    | `CustomRequest`, `Post`, `SafeUpload`| encoded body, `Expect: `   |
//! | PUT     | `CustomRequest`                      | body, auto `Content-Length`|
//! | PATCH   | `CustomRequest`                      | body                       |
//! | DELETE  | `CustomRequest`                      | body plus URL query        |
//! | HEAD    | `CustomRequest`, `NoBody`            | query merged into the URL  |
//! | OPTIONS | `CustomRequest`                      | query merged into the URL  |

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::decoder::JSON_PATTERN;
use crate::helper;
use crate::http::{FormPart, HeaderSet, HttpMethod, OptionKey, RequestBody, RequestOption, RequestOptions};

/// Body data for a request: arbitrary JSON-like data plus explicit file
/// parts for multipart uploads.
///
/// String leaves starting with `@` that name an existing file are uploaded
/// as that file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub data: Value,
    pub files: Vec<(String, PathBuf)>,
}

impl Payload {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            files: Vec::new(),
        }
    }

    /// Attach a file part under `name`.
    pub fn file(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.files.push((name.into(), path.into()));
        self
    }

    /// No data and no files. `null` counts as an empty structure.
    pub fn is_empty_structure(&self) -> bool {
        self.files.is_empty()
            && match &self.data {
                Value::Null => true,
                Value::Array(items) => items.is_empty(),
                Value::Object(map) => map.is_empty(),
                _ => false,
            }
    }
}

impl From<Value> for Payload {
    fn from(data: Value) -> Self {
        Self::new(data)
    }
}

impl From<&str> for Payload {
    fn from(data: &str) -> Self {
        Self::new(Value::String(data.to_string()))
    }
}

fn json_media_type() -> Option<&'static Regex> {
    static JSON: OnceLock<Option<Regex>> = OnceLock::new();
    JSON.get_or_init(|| Regex::new(JSON_PATTERN).ok()).as_ref()
}

/// Attach query data to `base_url`; see `helper::format_url`.
pub fn build_url(base_url: &str, query: &Value, append: bool) -> String {
    helper::format_url(base_url, query, append)
}

/// Encode `payload` according to the request headers.
///
/// A JSON `Content-Type` yields JSON text. Otherwise the data is demoted to
/// flat pairs: when any pair refers to a file the result is a multipart
/// payload, else it is form-encoded.
pub fn build_body(payload: &Payload, headers: &HeaderSet) -> RequestBody {
    if payload.files.is_empty() {
        match &payload.data {
            Value::Null => return RequestBody::Text(String::new()),
            Value::String(text) => return RequestBody::Text(text.clone()),
            Value::Bool(_) | Value::Number(_) => {
                return RequestBody::Text(helper::scalar_to_string(&payload.data).unwrap_or_default())
            }
            Value::Array(_) | Value::Object(_) => {}
        }

        let is_json = headers
            .get("Content-Type")
            .zip(json_media_type())
            .is_some_and(|(content_type, re)| re.is_match(content_type));
        if is_json {
            if let Ok(text) = serde_json::to_string(&payload.data) {
                return RequestBody::Text(text);
            }
        }
    }

    let flat = helper::demote(&payload.data, None);
    let mut has_file = !payload.files.is_empty();
    let mut parts = Vec::with_capacity(flat.len() + payload.files.len());
    for (key, value) in &flat {
        match file_reference(value) {
            Some(path) => {
                has_file = true;
                parts.push((key.clone(), FormPart::File(path)));
            }
            None => {
                if let Some(text) = helper::scalar_to_string(value) {
                    parts.push((key.clone(), FormPart::Text(text)));
                }
            }
        }
    }

    if !has_file {
        return RequestBody::Text(helper::build_query(&flat));
    }
    parts.extend(
        payload
            .files
            .iter()
            .map(|(name, path)| (name.clone(), FormPart::File(path.clone()))),
    );
    RequestBody::Multipart(parts)
}

/// `@path` naming an existing file.
fn file_reference(value: &Value) -> Option<PathBuf> {
    let path = value.as_str()?.strip_prefix('@')?;
    Path::new(path).is_file().then(|| PathBuf::from(path))
}

/// URL, headers and options for one verb call.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HeaderSet,
    pub options: Vec<RequestOption>,
}

/// Accumulates a verb call and applies the per-method option rules.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: HttpMethod,
    url: String,
    headers: HeaderSet,
    query: Value,
    payload: Payload,
    append_query: bool,
}

impl RequestBuilder {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderSet::new(),
            query: Value::Null,
            payload: Payload::default(),
            append_query: true,
        }
    }

    pub fn headers(mut self, headers: HeaderSet) -> Self {
        self.headers = headers;
        self
    }

    pub fn query(mut self, query: Value) -> Self {
        self.query = query;
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Append to (default) or replace an existing query string.
    pub fn append_query(mut self, append: bool) -> Self {
        self.append_query = append;
        self
    }

    /// Produce the request. `applied` holds the options already on the
    /// transport, consulted for explicit upload-file settings.
    pub fn build(self, applied: &RequestOptions) -> PreparedRequest {
        let RequestBuilder {
            method,
            url,
            mut headers,
            query,
            payload,
            append_query,
        } = self;
        let mut options = vec![RequestOption::CustomRequest(method.as_str().to_string())];

        let url = match method {
            HttpMethod::Get | HttpMethod::Head | HttpMethod::Options | HttpMethod::Delete => {
                build_url(&url, &query, append_query)
            }
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch => url,
        };

        match method {
            HttpMethod::Get => options.push(RequestOption::HttpGet(true)),
            HttpMethod::Head => options.push(RequestOption::NoBody(true)),
            HttpMethod::Options => {}
            HttpMethod::Post => {
                headers.set("Expect", "");
                options.push(RequestOption::Post(true));
                options.push(RequestOption::SafeUpload(true));
                options.push(RequestOption::PostFields(build_body(&payload, &headers)));
            }
            HttpMethod::Put => {
                let body = build_body(&payload, &headers);
                if !has_upload_file(applied) {
                    if let RequestBody::Text(text) = &body {
                        headers.set("Content-Length", text.len().to_string());
                    }
                }
                if !body.is_empty() {
                    options.push(RequestOption::PostFields(body));
                }
            }
            HttpMethod::Patch => {
                if payload.is_empty_structure() {
                    headers.remove("Content-Length");
                }
                options.push(RequestOption::PostFields(build_body(&payload, &headers)));
            }
            HttpMethod::Delete => {
                options.push(RequestOption::PostFields(build_body(&payload, &headers)));
            }
        }

        if !headers.is_empty() {
            options.push(RequestOption::HttpHeader(headers.to_lines()));
        }

        PreparedRequest {
            method,
            url,
            headers,
            options,
        }
    }
}

fn has_upload_file(applied: &RequestOptions) -> bool {
    let in_file = matches!(applied.get(OptionKey::InFile), Some(RequestOption::InFile(p)) if !p.as_os_str().is_empty());
    let in_file_size = matches!(applied.get(OptionKey::InFileSize), Some(RequestOption::InFileSize(n)) if *n > 0);
    in_file || in_file_size
}
