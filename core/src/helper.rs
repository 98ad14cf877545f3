//! Stateless helpers for form data and query strings.
//!
//! Nested structures are flattened ("demoted") into bracket-qualified keys,
//! `a[b][c]`, before being form-encoded. Encoding follows RFC 3986: every
//! byte outside the unreserved set is percent-encoded, so a space becomes
//! `%20`.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;

const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Flatten nested objects and arrays into `parent[child]` keyed leaves.
///
/// Leaves keep their original JSON value; conversion to wire text happens in
/// `build_query`. A scalar at the top level has no key and yields nothing.
pub fn demote(data: &Value, prefix: Option<&str>) -> Vec<(String, Value)> {
    let mut flat = Vec::new();
    demote_into(data, prefix, &mut flat);
    flat
}

fn demote_into(data: &Value, prefix: Option<&str>, out: &mut Vec<(String, Value)>) {
    let entries: Vec<(String, &Value)> = match data {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        _ => return,
    };

    for (key, value) in entries {
        let key = match prefix {
            Some(prefix) => format!("{prefix}[{key}]"),
            None => key,
        };
        match value {
            Value::Object(_) | Value::Array(_) => demote_into(value, Some(&key), out),
            leaf => out.push((key, leaf.clone())),
        }
    }
}

/// Wire text of a leaf value. `None` means the pair is omitted.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(true) => Some("1".to_string()),
        Value::Bool(false) => Some("0".to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// URL-encode flat pairs, joined with `&`.
pub fn build_query(pairs: &[(String, Value)]) -> String {
    pairs
        .iter()
        .filter_map(|(key, value)| {
            scalar_to_string(value).map(|value| {
                format!(
                    "{}={}",
                    utf8_percent_encode(key, QUERY_ENCODE_SET),
                    utf8_percent_encode(&value, QUERY_ENCODE_SET)
                )
            })
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Query text for arbitrary data: strings pass through, structures are
/// demoted and encoded.
pub fn query_string(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        other => build_query(&demote(other, None)),
    }
}

/// Whether `data` carries nothing worth sending.
pub fn is_empty_data(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Attach query data to `url`.
///
/// Without an existing query string the data follows a `?`. With one, the
/// data is appended after `&` when `append` is set, otherwise it replaces the
/// existing query. A fragment stays at the end of the URL.
pub fn format_url(url: &str, data: &Value, append: bool) -> String {
    if is_empty_data(data) {
        return url.to_string();
    }
    let data = query_string(data);
    if data.is_empty() {
        return url.to_string();
    }

    let (base, fragment) = match url.find('#') {
        Some(i) => (&url[..i], &url[i..]),
        None => (url, ""),
    };

    let formatted = match base.split_once('?') {
        None => format!("{base}?{data}"),
        Some((path, "")) => format!("{path}?{data}"),
        Some(_) if append => format!("{base}&{data}"),
        Some((path, _)) => format!("{path}?{data}"),
    };
    format!("{formatted}{fragment}")
}
