//! End-to-end tests against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then drives every verb through
//! `UreqTransport` over real HTTP. Validates that the option plans, the
//! rebuilt curl-style response blob and the decoders work together.
#![cfg(feature = "ureq-transport")]

use curlkit_core::{Client, Decoded, HeaderValue, UreqTransport};
use mock_server::{Echo, FLAKY_FAILURES, JSON_FIXTURE, TEXT_FIXTURE};
use serde_json::{json, Value};

fn start_server() -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });

    format!("http://{addr}")
}

fn client(url: String) -> Client<UreqTransport> {
    let mut client = Client::blocking().unwrap();
    client.url(url);
    client
}

fn echo(outcome: &curlkit_core::Outcome) -> Echo {
    let value = outcome
        .response
        .as_ref()
        .and_then(Decoded::as_json)
        .cloned()
        .expect("echo returns json");
    serde_json::from_value(value).unwrap()
}

#[test]
fn fixtures_decode_by_content_type() {
    let base = start_server();

    let mut c = client(format!("{base}/json"));
    let outcome = c.get(Value::Null);
    assert!(!outcome.error, "{outcome:?}");
    assert_eq!(outcome.http_status_code, Some(200));
    assert!(outcome.http_status.as_deref().unwrap().starts_with("HTTP/1.1 200"));
    let expected: Value = serde_json::from_str(JSON_FIXTURE).unwrap();
    assert_eq!(outcome.response, Some(Decoded::Json(expected)));

    let mut c = client(format!("{base}/xml"));
    let outcome = c.get(Value::Null);
    let root = outcome.response.as_ref().and_then(Decoded::as_xml).unwrap();
    assert_eq!(root.name, "catalog");
    assert_eq!(root.children_named("book").count(), 2);

    let mut c = client(format!("{base}/text"));
    let outcome = c.get(Value::Null);
    assert_eq!(outcome.response, Some(Decoded::Raw(TEXT_FIXTURE.as_bytes().to_vec())));
}

#[test]
fn every_verb_reaches_the_server() {
    let base = start_server();
    let mut c = client(format!("{base}/echo"));

    let got = echo(c.get(json!({"a": 1, "b": {"c": "x y"}})));
    assert_eq!(got.method, "GET");
    assert_eq!(got.query.as_deref(), Some("a=1&b%5Bc%5D=x%20y"));
    assert!(got.headers["user-agent"].starts_with("curlkit/"));

    let got = echo(c.post(json!({"name": "n", "tags": ["t1", "t2"]})));
    assert_eq!(got.method, "POST");
    assert_eq!(got.body, "name=n&tags%5B0%5D=t1&tags%5B1%5D=t2");
    assert_eq!(got.headers["content-type"], "application/x-www-form-urlencoded");
    assert!(!got.headers.contains_key("expect"));

    let got = echo(c.put(json!({"k": "v"})));
    assert_eq!(got.method, "PUT");
    assert_eq!(got.body, "k=v");
    assert_eq!(got.headers["content-length"], "3");

    let got = echo(c.patch("raw=1"));
    assert_eq!(got.method, "PATCH");
    assert_eq!(got.body, "raw=1");

    let got = echo(c.delete(Value::Null, json!({"id": 9})));
    assert_eq!(got.method, "DELETE");
    assert_eq!(got.query.as_deref(), Some("id=9"));

    let got = echo(c.options(Value::Null));
    assert_eq!(got.method, "OPTIONS");
}

#[test]
fn json_mode_sends_json_body() {
    let base = start_server();
    let mut c = client(format!("{base}/echo"));
    c.json();
    let got = echo(c.post(json!({"x": 1, "y": [true]})));
    assert_eq!(got.headers["content-type"], "application/json");
    let sent: Value = serde_json::from_str(&got.body).unwrap();
    assert_eq!(sent, json!({"x": 1, "y": [true]}));
}

#[test]
fn custom_and_removed_headers() {
    let base = start_server();
    let mut c = client(format!("{base}/echo"));
    c.header("X-Token", "abc").header("X-Drop", "soon");
    c.remove_header("X-Drop");
    let got = echo(c.get(Value::Null));
    assert_eq!(got.headers["x-token"], "abc");
    assert!(!got.headers.contains_key("x-drop"));
}

#[test]
fn head_reads_headers_only() {
    let base = start_server();
    let mut c = client(format!("{base}/json"));
    let outcome = c.head(Value::Null);
    assert!(!outcome.error);
    assert_eq!(outcome.raw_body.as_deref(), Some(&b""[..]));
    assert_eq!(
        outcome.response_headers.as_ref().and_then(|h| h.first("content-type")),
        Some("application/json")
    );
}

#[test]
fn error_status_still_decodes_body() {
    let base = start_server();
    let mut c = client(format!("{base}/status/404"));
    let outcome = c.get(Value::Null);
    assert!(outcome.http_error);
    assert!(!outcome.curl_error);
    assert_eq!(outcome.error_code, 404);
    assert_eq!(outcome.response, Some(Decoded::Json(json!({"status": 404}))));
}

#[test]
fn repeated_headers_collect() {
    let base = start_server();
    let mut c = client(format!("{base}/headers/repeat"));
    let outcome = c.get(Value::Null);
    let cookies = outcome.response_headers.as_ref().unwrap().get("set-cookie");
    assert_eq!(
        cookies,
        Some(&HeaderValue::Multi(vec!["a=1".to_string(), "b=2".to_string()]))
    );
}

#[test]
fn retry_rides_out_transient_failures() {
    let base = start_server();

    let mut c = client(format!("{base}/flaky/patient"));
    c.retry(FLAKY_FAILURES);
    let outcome = c.get(Value::Null);
    assert!(!outcome.error, "{outcome:?}");
    assert_eq!(outcome.attempts, FLAKY_FAILURES + 1);

    let mut c = client(format!("{base}/flaky/impatient"));
    let outcome = c.get(Value::Null);
    assert!(outcome.http_error);
    assert_eq!(outcome.error_code, 503);
    assert_eq!(outcome.attempts, 1);
}

#[test]
fn refused_connection_is_transport_error() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let mut c = client(format!("http://{addr}/"));
    let outcome = c.get(Value::Null);
    assert!(outcome.curl_error);
    assert!(!outcome.http_error);
    assert_eq!(outcome.http_status_code, None);
    assert_eq!(outcome.error_code, outcome.curl_error_code);
    assert!(outcome.curl_error_message.is_some());
}
