//! C-ABI wrapper around `curlkit-core`.
//!
//! # Overview
//! Exposes the client through `extern "C"` functions. The host does the
//! network I/O: it passes an `FfiTransport` with a `perform` callback at
//! construction, and the library drives request building, retries, header
//! parsing and body decoding around it.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Query and body data cross the boundary as JSON text. Text that is not
//!   valid JSON is used verbatim, as a pre-encoded string.
//! - The caller owns every returned pointer and must release it with the
//!   matching `curlkit_*_free` / `curlkit_free_*` function.

pub mod types;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use curlkit_core::http::HttpMethod;
use curlkit_core::{Client, Payload};
use serde_json::Value;

use types::*;

/// Borrow a C string as UTF-8, `None` for null or invalid input.
fn c_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(s) }.to_str().ok()
}

/// JSON text to data; non-JSON text is kept as a string, null is `Null`.
fn parse_data(s: *const c_char) -> Value {
    match c_str(s) {
        None => Value::Null,
        Some(text) => serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Client lifecycle
// ---------------------------------------------------------------------------

/// Create a client bound to `url` that performs I/O through `transport`.
///
/// Returns null if `url` is null, if `transport.perform` is null, or if an
/// internal panic occurs. The caller must free the returned pointer with
/// `curlkit_client_free`.
#[unsafe(no_mangle)]
pub extern "C" fn curlkit_client_new(transport: FfiTransport, url: *const c_char) -> *mut FfiClient {
    catch_unwind(AssertUnwindSafe(|| {
        let Some(url) = c_str(url) else {
            return std::ptr::null_mut();
        };
        match Client::new(HostTransport::new(transport)) {
            Ok(mut client) => {
                client.url(url);
                Box::into_raw(Box::new(FfiClient { inner: client }))
            }
            Err(e) => {
                tracing::warn!(error = %e, "client construction failed");
                std::ptr::null_mut()
            }
        }
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Free a client created by `curlkit_client_new`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn curlkit_client_free(client: *mut FfiClient) {
    if !client.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(client) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Run `f` on the client behind `client`. Returns false for null or panic.
fn with_client(client: *mut FfiClient, f: impl FnOnce(&mut FfiClient)) -> bool {
    if client.is_null() {
        return false;
    }
    let client = unsafe { &mut *client };
    catch_unwind(AssertUnwindSafe(|| f(client))).is_ok()
}

/// Replace the base URL. Returns false if an argument is null.
#[unsafe(no_mangle)]
pub extern "C" fn curlkit_set_url(client: *mut FfiClient, url: *const c_char) -> bool {
    let Some(url) = c_str(url) else {
        return false;
    };
    with_client(client, |c| {
        c.inner.url(url);
    })
}

/// Set a request header. Returns false if an argument is null.
#[unsafe(no_mangle)]
pub extern "C" fn curlkit_set_header(client: *mut FfiClient, name: *const c_char, value: *const c_char) -> bool {
    let (Some(name), Some(value)) = (c_str(name), c_str(value)) else {
        return false;
    };
    with_client(client, |c| {
        c.inner.header(name, value);
    })
}

/// Blank a request header.
#[unsafe(no_mangle)]
pub extern "C" fn curlkit_remove_header(client: *mut FfiClient, name: *const c_char) -> bool {
    let Some(name) = c_str(name) else {
        return false;
    };
    with_client(client, |c| {
        c.inner.remove_header(name);
    })
}

/// Send bodies as JSON (`Content-Type: application/json`).
#[unsafe(no_mangle)]
pub extern "C" fn curlkit_set_json(client: *mut FfiClient) -> bool {
    with_client(client, |c| {
        c.inner.json();
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn curlkit_set_user_agent(client: *mut FfiClient, agent: *const c_char) -> bool {
    let Some(agent) = c_str(agent) else {
        return false;
    };
    with_client(client, |c| {
        c.inner.user_agent(agent);
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn curlkit_set_timeout_ms(client: *mut FfiClient, timeout_ms: u64) -> bool {
    with_client(client, |c| {
        c.inner.timeout(Duration::from_millis(timeout_ms));
    })
}

/// Retries after a failed first attempt.
#[unsafe(no_mangle)]
pub extern "C" fn curlkit_set_retry(client: *mut FfiClient, count: u32) -> bool {
    with_client(client, |c| {
        c.inner.retry(count);
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn curlkit_set_retry_delay_ms(client: *mut FfiClient, delay_ms: u64) -> bool {
    with_client(client, |c| {
        c.inner.retry_delay(Duration::from_millis(delay_ms));
    })
}

/// Whether query data is appended to (true, default) or replaces an
/// existing query string.
#[unsafe(no_mangle)]
pub extern "C" fn curlkit_set_append_query(client: *mut FfiClient, append: bool) -> bool {
    with_client(client, |c| {
        c.inner.append_query(append);
    })
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Perform one verb call.
///
/// `query` goes into the URL for GET, HEAD, OPTIONS and DELETE; `body` is
/// the payload for POST, PUT, PATCH and DELETE. Either may be null. Both
/// are JSON text; anything else is sent verbatim. A body value of the
/// form `"@/path"` naming an existing file would need a multipart upload,
/// which a host transport cannot carry: the request is not sent and the
/// outcome reports `curl_error` with code 43.
///
/// Returns null only if `client` is null or an internal panic occurs.
/// The caller must free the returned pointer with `curlkit_free_outcome`.
#[unsafe(no_mangle)]
pub extern "C" fn curlkit_request(
    client: *mut FfiClient,
    method: FfiHttpMethod,
    query: *const c_char,
    body: *const c_char,
) -> *mut FfiOutcome {
    if client.is_null() {
        return std::ptr::null_mut();
    }
    let client = unsafe { &mut *client };
    catch_unwind(AssertUnwindSafe(|| {
        let query = parse_data(query);
        let body = Payload::new(parse_data(body));
        let inner = &mut client.inner;
        let outcome = match HttpMethod::from(method) {
            HttpMethod::Get => inner.get(query),
            HttpMethod::Post => inner.post(body),
            HttpMethod::Put => inner.put(body),
            HttpMethod::Patch => inner.patch(body),
            HttpMethod::Delete => inner.delete(body, query),
            HttpMethod::Head => inner.head(query),
            HttpMethod::Options => inner.options(query),
        };
        FfiOutcome::from_core(outcome)
    }))
    .unwrap_or(std::ptr::null_mut())
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free an `FfiOutcome` returned by `curlkit_request`. Safe to call with
/// null.
#[unsafe(no_mangle)]
pub extern "C" fn curlkit_free_outcome(outcome: *mut FfiOutcome) {
    if outcome.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let outcome = unsafe { Box::from_raw(outcome) };
        for s in [
            outcome.error_message,
            outcome.http_status,
            outcome.headers_json,
            outcome.decoded,
        ] {
            if !s.is_null() {
                drop(unsafe { CString::from_raw(s) });
            }
        }
        if !outcome.body.is_null() && outcome.body_len > 0 {
            let slice = std::ptr::slice_from_raw_parts_mut(outcome.body, outcome.body_len);
            drop(unsafe { Box::from_raw(slice) });
        }
    });
}

/// Free a C string allocated by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn curlkit_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { CString::from_raw(s) });
        });
    }
}

/// Library version as a C string. Free with `curlkit_free_string`.
#[unsafe(no_mangle)]
pub extern "C" fn curlkit_version() -> *mut c_char {
    to_c_string(env!("CARGO_PKG_VERSION"))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::c_void;

    /// Stand-in for a C host: replays one canned response and records what
    /// it was asked to send.
    #[derive(Default)]
    struct Host {
        raw: Vec<u8>,
        header_size: usize,
        status: u16,
        fail_code: i32,
        fail_message: Option<CString>,
        calls: u32,
        closes: u32,
        method: String,
        url: String,
        user_agent: Option<String>,
        headers: Vec<String>,
        body: Vec<u8>,
        timeout_ms: u64,
    }

    impl Host {
        fn replying(status: u16, content_type: &str, body: &str) -> Self {
            let head = format!("HTTP/1.1 {status} X\r\nContent-Type: {content_type}\r\n\r\n");
            Self {
                header_size: head.len(),
                raw: [head.as_bytes(), body.as_bytes()].concat(),
                status,
                ..Self::default()
            }
        }
    }

    extern "C" fn host_perform(user_data: *mut c_void, request: *const FfiRequest, response: *mut FfiRawResponse) -> i32 {
        let host = unsafe { &mut *(user_data as *mut Host) };
        let request = unsafe { &*request };
        let response = unsafe { &mut *response };
        host.calls += 1;
        host.method = c_str(request.method).unwrap().to_string();
        host.url = c_str(request.url).unwrap().to_string();
        host.user_agent = c_str(request.user_agent).map(str::to_string);
        host.headers = (0..request.headers_len as usize)
            .map(|i| c_str(unsafe { *request.headers.add(i) }).unwrap().to_string())
            .collect();
        host.body = if request.body.is_null() {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(request.body, request.body_len) }.to_vec()
        };
        host.timeout_ms = request.timeout_ms;

        if host.fail_code != 0 {
            response.error_message = host.fail_message.as_ref().map_or(std::ptr::null(), |m| m.as_ptr());
            return host.fail_code;
        }
        response.data = host.raw.as_ptr();
        response.len = host.raw.len();
        response.status = host.status;
        response.header_size = host.header_size;
        0
    }

    extern "C" fn host_close(user_data: *mut c_void) {
        let host = unsafe { &mut *(user_data as *mut Host) };
        host.closes += 1;
    }

    fn transport(host: &mut Host) -> FfiTransport {
        FfiTransport {
            user_data: host as *mut Host as *mut c_void,
            perform: Some(host_perform),
            close: Some(host_close),
        }
    }

    fn new_client(host: &mut Host, url: &str) -> *mut FfiClient {
        let url = CString::new(url).unwrap();
        curlkit_client_new(transport(host), url.as_ptr())
    }

    fn read(s: *const c_char) -> Option<String> {
        c_str(s).map(str::to_string)
    }

    #[test]
    fn client_new_and_free() {
        let mut host = Host::default();
        let client = new_client(&mut host, "http://localhost:3000");
        assert!(!client.is_null());
        curlkit_client_free(client);
        assert_eq!(host.closes, 1);
    }

    #[test]
    fn client_new_without_perform_returns_null() {
        let url = CString::new("http://h").unwrap();
        let transport = FfiTransport {
            user_data: std::ptr::null_mut(),
            perform: None,
            close: None,
        };
        assert!(curlkit_client_new(transport, url.as_ptr()).is_null());
    }

    #[test]
    fn client_new_null_url_returns_null() {
        let mut host = Host::default();
        assert!(curlkit_client_new(transport(&mut host), std::ptr::null()).is_null());
    }

    #[test]
    fn client_free_null_is_safe() {
        curlkit_client_free(std::ptr::null_mut());
    }

    #[test]
    fn setters_reject_null() {
        assert!(!curlkit_set_retry(std::ptr::null_mut(), 1));
        let mut host = Host::default();
        let client = new_client(&mut host, "http://h");
        assert!(!curlkit_set_header(client, std::ptr::null(), std::ptr::null()));
        assert!(curlkit_set_retry(client, 1));
        curlkit_client_free(client);
    }

    #[test]
    fn file_upload_body_fails_without_sending() {
        let mut host = Host::replying(200, "text/plain", "ok");
        let client = new_client(&mut host, "http://h/upload");
        let file = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");
        let body = CString::new(serde_json::json!({ "doc": format!("@{file}") }).to_string()).unwrap();
        let outcome = curlkit_request(client, FfiHttpMethod::Post, std::ptr::null(), body.as_ptr());

        let o = unsafe { &*outcome };
        assert!(o.error);
        assert!(o.curl_error);
        assert!(!o.http_error);
        assert_eq!(o.curl_error_code, 43);
        assert_eq!(o.decoded_kind, FfiDecodedKind::None);
        assert_eq!(host.calls, 0);
        curlkit_free_outcome(outcome);

        let outcome = curlkit_request(client, FfiHttpMethod::Get, std::ptr::null(), std::ptr::null());
        assert!(!unsafe { &*outcome }.error);
        assert_eq!(host.calls, 1);
        curlkit_free_outcome(outcome);
        curlkit_client_free(client);
    }

    #[test]
    fn get_decodes_json_response() {
        let mut host = Host::replying(200, "application/json", r#"{"ok":true}"#);
        let client = new_client(&mut host, "http://h/items");
        let query = CString::new(r#"{"page":2}"#).unwrap();
        let outcome = curlkit_request(client, FfiHttpMethod::Get, query.as_ptr(), std::ptr::null());
        curlkit_client_free(client);

        let o = unsafe { &*outcome };
        assert!(!o.error);
        assert_eq!(o.http_status_code, 200);
        assert_eq!(o.attempts, 1);
        assert_eq!(o.decoded_kind, FfiDecodedKind::Json);
        assert_eq!(read(o.decoded).as_deref(), Some(r#"{"ok":true}"#));
        assert_eq!(read(o.headers_json).as_deref(), Some(r#"{"content-type":"application/json"}"#));
        assert_eq!(read(o.http_status).as_deref(), Some("HTTP/1.1 200 X"));
        let body = unsafe { std::slice::from_raw_parts(o.body, o.body_len) };
        assert_eq!(body, br#"{"ok":true}"#);
        curlkit_free_outcome(outcome);

        assert_eq!(host.method, "GET");
        assert_eq!(host.url, "http://h/items?page=2");
        assert!(host.user_agent.unwrap().starts_with("curlkit/"));
        assert_eq!(host.timeout_ms, 30_000);
    }

    #[test]
    fn post_sends_form_body_and_headers() {
        let mut host = Host::replying(201, "text/plain", "created");
        let client = new_client(&mut host, "http://h/items");
        let (name, value) = (CString::new("X-Key").unwrap(), CString::new("k1").unwrap());
        assert!(curlkit_set_header(client, name.as_ptr(), value.as_ptr()));
        let body = CString::new(r#"{"a":{"b":1}}"#).unwrap();
        let outcome = curlkit_request(client, FfiHttpMethod::Post, std::ptr::null(), body.as_ptr());
        curlkit_client_free(client);

        let o = unsafe { &*outcome };
        assert!(!o.error);
        assert_eq!(o.decoded_kind, FfiDecodedKind::Raw);
        assert!(o.decoded.is_null());
        curlkit_free_outcome(outcome);

        assert_eq!(host.method, "POST");
        assert_eq!(host.body, b"a%5Bb%5D=1");
        assert_eq!(host.headers, vec!["X-Key: k1".to_string(), "Expect: ".to_string()]);
    }

    #[test]
    fn json_mode_and_verbatim_body() {
        let mut host = Host::replying(200, "text/plain", "");
        let client = new_client(&mut host, "http://h");
        assert!(curlkit_set_json(client));
        let body = CString::new(r#"{"x":[1,2]}"#).unwrap();
        curlkit_free_outcome(curlkit_request(client, FfiHttpMethod::Put, std::ptr::null(), body.as_ptr()));
        assert_eq!(host.body, br#"{"x":[1,2]}"#);

        let raw = CString::new("not json at all").unwrap();
        curlkit_free_outcome(curlkit_request(client, FfiHttpMethod::Patch, std::ptr::null(), raw.as_ptr()));
        curlkit_client_free(client);
        assert_eq!(host.method, "PATCH");
        assert_eq!(host.body, b"not json at all");
    }

    #[test]
    fn transport_failure_is_reported_and_retried() {
        let mut host = Host {
            fail_code: 7,
            fail_message: Some(CString::new("connection refused").unwrap()),
            ..Host::default()
        };
        let client = new_client(&mut host, "http://h");
        assert!(curlkit_set_retry(client, 2));
        let outcome = curlkit_request(client, FfiHttpMethod::Get, std::ptr::null(), std::ptr::null());
        curlkit_client_free(client);

        let o = unsafe { &*outcome };
        assert!(o.error);
        assert!(o.curl_error);
        assert_eq!(o.error_code, 7);
        assert_eq!(o.http_status_code, 0);
        assert_eq!(o.attempts, 3);
        assert_eq!(o.decoded_kind, FfiDecodedKind::None);
        assert_eq!(read(o.error_message).as_deref(), Some("connection refused"));
        curlkit_free_outcome(outcome);
        assert_eq!(host.calls, 3);
    }

    #[test]
    fn http_error_and_xml_decoding() {
        let mut host = Host::replying(500, "application/xml", "<err code=\"E1\">boom</err>");
        let client = new_client(&mut host, "http://h");
        let outcome = curlkit_request(client, FfiHttpMethod::Delete, std::ptr::null(), std::ptr::null());
        curlkit_client_free(client);

        let o = unsafe { &*outcome };
        assert!(o.http_error);
        assert_eq!(o.error_code, 500);
        assert_eq!(o.decoded_kind, FfiDecodedKind::Xml);
        let tree: Value = serde_json::from_str(&read(o.decoded).unwrap()).unwrap();
        assert_eq!(tree["name"], "err");
        assert_eq!(tree["text"], "boom");
        curlkit_free_outcome(outcome);
    }

    #[test]
    fn request_null_client_returns_null() {
        let outcome = curlkit_request(std::ptr::null_mut(), FfiHttpMethod::Get, std::ptr::null(), std::ptr::null());
        assert!(outcome.is_null());
    }

    #[test]
    fn free_functions_accept_null() {
        curlkit_free_outcome(std::ptr::null_mut());
        curlkit_free_string(std::ptr::null_mut());
    }

    #[test]
    fn version_is_crate_version() {
        let v = curlkit_version();
        assert_eq!(read(v).as_deref(), Some(env!("CARGO_PKG_VERSION")));
        curlkit_free_string(v);
    }

    /// A host that does real I/O with `ureq`, the way a C program would
    /// with libcurl.
    mod live {
        use super::*;

        struct UreqHost {
            agent: ureq::Agent,
            raw: Vec<u8>,
        }

        extern "C" fn ureq_perform(
            user_data: *mut c_void,
            request: *const FfiRequest,
            response: *mut FfiRawResponse,
        ) -> i32 {
            let host = unsafe { &mut *(user_data as *mut UreqHost) };
            let request = unsafe { &*request };
            let response = unsafe { &mut *response };

            let mut builder = ureq::http::Request::builder()
                .method(c_str(request.method).unwrap_or("GET"))
                .uri(c_str(request.url).unwrap_or(""));
            for i in 0..request.headers_len as usize {
                let line = c_str(unsafe { *request.headers.add(i) }).unwrap_or("");
                if let Some((name, value)) = line.split_once(':') {
                    if !value.trim().is_empty() {
                        builder = builder.header(name.trim(), value.trim());
                    }
                }
            }
            let result = if request.body.is_null() {
                builder.body(()).map(|req| host.agent.run(req))
            } else {
                let body = unsafe { std::slice::from_raw_parts(request.body, request.body_len) }.to_vec();
                builder.body(body).map(|req| host.agent.run(req))
            };
            let mut resp = match result {
                Ok(Ok(resp)) => resp,
                Ok(Err(_)) => return 7,
                Err(_) => return 3,
            };

            let mut raw = format!("{:?} {}\r\n", resp.version(), resp.status()).into_bytes();
            for (name, value) in resp.headers() {
                raw.extend_from_slice(format!("{}: {}\r\n", name, value.to_str().unwrap_or("")).as_bytes());
            }
            raw.extend_from_slice(b"\r\n");
            response.header_size = raw.len();
            if !request.no_body {
                raw.extend(resp.body_mut().read_to_vec().unwrap_or_default());
            }
            response.status = resp.status().as_u16();
            host.raw = raw;
            response.data = host.raw.as_ptr();
            response.len = host.raw.len();
            0
        }

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

        #[test]
        fn host_round_trip_against_mock_server() {
            let base = start_server();
            let mut host = UreqHost {
                agent: ureq::Agent::config_builder()
                    .http_status_as_error(false)
                    .build()
                    .new_agent(),
                raw: Vec::new(),
            };
            let transport = FfiTransport {
                user_data: &mut host as *mut UreqHost as *mut c_void,
                perform: Some(ureq_perform),
                close: None,
            };
            let url = CString::new(format!("{base}/echo")).unwrap();
            let client = curlkit_client_new(transport, url.as_ptr());
            assert!(!client.is_null());

            let body = CString::new(r#"{"a":1,"b":"x y"}"#).unwrap();
            let outcome = curlkit_request(client, FfiHttpMethod::Post, std::ptr::null(), body.as_ptr());
            let o = unsafe { &*outcome };
            assert!(!o.error);
            assert_eq!(o.decoded_kind, FfiDecodedKind::Json);
            let echo: mock_server::Echo = serde_json::from_str(&read(o.decoded).unwrap()).unwrap();
            assert_eq!(echo.method, "POST");
            assert_eq!(echo.body, "a=1&b=x%20y");
            curlkit_free_outcome(outcome);

            let missing = CString::new(format!("{base}/status/404")).unwrap();
            assert!(curlkit_set_url(client, missing.as_ptr()));
            let outcome = curlkit_request(client, FfiHttpMethod::Get, std::ptr::null(), std::ptr::null());
            let o = unsafe { &*outcome };
            assert!(o.http_error);
            assert_eq!(o.error_code, 404);
            curlkit_free_outcome(outcome);
            curlkit_client_free(client);
        }
    }
}
