//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! The host owns the network: it hands the library an `FfiTransport` whose
//! `perform` callback receives an `FfiRequest` and fills an
//! `FfiRawResponse` with curl-style bytes (header block, then body). The
//! library returns each verb's result as an `FfiOutcome`. Conversion code
//! lives here to keep `lib.rs` focused on the `extern "C"` surface.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;

use curlkit_core::error::{TransportError, TransportFailure};
use curlkit_core::http::{HttpMethod, InfoKey, OptionKey, RequestBody, RequestOption, RequestOptions};
use curlkit_core::{Client, Decoded, Outcome, Transport};

/// libcurl's "failed to initialize" code, reported when the host callback
/// signals failure without a usable code.
const CURLE_FAILED_INIT: i32 = 2;

/// libcurl's code for an option the handle cannot honour.
const CURLE_BAD_FUNCTION_ARGUMENT: i32 = 43;

/// Opaque handle to a client. C callers receive a pointer to this and pass
/// it back into every FFI function.
pub struct FfiClient {
    pub(crate) inner: Client<HostTransport>,
}

// ---------------------------------------------------------------------------
// Transport callbacks
// ---------------------------------------------------------------------------

/// Request handed to the host's `perform` callback. All pointers are owned
/// by the library and valid only for the duration of the callback.
#[repr(C)]
pub struct FfiRequest {
    pub method: *const c_char,
    pub url: *const c_char,
    /// Null when no user agent is set.
    pub user_agent: *const c_char,
    /// `Name: value` lines. A line with an empty value asks the host to
    /// drop that header.
    pub headers: *const *const c_char,
    pub headers_len: u32,
    /// Null when there is no body.
    pub body: *const u8,
    pub body_len: usize,
    /// Zero means no limit.
    pub timeout_ms: u64,
    pub follow_location: bool,
    /// Skip reading the response body.
    pub no_body: bool,
}

/// Filled by the host's `perform` callback.
///
/// `data` holds the response header block followed by the body, and
/// `header_size` is the length of the header block. Pointers must stay
/// valid until the callback returns; the library copies them immediately.
#[repr(C)]
pub struct FfiRawResponse {
    pub data: *const u8,
    pub len: usize,
    pub status: u16,
    pub header_size: usize,
    /// Optional message for a failed perform.
    pub error_message: *const c_char,
}

impl FfiRawResponse {
    fn empty() -> Self {
        Self {
            data: std::ptr::null(),
            len: 0,
            status: 0,
            header_size: 0,
            error_message: std::ptr::null(),
        }
    }
}

/// Performs a request. Returns 0 on success or a libcurl-style error code.
pub type FfiPerformFn =
    extern "C" fn(user_data: *mut c_void, request: *const FfiRequest, response: *mut FfiRawResponse) -> i32;

/// Releases host resources tied to `user_data` for the current request.
pub type FfiCloseFn = extern "C" fn(user_data: *mut c_void);

/// Host-supplied transport. `perform` is required; `close` is optional.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FfiTransport {
    pub user_data: *mut c_void,
    pub perform: Option<FfiPerformFn>,
    pub close: Option<FfiCloseFn>,
}

/// `Transport` adapter over the host callbacks.
///
/// Multipart bodies and file uploads cannot cross the boundary. They are
/// rejected when applied, and the next `perform` fails with
/// `CURLE_BAD_FUNCTION_ARGUMENT` instead of sending the request without
/// its body.
pub struct HostTransport {
    callbacks: FfiTransport,
    options: RequestOptions,
    rejected: Option<OptionKey>,
    status: u16,
    header_size: usize,
}

impl HostTransport {
    pub(crate) fn new(callbacks: FfiTransport) -> Self {
        Self {
            callbacks,
            options: RequestOptions::new(),
            rejected: None,
            status: 0,
            header_size: 0,
        }
    }
}

impl Transport for HostTransport {
    fn init(&mut self) -> Result<(), TransportError> {
        if self.callbacks.perform.is_none() {
            return Err(TransportError::Missing("perform callback".to_string()));
        }
        self.status = 0;
        self.header_size = 0;
        Ok(())
    }

    fn apply(&mut self, option: &RequestOption) -> Result<(), TransportError> {
        match option {
            RequestOption::InFile(_) | RequestOption::PostFields(RequestBody::Multipart(_)) => {
                self.rejected = Some(option.key());
                Err(TransportError::UnsupportedOption(option.key()))
            }
            _ => {
                self.options.insert(option.clone());
                Ok(())
            }
        }
    }

    fn perform(&mut self) -> Result<Vec<u8>, TransportFailure> {
        self.status = 0;
        self.header_size = 0;
        let perform = self
            .callbacks
            .perform
            .ok_or_else(|| TransportFailure::new(CURLE_FAILED_INIT, "no perform callback"))?;
        if let Some(key) = self.rejected {
            return Err(TransportFailure::new(
                CURLE_BAD_FUNCTION_ARGUMENT,
                format!("{key:?} cannot be sent through a host transport"),
            ));
        }

        let invalid = |what: &str| TransportFailure::new(CURLE_FAILED_INIT, format!("{what} contains a NUL byte"));
        let method = CString::new(self.options.method()).map_err(|_| invalid("method"))?;
        let url = CString::new(self.options.url().unwrap_or_default()).map_err(|_| invalid("url"))?;
        let user_agent = self
            .options
            .user_agent()
            .map(CString::new)
            .transpose()
            .map_err(|_| invalid("user agent"))?;
        let lines = self
            .options
            .header_lines()
            .iter()
            .map(|line| CString::new(line.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid("header"))?;
        let line_ptrs: Vec<*const c_char> = lines.iter().map(|l| l.as_ptr()).collect();
        let body = self.options.post_fields().and_then(RequestBody::as_text).unwrap_or("");

        let request = FfiRequest {
            method: method.as_ptr(),
            url: url.as_ptr(),
            user_agent: user_agent.as_ref().map_or(std::ptr::null(), |ua| ua.as_ptr()),
            headers: if line_ptrs.is_empty() { std::ptr::null() } else { line_ptrs.as_ptr() },
            headers_len: line_ptrs.len() as u32,
            body: if body.is_empty() { std::ptr::null() } else { body.as_ptr() },
            body_len: body.len(),
            timeout_ms: self
                .options
                .timeout()
                .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
                .unwrap_or(0),
            follow_location: self.options.flag(OptionKey::FollowLocation),
            no_body: self.options.flag(OptionKey::NoBody),
        };
        let mut response = FfiRawResponse::empty();

        let code = perform(self.callbacks.user_data, &request, &mut response);
        tracing::trace!(code, status = response.status, len = response.len, "host perform returned");
        if code != 0 {
            let message = if response.error_message.is_null() {
                format!("transport error {code}")
            } else {
                unsafe { CStr::from_ptr(response.error_message) }
                    .to_string_lossy()
                    .into_owned()
            };
            return Err(TransportFailure::new(code, message));
        }

        let raw = if response.data.is_null() || response.len == 0 {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(response.data, response.len) }.to_vec()
        };
        self.status = response.status;
        self.header_size = response.header_size.min(raw.len());
        Ok(raw)
    }

    fn info(&self, key: InfoKey) -> u64 {
        match key {
            InfoKey::ResponseCode => u64::from(self.status),
            InfoKey::HeaderSize => self.header_size as u64,
        }
    }

    fn close(&mut self) {
        if let Some(close) = self.callbacks.close {
            close(self.callbacks.user_data);
        }
        self.options.clear();
        self.rejected = None;
        self.status = 0;
        self.header_size = 0;
    }
}

// ---------------------------------------------------------------------------
// Request input
// ---------------------------------------------------------------------------

/// HTTP method as a C enum.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FfiHttpMethod {
    Get = 0,
    Post = 1,
    Put = 2,
    Patch = 3,
    Delete = 4,
    Head = 5,
    Options = 6,
}

impl From<FfiHttpMethod> for HttpMethod {
    fn from(m: FfiHttpMethod) -> Self {
        match m {
            FfiHttpMethod::Get => HttpMethod::Get,
            FfiHttpMethod::Post => HttpMethod::Post,
            FfiHttpMethod::Put => HttpMethod::Put,
            FfiHttpMethod::Patch => HttpMethod::Patch,
            FfiHttpMethod::Delete => HttpMethod::Delete,
            FfiHttpMethod::Head => HttpMethod::Head,
            FfiHttpMethod::Options => HttpMethod::Options,
        }
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// What `FfiOutcome::decoded` holds.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FfiDecodedKind {
    /// No response (transport failure).
    None = 0,
    /// `decoded` is the JSON document.
    Json = 1,
    /// `decoded` is the XML tree rendered as JSON.
    Xml = 2,
    /// Not decoded; read `body`.
    Raw = 3,
}

/// Observable state after a verb call.
///
/// Strings are null when absent. The caller must release the outcome with
/// `curlkit_free_outcome`.
#[repr(C)]
pub struct FfiOutcome {
    pub error: bool,
    pub error_code: i32,
    pub error_message: *mut c_char,
    pub curl_error: bool,
    pub curl_error_code: i32,
    pub http_error: bool,
    /// Zero when no status was received.
    pub http_status_code: u16,
    /// Status line, e.g. `HTTP/1.1 200 OK`.
    pub http_status: *mut c_char,
    pub attempts: u32,
    /// Parsed response headers as a JSON object; repeated headers are arrays.
    pub headers_json: *mut c_char,
    pub body: *mut u8,
    pub body_len: usize,
    pub decoded_kind: FfiDecodedKind,
    pub decoded: *mut c_char,
}

impl FfiOutcome {
    pub(crate) fn from_core(outcome: &Outcome) -> *mut Self {
        let (decoded_kind, decoded) = match &outcome.response {
            None => (FfiDecodedKind::None, std::ptr::null_mut()),
            Some(Decoded::Json(value)) => (FfiDecodedKind::Json, to_c_string(value.to_string())),
            Some(Decoded::Xml(element)) => (
                FfiDecodedKind::Xml,
                serde_json::to_string(element).map_or(std::ptr::null_mut(), to_c_string),
            ),
            Some(Decoded::Raw(_)) => (FfiDecodedKind::Raw, std::ptr::null_mut()),
        };
        let (body, body_len) = match &outcome.raw_body {
            Some(bytes) if !bytes.is_empty() => {
                let boxed = bytes.clone().into_boxed_slice();
                let len = boxed.len();
                (Box::into_raw(boxed) as *mut u8, len)
            }
            _ => (std::ptr::null_mut(), 0),
        };
        let headers_json = outcome
            .response_headers
            .as_ref()
            .and_then(|h| serde_json::to_string(h).ok())
            .map_or(std::ptr::null_mut(), to_c_string);

        Box::into_raw(Box::new(FfiOutcome {
            error: outcome.error,
            error_code: outcome.error_code,
            error_message: opt_c_string(outcome.error_message.as_deref()),
            curl_error: outcome.curl_error,
            curl_error_code: outcome.curl_error_code,
            http_error: outcome.http_error,
            http_status_code: outcome.http_status_code.unwrap_or(0),
            http_status: opt_c_string(outcome.http_status.as_deref()),
            attempts: outcome.attempts,
            headers_json,
            body,
            body_len,
            decoded_kind,
            decoded,
        }))
    }
}

/// Heap C string, or null if `s` has an interior NUL.
pub(crate) fn to_c_string(s: impl Into<Vec<u8>>) -> *mut c_char {
    CString::new(s).map_or(std::ptr::null_mut(), CString::into_raw)
}

fn opt_c_string(s: Option<&str>) -> *mut c_char {
    s.map_or(std::ptr::null_mut(), to_c_string)
}
