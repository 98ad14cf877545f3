//! The request executor: configuration, the attempt/retry loop and the
//! observable outcome.
//!
//! # Design
//! A `Client` owns one transport handle and drives it through
//! `Configuring -> Executing -> Succeeded | Failed`. Each verb call builds the
//! request once, then runs attempts of perform, classify, split, decode and
//! aggregate until an attempt succeeds or the retry budget is spent. The
//! outcome of the last attempt is what callers observe; verb calls never
//! return an error.
//!
//! When a call finishes the handle is closed and the per-request options,
//! explicit decoder and decoder arguments are cleared. The URL, headers,
//! decoder map and retry settings stay, so the client can be reused; the
//! next call reopens the handle and reapplies the defaults.

use std::sync::Arc;

use serde_json::Value;

use crate::config::ClientConfig;
use crate::decoder::{Decoded, Decoder, DecoderMap};
use crate::error::{ClientError, TransportFailure};
use crate::http::{HeaderSet, HttpMethod, InfoKey, OptionKey, RequestOption, RequestOptions, TransportResult};
use crate::request::{Payload, RequestBuilder};
use crate::response::{self, ResponseHeaders};
use crate::transport::Transport;

/// libcurl's "failed to initialize" code, used when a released handle
/// cannot be reopened.
const CURLE_FAILED_INIT: i32 = 2;

/// Where a client is in its request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Configuring,
    Executing,
    Succeeded,
    Failed,
}

/// Everything observable after a verb call. Reflects the last attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    /// Transport output, header block included.
    pub raw_response: Option<Vec<u8>>,
    pub raw_response_headers: Option<Vec<u8>>,
    pub response_headers: Option<ResponseHeaders>,
    /// Status line, e.g. `HTTP/1.1 404 Not Found`.
    pub http_status: Option<String>,
    /// Body bytes without headers.
    pub raw_body: Option<Vec<u8>>,
    pub response: Option<Decoded>,

    pub curl_error: bool,
    pub curl_error_code: i32,
    pub curl_error_message: Option<String>,

    pub http_status_code: Option<u16>,
    pub http_error: bool,

    pub error: bool,
    pub error_code: i32,
    pub error_message: Option<String>,

    /// Attempts made, retries included.
    pub attempts: u32,
}

impl Outcome {
    fn transport_failed(failure: TransportFailure) -> Self {
        let mut outcome = Outcome {
            curl_error: true,
            curl_error_code: failure.code,
            curl_error_message: Some(failure.message),
            ..Outcome::default()
        };
        outcome.aggregate();
        outcome
    }

    fn aggregate(&mut self) {
        self.error = self.curl_error || self.http_error;
        (self.error_code, self.error_message) = if self.curl_error {
            (self.curl_error_code, self.curl_error_message.clone())
        } else if self.http_error {
            (
                self.http_status_code.map(i32::from).unwrap_or_default(),
                self.http_status.clone(),
            )
        } else {
            (0, None)
        };
    }
}

/// A synchronous HTTP client over a pluggable transport.
///
/// One client performs one request at a time. Use separate clients for
/// concurrent requests.
pub struct Client<T: Transport> {
    transport: T,
    open: bool,
    config: ClientConfig,
    url: Option<String>,
    headers: HeaderSet,
    options: RequestOptions,
    append_query: bool,
    decoder: Option<Arc<dyn Decoder>>,
    decoder_args: Vec<Value>,
    decoder_map: DecoderMap,
    phase: Phase,
    outcome: Outcome,
}

#[cfg(feature = "ureq-transport")]
impl Client<crate::transport::UreqTransport> {
    /// A client backed by the bundled `ureq` transport, configured from
    /// the environment (see `ClientConfig::from_env`).
    pub fn blocking() -> Result<Self, ClientError> {
        Self::with_config(crate::transport::UreqTransport::new(), ClientConfig::from_env())
    }
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T) -> Result<Self, ClientError> {
        Self::with_config(transport, ClientConfig::default())
    }

    /// Initialize `transport` and apply the defaults from `config`.
    ///
    /// Fails when the transport cannot be initialized.
    pub fn with_config(mut transport: T, config: ClientConfig) -> Result<Self, ClientError> {
        transport.init().map_err(ClientError::TransportUnavailable)?;
        let mut client = Self {
            transport,
            open: true,
            config,
            url: None,
            headers: HeaderSet::new(),
            options: RequestOptions::new(),
            append_query: true,
            decoder: None,
            decoder_args: Vec::new(),
            decoder_map: DecoderMap::default(),
            phase: Phase::Configuring,
            outcome: Outcome::default(),
        };
        client.apply_defaults();
        Ok(client)
    }

    fn apply_defaults(&mut self) {
        let defaults = [
            RequestOption::UserAgent(self.config.user_agent.clone()),
            RequestOption::Timeout(self.config.timeout),
            RequestOption::FollowLocation(self.config.follow_redirects),
            RequestOption::Header(true),
            RequestOption::NoBody(false),
            RequestOption::HeaderOut(true),
        ];
        self.opts(defaults);
        if !self.headers.is_empty() {
            self.opt(RequestOption::HttpHeader(self.headers.to_lines()));
        }
    }

    fn ensure_open(&mut self) -> Result<(), ClientError> {
        if self.open {
            return Ok(());
        }
        self.transport.init().map_err(ClientError::TransportUnavailable)?;
        self.open = true;
        self.phase = Phase::Configuring;
        self.apply_defaults();
        Ok(())
    }

    /// Close the handle and drop per-request state.
    fn release(&mut self) {
        if self.open {
            self.transport.close();
            self.open = false;
        }
        self.options.clear();
        self.decoder = None;
        self.decoder_args.clear();
    }

    // ---------------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------------

    pub fn url(&mut self, url: impl Into<String>) -> &mut Self {
        self.url = Some(url.into());
        self
    }

    /// Apply one transport option, recording it only if the transport
    /// accepts it.
    pub fn opt(&mut self, option: RequestOption) -> &mut Self {
        if let Err(e) = self.ensure_open() {
            tracing::warn!(error = %e, key = ?option.key(), "cannot apply option");
            return self;
        }
        match self.transport.apply(&option) {
            Ok(()) => {
                tracing::trace!(key = ?option.key(), "option applied");
                self.options.insert(option);
            }
            Err(e) => tracing::warn!(error = %e, "option rejected"),
        }
        self
    }

    pub fn opts(&mut self, options: impl IntoIterator<Item = RequestOption>) -> &mut Self {
        for option in options {
            self.opt(option);
        }
        self
    }

    pub fn get_opt(&self, key: OptionKey) -> Option<&RequestOption> {
        self.options.get(key)
    }

    pub fn get_opts(&self) -> &RequestOptions {
        &self.options
    }

    /// Set the user agent for this and every later call.
    pub fn user_agent(&mut self, agent: impl Into<String>) -> &mut Self {
        self.config.user_agent = agent.into();
        self.opt(RequestOption::UserAgent(self.config.user_agent.clone()))
    }

    /// Set the request timeout for this and every later call.
    pub fn timeout(&mut self, timeout: std::time::Duration) -> &mut Self {
        self.config.timeout = timeout;
        self.opt(RequestOption::Timeout(timeout))
    }

    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.set(name, value);
        self.opt(RequestOption::HttpHeader(self.headers.to_lines()))
    }

    pub fn headers<I, K, V>(&mut self, headers: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers.merge(headers);
        self.opt(RequestOption::HttpHeader(self.headers.to_lines()))
    }

    /// Blank a header. The empty value is still sent.
    pub fn remove_header(&mut self, name: &str) -> &mut Self {
        self.header(name, "")
    }

    /// Send `Content-Type: application/json`, which makes bodies JSON text.
    pub fn json(&mut self) -> &mut Self {
        self.header("Content-Type", "application/json")
    }

    pub fn header_set(&self) -> &HeaderSet {
        &self.headers
    }

    /// Retries after a failed first attempt.
    pub fn retry(&mut self, count: u32) -> &mut Self {
        self.config.retry_count = count;
        self
    }

    pub fn retry_delay(&mut self, delay: std::time::Duration) -> &mut Self {
        self.config.retry_delay = delay;
        self
    }

    /// Whether query data is appended to (default) or replaces an existing
    /// query string.
    pub fn append_query(&mut self, append: bool) -> &mut Self {
        self.append_query = append;
        self
    }

    /// Decode every body with `decoder`, bypassing content-type dispatch.
    pub fn decoder(&mut self, decoder: impl Decoder + 'static) -> &mut Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// Bind `decoder` to content types matching `pattern`.
    pub fn map(&mut self, pattern: &str, decoder: impl Decoder + 'static) -> Result<&mut Self, ClientError> {
        self.decoder_map
            .insert(pattern, Arc::new(decoder))
            .map_err(|source| ClientError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        Ok(self)
    }

    pub fn decoder_map(&self) -> &DecoderMap {
        &self.decoder_map
    }

    /// Extra decoder arguments. Appended when `merge` is set, otherwise
    /// they replace the current list. An empty list changes nothing.
    pub fn decoder_args(&mut self, args: Vec<Value>, merge: bool) -> &mut Self {
        if args.is_empty() {
            return self;
        }
        if merge {
            self.decoder_args.extend(args);
        } else {
            self.decoder_args = args;
        }
        self
    }

    // ---------------------------------------------------------------------
    // Observation
    // ---------------------------------------------------------------------

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn response(&self) -> Option<&Decoded> {
        self.outcome.response.as_ref()
    }

    pub fn is_error(&self) -> bool {
        self.outcome.error
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Transport metadata from the most recent perform. Zero once the
    /// handle has been released.
    pub fn info(&self, key: InfoKey) -> u64 {
        self.transport.info(key)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // ---------------------------------------------------------------------
    // Verbs
    // ---------------------------------------------------------------------

    pub fn get(&mut self, query: Value) -> &Outcome {
        let builder = self.builder(HttpMethod::Get).query(query);
        self.execute(builder)
    }

    pub fn post(&mut self, data: impl Into<Payload>) -> &Outcome {
        let builder = self.builder(HttpMethod::Post).payload(data.into());
        self.execute(builder)
    }

    pub fn put(&mut self, data: impl Into<Payload>) -> &Outcome {
        let builder = self.builder(HttpMethod::Put).payload(data.into());
        self.execute(builder)
    }

    pub fn patch(&mut self, data: impl Into<Payload>) -> &Outcome {
        let builder = self.builder(HttpMethod::Patch).payload(data.into());
        self.execute(builder)
    }

    pub fn delete(&mut self, data: impl Into<Payload>, query: Value) -> &Outcome {
        let builder = self
            .builder(HttpMethod::Delete)
            .payload(data.into())
            .query(query);
        self.execute(builder)
    }

    pub fn head(&mut self, query: Value) -> &Outcome {
        let builder = self.builder(HttpMethod::Head).query(query);
        self.execute(builder)
    }

    pub fn options(&mut self, query: Value) -> &Outcome {
        let builder = self.builder(HttpMethod::Options).query(query);
        self.execute(builder)
    }

    fn builder(&self, method: HttpMethod) -> RequestBuilder {
        RequestBuilder::new(method, self.url.clone().unwrap_or_default())
            .headers(self.headers.clone())
            .append_query(self.append_query)
    }

    // ---------------------------------------------------------------------
    // Execution
    // ---------------------------------------------------------------------

    fn execute(&mut self, builder: RequestBuilder) -> &Outcome {
        if let Err(e) = self.ensure_open() {
            tracing::warn!(error = %e, "transport could not be reopened");
            self.outcome = Outcome::transport_failed(TransportFailure::new(CURLE_FAILED_INIT, e.to_string()));
            self.outcome.attempts = 0;
            self.phase = Phase::Failed;
            self.release();
            return &self.outcome;
        }

        self.phase = Phase::Executing;
        let prepared = builder.build(&self.options);
        self.opts(prepared.options);
        if !prepared.url.is_empty() {
            self.opt(RequestOption::Url(prepared.url.clone()));
        }

        let mut budget = self.config.retry_count;
        let mut attempts = 0;
        loop {
            attempts += 1;
            tracing::debug!(method = %prepared.method, url = %prepared.url, attempt = attempts, "performing request");
            self.outcome = self.attempt();
            if !self.outcome.error || budget == 0 {
                break;
            }
            budget -= 1;
            tracing::warn!(
                code = self.outcome.error_code,
                message = self.outcome.error_message.as_deref().unwrap_or(""),
                retries_left = budget,
                "attempt failed, retrying"
            );
            if !self.config.retry_delay.is_zero() {
                std::thread::sleep(self.config.retry_delay);
            }
        }

        self.outcome.attempts = attempts;
        self.phase = if self.outcome.error {
            Phase::Failed
        } else {
            Phase::Succeeded
        };
        tracing::debug!(
            method = %prepared.method,
            attempts,
            error = self.outcome.error,
            code = self.outcome.error_code,
            "request finished"
        );
        self.release();
        &self.outcome
    }

    fn capture(&mut self) -> TransportResult {
        match self.transport.perform() {
            Ok(raw) => TransportResult {
                raw: Some(raw),
                failure: None,
                header_size: usize::try_from(self.transport.info(InfoKey::HeaderSize)).unwrap_or(usize::MAX),
                status_code: u16::try_from(self.transport.info(InfoKey::ResponseCode)).unwrap_or_default(),
            },
            Err(failure) => TransportResult {
                raw: None,
                failure: Some(failure),
                header_size: 0,
                status_code: 0,
            },
        }
    }

    /// One perform, classify, split, decode and aggregate cycle.
    fn attempt(&mut self) -> Outcome {
        let result = self.capture();
        let mut outcome = match result.failure {
            Some(failure) => return Outcome::transport_failed(failure),
            None => Outcome {
                http_status_code: Some(result.status_code),
                http_error: matches!(result.status_code / 100, 4 | 5),
                ..Outcome::default()
            },
        };

        if let Some(raw) = result.raw {
            let (head, body) = if self.options.flag(OptionKey::Header) {
                response::split(&raw, result.header_size)
            } else {
                (&[][..], &raw[..])
            };
            if self.options.flag(OptionKey::Header) {
                outcome.raw_response_headers = Some(head.to_vec());
                if let Some((status_line, headers)) = response::parse_headers(head) {
                    outcome.http_status = Some(status_line);
                    outcome.response_headers = Some(headers);
                }
            }
            outcome.response = Some(self.decode(body, outcome.response_headers.as_ref()));
            outcome.raw_body = Some(body.to_vec());
            outcome.raw_response = Some(raw);
        }

        outcome.aggregate();
        outcome
    }

    fn decode(&self, body: &[u8], headers: Option<&ResponseHeaders>) -> Decoded {
        if body.is_empty() {
            return Decoded::Raw(Vec::new());
        }
        if let Some(decoder) = &self.decoder {
            tracing::debug!(decoder = decoder.name(), "decoding with explicit decoder");
            return decoder.decode(body, &self.decoder_args);
        }
        let content_type = headers
            .and_then(|h| h.first("content-type"))
            .unwrap_or_default();
        match self.decoder_map.find(content_type) {
            Some(decoder) => {
                tracing::debug!(decoder = decoder.name(), content_type, "decoding by content type");
                decoder.decode(body, &self.decoder_args)
            }
            None => Decoded::Raw(body.to_vec()),
        }
    }
}

impl<T: Transport> Drop for Client<T> {
    fn drop(&mut self) {
        if self.open {
            self.transport.close();
            self.open = false;
        }
    }
}

impl<T: Transport> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("options", &self.options)
            .field("decoder_map", &self.decoder_map)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}
