//! The transport collaborator: the engine that performs network I/O.
//!
//! # Design
//! The client never touches sockets. It applies options one at a time to a
//! `Transport`, calls `perform`, and reads the status code and header block
//! size back through `info`. `perform` returns the raw bytes with the
//! response header block in front of the body, the way libcurl does with
//! its include-header option, so the client can slice the blob itself.
//!
//! `UreqTransport` (feature `ureq-transport`) is a ready-made engine; hosts
//! embedding the client through the C ABI plug in their own.

use crate::error::{TransportError, TransportFailure};
use crate::http::{InfoKey, RequestOption};

/// A handle to an HTTP engine, owned by exactly one client.
pub trait Transport {
    /// Acquire the engine. Called when the client is created and again
    /// before a request on a released handle.
    fn init(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Apply one option. A rejected option leaves the handle unchanged.
    fn apply(&mut self, option: &RequestOption) -> Result<(), TransportError>;

    /// Run the request described by the applied options.
    fn perform(&mut self) -> Result<Vec<u8>, TransportFailure>;

    /// Metadata about the last `perform`.
    fn info(&self, key: InfoKey) -> u64;

    /// Release the engine.
    fn close(&mut self) {}
}

#[cfg(feature = "ureq-transport")]
pub use self::ureq_engine::UreqTransport;

#[cfg(feature = "ureq-transport")]
mod ureq_engine {
    use super::Transport;
    use crate::error::{TransportError, TransportFailure};
    use crate::http::{FormPart, InfoKey, OptionKey, RequestBody, RequestOption, RequestOptions};

    const CURLE_URL_MALFORMAT: i32 = 3;
    const CURLE_COULDNT_RESOLVE_HOST: i32 = 6;
    const CURLE_COULDNT_CONNECT: i32 = 7;
    const CURLE_OPERATION_TIMEDOUT: i32 = 28;
    const CURLE_READ_ERROR: i32 = 26;
    const CURLE_RECV_ERROR: i32 = 56;
    const CURLE_GENERIC: i32 = 1;

    const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

    /// Blocking transport built on `ureq`.
    ///
    /// A fresh agent is configured from the applied options on every
    /// `perform`. Upload from a file handle (`InFile`) is not supported and
    /// is rejected at `apply` time.
    #[derive(Debug, Default)]
    pub struct UreqTransport {
        options: RequestOptions,
        status: u16,
        header_size: usize,
    }

    impl UreqTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Body bytes and their default content type.
        fn body(&self) -> Result<Option<(String, Vec<u8>)>, TransportFailure> {
            match self.options.post_fields() {
                None => Ok(None),
                Some(body) if body.is_empty() => Ok(None),
                Some(RequestBody::Text(text)) => Ok(Some((FORM_URLENCODED.to_string(), text.clone().into_bytes()))),
                Some(RequestBody::Multipart(parts)) => encode_multipart(parts).map(Some),
            }
        }

        fn has_content_type(&self) -> bool {
            self.options.header_lines().iter().any(|line| {
                line.split_once(':').is_some_and(|(name, value)| {
                    name.trim().eq_ignore_ascii_case("content-type") && !value.trim().is_empty()
                })
            })
        }
    }

    impl Transport for UreqTransport {
        fn init(&mut self) -> Result<(), TransportError> {
            self.status = 0;
            self.header_size = 0;
            Ok(())
        }

        fn apply(&mut self, option: &RequestOption) -> Result<(), TransportError> {
            if let RequestOption::InFile(_) = option {
                return Err(TransportError::UnsupportedOption(option.key()));
            }
            self.options.insert(option.clone());
            Ok(())
        }

        fn perform(&mut self) -> Result<Vec<u8>, TransportFailure> {
            self.status = 0;
            self.header_size = 0;

            let url = self
                .options
                .url()
                .ok_or_else(|| TransportFailure::new(CURLE_URL_MALFORMAT, "no URL set"))?
                .to_string();

            let mut config = ureq::Agent::config_builder().http_status_as_error(false);
            if let Some(timeout) = self.options.timeout() {
                config = config.timeout_global(Some(timeout));
            }
            if !self.options.flag(OptionKey::FollowLocation) {
                config = config.max_redirects(0);
            }
            let agent = config.build().new_agent();

            let mut builder = ureq::http::Request::builder().method(self.options.method()).uri(url.as_str());
            if let Some(agent_name) = self.options.user_agent() {
                builder = builder.header("User-Agent", agent_name);
            }
            let body = self.body()?;
            if let Some((content_type, _)) = &body {
                if !self.has_content_type() {
                    builder = builder.header("Content-Type", content_type.as_str());
                }
            }
            // an empty value removes the header, as with libcurl
            for line in self.options.header_lines() {
                match line.split_once(':') {
                    Some((name, value)) if !value.trim().is_empty() => {
                        builder = builder.header(name.trim(), value.trim());
                    }
                    _ => {}
                }
            }

            let request_error = |e: ureq::http::Error| TransportFailure::new(CURLE_URL_MALFORMAT, e.to_string());
            let result = match body {
                Some((_, bytes)) => agent.run(builder.body(bytes).map_err(request_error)?),
                None => agent.run(builder.body(()).map_err(request_error)?),
            };
            let mut response = result.map_err(failure_from)?;

            let status = response.status();
            let status_line = format!(
                "{:?} {} {}",
                response.version(),
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            );
            let mut raw = status_line.trim_end().as_bytes().to_vec();
            raw.extend_from_slice(b"\r\n");
            for (name, value) in response.headers() {
                raw.extend_from_slice(name.as_str().as_bytes());
                raw.extend_from_slice(b": ");
                raw.extend_from_slice(value.as_bytes());
                raw.extend_from_slice(b"\r\n");
            }
            raw.extend_from_slice(b"\r\n");
            let header_size = raw.len();

            if !self.options.flag(OptionKey::NoBody) {
                let body = response.body_mut().read_to_vec().map_err(failure_from)?;
                raw.extend_from_slice(&body);
            }

            self.status = status.as_u16();
            self.header_size = header_size;
            tracing::trace!(status = self.status, header_size, bytes = raw.len(), "ureq perform done");
            Ok(raw)
        }

        fn info(&self, key: InfoKey) -> u64 {
            match key {
                InfoKey::ResponseCode => u64::from(self.status),
                InfoKey::HeaderSize => self.header_size as u64,
            }
        }

        fn close(&mut self) {
            self.options.clear();
            self.status = 0;
            self.header_size = 0;
        }
    }

    fn failure_from(err: ureq::Error) -> TransportFailure {
        let code = match &err {
            ureq::Error::BadUri(_) => CURLE_URL_MALFORMAT,
            ureq::Error::HostNotFound => CURLE_COULDNT_RESOLVE_HOST,
            ureq::Error::ConnectionFailed => CURLE_COULDNT_CONNECT,
            ureq::Error::Timeout(_) => CURLE_OPERATION_TIMEDOUT,
            ureq::Error::Io(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => CURLE_COULDNT_CONNECT,
            ureq::Error::Io(_) => CURLE_RECV_ERROR,
            _ => CURLE_GENERIC,
        };
        TransportFailure::new(code, err.to_string())
    }

    fn gen_boundary() -> String {
        let (a, b) = (rand::random::<u64>(), rand::random::<u64>());
        format!("------------------------{a:016x}{b:016x}")
    }

    /// Encode parts as `multipart/form-data`, reading file parts from disk.
    fn encode_multipart(parts: &[(String, FormPart)]) -> Result<(String, Vec<u8>), TransportFailure> {
        let boundary = gen_boundary();

        let mut out = Vec::new();
        for (name, part) in parts {
            out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            match part {
                FormPart::Text(text) => {
                    out.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                    );
                    out.extend_from_slice(text.as_bytes());
                }
                FormPart::File(path) => {
                    let contents = std::fs::read(path).map_err(|e| {
                        TransportFailure::new(CURLE_READ_ERROR, format!("{}: {e}", path.display()))
                    })?;
                    let filename = path
                        .file_name()
                        .map(|f| f.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    out.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    out.extend_from_slice(&contents);
                }
            }
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        Ok((format!("multipart/form-data; boundary={boundary}"), out))
    }

}
