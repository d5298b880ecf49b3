//! HTTP transport seam.
//!
//! The client only needs a blocking `GET`. [`Transport`] abstracts it so the
//! decoders can be driven by reqwest in production and by scripted
//! responses in tests. Redirects, sessions and retries are the transport's
//! business.

use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use flate2::read::GzDecoder;
use tracing::{info, warn};

use dap_common::{DapError, DapResult, TransportError};

use crate::config::ClientConfig;

/// Size of the blocks read from a streaming HTTP body.
const READ_BLOCK_SIZE: usize = 8192;

/// Per-request options threaded down to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    pub timeout: Duration,
    pub verify: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::config::DEFAULT_TIMEOUT_SECS),
            verify: true,
        }
    }
}

/// Incrementally delivered body chunks.
pub type ChunkStream = Box<dyn Iterator<Item = Result<Bytes, TransportError>> + Send>;

/// Response body, either fully buffered or streamed.
pub enum Body {
    Buffered(Bytes),
    Stream(ChunkStream),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Buffered(b) => write!(f, "Buffered({} bytes)", b.len()),
            Body::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// A response as seen by the client.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub content_encoding: Option<String>,
    pub charset: Option<String>,
    pub body: Body,
}

impl Response {
    /// A buffered response.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            content_encoding: None,
            charset: None,
            body: Body::Buffered(body.into()),
        }
    }

    /// A streamed response.
    pub fn streaming(status: u16, chunks: ChunkStream) -> Self {
        Self {
            status,
            headers: Vec::new(),
            content_encoding: None,
            charset: None,
            body: Body::Stream(chunks),
        }
    }

    /// Add a header, picking up the content encoding and charset.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        if name.eq_ignore_ascii_case("content-encoding") {
            self.content_encoding = Some(value.trim().to_lowercase());
        } else if name.eq_ignore_ascii_case("content-type") {
            self.charset = charset_from_content_type(&value);
        }
        self.headers.push((name, value));
        self
    }

    /// First header with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn is_gzip(&self) -> bool {
        self.content_encoding.as_deref() == Some("gzip")
    }

    /// Fail on 3xx, 4xx and 5xx statuses, attaching the body text.
    pub fn raise_for_status(self) -> Result<Response, TransportError> {
        let status = self.status;
        if status < 300 {
            return Ok(self);
        }
        let body = self.text("utf-8").unwrap_or_default();
        Err(if status >= 500 {
            TransportError::Server { status, body }
        } else if status >= 400 {
            TransportError::Client { status, body }
        } else {
            TransportError::Redirect { status, body }
        })
    }

    /// The whole body, gunzipped when the response is gzip-encoded.
    pub fn bytes(self) -> DapResult<Bytes> {
        let gzip = self.is_gzip();
        let raw = match self.body {
            Body::Buffered(bytes) => bytes,
            Body::Stream(chunks) => {
                let mut buf = BytesMut::new();
                for chunk in chunks {
                    buf.extend_from_slice(&chunk?);
                }
                buf.freeze()
            }
        };
        if gzip {
            gunzip(&raw)
        } else {
            Ok(raw)
        }
    }

    /// The body decoded as text with the response charset, or `user_charset`
    /// when the response declares none.
    pub fn text(self, user_charset: &str) -> DapResult<String> {
        let charset = self
            .charset
            .clone()
            .unwrap_or_else(|| user_charset.to_string());
        let bytes = self.bytes()?;
        Ok(decode_text(&bytes, &charset))
    }

    /// The body as a stream of chunks. Gzip bodies are decoded up front.
    pub fn chunks(self) -> DapResult<Box<dyn Iterator<Item = DapResult<Bytes>> + Send>> {
        if self.is_gzip() {
            let bytes = self.bytes()?;
            return Ok(Box::new(std::iter::once(Ok(bytes))));
        }
        match self.body {
            Body::Buffered(bytes) => Ok(Box::new(std::iter::once(Ok(bytes)))),
            Body::Stream(chunks) => Ok(Box::new(chunks.map(|c| c.map_err(DapError::from)))),
        }
    }
}

fn gunzip(raw: &[u8]) -> DapResult<Bytes> {
    let mut out = Vec::new();
    GzDecoder::new(raw).read_to_end(&mut out)?;
    Ok(Bytes::from(out))
}

/// Extract the `charset` parameter of a Content-Type header.
pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_lowercase())
        } else {
            None
        }
    })
}

/// Decode text in one of the charsets DAP servers use.
pub fn decode_text(bytes: &[u8], charset: &str) -> String {
    match charset.to_lowercase().as_str() {
        "ascii" | "us-ascii" | "utf-8" | "utf8" => String::from_utf8_lossy(bytes).into_owned(),
        "latin-1" | "latin1" | "iso-8859-1" => bytes.iter().map(|&b| b as char).collect(),
        other => {
            warn!(charset = %other, "Unsupported charset, decoding as UTF-8");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Blocking HTTP GET.
pub trait Transport: Send + Sync + fmt::Debug {
    fn get(&self, url: &str, options: &RequestOptions) -> Result<Response, TransportError>;
}

/// Transport handle plus the options every request of a dataset shares.
#[derive(Debug, Clone)]
pub struct Connection {
    pub transport: Arc<dyn Transport>,
    pub options: RequestOptions,
    pub user_charset: String,
    pub verify_checksums: bool,
}

impl Connection {
    pub fn new(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        Self {
            transport,
            options: RequestOptions {
                timeout: config.timeout(),
                verify: config.verify_tls,
            },
            user_charset: config.user_charset.clone(),
            verify_checksums: config.verify_checksums,
        }
    }

    /// GET `url` and fail on non-success statuses.
    pub fn get(&self, url: &str) -> DapResult<Response> {
        info!(url = %url, "Fetching URL");
        let response = self.transport.get(url, &self.options)?;
        Ok(response.raise_for_status()?)
    }

    pub fn get_text(&self, url: &str) -> DapResult<String> {
        self.get(url)?.text(&self.user_charset)
    }

    pub fn get_bytes(&self, url: &str) -> DapResult<Bytes> {
        self.get(url)?.bytes()
    }
}

// ============================================================================
// reqwest transport
// ============================================================================

/// Transport backed by `reqwest::blocking`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    verified: reqwest::blocking::Client,
    unverified: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> DapResult<Self> {
        let build = |accept_invalid: bool| {
            reqwest::blocking::Client::builder()
                .user_agent(user_agent)
                .danger_accept_invalid_certs(accept_invalid)
                .build()
                .map_err(|e| DapError::Transport(TransportError::Request(e.to_string())))
        };
        Ok(Self {
            verified: build(false)?,
            unverified: build(true)?,
        })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, options: &RequestOptions) -> Result<Response, TransportError> {
        let client = if options.verify {
            &self.verified
        } else {
            &self.unverified
        };
        let resp = client
            .get(url)
            .timeout(options.timeout)
            .send()
            .map_err(map_reqwest_error)?;

        let status = resp.status().as_u16();
        let headers: Vec<(String, String)> = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let mut response = Response::streaming(status, Box::new(ReadChunks::new(resp)));
        for (name, value) in headers {
            response = response.with_header(name, value);
        }
        Ok(response)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}

/// Adapts a blocking reader into a chunk iterator.
struct ReadChunks<R> {
    reader: R,
    done: bool,
}

impl<R> ReadChunks<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }
}

impl<R: Read> Iterator for ReadChunks<R> {
    type Item = Result<Bytes, TransportError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; READ_BLOCK_SIZE];
        match self.reader.read(&mut buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(n) => {
                buf.truncate(n);
                Some(Ok(Bytes::from(buf)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(TransportError::Request(e.to_string())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_raise_for_status_taxonomy() {
        let err = Response::new(404, "missing").raise_for_status().unwrap_err();
        assert!(matches!(err, TransportError::Client { status: 404, .. }));

        let err = Response::new(503, "down").raise_for_status().unwrap_err();
        assert!(matches!(err, TransportError::Server { status: 503, .. }));

        let err = Response::new(302, "").raise_for_status().unwrap_err();
        assert!(matches!(err, TransportError::Redirect { status: 302, .. }));
        assert!(err.to_string().contains("circular redirect"));

        assert!(Response::new(200, "ok").raise_for_status().is_ok());
    }

    #[test]
    fn test_gzip_body_is_decoded() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"Dataset {\n} x;\n").unwrap();
        let gz = enc.finish().unwrap();

        let resp = Response::new(200, gz).with_header("Content-Encoding", "gzip");
        assert_eq!(resp.text("ascii").unwrap(), "Dataset {\n} x;\n");
    }

    #[test]
    fn test_charset_from_content_type() {
        assert_eq!(
            charset_from_content_type("text/plain; charset=ISO-8859-1"),
            Some("iso-8859-1".to_string())
        );
        assert_eq!(charset_from_content_type("text/plain"), None);
    }

    #[test]
    fn test_text_uses_response_charset() {
        let resp = Response::new(200, vec![0xE9u8])
            .with_header("Content-Type", "text/plain; charset=latin1");
        assert_eq!(resp.text("ascii").unwrap(), "\u{e9}");
    }

    #[test]
    fn test_stream_body_collects() {
        let chunks: Vec<Result<Bytes, TransportError>> =
            vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))];
        let resp = Response::streaming(200, Box::new(chunks.into_iter()));
        assert_eq!(&resp.bytes().unwrap()[..], b"abcd");
    }
}
