use crate::error::{ServerError, ServerResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Write};
use std::str::{self, FromStr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Value of the `Server` header sent with every response
pub const SERVER_NAME: &str = concat!("cascade-server/", env!("CARGO_PKG_VERSION"));

/// Get the reason phrase for a status code
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",

        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",

        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",

        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        410 => "Gone",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",

        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// HTTP Methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Trace,
    Connect,
    Patch,
}

impl Method {
    /// Convert the method to a string
    pub fn as_str(&self) -> &'static str {
        match *self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
            Method::Patch => "PATCH",
        }
    }
}

impl FromStr for Method {
    type Err = ServerError;

    fn from_str(s: &str) -> ServerResult<Self> {
        match s {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            "TRACE" => Ok(Method::Trace),
            "CONNECT" => Ok(Method::Connect),
            "PATCH" => Ok(Method::Patch),
            _ => Err(ServerError::HttpParse(format!("Invalid method: {}", s))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed request line plus headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: String,
    /// Header names are lowercased
    pub headers: HashMap<String, String>,
}

impl RequestHead {
    /// Declared body length, zero when absent or unparsable
    pub fn content_length(&self) -> u64 {
        self.headers
            .get("content-length")
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Request head parser
#[derive(Debug, Clone)]
pub struct HttpParser {
    max_header_size: usize,
}

impl HttpParser {
    /// Create a parser that rejects heads larger than `max_header_size`
    pub fn new(max_header_size: usize) -> Self {
        Self { max_header_size }
    }

    /// Find the end of the head; returns the offset of the first body byte
    pub fn head_len(&self, data: &[u8]) -> ServerResult<Option<usize>> {
        match data.windows(4).position(|window| window == b"\r\n\r\n") {
            Some(pos) if pos + 4 <= self.max_header_size => Ok(Some(pos + 4)),
            Some(_) => Err(ServerError::HttpParse("Request head too large".to_string())),
            None if data.len() > self.max_header_size => {
                Err(ServerError::HttpParse("Request head too large".to_string()))
            }
            None => Ok(None),
        }
    }

    /// Parse a complete head (everything before the blank line)
    pub fn parse_head(&self, data: &[u8]) -> ServerResult<RequestHead> {
        let text = str::from_utf8(data)
            .map_err(|_| ServerError::HttpParse("Invalid UTF-8".to_string()))?;
        let mut lines = text.split("\r\n");

        let request_line = lines
            .next()
            .ok_or_else(|| ServerError::HttpParse("Missing request line".to_string()))?;
        let (method, target, version) = Self::parse_request_line(request_line)?;

        let mut headers = HashMap::new();
        for line in lines.filter(|line| !line.is_empty()) {
            let (key, value) = Self::parse_header(line)?;
            headers.insert(key, value);
        }

        Ok(RequestHead {
            method,
            target,
            version,
            headers,
        })
    }

    fn parse_request_line(line: &str) -> ServerResult<(Method, String, String)> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(ServerError::HttpParse("Invalid request line".to_string()));
        }
        if !parts[2].starts_with("HTTP/") {
            return Err(ServerError::HttpParse(format!("Invalid version: {}", parts[2])));
        }

        Ok((parts[0].parse()?, parts[1].to_string(), parts[2].to_string()))
    }

    fn parse_header(line: &str) -> ServerResult<(String, String)> {
        match line.find(':') {
            Some(colon_idx) => {
                let key = line[..colon_idx].trim().to_lowercase();
                let value = line[colon_idx + 1..].trim().to_string();
                Ok((key, value))
            }
            None => Err(ServerError::HttpParse("Invalid header".to_string())),
        }
    }
}

/// Whether a response with `status` may declare a body length
fn has_content_length(status: u16) -> bool {
    !matches!(status, 100..=199 | 204 | 304)
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

/// Check a header name and value before it can reach the wire
pub fn validate_header(name: &str, value: &str) -> ServerResult<()> {
    if name.is_empty() || !name.chars().all(is_token_char) {
        return Err(ServerError::InvalidHeader(format!("name {:?}", name)));
    }
    if value.chars().any(|c| c != '\t' && c.is_control()) {
        return Err(ServerError::InvalidHeader(format!("value of {}", name)));
    }
    Ok(())
}

/// Byte stream of a request body
pub type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

/// Byte sink of a response
pub type ResponseSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Raw HTTP request as handed over by the transport
pub struct RawRequest {
    pub method: Method,
    pub target: String,
    pub version: String,
    /// Header names are lowercased
    pub headers: HashMap<String, String>,
    body: BodyReader,
}

impl fmt::Debug for RawRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawRequest")
            .field("method", &self.method)
            .field("target", &self.target)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("body", &"<stream>")
            .finish()
    }
}

impl RawRequest {
    /// Create a request with no headers and an empty body
    pub fn new(method: Method, target: &str) -> Self {
        Self {
            method,
            target: target.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: HashMap::new(),
            body: Box::new(tokio::io::empty()),
        }
    }

    /// Create a request from a parsed head and the stream its body is read from
    pub fn from_head(head: RequestHead, body: BodyReader) -> Self {
        Self {
            method: head.method,
            target: head.target,
            version: head.version,
            headers: head.headers,
            body,
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Replace the body with in-memory content
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        self.set_header("Content-Length", &body.len().to_string());
        self.body = Box::new(Cursor::new(body));
        self
    }

    /// Set a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_lowercase(), value.to_string());
    }

    /// Get a header
    pub fn get_header(&self, name: &str) -> Option<&String> {
        self.headers.get(&name.to_lowercase())
    }

    /// The body stream, limited to the declared length
    pub fn body_mut(&mut self) -> &mut BodyReader {
        &mut self.body
    }

    /// Read the whole body into memory
    pub async fn read_body(&mut self) -> ServerResult<Vec<u8>> {
        let mut body = Vec::new();
        self.body.read_to_end(&mut body).await?;
        Ok(body)
    }

    /// Read and drop up to `limit` unread body bytes; returns how many were read
    pub async fn drain_body(&mut self, limit: u64) -> ServerResult<u64> {
        let mut remaining = (&mut self.body).take(limit);
        Ok(tokio::io::copy(&mut remaining, &mut tokio::io::sink()).await?)
    }
}

/// Raw HTTP response bound to the transport sink
pub struct RawResponse {
    status: u16,
    headers: Vec<(String, String)>,
    sink: ResponseSink,
    headers_sent: bool,
    ended: bool,
    discard_body: bool,
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("headers_sent", &self.headers_sent)
            .field("ended", &self.ended)
            .finish()
    }
}

impl RawResponse {
    /// Create a response writing into the given sink
    pub fn new<W>(sink: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            status: 200,
            headers: vec![
                ("Server".to_string(), SERVER_NAME.to_string()),
                ("Connection".to_string(), "close".to_string()),
            ],
            sink: Box::new(sink),
            headers_sent: false,
            ended: false,
            discard_body: false,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Set the status code; ignored once the head has been sent
    pub fn set_status(&mut self, code: u16) {
        if !self.headers_sent {
            self.status = code;
        }
    }

    /// Set a header, replacing any value stored under the same name.
    ///
    /// Fails once the head has been sent, and for names that are not tokens
    /// or values containing control characters other than tab.
    pub fn set_header(&mut self, name: &str, value: &str) -> ServerResult<()> {
        if self.headers_sent {
            return Err(ServerError::HeadersSent);
        }
        validate_header(name, value)?;
        self.put_header(name, value);
        Ok(())
    }

    /// Store a header the server itself produces; no validation
    pub(crate) fn put_header(&mut self, name: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    /// Get a header (case-insensitive)
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Whether `end` has been called
    pub fn writable_ended(&self) -> bool {
        self.ended
    }

    /// Send the head only (used for HEAD requests)
    pub(crate) fn set_discard_body(&mut self, discard: bool) {
        self.discard_body = discard;
    }

    /// Serialize the status line and headers
    pub fn serialize_head(&self, writer: &mut Vec<u8>) -> ServerResult<()> {
        write!(writer, "HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status))?;

        for (name, value) in &self.headers {
            write!(writer, "{}: {}\r\n", name, value)?;
        }

        write!(writer, "\r\n")?;
        Ok(())
    }

    async fn send_head(&mut self) -> ServerResult<()> {
        let mut head = Vec::with_capacity(256);
        self.serialize_head(&mut head)?;
        self.headers_sent = true;
        self.sink.write_all(&head).await?;
        Ok(())
    }

    /// Write a chunk of the body, sending the head first if needed
    pub async fn write(&mut self, chunk: &[u8]) -> ServerResult<()> {
        if self.ended {
            return Err(ServerError::AlreadyEnded("the response has ended"));
        }
        if !self.headers_sent {
            self.send_head().await?;
        }
        if !self.discard_body && !chunk.is_empty() {
            self.sink.write_all(chunk).await?;
        }
        Ok(())
    }

    /// Finish the response with an optional last chunk and close the sink.
    /// When nothing has been written yet the body length is declared up front.
    pub async fn end(&mut self, chunk: Option<&[u8]>) -> ServerResult<()> {
        if self.ended {
            return Err(ServerError::AlreadyEnded("the response has ended"));
        }
        self.ended = true;

        let chunk = chunk.unwrap_or_default();
        if !self.headers_sent {
            if self.get_header("Content-Length").is_none() {
                if has_content_length(self.status) {
                    self.put_header("Content-Length", &chunk.len().to_string());
                }
            }
            self.send_head().await?;
        }
        if !self.discard_body && !chunk.is_empty() {
            self.sink.write_all(chunk).await?;
        }

        self.sink.flush().await?;
        self.sink.shutdown().await?;
        Ok(())
    }
}
