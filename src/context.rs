use crate::config::CompressionOptions;
use crate::error::{ServerError, ServerResult};
use crate::http::{Method, RawRequest, RawResponse};
use crate::mime;
use crate::output::{self, Output};
use crate::store::Store;
use log::debug;
use std::collections::HashMap;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Chunk size used when streaming files
const FILE_CHUNK_SIZE: usize = 16 * 1024;

/// A decoded query parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Single(String),
    /// Values of a repeated key, in occurrence order
    Multi(Vec<String>),
}

impl QueryValue {
    /// The single value, or the first one of a repeated key
    pub fn first(&self) -> &str {
        match self {
            QueryValue::Single(value) => value,
            QueryValue::Multi(values) => values.first().map(String::as_str).unwrap_or_default(),
        }
    }

    /// All values in occurrence order
    pub fn values(&self) -> Vec<&str> {
        match self {
            QueryValue::Single(value) => vec![value.as_str()],
            QueryValue::Multi(values) => values.iter().map(String::as_str).collect(),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            QueryValue::Single(existing) => {
                let first = std::mem::take(existing);
                *self = QueryValue::Multi(vec![first, value]);
            }
            QueryValue::Multi(values) => values.push(value),
        }
    }
}

impl PartialEq<&str> for QueryValue {
    fn eq(&self, other: &&str) -> bool {
        matches!(self, QueryValue::Single(value) if value == other)
    }
}

impl PartialEq<[&str]> for QueryValue {
    fn eq(&self, other: &[&str]) -> bool {
        matches!(self, QueryValue::Multi(values) if values.iter().map(String::as_str).eq(other.iter().copied()))
    }
}

impl<const N: usize> PartialEq<[&str; N]> for QueryValue {
    fn eq(&self, other: &[&str; N]) -> bool {
        self == &other[..]
    }
}

/// Parsed query string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Queries {
    entries: HashMap<String, QueryValue>,
}

impl Queries {
    /// Parse an `application/x-www-form-urlencoded` query string
    pub fn parse(query_string: &str) -> Self {
        let mut entries: HashMap<String, QueryValue> = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(query_string.as_bytes()) {
            match entries.get_mut(key.as_ref()) {
                Some(existing) => existing.push(value.into_owned()),
                None => {
                    entries.insert(key.into_owned(), QueryValue::Single(value.into_owned()));
                }
            }
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&QueryValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }
}

/// Per-request state handed to every pipeline handler.
///
/// A context starts unresolved. The built-in responding methods resolve it,
/// and every terminal method fails with `ServerError::AlreadyEnded` once it is
/// resolved or its response has ended.
#[derive(Debug)]
pub struct QueryContext {
    request: RawRequest,
    response: RawResponse,
    path: String,
    query_string: String,
    queries: Queries,
    resolved: bool,
    store: Store,
}

impl QueryContext {
    /// Create a context with an empty store
    pub fn new(request: RawRequest, response: RawResponse) -> Self {
        Self::with_store(request, response, Store::new())
    }

    /// Create a context with initial store contents
    pub fn with_store(request: RawRequest, mut response: RawResponse, store: Store) -> Self {
        let (path, query_string) = match request.target.split_once('?') {
            Some((path, query)) => (path.to_string(), query.to_string()),
            None => (request.target.clone(), String::new()),
        };
        let queries = if query_string.is_empty() {
            Queries::default()
        } else {
            Queries::parse(&query_string)
        };

        response.set_discard_body(request.method == Method::Head);

        Self {
            request,
            response,
            path,
            query_string,
            queries,
            resolved: false,
            store,
        }
    }

    /// The requested path (without query string)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The query string (without the leading `?`)
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn queries(&self) -> &Queries {
        &self.queries
    }

    pub fn method(&self) -> Method {
        self.request.method
    }

    /// Whether a terminal operation has been performed
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn request(&self) -> &RawRequest {
        &self.request
    }

    /// Mutable access to the request, e.g. for reading the body
    pub fn request_mut(&mut self) -> &mut RawRequest {
        &mut self.request
    }

    pub fn response(&self) -> &RawResponse {
        &self.response
    }

    /// Mutable access to the response, e.g. for setting headers
    pub fn response_mut(&mut self) -> &mut RawResponse {
        &mut self.response
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    fn assert_writable(&self) -> ServerResult<()> {
        if self.resolved {
            return Err(ServerError::AlreadyEnded("the query has been resolved"));
        }
        if self.response.writable_ended() {
            return Err(ServerError::AlreadyEnded("the response has ended"));
        }
        Ok(())
    }

    /// Redirect to `location` with 302
    pub async fn redirect(&mut self, location: &str) -> ServerResult<()> {
        self.redirect_with_code(location, 302).await
    }

    /// Redirect to `location` with the given code
    pub async fn redirect_with_code(&mut self, location: &str, code: u16) -> ServerResult<()> {
        self.assert_writable()?;
        // An invalid location leaves the context unresolved
        self.response.set_header("Location", location)?;
        self.resolved = true;
        self.response.set_status(code);
        self.response.end(None).await
    }

    /// End with the given status code and optional content
    pub async fn end_with_code(&mut self, code: u16, content: Option<&str>) -> ServerResult<()> {
        self.assert_writable()?;
        self.resolved = true;
        self.response.set_status(code);
        self.response.end(content.map(str::as_bytes)).await
    }

    /// Create an output stream for the response body, compressed with the
    /// first preferred encoding the client accepts. Resolves the context.
    ///
    /// Once the head has been sent the encoding can no longer be announced,
    /// so the output is always raw.
    pub fn create_output(&mut self, options: &CompressionOptions) -> ServerResult<Output<'_>> {
        self.assert_writable()?;
        let encoding = if self.response.headers_sent() {
            debug!("Head of {} already sent, writing uncompressed", self.path);
            None
        } else {
            output::negotiate(
                self.request.get_header("accept-encoding").map(String::as_str),
                options.compression.as_deref(),
            )
        };
        self.resolved = true;

        Ok(match encoding {
            Some(encoding) => {
                debug!("Compressing {} with {}", self.path, encoding);
                Output::encoded(&mut self.response, encoding, options.level)
            }
            None => Output::raw(&mut self.response),
        })
    }

    /// End with the given content
    pub async fn end_with_content(&mut self, content: &str, options: &CompressionOptions) -> ServerResult<()> {
        self.create_output(options)?.end(Some(content.as_bytes())).await
    }

    /// End with the content of the file at `path`. The MIME type is derived
    /// from the file extension; unknown extensions leave `Content-Type` unset.
    pub async fn end_with_file(&mut self, path: impl AsRef<Path>, options: &CompressionOptions) -> ServerResult<()> {
        self.assert_writable()?;
        let path = path.as_ref();

        // Open before resolving so a missing file leaves the context untouched
        let mut file = File::open(path).await?;
        if !self.response.headers_sent() {
            if let Some(content_type) = mime::content_type_for(path) {
                self.response.put_header("Content-Type", content_type);
            }
        }

        let mut output = self.create_output(options)?;
        let mut chunk = vec![0; FILE_CHUNK_SIZE];
        loop {
            let read = file.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            output.write(&chunk[..read]).await?;
        }
        output.end(None).await
    }
}
