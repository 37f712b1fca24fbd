use crate::error::{ServerError, ServerResult};
use crate::http::RawResponse;
use async_compression::tokio::write::{BrotliEncoder, GzipEncoder, ZlibEncoder};
use async_compression::Level;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem;
use std::str::FromStr;
use tokio::io::AsyncWriteExt;

/// Content encodings the server can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    #[serde(rename = "br")]
    Brotli,
    #[serde(rename = "gzip")]
    Gzip,
    #[serde(rename = "deflate")]
    Deflate,
}

impl Encoding {
    /// The `Content-Encoding` token
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Brotli => "br",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
        }
    }
}

impl FromStr for Encoding {
    type Err = ServerError;

    fn from_str(s: &str) -> ServerResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "br" => Ok(Encoding::Brotli),
            "gzip" => Ok(Encoding::Gzip),
            "deflate" => Ok(Encoding::Deflate),
            other => Err(ServerError::UnsupportedEncoding(other.to_string())),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoder quality
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Fastest,
    #[default]
    Default,
    Best,
}

impl From<CompressionLevel> for Level {
    fn from(level: CompressionLevel) -> Self {
        match level {
            CompressionLevel::Fastest => Level::Fastest,
            CompressionLevel::Default => Level::Default,
            CompressionLevel::Best => Level::Best,
        }
    }
}

/// Tokens of an `Accept-Encoding` header in the order the client sent them.
/// Parameters are dropped and entries refused with `q=0` are left out.
pub fn accepted_encodings(header: &str) -> Vec<String> {
    header
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split(';');
            let token = parts.next()?.trim().to_ascii_lowercase();
            if token.is_empty() {
                return None;
            }
            let refused = parts.any(|param| {
                param
                    .trim()
                    .strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .is_some_and(|q| q <= 0.0)
            });
            (!refused).then_some(token)
        })
        .collect()
}

/// Pick the first preferred encoding the client accepts.
/// Server preference order wins over the client's order.
pub fn negotiate(accept_encoding: Option<&str>, preference: Option<&[Encoding]>) -> Option<Encoding> {
    let accepted = accepted_encodings(accept_encoding?);
    preference?
        .iter()
        .copied()
        .find(|encoding| accepted.iter().any(|token| token == encoding.as_str()))
}

/// Streaming encoder collecting its output in memory between writes
enum Encoder {
    Brotli(BrotliEncoder<Vec<u8>>),
    Gzip(GzipEncoder<Vec<u8>>),
    Deflate(ZlibEncoder<Vec<u8>>),
}

impl Encoder {
    fn new(encoding: Encoding, level: CompressionLevel) -> Self {
        let level = Level::from(level);
        match encoding {
            Encoding::Brotli => Encoder::Brotli(BrotliEncoder::with_quality(Vec::new(), level)),
            Encoding::Gzip => Encoder::Gzip(GzipEncoder::with_quality(Vec::new(), level)),
            Encoding::Deflate => Encoder::Deflate(ZlibEncoder::with_quality(Vec::new(), level)),
        }
    }

    fn encoding(&self) -> Encoding {
        match self {
            Encoder::Brotli(_) => Encoding::Brotli,
            Encoder::Gzip(_) => Encoding::Gzip,
            Encoder::Deflate(_) => Encoding::Deflate,
        }
    }

    /// Feed bytes and take whatever compressed output is ready
    async fn write(&mut self, data: &[u8]) -> ServerResult<Vec<u8>> {
        match self {
            Encoder::Brotli(encoder) => encoder.write_all(data).await?,
            Encoder::Gzip(encoder) => encoder.write_all(data).await?,
            Encoder::Deflate(encoder) => encoder.write_all(data).await?,
        }
        Ok(self.take())
    }

    /// Flush the trailer and take the remaining output
    async fn finish(&mut self) -> ServerResult<Vec<u8>> {
        match self {
            Encoder::Brotli(encoder) => encoder.shutdown().await?,
            Encoder::Gzip(encoder) => encoder.shutdown().await?,
            Encoder::Deflate(encoder) => encoder.shutdown().await?,
        }
        Ok(self.take())
    }

    fn take(&mut self) -> Vec<u8> {
        let buffer = match self {
            Encoder::Brotli(encoder) => encoder.get_mut(),
            Encoder::Gzip(encoder) => encoder.get_mut(),
            Encoder::Deflate(encoder) => encoder.get_mut(),
        };
        mem::take(buffer)
    }
}

/// Writable response body returned by `QueryContext::create_output`.
///
/// Bytes written here pass through the negotiated encoder, if any, before
/// reaching the response. `end` consumes the output, so the response is
/// ended exactly once.
pub struct Output<'a> {
    response: &'a mut RawResponse,
    encoder: Option<Encoder>,
}

impl<'a> Output<'a> {
    /// Output writing straight into the response
    pub(crate) fn raw(response: &'a mut RawResponse) -> Self {
        Self {
            response,
            encoder: None,
        }
    }

    /// Output compressing with `encoding`; sets the encoding headers
    pub(crate) fn encoded(
        response: &'a mut RawResponse,
        encoding: Encoding,
        level: CompressionLevel,
    ) -> Self {
        response.put_header("Content-Encoding", encoding.as_str());
        response.put_header("Vary", "Accept-Encoding");
        // The encoded size is only known once the body is complete
        response.remove_header("Content-Length");
        Self {
            response,
            encoder: Some(Encoder::new(encoding, level)),
        }
    }

    /// The negotiated encoding; `None` for the raw response
    pub fn encoding(&self) -> Option<Encoding> {
        self.encoder.as_ref().map(Encoder::encoding)
    }

    /// Write a chunk of the body
    pub async fn write(&mut self, data: &[u8]) -> ServerResult<()> {
        match &mut self.encoder {
            None => self.response.write(data).await,
            Some(encoder) => {
                let compressed = encoder.write(data).await?;
                if compressed.is_empty() {
                    Ok(())
                } else {
                    self.response.write(&compressed).await
                }
            }
        }
    }

    /// Write an optional last chunk and end the response
    pub async fn end(mut self, data: Option<&[u8]>) -> ServerResult<()> {
        match self.encoder.take() {
            None => self.response.end(data).await,
            Some(mut encoder) => {
                let mut tail = match data {
                    Some(data) => encoder.write(data).await?,
                    None => Vec::new(),
                };
                tail.extend(encoder.finish().await?);
                self.response.end(Some(&tail)).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT_PREFERENCE: [Encoding; 3] = [Encoding::Brotli, Encoding::Gzip, Encoding::Deflate];

    #[test]
    fn test_server_preference_wins() {
        assert_eq!(negotiate(Some("gzip, br"), Some(&DEFAULT_PREFERENCE[..])), Some(Encoding::Brotli));
        assert_eq!(negotiate(Some("deflate, gzip"), Some(&DEFAULT_PREFERENCE[..])), Some(Encoding::Gzip));
        assert_eq!(
            negotiate(Some("br, gzip"), Some(&[Encoding::Gzip, Encoding::Brotli][..])),
            Some(Encoding::Gzip)
        );
    }

    #[test]
    fn test_no_mutual_encoding() {
        assert_eq!(negotiate(Some("identity"), Some(&DEFAULT_PREFERENCE[..])), None);
        assert_eq!(negotiate(None, Some(&DEFAULT_PREFERENCE[..])), None);
        assert_eq!(negotiate(Some("gzip"), None), None);
        assert_eq!(negotiate(Some("gzip"), Some(&[][..])), None);
    }

    #[test]
    fn test_accept_encoding_parameters() {
        assert_eq!(
            accepted_encodings("GZip;q=0.8, br;q=0, , deflate"),
            vec!["gzip".to_string(), "deflate".to_string()]
        );
        assert_eq!(negotiate(Some("br;q=0, gzip;q=0.5"), Some(&DEFAULT_PREFERENCE[..])), Some(Encoding::Gzip));
    }

    #[test]
    fn test_encoding_names() {
        assert_eq!("br".parse::<Encoding>().unwrap(), Encoding::Brotli);
        assert_eq!(" GZIP ".parse::<Encoding>().unwrap(), Encoding::Gzip);
        match "zstd".parse::<Encoding>() {
            Err(ServerError::UnsupportedEncoding(name)) => assert_eq!(name, "zstd"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_encoded_output_ends_response() {
        let mut response = RawResponse::new(tokio::io::sink());
        let mut output = Output::encoded(&mut response, Encoding::Gzip, CompressionLevel::Fastest);
        assert_eq!(output.encoding(), Some(Encoding::Gzip));

        output.write(b"hello ").await.unwrap();
        output.end(Some(b"world")).await.unwrap();

        assert!(response.writable_ended());
        assert_eq!(response.get_header("Content-Encoding"), Some("gzip"));
        assert_eq!(response.get_header("Vary"), Some("Accept-Encoding"));
    }
}
