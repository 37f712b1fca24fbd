use crate::error::{ServerError, ServerResult};
use crate::http::{HttpParser, RawRequest, RawResponse, RequestHead};
use bytes::BytesMut;
use log::debug;
use std::io::Cursor;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

/// Initial capacity of the head buffer
const READ_BUFFER_SIZE: usize = 4 * 1024;

/// An accepted TCP connection carrying a single request
pub struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    id: usize,
    accepted_at: Instant,
}

impl Connection {
    /// Wrap an accepted stream
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, id: usize) -> Self {
        // Disable Nagle's algorithm
        if let Err(err) = stream.set_nodelay(true) {
            debug!("Connection {}: could not set TCP_NODELAY: {}", id, err);
        }

        Self {
            stream,
            peer_addr,
            id,
            accepted_at: Instant::now(),
        }
    }

    /// Get the connection's peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Get the connection's unique ID
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn accepted_at(&self) -> Instant {
        self.accepted_at
    }

    /// Read the request head and split the stream into a request and the
    /// response writing back to the peer.
    ///
    /// Returns `Ok(None)` when the peer closes without sending anything. A
    /// malformed head is answered with 400 and returned as an error.
    pub async fn into_exchange(self, max_header_size: usize) -> ServerResult<Option<(RawRequest, RawResponse)>> {
        let parser = HttpParser::new(max_header_size);
        let (mut reader, writer) = self.stream.into_split();

        match read_head(&mut reader, &parser).await {
            Ok(Some((head, leftover))) => {
                let length = head.content_length();
                let body = Cursor::new(leftover).chain(reader).take(length);
                Ok(Some((RawRequest::from_head(head, Box::new(body)), RawResponse::new(writer))))
            }
            Ok(None) => Ok(None),
            Err(err @ ServerError::HttpParse(_)) => {
                let mut response = RawResponse::new(writer);
                response.set_status(400);
                if let Err(write_err) = response.end(None).await {
                    debug!("Connection {}: could not send 400: {}", self.id, write_err);
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}

/// Read up to the end of the request head. Returns the parsed head and the
/// body bytes that arrived with it.
pub async fn read_head<R>(reader: &mut R, parser: &HttpParser) -> ServerResult<Option<(RequestHead, Vec<u8>)>>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        if let Some(len) = parser.head_len(&buffer)? {
            let head = buffer.split_to(len);
            let head = parser.parse_head(&head[..len - 4])?;
            return Ok(Some((head, buffer.to_vec())));
        }

        if reader.read_buf(&mut buffer).await? == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Err(ServerError::HttpParse("Connection closed inside the request head".to_string()));
        }
    }
}
