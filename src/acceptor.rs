use crate::config::AppOptions;
use crate::connection::Connection;
use crate::error::{ServerError, ServerResult};
use futures::future::BoxFuture;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpListener;

/// Source of connections driven by the app's accept loop
pub trait Accept: Send + Sync + 'static {
    /// Wait for the next connection; an error stops the loop
    fn accept(&self) -> BoxFuture<'_, ServerResult<Connection>>;

    fn local_addr(&self) -> ServerResult<SocketAddr>;
}

/// Accepts TCP connections and numbers them
#[derive(Debug)]
pub struct ConnectionAcceptor {
    listener: TcpListener,
    connection_count: AtomicUsize,
}

/// Bind a listening socket on the configured address and `port`.
/// Port 0 binds an ephemeral port.
pub fn bind(options: &AppOptions, port: u16) -> ServerResult<ConnectionAcceptor> {
    let address = (options.listen_address.as_str(), port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            ServerError::Config(format!("No socket address for {}", options.listen_address))
        })?;

    let socket = create_socket(&address, options.backlog)?;
    let listener = TcpListener::from_std(socket.into())?;

    Ok(ConnectionAcceptor {
        listener,
        connection_count: AtomicUsize::new(0),
    })
}

/// Create a non-blocking listening socket
fn create_socket(addr: &SocketAddr, backlog: u32) -> io::Result<Socket> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;

    socket.bind(&(*addr).into())?;
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;

    Ok(socket)
}

impl ConnectionAcceptor {
    /// Accept the next connection
    pub async fn accept(&self) -> ServerResult<Connection> {
        let (stream, addr) = self.listener.accept().await?;
        let id = self.connection_count.fetch_add(1, Ordering::Relaxed);
        Ok(Connection::new(stream, addr, id))
    }

    /// Get the local address this acceptor is bound to
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Number of connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Accept for ConnectionAcceptor {
    fn accept(&self) -> BoxFuture<'_, ServerResult<Connection>> {
        Box::pin(ConnectionAcceptor::accept(self))
    }

    fn local_addr(&self) -> ServerResult<SocketAddr> {
        ConnectionAcceptor::local_addr(self)
    }
}
