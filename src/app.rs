use crate::acceptor::{self, Accept};
use crate::config::AppOptions;
use crate::connection::Connection;
use crate::context::QueryContext;
use crate::error::{ServerError, ServerResult};
use crate::http::{RawRequest, RawResponse};
use crate::pipeline::{Cursor, HandlerRef, IntoHandler, Next};
use futures::FutureExt;
use log::{debug, error, info};
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Most unread request body bytes read off before a connection closes
const DRAIN_LIMIT: u64 = 256 * 1024;

/// How long to wait for the rest of an unread body
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Callback receiving errors the app could not hand back to anyone
pub type ErrorListener = Arc<dyn Fn(&ServerError) + Send + Sync>;

/// Server application: an ordered handler chain plus fallbacks.
///
/// Cloning is cheap and clones share handlers and listeners.
#[derive(Clone)]
pub struct App {
    options: Arc<AppOptions>,
    handlers: Arc<RwLock<Vec<HandlerRef>>>,
    error_listeners: Arc<RwLock<Vec<ErrorListener>>>,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("options", &self.options)
            .field("handlers", &self.handlers.read().len())
            .field("error_listeners", &self.error_listeners.read().len())
            .finish()
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new(AppOptions::default())
    }
}

impl App {
    pub fn new(options: AppOptions) -> Self {
        Self {
            options: Arc::new(options),
            handlers: Arc::new(RwLock::new(Vec::new())),
            error_listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn options(&self) -> &AppOptions {
        &self.options
    }

    /// Status code used when no handler resolves a request
    pub fn default_code(&self) -> u16 {
        self.options.default_code
    }

    /// Append a handler to the chain
    pub fn use_handler(&self, handler: impl IntoHandler) -> &Self {
        self.handlers.write().push(handler.into_handler());
        self
    }

    /// Remove the first occurrence of `handler`; no-op if it is not in the chain
    pub fn disuse(&self, handler: &HandlerRef) -> &Self {
        let mut handlers = self.handlers.write();
        if let Some(index) = handlers.iter().position(|h| Arc::ptr_eq(h, handler)) {
            handlers.remove(index);
        }
        self
    }

    /// Snapshot of the current chain
    pub fn handlers(&self) -> Vec<HandlerRef> {
        self.handlers.read().clone()
    }

    /// Register a listener for handler and transport errors
    pub fn on_error<F>(&self, listener: F) -> &Self
    where
        F: Fn(&ServerError) + Send + Sync + 'static,
    {
        self.error_listeners.write().push(Arc::new(listener));
        self
    }

    /// Report an error to the log and every listener
    pub(crate) fn emit_error(&self, err: &ServerError) {
        error!("{}", err);
        let listeners = self.error_listeners.read().clone();
        for listener in listeners {
            listener(err);
        }
    }

    /// Run one request through the chain.
    ///
    /// If the chain finishes without resolving the context, the response ends
    /// with the default code. If a handler fails or panics, the rest of the
    /// chain is skipped, an unresolved response ends with 500, and the error
    /// is emitted.
    pub async fn dispatch(&self, request: RawRequest, response: RawResponse) {
        let mut ctx = QueryContext::new(request, response);
        let chain = self.handlers();
        let cursor = Cursor::new();

        let outcome = AssertUnwindSafe(Next::new(&chain, &cursor).run(&mut ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ServerError::HandlerPanic(panic_message(panic))));

        match outcome {
            Ok(()) => {
                if !ctx.is_resolved() {
                    if let Err(err) = ctx.end_with_code(self.options.default_code, None).await {
                        self.emit_error(&err);
                    }
                }
            }
            Err(err) => {
                if !ctx.is_resolved() {
                    if let Err(fallback_err) = ctx.end_with_code(500, None).await {
                        self.emit_error(&fallback_err);
                    }
                }
                self.emit_error(&err);
            }
        }

        // An output that was created but never ended still has to be closed
        if !ctx.response().writable_ended() {
            debug!("Closing unfinished response for {}", ctx.path());
            if let Err(err) = ctx.response_mut().end(None).await {
                debug!("Could not close response: {}", err);
            }
        }

        // Unread body bytes left in the socket turn the close into a reset,
        // which can cut off the response on the client side
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, ctx.request_mut().drain_body(DRAIN_LIMIT)).await;
        match drained {
            Ok(Ok(drained)) if drained > 0 => debug!("Drained {} unread body bytes", drained),
            Ok(Ok(_)) => {}
            Ok(Err(err)) => debug!("Could not drain request body: {}", err),
            Err(_) => debug!("Timed out draining request body for {}", ctx.path()),
        }
    }

    /// Start a server on `port` and return its handle.
    ///
    /// Bind failures are emitted and returned. An accept failure closes the
    /// listener and is emitted.
    pub async fn listen(&self, port: u16) -> ServerResult<Listener> {
        let acceptor = match acceptor::bind(&self.options, port) {
            Ok(acceptor) => acceptor,
            Err(err) => {
                self.emit_error(&err);
                return Err(err);
            }
        };
        self.listen_on(acceptor)
    }

    /// Serve connections from `acceptor` on a spawned accept loop.
    /// Must be called within a tokio runtime.
    pub fn listen_on<A: Accept>(&self, acceptor: A) -> ServerResult<Listener> {
        let local_addr = acceptor.local_addr()?;
        info!("Listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.clone().accept_loop(acceptor, shutdown_rx));

        Ok(Listener {
            local_addr,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    async fn accept_loop<A: Accept>(self, acceptor: A, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                // A dropped handle leaves the server running
                Ok(()) = &mut shutdown => {
                    debug!("Listener on {:?} closed", acceptor.local_addr().ok());
                    break;
                }
                accepted = acceptor.accept() => match accepted {
                    Ok(connection) => {
                        tokio::spawn(self.clone().serve(connection));
                    }
                    Err(err) => {
                        self.emit_error(&err);
                        break;
                    }
                },
            }
        }
    }

    async fn serve(self, connection: Connection) {
        let id = connection.id();
        let peer = connection.peer_addr();
        match connection.into_exchange(self.options.max_header_size).await {
            Ok(Some((request, response))) => self.dispatch(request, response).await,
            Ok(None) => debug!("Connection {} from {} closed before a request", id, peer),
            Err(err) => debug!("Connection {} from {} dropped: {}", id, peer, err),
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to a running server
#[derive(Debug)]
pub struct Listener {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Listener {
    /// The address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for the accept loop to finish
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = self.task.await;
    }

    /// Wait until the listener stops (after an accept error)
    pub async fn wait(self) {
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use crate::pipeline::handler_fn;
    use futures::future::BoxFuture;
    use parking_lot::Mutex;
    use std::io;

    fn noop() -> HandlerRef {
        Arc::new(handler_fn(|_, _| Box::pin(async { Ok(()) })))
    }

    #[test]
    fn test_use_and_disuse() {
        let app = App::default();
        let first = noop();
        let second = noop();

        app.use_handler(first.clone()).use_handler(second.clone()).use_handler(first.clone());
        assert_eq!(app.handlers().len(), 3);

        app.disuse(&first);
        let handlers = app.handlers();
        assert_eq!(handlers.len(), 2);
        assert!(Arc::ptr_eq(&handlers[0], &second));
        assert!(Arc::ptr_eq(&handlers[1], &first));

        app.disuse(&noop());
        assert_eq!(app.handlers().len(), 2);
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7)), "unknown panic");
    }

    struct FailingAcceptor;

    impl Accept for FailingAcceptor {
        fn accept(&self) -> BoxFuture<'_, ServerResult<Connection>> {
            Box::pin(async {
                Err(ServerError::Io(io::Error::new(io::ErrorKind::Other, "too many open files")))
            })
        }

        fn local_addr(&self) -> ServerResult<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 0)))
        }
    }

    #[tokio::test]
    async fn test_accept_error_closes_listener() {
        let app = App::default();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = errors.clone();
        app.on_error(move |err| seen.lock().push(err.to_string()));

        let listener = app.listen_on(FailingAcceptor).unwrap();
        tokio::time::timeout(Duration::from_secs(5), listener.wait())
            .await
            .expect("accept loop kept running after an accept error");

        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("too many open files"));
    }

    #[tokio::test]
    async fn test_dispatch_default_code() {
        let app = App::new(AppOptions::default().with_default_code(410));
        let (client, server) = tokio::io::duplex(4096);
        app.dispatch(RawRequest::new(Method::Get, "/"), RawResponse::new(server)).await;

        let mut raw = Vec::new();
        let mut client = client;
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut raw).await.unwrap();
        assert!(String::from_utf8_lossy(&raw).starts_with("HTTP/1.1 410 Gone\r\n"));
    }
}
