pub mod acceptor;
pub mod app;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod http;
pub mod mime;
pub mod output;
pub mod pipeline;
pub mod router;
pub mod static_files;
pub mod store;
pub mod utils;

/// Re-exports of common components for easier access
pub use app::{App, ErrorListener, Listener};
pub use config::{AppOptions, CompressionOptions, StaticHandlerOptions};
pub use context::{Queries, QueryContext, QueryValue};
pub use error::{BoxError, ServerError, ServerResult};
pub use http::{Method, RawRequest, RawResponse};
pub use output::{CompressionLevel, Encoding, Output};
pub use pipeline::{handler_fn, Cursor, Handler, HandlerFn, HandlerRef, IntoHandler, Next};
pub use router::{RouteDescription, Router, DEFAULT_STORE_KEY};
pub use static_files::{create_static_handler, StaticHandler};
pub use store::{RouteMatch, Store, StoreValue};
pub use utils::request_logger;
