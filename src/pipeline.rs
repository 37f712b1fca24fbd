//! Pipeline handlers and the `Next` continuation that drives them.
//!
//! A request runs through an ordered chain of handlers. Each handler receives
//! the request's [`QueryContext`] and a [`Next`] value. Awaiting
//! `next.run(ctx)` executes the handlers after it and returns once the chain
//! is exhausted, so code placed after the call runs "on the way back"; a
//! handler that never calls it simply lets the chain continue afterwards.
//!
//! ```no_run
//! use cascade_server::{handler_fn, App};
//!
//! let app = App::default();
//! app.use_handler(handler_fn(|ctx, next| {
//!     Box::pin(async move {
//!         next.run(ctx).await?;
//!         if !ctx.is_resolved() {
//!             ctx.end_with_code(418, Some("teapot")).await?;
//!         }
//!         Ok(())
//!     })
//! }));
//! ```

use crate::context::QueryContext;
use crate::error::ServerResult;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A unit of request processing composed into the chain
pub trait Handler: Send + Sync + 'static {
    /// Process the request; call `next.run(ctx)` to run the rest of the chain
    fn call<'a>(&'a self, ctx: &'a mut QueryContext, next: Next<'a>) -> BoxFuture<'a, ServerResult<()>>;
}

/// Shared handle to a handler; identity is the allocation
pub type HandlerRef = Arc<dyn Handler>;

/// Handler built from a closure, see [`handler_fn`]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn").field("f", &"<function>").finish()
    }
}

impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut QueryContext, Next<'a>) -> BoxFuture<'a, ServerResult<()>> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut QueryContext, next: Next<'a>) -> BoxFuture<'a, ServerResult<()>> {
        (self.f)(ctx, next)
    }
}

/// Turn a closure returning a boxed future into a handler
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut QueryContext, Next<'a>) -> BoxFuture<'a, ServerResult<()>> + Send + Sync + 'static,
{
    HandlerFn { f }
}

/// Conversion into a shared handler
pub trait IntoHandler {
    fn into_handler(self) -> HandlerRef;
}

impl<H: Handler> IntoHandler for H {
    fn into_handler(self) -> HandlerRef {
        Arc::new(self)
    }
}

impl IntoHandler for HandlerRef {
    fn into_handler(self) -> HandlerRef {
        self
    }
}

/// Position in a request's handler chain
#[derive(Debug, Default)]
pub struct Cursor {
    index: AtomicUsize,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the next handler that has not been claimed yet
    pub fn position(&self) -> usize {
        self.index.load(Ordering::Acquire)
    }

    /// Claim the next index below `len`; each index is handed out once
    fn claim(&self, len: usize) -> Option<usize> {
        self.index
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |index| {
                (index < len).then_some(index + 1)
            })
            .ok()
    }
}

/// Continuation resuming the chain from wherever it last stopped
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [HandlerRef],
    cursor: &'a Cursor,
}

impl<'a> fmt::Debug for Next<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("len", &self.chain.len())
            .field("position", &self.cursor.position())
            .finish()
    }
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [HandlerRef], cursor: &'a Cursor) -> Self {
        Self { chain, cursor }
    }

    /// Number of handlers not yet started
    pub fn remaining(&self) -> usize {
        self.chain.len().saturating_sub(self.cursor.position())
    }

    /// Run every handler not yet started, in order. The first error stops
    /// the chain; the handlers after it are never started.
    pub async fn run(self, ctx: &mut QueryContext) -> ServerResult<()> {
        while let Some(index) = self.cursor.claim(self.chain.len()) {
            self.chain[index].call(ctx, self).await?;
        }
        Ok(())
    }
}
