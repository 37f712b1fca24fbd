use crate::context::QueryContext;
use crate::error::ServerResult;
use crate::http::Method;
use crate::pipeline::{Handler, HandlerRef, IntoHandler, Next};
use crate::store::RouteMatch;
use futures::future::BoxFuture;
use log::debug;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

/// Store key under which match results are published by default
pub const DEFAULT_STORE_KEY: &str = "ROUTE_RESULT";

/// Path description of a route
#[derive(Debug, Clone)]
pub enum RouteDescription {
    /// Matches a path equal to the string
    Exact(String),
    /// Matches a path the expression finds a match in
    Pattern(Regex),
}

impl RouteDescription {
    /// Compile a pattern description
    pub fn pattern(expression: &str) -> ServerResult<Self> {
        Ok(RouteDescription::Pattern(Regex::new(expression)?))
    }

    /// Match a request path
    pub fn matches(&self, path: &str) -> Option<RouteMatch> {
        match self {
            RouteDescription::Exact(expected) => (expected == path).then_some(RouteMatch::Exact),
            RouteDescription::Pattern(regex) => {
                let captures = regex.captures(path)?;
                let groups = captures
                    .iter()
                    .map(|group| group.map(|m| m.as_str().to_string()))
                    .collect();
                let named = regex
                    .capture_names()
                    .flatten()
                    .filter_map(|name| {
                        captures
                            .name(name)
                            .map(|m| (name.to_string(), m.as_str().to_string()))
                    })
                    .collect::<HashMap<_, _>>();
                Some(RouteMatch::Pattern { groups, named })
            }
        }
    }
}

impl From<&str> for RouteDescription {
    fn from(path: &str) -> Self {
        RouteDescription::Exact(path.to_string())
    }
}

impl From<String> for RouteDescription {
    fn from(path: String) -> Self {
        RouteDescription::Exact(path)
    }
}

impl From<Regex> for RouteDescription {
    fn from(regex: Regex) -> Self {
        RouteDescription::Pattern(regex)
    }
}

impl fmt::Display for RouteDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteDescription::Exact(path) => f.write_str(path),
            RouteDescription::Pattern(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}

/// A route entry in the router
#[derive(Clone)]
pub struct Route {
    /// The HTTP methods this route responds to
    pub methods: Vec<Method>,

    /// The path description for this route
    pub description: RouteDescription,

    /// The handler for this route
    pub handler: HandlerRef,
}

// Custom Debug implementation for Route since handler can't be automatically derived
impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("methods", &self.methods)
            .field("description", &self.description)
            .field("handler", &"<handler>")
            .finish()
    }
}

/// Dispatches to the first route matching the request method and path.
///
/// While the matched handler runs, the match result is available at
/// `ctx.store().route(router.store_key())`; it is removed as soon as the
/// handler returns.
#[derive(Debug, Clone)]
pub struct Router {
    store_key: String,
    routes: Vec<Route>,
}

impl Router {
    /// Create a new router
    pub fn new() -> Self {
        Self::with_store_key(DEFAULT_STORE_KEY)
    }

    /// Create a router publishing matches under `store_key`
    pub fn with_store_key(store_key: &str) -> Self {
        Self {
            store_key: store_key.to_string(),
            routes: Vec::new(),
        }
    }

    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Add a route answering any of `methods`
    pub fn add_route(
        &mut self,
        methods: &[Method],
        description: impl Into<RouteDescription>,
        handler: impl IntoHandler,
    ) -> &mut Self {
        self.routes.push(Route {
            methods: methods.to_vec(),
            description: description.into(),
            handler: handler.into_handler(),
        });
        self
    }

    /// Add a GET route
    pub fn get(&mut self, description: impl Into<RouteDescription>, handler: impl IntoHandler) -> &mut Self {
        self.add_route(&[Method::Get], description, handler)
    }

    /// Add a POST route
    pub fn post(&mut self, description: impl Into<RouteDescription>, handler: impl IntoHandler) -> &mut Self {
        self.add_route(&[Method::Post], description, handler)
    }

    /// Add a PUT route
    pub fn put(&mut self, description: impl Into<RouteDescription>, handler: impl IntoHandler) -> &mut Self {
        self.add_route(&[Method::Put], description, handler)
    }

    /// Add a PATCH route
    pub fn patch(&mut self, description: impl Into<RouteDescription>, handler: impl IntoHandler) -> &mut Self {
        self.add_route(&[Method::Patch], description, handler)
    }

    /// Add a DELETE route
    pub fn delete(&mut self, description: impl Into<RouteDescription>, handler: impl IntoHandler) -> &mut Self {
        self.add_route(&[Method::Delete], description, handler)
    }

    /// Add a HEAD route
    pub fn head(&mut self, description: impl Into<RouteDescription>, handler: impl IntoHandler) -> &mut Self {
        self.add_route(&[Method::Head], description, handler)
    }

    /// Freeze the router into a pipeline handler
    pub fn handler(self) -> HandlerRef {
        self.into_handler()
    }

    /// Find the first route accepting `method` whose description matches `path`
    fn find(&self, method: Method, path: &str) -> Option<(&Route, RouteMatch)> {
        self.routes
            .iter()
            .filter(|route| route.methods.contains(&method))
            .find_map(|route| route.description.matches(path).map(|matched| (route, matched)))
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for Router {
    fn call<'a>(&'a self, ctx: &'a mut QueryContext, next: Next<'a>) -> BoxFuture<'a, ServerResult<()>> {
        Box::pin(async move {
            if ctx.is_resolved() {
                return Ok(());
            }

            let Some((route, matched)) = self.find(ctx.method(), ctx.path()) else {
                return Ok(());
            };
            debug!("{} {} matched route {}", ctx.method(), ctx.path(), route.description);

            ctx.store_mut().insert(&self.store_key, matched);
            let result = route.handler.call(ctx, next).await;
            ctx.store_mut().remove(&self.store_key);
            result
        })
    }
}
