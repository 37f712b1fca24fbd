use crate::config::StaticHandlerOptions;
use crate::context::QueryContext;
use crate::error::ServerResult;
use crate::pipeline::{Handler, Next};
use futures::future::BoxFuture;
use log::debug;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Handler serving files below a root directory
#[derive(Debug, Clone)]
pub struct StaticHandler {
    root: PathBuf,
    options: StaticHandlerOptions,
}

/// Create a handler for static files
pub fn create_static_handler(root: impl Into<PathBuf>, options: StaticHandlerOptions) -> StaticHandler {
    StaticHandler {
        root: root.into(),
        options,
    }
}

impl StaticHandler {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &StaticHandlerOptions {
        &self.options
    }

    /// Map a request path below the root. Paths that climb out of the root
    /// are rejected.
    fn map_path(&self, url_path: &str) -> Option<PathBuf> {
        let mut fs_path = self.root.clone();
        for component in Path::new(url_path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(segment) => fs_path.push(segment),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(fs_path)
    }

    /// Find the file answering `url_path`, if any
    async fn resolve(&self, url_path: &str) -> Option<PathBuf> {
        let fs_path = self.map_path(url_path)?;
        let metadata = fs::metadata(&fs_path).await.ok()?;

        if metadata.is_file() {
            return Some(fs_path);
        }
        if metadata.is_dir() {
            let default_page = fs_path.join(self.options.default_page.as_deref()?);
            if fs::metadata(&default_page).await.is_ok_and(|meta| meta.is_file()) {
                return Some(default_page);
            }
        }
        None
    }

    async fn serve(&self, ctx: &mut QueryContext) -> ServerResult<()> {
        if ctx.is_resolved() || !self.options.methods.contains(&ctx.method()) {
            return Ok(());
        }

        match self.resolve(ctx.path()).await {
            Some(file) => {
                debug!("Serving {} from {}", ctx.path(), file.display());
                ctx.end_with_file(&file, &self.options.compression).await
            }
            None if self.options.terminal => ctx.end_with_code(404, None).await,
            None => Ok(()),
        }
    }
}

impl Handler for StaticHandler {
    fn call<'a>(&'a self, ctx: &'a mut QueryContext, _next: Next<'a>) -> BoxFuture<'a, ServerResult<()>> {
        Box::pin(self.serve(ctx))
    }
}
