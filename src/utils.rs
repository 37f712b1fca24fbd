use crate::pipeline::{handler_fn, HandlerRef};
use log::info;
use std::sync::Arc;
use std::time::Instant;

/// Handler logging each request once the rest of the chain has run:
/// `GET /index.html -- 200 (used 3ms)`. The status reads `-` while the
/// request is still unresolved at that point.
pub fn request_logger() -> HandlerRef {
    Arc::new(handler_fn(|ctx, next| {
        Box::pin(async move {
            let start = Instant::now();
            let result = next.run(ctx).await;

            let status = if ctx.is_resolved() {
                ctx.response().status().to_string()
            } else {
                "-".to_string()
            };
            info!(
                "{} {} -- {} (used {}ms)",
                ctx.method(),
                ctx.path(),
                status,
                start.elapsed().as_millis()
            );
            result
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::QueryContext;
    use crate::http::{Method, RawRequest, RawResponse};
    use crate::pipeline::{Cursor, Next};

    #[tokio::test]
    async fn test_logger_passes_through() {
        let chain = vec![
            request_logger(),
            Arc::new(handler_fn(|ctx, _| {
                Box::pin(async move { ctx.end_with_code(201, None).await })
            })) as HandlerRef,
        ];
        let cursor = Cursor::new();
        let mut ctx = QueryContext::new(
            RawRequest::new(Method::Post, "/items"),
            RawResponse::new(tokio::io::sink()),
        );

        Next::new(&chain, &cursor).run(&mut ctx).await.unwrap();
        assert_eq!(ctx.response().status(), 201);
        assert_eq!(cursor.position(), 2);
    }
}
