use cascade_server::{
    create_static_handler, handler_fn, request_logger, App, AppOptions, CompressionOptions, Method,
    RouteDescription, Router, ServerResult, StaticHandlerOptions,
};
use log::info;
use std::env;
use std::path::{Path, PathBuf};

const DEFAULT_PORT: u16 = 8080;

/// Usage: cascade-server [ROOT] [PORT] [CONFIG.json]
fn main() -> ServerResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse command-line arguments
    let args: Vec<String> = env::args().collect();
    let root = args.get(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("public"));
    let port = match args.get(2) {
        Some(port) => port
            .parse()
            .map_err(|_| cascade_server::ServerError::Config(format!("Invalid port: {}", port)))?,
        None => DEFAULT_PORT,
    };
    let options = match args.get(3) {
        Some(path) if Path::new(path).exists() => AppOptions::from_json_file(path)?,
        _ => AppOptions::new(),
    };
    options.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(options.worker_threads)
        .enable_all()
        .build()?;

    runtime.block_on(serve(options, root, port))
}

/// `/echo?msg=..` answers with `msg`; everything else is looked up below `root`
fn demo_router(root: PathBuf) -> ServerResult<Router> {
    let mut router = Router::new();
    router.get(
        "/echo",
        handler_fn(|ctx, _| {
            Box::pin(async move {
                let message = ctx
                    .queries()
                    .get("msg")
                    .map(|value| value.first().to_string())
                    .unwrap_or_default();
                ctx.end_with_content(&message, &CompressionOptions::default()).await
            })
        }),
    );
    router.add_route(
        &[Method::Get, Method::Head],
        RouteDescription::pattern("^/")?,
        create_static_handler(root, StaticHandlerOptions::default()),
    );
    Ok(router)
}

async fn serve(options: AppOptions, root: PathBuf, port: u16) -> ServerResult<()> {
    let router = demo_router(root.clone())?;

    let app = App::new(options);
    app.use_handler(request_logger()).use_handler(router.handler());

    let listener = app.listen(port).await?;
    info!(
        "Serving {} with {} worker threads; visit http://{}",
        root.display(),
        app.options().worker_threads,
        listener.local_addr()
    );

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal. Stopping server...");
    listener.close().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_server::{RawRequest, RawResponse};
    use tokio::io::AsyncReadExt;

    async fn status_line(app: &App, request: RawRequest) -> String {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let mut raw = Vec::new();
        let (_, read) = tokio::join!(
            app.dispatch(request, RawResponse::new(server)),
            client.read_to_end(&mut raw)
        );
        read.unwrap();
        let text = String::from_utf8_lossy(&raw).into_owned();
        text.lines().next().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn test_demo_router_serves_get_and_head() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<p>hi</p>").unwrap();

        let app = App::default();
        app.use_handler(demo_router(dir.path().to_path_buf()).unwrap().handler());

        for method in [Method::Get, Method::Head] {
            let line = status_line(&app, RawRequest::new(method, "/")).await;
            assert_eq!(line, "HTTP/1.1 200 OK", "method {}", method);
        }
        let line = status_line(&app, RawRequest::new(Method::Get, "/echo?msg=hey")).await;
        assert_eq!(line, "HTTP/1.1 200 OK");
        let line = status_line(&app, RawRequest::new(Method::Post, "/")).await;
        assert_eq!(line, "HTTP/1.1 404 Not Found");
    }
}
