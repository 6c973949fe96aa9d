//! HTTP server facade for the catalog service with Axum, error handling, and OpenAPI support.

use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use axum::{extract::Request, http::HeaderValue, routing::get, Router};
use tokio_util::sync::CancellationToken;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::{Timestamp, Uuid};

use catalog_kernel::ModuleRegistry;

pub mod auth;
pub mod error;
pub mod response;
pub mod router;

use router::RouterBuilder;

/// Start the HTTP server and block until it has shut down.
///
/// The server drains after `ctrl_c`/SIGTERM. If in-flight requests are still
/// running once `shutdown_grace_secs` elapse, `abort` is cancelled so their
/// store calls give up, and the function returns.
pub async fn start_server(
    registry: &ModuleRegistry,
    settings: &catalog_kernel::settings::Settings,
    abort: CancellationToken,
) -> anyhow::Result<()> {
    let app = build_router(registry, settings);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!("HTTP server listening on http://{}", addr);

    serve(
        listener,
        app,
        shutdown_signal(),
        Duration::from_secs(settings.server.shutdown_grace_secs),
        abort,
    )
    .await
}

/// Serve `app` until `signal` resolves, then drain for at most `grace`.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    app: Router,
    signal: F,
    grace: Duration,
    abort: CancellationToken,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let drain = CancellationToken::new();
    let drain_trigger = drain.clone();

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        drain.cancelled().await;
    });
    let mut handle = tokio::spawn(async move { server.await });

    tokio::select! {
        joined = &mut handle => {
            // The listener died on its own; nothing left to drain.
            return joined
                .context("HTTP server task panicked")?
                .context("HTTP server failed");
        }
        _ = signal => {}
    }

    tracing::info!(grace_secs = grace.as_secs(), "shutdown requested, draining connections");
    drain_trigger.cancel();

    match tokio::time::timeout(grace, &mut handle).await {
        Ok(joined) => {
            joined
                .context("HTTP server task panicked")?
                .context("HTTP server failed")?;
            tracing::info!("shut down gracefully");
        }
        Err(_) => {
            tracing::warn!("drain deadline exceeded, aborting in-flight requests");
            abort.cancel();
            handle.abort();
        }
    }

    Ok(())
}

/// Build the main HTTP router with all module routes mounted
pub fn build_router(
    registry: &ModuleRegistry,
    settings: &catalog_kernel::settings::Settings,
) -> Router {
    let mut router_builder = RouterBuilder::new().route("/alive", get(liveness));

    for module in registry.modules() {
        let base_path = module.base_path();
        tracing::info!(module = module.name(), "mounting module routes under {}", base_path);
        router_builder = router_builder.mount_module(&base_path, module.routes());
    }

    // Layers wrap everything registered so far, so they come last.
    router_builder
        .with_openapi(registry)
        .with_timeout(settings.server.request_timeout_ms)
        .with_cors()
        .with_tracing()
        .with_request_id()
        .build()
}

/// Liveness endpoint
async fn liveness() -> &'static str {
    "I am alive"
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl_c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Request ID generator for tracing
#[derive(Clone)]
pub(crate) struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let timestamp = Timestamp::now(uuid::NoContext);
        let request_id = Uuid::new_v7(timestamp)
            .to_string()
            .parse::<HeaderValue>()
            .ok()?;
        Some(RequestId::new(request_id))
    }
}
