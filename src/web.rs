use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use miette::IntoDiagnostic;
use tower_http::trace::TraceLayer;

use crate::hierarchy;
use crate::hierarchy::service::HierarchyService;
use crate::settings::Settings;

/// The full HTTP surface with request tracing.
pub fn app(service: Arc<HierarchyService>) -> Router {
    hierarchy::web::router(service).layer(TraceLayer::new_for_http())
}

pub async fn serve(settings: Settings, service: Arc<HierarchyService>) -> miette::Result<()> {
    let addr: SocketAddr = settings
        .listen_addr()
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    tracing::info!(%addr, on_delete = service.delete_policy().as_str(), "Role hierarchy API listening");

    axum::serve(listener, app(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
