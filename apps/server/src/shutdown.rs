/// Resolve when the process receives Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl-C handler");
        // Without a handler, never trigger shutdown.
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
