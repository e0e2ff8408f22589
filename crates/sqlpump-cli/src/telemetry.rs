use axum::routing::get;
use axum::Router;
use metrics::{describe_counter, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Installs the Prometheus recorder and serves it on `listen_addr` in the
/// background.
pub async fn serve(listen_addr: &str) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();

    let listener = TcpListener::bind(listen_addr).await?;
    info!("metrics listening on {}", listener.local_addr()?);
    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        )
        .route("/health", get(|| async { "ok" }));
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            warn!("metrics server stopped: {err}");
        }
    });
    Ok(())
}

fn describe() {
    describe_counter!("sqlpump_query_submitted_total", Unit::Count, "Queries accepted by a connection");
    describe_counter!("sqlpump_query_rejected_total", Unit::Count, "Submissions refused by a connection");
    describe_counter!("sqlpump_query_completed_total", Unit::Count, "Queries completed with a result");
    describe_counter!("sqlpump_query_failed_total", Unit::Count, "Queries completed with an error");
    describe_counter!("sqlpump_connection_teardown_total", Unit::Count, "Connections torn down after a fatal failure");
}
