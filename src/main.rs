use std::net::SocketAddr;

use axum::routing::get;
use ldap_folder::{app, initialize_state, telemetry};
use tokio::net::TcpListener;
use tokio::signal;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(%err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(err) => {
                tracing::error!(%err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();
    let tracer = telemetry::setup_tracing(endpoint.as_deref())?;
    let recorder = telemetry::setup_metrics_recorder()?;

    let state = initialize_state();
    let address = state.config.address.clone();

    let app = app(state).route(
        "/metrics",
        get(move || std::future::ready(recorder.render())),
    );

    let listener = TcpListener::bind(&address).await?;
    tracing::info!(%address, "ldap folder listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(provider) = tracer {
        if let Err(err) = provider.shutdown() {
            tracing::error!(?err, "failed to flush traces");
        }
    }
    Ok(())
}
