use postbox_infra::Config;
use postbox_observability::Metrics;
use processor_service::app::{build_router, AppContext};
use processor_service::services;

#[tokio::main]
async fn main() {
    postbox_observability::init("processor-service");

    let config = Config::from_env("processor-service");
    let metrics = Metrics::arc();

    let (service_graph, workers) = services::build(&config, metrics.clone()).await;

    let app = build_router(AppContext {
        services: service_graph.clone(),
        metrics,
        service_name: config.service_name.clone(),
    });

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8081")
        .await
        .expect("failed to bind 0.0.0.0:8081");

    tracing::info!(
        service = %config.service_name,
        "listening on {}",
        listener.local_addr().unwrap()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    tracing::info!(service = %config.service_name, "shutting down, draining workers");
    for worker in workers {
        worker.shutdown_within(config.drain_timeout).await;
    }
    service_graph.close_broker();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
