use order_service::app::{build_router, AppContext};
use order_service::services;
use postbox_infra::Config;
use postbox_observability::Metrics;

#[tokio::main]
async fn main() {
    postbox_observability::init("order-service");

    let config = Config::from_env("order-service");
    let metrics = Metrics::arc();

    let (service_graph, workers) = services::build(&config, metrics.clone()).await;

    let app = build_router(AppContext {
        services: service_graph.clone(),
        metrics,
        service_name: config.service_name.clone(),
    });

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080")
        .await
        .expect("failed to bind 0.0.0.0:8080");

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
