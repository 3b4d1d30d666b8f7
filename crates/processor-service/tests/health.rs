use std::time::Duration;

use reqwest::StatusCode;

use postbox_infra::Config;
use postbox_observability::Metrics;
use processor_service::app::{build_router, AppContext};
use processor_service::services;

async fn spawn_server() -> (
    String,
    tokio::task::JoinHandle<()>,
    Vec<postbox_infra::WorkerHandle>,
) {
    let config = Config {
        db_dsn: None,
        broker_url: None,
        service_name: "processor-service".to_string(),
        outbox_poll_interval: Duration::from_millis(50),
        outbox_batch_size: 100,
        max_retries: 3,
        consumer_prefetch: 10,
        drain_timeout: Duration::from_secs(5),
        embargo_skus: vec!["pineapple_pizza".to_string(), "teapot".to_string()],
        processing_success_prob: 0.8,
    };
    let metrics = Metrics::arc();
    let (service_graph, workers) = services::build(&config, metrics.clone()).await;

    let app = build_router(AppContext {
        services: service_graph,
        metrics,
        service_name: config.service_name.clone(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind ephemeral port");
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (base_url, handle, workers)
}

#[tokio::test]
async fn health_reports_ok() {
    let (base_url, handle, _workers) = spawn_server().await;

    let res = reqwest::get(format!("{base_url}/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["service"], "processor-service");
    assert_eq!(body["status"], "ok");

    handle.abort();
}

#[tokio::test]
async fn metrics_expose_counters() {
    let (base_url, handle, _workers) = spawn_server().await;

    let res = reqwest::get(format!("{base_url}/metrics")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let text = res.text().await.unwrap();
    assert!(text.contains("# TYPE orders_processed_total counter"));
    assert!(text.contains("events_published_total 0"));

    handle.abort();
}
