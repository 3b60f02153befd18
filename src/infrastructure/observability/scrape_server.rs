//! HTTP scrape endpoint for the pull exporter.

use super::prometheus_registry::PrometheusRegistry;
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use std::future::Future;
use tokio::net::TcpListener;
use tracing::{error, info};

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn router(registry: PrometheusRegistry) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .with_state(registry)
}

async fn metrics(State(registry): State<PrometheusRegistry>) -> Response {
    match registry.render() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!("ScrapeServer: failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn healthz() -> Response {
    (StatusCode::OK, "ok\n").into_response()
}

/// Serves `/metrics` and `/healthz` on an already bound listener until
/// `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    registry: PrometheusRegistry,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Scrape endpoint listening on http://{}/metrics", addr);
    }
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{PullSink, PullWrite};
    use crate::domain::labels::LabelSet;
    use crate::domain::types::{MetricDescriptor, MetricId, MetricKind, SeriesId, SeriesPoint};
    use std::sync::Arc;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_metrics_and_healthz_served() {
        let registry = PrometheusRegistry::new();
        let mut sink = registry.sink();
        sink.register(&MetricDescriptor::new(
            MetricId(0),
            "prom_queue_depth",
            MetricKind::Gauge,
            vec![],
        ))
        .unwrap();
        let point = SeriesPoint::new(
            MetricId(0),
            SeriesId(0),
            Arc::from("queue_depth"),
            Arc::new(LabelSet::empty()),
            7.0,
        );
        sink.write(&point, PullWrite::Set(7.0)).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, registry, async {
            rx.await.ok();
        }));

        let client = reqwest::Client::new();
        let body = client
            .get(format!("http://{}/metrics", addr))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("prom_queue_depth 7"));

        let health = client
            .get(format!("http://{}/healthz", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(health.status(), reqwest::StatusCode::OK);

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
