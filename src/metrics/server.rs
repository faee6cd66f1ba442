//! HTTP server for Prometheus metrics endpoint

use super::Metrics;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// HTTP server that exposes Prometheus metrics
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    addr: SocketAddr,
}

impl MetricsServer {
    pub fn new(metrics: Arc<Metrics>, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    /// Serve until `shutdown` flips to true or its sender is dropped
    pub async fn run(
        self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Metrics server listening on http://{}/metrics", self.addr);

        loop {
            let stream = tokio::select! {
                accepted = listener.accept() => accepted?.0,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Metrics server shutting down");
                        return Ok(());
                    }
                    continue;
                }
            };

            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let metrics = metrics.clone();
                    async move { handle_request(req, metrics).await }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    error!("Error serving metrics connection: {:?}", err);
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(route(req.uri().path(), &metrics))
}

fn route(path: &str, metrics: &Metrics) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => {
            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();
            match encoder.encode(&metrics.registry.gather(), &mut buffer) {
                Ok(_) => {
                    let mut response = Response::new(Full::new(Bytes::from(buffer)));
                    if let Ok(value) = encoder.format_type().parse() {
                        response
                            .headers_mut()
                            .insert(hyper::header::CONTENT_TYPE, value);
                    }
                    response
                }
                Err(e) => {
                    error!("Failed to encode metrics: {}", e);
                    text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics")
                }
            }
        }
        "/health" | "/healthz" => text(StatusCode::OK, "OK"),
        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let metrics = Metrics::new();
        metrics.polls_total.inc();

        let response = route("/metrics", &metrics);
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body(response).await.contains("busbridge_polls_total 1"));
    }

    #[tokio::test]
    async fn test_health_and_unknown_routes() {
        let metrics = Metrics::new();
        assert_eq!(route("/health", &metrics).status(), StatusCode::OK);
        assert_eq!(route("/nope", &metrics).status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_server_stops_on_shutdown() {
        let server = MetricsServer::new(
            Arc::new(Metrics::new()),
            SocketAddr::from(([127, 0, 0, 1], 0)),
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(server.run(rx));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("metrics server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
