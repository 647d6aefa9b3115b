//! Prometheus metrics for rift-mongo-proxy.
//!
//! Tracks connection handling, relayed traffic, and fault injection activity.
//! When a metrics address is configured, `serve_metrics` exposes them over
//! HTTP.

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_int_counter, CounterVec, Encoder, IntCounter, TextEncoder,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

lazy_static! {
    /// Client connections accepted by the listener
    pub static ref CONNECTIONS_TOTAL: IntCounter = register_int_counter!(
        "rift_mongo_connections_total",
        "Total number of client connections accepted"
    )
    .expect("metric registration");

    /// Upstream dials that failed (client connection dropped)
    pub static ref DIAL_FAILURES_TOTAL: IntCounter = register_int_counter!(
        "rift_mongo_dial_failures_total",
        "Total number of failed dials to the resolved target"
    )
    .expect("metric registration");

    /// Wire messages relayed, by direction
    pub static ref MESSAGES_RELAYED_TOTAL: CounterVec = register_counter_vec!(
        "rift_mongo_messages_relayed_total",
        "Total number of framed wire messages relayed; passthrough traffic is counted in bytes",
        &["direction"]  // direction: client_to_server|server_to_client
    )
    .expect("metric registration");

    /// proxyTest instructions registered
    pub static ref INSTRUCTIONS_TOTAL: CounterVec = register_counter_vec!(
        "rift_mongo_instructions_total",
        "Total number of proxyTest instructions registered",
        &["outcome"]  // outcome: registered|overwritten|ignored
    )
    .expect("metric registration");

    /// Executed fault actions, by kind
    pub static ref ACTIONS_TOTAL: CounterVec = register_counter_vec!(
        "rift_mongo_actions_total",
        "Total number of fault actions executed",
        &["kind"]  // kind: delay|send_bytes|send_all
    )
    .expect("metric registration");

    /// Reply bytes copied without framing once a fault instruction completed
    pub static ref PASSTHROUGH_BYTES_TOTAL: IntCounter = register_int_counter!(
        "rift_mongo_passthrough_bytes_total",
        "Total number of reply bytes copied unframed after a fault instruction completed"
    )
    .expect("metric registration");

    /// Replies intentionally left incomplete
    pub static ref PARTIAL_REPLIES_TOTAL: IntCounter = register_int_counter!(
        "rift_mongo_partial_replies_total",
        "Total number of replies short-sent and followed by a half-close"
    )
    .expect("metric registration");

    /// Connections torn down for a malformed proxyTest block
    pub static ref DSL_ERRORS_TOTAL: IntCounter = register_int_counter!(
        "rift_mongo_dsl_errors_total",
        "Total number of proxyTest parse errors"
    )
    .expect("metric registration");
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_connection() {
    CONNECTIONS_TOTAL.inc();
}

pub fn record_dial_failure() {
    DIAL_FAILURES_TOTAL.inc();
}

pub fn record_message(direction: &str) {
    MESSAGES_RELAYED_TOTAL.with_label_values(&[direction]).inc();
}

pub fn record_instruction(outcome: &str) {
    INSTRUCTIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_action(kind: &str) {
    ACTIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_passthrough_bytes(bytes: u64) {
    PASSTHROUGH_BYTES_TOTAL.inc_by(bytes);
}

pub fn record_partial_reply() {
    PARTIAL_REPLIES_TOTAL.inc();
}

pub fn record_dsl_error() {
    DSL_ERRORS_TOTAL.inc();
}

/// Serve `GET /metrics` and `GET /health` until the listener fails.
pub async fn serve_metrics(addr: SocketAddr) -> Result<(), anyhow::Error> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics listening on http://{}", listener.local_addr()?);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_metrics_request))
                .await
            {
                debug!("Metrics connection error: {}", e);
            }
        });
    }
}

async fn handle_metrics_request<B>(req: Request<B>) -> Result<Response<Full<Bytes>>, Infallible> {
    let (status, content_type, body) = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => (
            StatusCode::OK,
            "text/plain; version=0.0.4",
            collect_metrics(),
        ),
        (&Method::GET, "/health") => (
            StatusCode::OK,
            "application/json",
            r#"{"status":"ok"}"#.to_string(),
        ),
        _ => (StatusCode::NOT_FOUND, "text/plain", "not found".to_string()),
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(content_type),
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_metrics_includes_recorded_series() {
        record_connection();
        record_message("client_to_server");
        record_action("delay");
        record_passthrough_bytes(16);

        let text = collect_metrics();
        assert!(text.contains("rift_mongo_connections_total"));
        assert!(text.contains("rift_mongo_messages_relayed_total{direction=\"client_to_server\"}"));
        assert!(text.contains("rift_mongo_actions_total{kind=\"delay\"}"));
        assert!(text.contains("rift_mongo_passthrough_bytes_total"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_routes() {
        let req = Request::builder().uri("/health").body(()).unwrap();
        let resp = handle_metrics_request(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let req = Request::builder().uri("/metrics").body(()).unwrap();
        let resp = handle_metrics_request(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "text/plain; version=0.0.4"
        );

        let req = Request::builder().uri("/nope").body(()).unwrap();
        let resp = handle_metrics_request(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
