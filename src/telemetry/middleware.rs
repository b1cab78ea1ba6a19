use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

use super::collector::{EventDetails, TelemetryCollector};
use super::event::{EventType, MetricType};

/// Request-tracking middleware: wraps one inbound request's dispatch,
/// emitting start/end events and duration metrics into the collector.
///
/// The response always passes through unchanged; this layer only
/// observes. A 5xx status is treated as the handler fault path and
/// additionally records an `error_occurred` event plus an error counter.
pub async fn track_requests(
    State(collector): State<TelemetryCollector>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let client = client_addr(&request);

    collector
        .record_event(
            EventType::RequestStart,
            EventDetails::with_data(HashMap::from([
                ("method".to_string(), Value::from(method.clone())),
                ("path".to_string(), Value::from(path.clone())),
                ("client".to_string(), Value::from(client)),
            ])),
        )
        .await;
    collector
        .increment_counter(
            "http_requests_total",
            1.0,
            HashMap::from([("method".to_string(), method.clone())]),
        )
        .await;

    let response = next.run(request).await;

    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
    let status = response.status();

    collector
        .record_event(
            EventType::RequestEnd,
            EventDetails {
                data: HashMap::from([
                    ("method".to_string(), Value::from(method.clone())),
                    ("path".to_string(), Value::from(path.clone())),
                    ("status_code".to_string(), Value::from(status.as_u16())),
                ]),
                duration_ms: Some(duration_ms),
                success: status.as_u16() < 400,
                error: None,
            },
        )
        .await;
    collector
        .record_metric(
            "http_request_duration_ms",
            duration_ms,
            MetricType::Histogram,
            HashMap::from([
                ("method".to_string(), method.clone()),
                ("status_code".to_string(), status.as_u16().to_string()),
            ]),
        )
        .await;

    if status.is_server_error() {
        collector
            .record_event(
                EventType::ErrorOccurred,
                EventDetails {
                    data: HashMap::from([
                        ("method".to_string(), Value::from(method.clone())),
                        ("path".to_string(), Value::from(path)),
                        ("status_code".to_string(), Value::from(status.as_u16())),
                    ]),
                    duration_ms: Some(duration_ms),
                    success: false,
                    error: Some(format!("handler returned {status}")),
                },
            )
            .await;
        collector
            .increment_counter(
                "http_errors_total",
                1.0,
                HashMap::from([
                    ("method".to_string(), method),
                    ("status_code".to_string(), status.as_u16().to_string()),
                ]),
            )
            .await;
    }

    response
}

fn client_addr(request: &Request) -> String {
    request
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .or_else(|| {
            request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.split(',').next())
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}
