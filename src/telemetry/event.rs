use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Kinds of telemetry events recorded by agent processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentStart,
    AgentStop,
    RequestStart,
    RequestEnd,
    ThemeGenerated,
    StrategyDeveloped,
    ErrorOccurred,
    AuthSuccess,
    AuthFailure,
    RateLimitHit,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AgentStart => "agent_start",
            EventType::AgentStop => "agent_stop",
            EventType::RequestStart => "request_start",
            EventType::RequestEnd => "request_end",
            EventType::ThemeGenerated => "theme_generated",
            EventType::StrategyDeveloped => "strategy_developed",
            EventType::ErrorOccurred => "error_occurred",
            EventType::AuthSuccess => "auth_success",
            EventType::AuthFailure => "auth_failure",
            EventType::RateLimitHit => "rate_limit_hit",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of metrics. Counters keep a running total keyed by name,
/// gauges keep a last value keyed by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Timer,
}

/// One recorded telemetry event. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub data: HashMap<String, Value>,
    pub duration_ms: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
}

/// One recorded metric sample. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricValue {
    pub name: String,
    pub value: f64,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub timestamp: DateTime<Utc>,
    pub tags: HashMap<String, String>,
}
