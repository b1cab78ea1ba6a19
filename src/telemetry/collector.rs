use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::error;

use super::event::{EventType, MetricType, MetricValue, TelemetryEvent};

pub const DEFAULT_MAX_EVENTS: usize = 10_000;
pub const DEFAULT_MAX_METRICS: usize = 1_000;

/// How many trailing events feed the summary histogram.
const SUMMARY_WINDOW: usize = 100;

pub type EventHandler = Box<dyn Fn(&TelemetryEvent) + Send + Sync>;
pub type MetricHandler = Box<dyn Fn(&MetricValue) + Send + Sync>;

/// Optional fields for a recorded event.
#[derive(Debug, Clone)]
pub struct EventDetails {
    pub data: HashMap<String, Value>,
    pub duration_ms: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
}

impl Default for EventDetails {
    fn default() -> Self {
        Self {
            data: HashMap::new(),
            duration_ms: None,
            success: true,
            error: None,
        }
    }
}

impl EventDetails {
    pub fn with_data(data: HashMap<String, Value>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Handle returned by `start_timer`. Carries the metric name directly,
/// so ending a timer never has to parse anything back out of an id.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    name: String,
    id: u64,
}

impl TimerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Aggregate view over the collector's buffers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySummary {
    pub agent_id: String,
    pub total_events: usize,
    pub total_metrics: usize,
    pub recent_event_counts: HashMap<String, u64>,
    pub error_count: u64,
    pub counters: HashMap<String, f64>,
    pub gauges: HashMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

struct Inner {
    events: VecDeque<TelemetryEvent>,
    metrics: VecDeque<MetricValue>,
    counters: HashMap<String, f64>,
    gauges: HashMap<String, f64>,
    active_timers: HashMap<u64, Instant>,
    next_timer_id: u64,
    event_handlers: Vec<EventHandler>,
    metric_handlers: Vec<MetricHandler>,
}

/// Thread-safe bounded store of timestamped events and metrics.
///
/// Both buffers evict their oldest entry once capacity is reached.
/// Registered handlers run inside the recording critical section, each
/// behind its own panic boundary: a misbehaving observer is logged and
/// skipped, never allowed to abort the recording or later handlers.
///
/// Cheap to clone; all clones share the same buffers. One collector per
/// process, owned by `AppState`.
#[derive(Clone)]
pub struct TelemetryCollector {
    agent_id: String,
    max_events: usize,
    max_metrics: usize,
    inner: Arc<Mutex<Inner>>,
}

impl fmt::Debug for TelemetryCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryCollector")
            .field("agent_id", &self.agent_id)
            .field("max_events", &self.max_events)
            .field("max_metrics", &self.max_metrics)
            .finish_non_exhaustive()
    }
}

impl TelemetryCollector {
    pub fn new(agent_id: impl Into<String>, max_events: usize, max_metrics: usize) -> Self {
        Self {
            agent_id: agent_id.into(),
            max_events,
            max_metrics,
            inner: Arc::new(Mutex::new(Inner {
                events: VecDeque::with_capacity(max_events.min(1024)),
                metrics: VecDeque::with_capacity(max_metrics.min(1024)),
                counters: HashMap::new(),
                gauges: HashMap::new(),
                active_timers: HashMap::new(),
                next_timer_id: 0,
                event_handlers: Vec::new(),
                metric_handlers: Vec::new(),
            })),
        }
    }

    pub fn with_defaults(agent_id: impl Into<String>) -> Self {
        Self::new(agent_id, DEFAULT_MAX_EVENTS, DEFAULT_MAX_METRICS)
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Register a handler invoked synchronously with every recorded event.
    pub async fn add_event_handler(&self, handler: EventHandler) {
        self.inner.lock().await.event_handlers.push(handler);
    }

    /// Register a handler invoked synchronously with every recorded metric.
    pub async fn add_metric_handler(&self, handler: MetricHandler) {
        self.inner.lock().await.metric_handlers.push(handler);
    }

    /// Record an event stamped with the current time and this collector's
    /// agent id, evicting the oldest event if the buffer is full.
    pub async fn record_event(&self, event_type: EventType, details: EventDetails) {
        let event = TelemetryEvent {
            event_type,
            timestamp: Utc::now(),
            agent_id: self.agent_id.clone(),
            data: details.data,
            duration_ms: details.duration_ms,
            success: details.success,
            error: details.error,
        };

        let mut inner = self.inner.lock().await;
        if inner.events.len() == self.max_events {
            inner.events.pop_front();
        }
        inner.events.push_back(event.clone());

        for handler in &inner.event_handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                error!(event_type = %event.event_type, "event handler panicked");
            }
        }
    }

    /// Record a metric sample, updating the counter total or gauge value
    /// for its name when applicable.
    pub async fn record_metric(
        &self,
        name: &str,
        value: f64,
        metric_type: MetricType,
        tags: HashMap<String, String>,
    ) {
        let metric = MetricValue {
            name: name.to_string(),
            value,
            metric_type,
            timestamp: Utc::now(),
            tags,
        };

        let mut inner = self.inner.lock().await;
        if inner.metrics.len() == self.max_metrics {
            inner.metrics.pop_front();
        }
        inner.metrics.push_back(metric.clone());

        match metric_type {
            MetricType::Counter => {
                *inner.counters.entry(name.to_string()).or_insert(0.0) += value;
            }
            MetricType::Gauge => {
                inner.gauges.insert(name.to_string(), value);
            }
            MetricType::Histogram | MetricType::Timer => {}
        }

        for handler in &inner.metric_handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&metric))).is_err() {
                error!(metric = %metric.name, "metric handler panicked");
            }
        }
    }

    pub async fn increment_counter(
        &self,
        name: &str,
        value: f64,
        tags: HashMap<String, String>,
    ) {
        self.record_metric(name, value, MetricType::Counter, tags)
            .await;
    }

    pub async fn set_gauge(&self, name: &str, value: f64, tags: HashMap<String, String>) {
        self.record_metric(name, value, MetricType::Gauge, tags).await;
    }

    /// Start a timer for `name`, returning a handle unique to this call.
    pub async fn start_timer(&self, name: &str) -> TimerHandle {
        let mut inner = self.inner.lock().await;
        let id = inner.next_timer_id;
        inner.next_timer_id += 1;
        inner.active_timers.insert(id, Instant::now());
        TimerHandle {
            name: name.to_string(),
            id,
        }
    }

    /// Stop a timer and record its elapsed milliseconds as a timer metric
    /// under the handle's original name. Returns `None` if the handle was
    /// already ended.
    pub async fn end_timer(
        &self,
        handle: TimerHandle,
        tags: HashMap<String, String>,
    ) -> Option<f64> {
        let started = {
            let mut inner = self.inner.lock().await;
            inner.active_timers.remove(&handle.id)?
        };
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.record_metric(&handle.name, duration_ms, MetricType::Timer, tags)
            .await;
        Some(duration_ms)
    }

    /// Time a unit of work, recording the duration whether the future
    /// resolves to success or failure.
    pub async fn time<Fut, T>(
        &self,
        name: &str,
        tags: HashMap<String, String>,
        work: Fut,
    ) -> T
    where
        Fut: Future<Output = T>,
    {
        let handle = self.start_timer(name).await;
        let out = work.await;
        self.end_timer(handle, tags).await;
        out
    }

    /// Read a filtered view of the event buffer, most recent last.
    /// `limit` keeps only the trailing entries.
    pub async fn get_events(
        &self,
        limit: Option<usize>,
        event_type: Option<EventType>,
    ) -> Vec<TelemetryEvent> {
        let inner = self.inner.lock().await;
        let mut events: Vec<TelemetryEvent> = match event_type {
            Some(kind) => inner
                .events
                .iter()
                .filter(|e| e.event_type == kind)
                .cloned()
                .collect(),
            None => inner.events.iter().cloned().collect(),
        };
        if let Some(limit) = limit {
            if events.len() > limit {
                events.drain(..events.len() - limit);
            }
        }
        events
    }

    /// Read a filtered view of the metric buffer, most recent last.
    pub async fn get_metrics(
        &self,
        limit: Option<usize>,
        metric_name: Option<&str>,
    ) -> Vec<MetricValue> {
        let inner = self.inner.lock().await;
        let mut metrics: Vec<MetricValue> = match metric_name {
            Some(name) => inner
                .metrics
                .iter()
                .filter(|m| m.name == name)
                .cloned()
                .collect(),
            None => inner.metrics.iter().cloned().collect(),
        };
        if let Some(limit) = limit {
            if metrics.len() > limit {
                metrics.drain(..metrics.len() - limit);
            }
        }
        metrics
    }

    /// Running total for a counter, if it has ever been incremented.
    pub async fn counter_total(&self, name: &str) -> Option<f64> {
        self.inner.lock().await.counters.get(name).copied()
    }

    /// Aggregate snapshot: totals, a type histogram over the last 100
    /// events with their error count, and current counter/gauge values.
    pub async fn get_summary(&self) -> TelemetrySummary {
        let inner = self.inner.lock().await;

        let recent = inner
            .events
            .iter()
            .rev()
            .take(SUMMARY_WINDOW)
            .collect::<Vec<_>>();

        let mut recent_event_counts: HashMap<String, u64> = HashMap::new();
        let mut error_count = 0u64;
        for event in &recent {
            *recent_event_counts
                .entry(event.event_type.as_str().to_string())
                .or_insert(0) += 1;
            if !event.success {
                error_count += 1;
            }
        }

        TelemetrySummary {
            agent_id: self.agent_id.clone(),
            total_events: inner.events.len(),
            total_metrics: inner.metrics.len(),
            recent_event_counts,
            error_count,
            counters: inner.counters.clone(),
            gauges: inner.gauges.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_buffer_evicts_oldest() {
        let collector = TelemetryCollector::new("a", 3, 10);
        for i in 0..4 {
            collector
                .record_event(
                    EventType::RequestStart,
                    EventDetails::with_data(HashMap::from([(
                        "seq".to_string(),
                        Value::from(i),
                    )])),
                )
                .await;
        }
        let events = collector.get_events(None, None).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].data["seq"], Value::from(1));
        assert_eq!(events[2].data["seq"], Value::from(3));
    }

    #[tokio::test]
    async fn test_counter_and_gauge_state() {
        let collector = TelemetryCollector::with_defaults("a");
        collector.increment_counter("c", 1.0, HashMap::new()).await;
        collector.increment_counter("c", 2.5, HashMap::new()).await;
        collector.set_gauge("g", 10.0, HashMap::new()).await;
        collector.set_gauge("g", 4.0, HashMap::new()).await;

        let summary = collector.get_summary().await;
        assert_eq!(summary.counters["c"], 3.5);
        assert_eq!(summary.gauges["g"], 4.0);
    }

    #[tokio::test]
    async fn test_timer_round_trip_and_double_end() {
        let collector = TelemetryCollector::with_defaults("a");
        let handle = collector.start_timer("op").await;
        let duration = collector
            .end_timer(handle.clone(), HashMap::new())
            .await
            .unwrap();
        assert!(duration >= 0.0);

        // ending the same timer again is a no-op
        assert!(collector.end_timer(handle, HashMap::new()).await.is_none());

        let metrics = collector.get_metrics(None, Some("op")).await;
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].metric_type, MetricType::Timer);
    }

    #[tokio::test]
    async fn test_timers_with_same_name_are_distinct() {
        let collector = TelemetryCollector::with_defaults("a");
        let first = collector.start_timer("op").await;
        let second = collector.start_timer("op").await;
        assert!(collector
            .end_timer(first, HashMap::new())
            .await
            .is_some());
        assert!(collector
            .end_timer(second, HashMap::new())
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_time_records_on_error_path() {
        let collector = TelemetryCollector::with_defaults("a");
        let result: Result<(), &str> = collector
            .time("risky", HashMap::new(), async { Err("boom") })
            .await;
        assert!(result.is_err());
        assert_eq!(collector.get_metrics(None, Some("risky")).await.len(), 1);
    }

    #[tokio::test]
    async fn test_get_events_filter_and_limit() {
        let collector = TelemetryCollector::with_defaults("a");
        collector
            .record_event(EventType::RequestStart, EventDetails::default())
            .await;
        collector
            .record_event(EventType::RequestEnd, EventDetails::default())
            .await;
        collector
            .record_event(EventType::RequestStart, EventDetails::default())
            .await;

        let starts = collector
            .get_events(None, Some(EventType::RequestStart))
            .await;
        assert_eq!(starts.len(), 2);

        let tail = collector.get_events(Some(1), None).await;
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].event_type, EventType::RequestStart);
    }

    #[tokio::test]
    async fn test_summary_counts_errors() {
        let collector = TelemetryCollector::with_defaults("a");
        collector
            .record_event(EventType::RequestEnd, EventDetails::default())
            .await;
        collector
            .record_event(EventType::ErrorOccurred, EventDetails::failure("boom"))
            .await;

        let summary = collector.get_summary().await;
        assert_eq!(summary.total_events, 2);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.recent_event_counts["error_occurred"], 1);
    }
}
