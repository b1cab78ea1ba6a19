pub mod collector;
pub mod event;
pub mod export;
pub mod middleware;

pub use collector::{EventDetails, TelemetryCollector, TelemetrySummary, TimerHandle};
pub use event::{EventType, MetricType, MetricValue, TelemetryEvent};
pub use export::{TelemetryExport, TelemetryExporter};
