use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::info;

use super::collector::{TelemetryCollector, TelemetrySummary};
use super::event::{MetricValue, TelemetryEvent};

/// Full dump of a collector's state as written by `export_to_file`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TelemetryExport {
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub events: Vec<TelemetryEvent>,
    pub metrics: Vec<MetricValue>,
    pub summary: TelemetrySummary,
}

/// Serializes collector contents to an external sink.
#[derive(Debug, Clone)]
pub struct TelemetryExporter {
    collector: TelemetryCollector,
}

impl TelemetryExporter {
    pub fn new(collector: TelemetryCollector) -> Self {
        Self { collector }
    }

    pub async fn snapshot(&self) -> TelemetryExport {
        TelemetryExport {
            agent_id: self.collector.agent_id().to_string(),
            timestamp: Utc::now(),
            events: self.collector.get_events(None, None).await,
            metrics: self.collector.get_metrics(None, None).await,
            summary: self.collector.get_summary().await,
        }
    }

    /// Write the full event/metric history plus summary as one JSON
    /// document, overwriting any existing file at `path`.
    pub async fn export_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let export = self.snapshot().await;
        let json = serde_json::to_vec_pretty(&export).context("serializing telemetry export")?;
        tokio::fs::write(path.as_ref(), json)
            .await
            .with_context(|| format!("writing telemetry export to {}", path.as_ref().display()))?;
        info!(path = %path.as_ref().display(), "exported telemetry data");
        Ok(())
    }

    /// Write the summary in a fixed human-readable layout.
    pub async fn write_summary<W: Write>(&self, out: &mut W) -> Result<()> {
        let summary = self.collector.get_summary().await;
        writeln!(out, "=== Telemetry Summary for {} ===", summary.agent_id)?;
        writeln!(out, "Total Events: {}", summary.total_events)?;
        writeln!(out, "Total Metrics: {}", summary.total_metrics)?;
        writeln!(out, "Error Count: {}", summary.error_count)?;
        writeln!(out, "Event Counts: {:?}", summary.recent_event_counts)?;
        writeln!(out, "Counters: {:?}", summary.counters)?;
        writeln!(out, "Gauges: {:?}", summary.gauges)?;
        writeln!(out, "{}", "=".repeat(50))?;
        Ok(())
    }
}
