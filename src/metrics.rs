//! Prometheus exposition of channel gauges and pipeline counters.
//!
//! Every non-text channel gets one gauge named `hargassner_<group>_<id>`,
//! holding the last value applied to it (forwarded to the bus or not).

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::RwLock;

use crate::channel::{ALL_CHANNELS, Channel, Value};
use crate::stats::PipelineStats;

#[derive(Debug, Clone)]
struct Gauge {
    help: &'static str,
    value: f64,
}

/// Last numeric value of every non-text channel.
#[derive(Debug)]
pub struct ChannelGauges {
    gauges: RwLock<BTreeMap<String, Gauge>>,
}

impl ChannelGauges {
    /// Register a zeroed gauge for every declared numeric channel.
    pub fn new() -> Self {
        let gauges = ALL_CHANNELS
            .iter()
            .filter(|c| c.kind.is_numeric())
            .map(|c| {
                (
                    c.gauge_name(),
                    Gauge {
                        help: c.name_de,
                        value: 0.0,
                    },
                )
            })
            .collect();
        Self {
            gauges: RwLock::new(gauges),
        }
    }

    /// Apply a channel value. Text channels and blank values are ignored.
    pub fn set(&self, channel: &Channel, value: &Value) {
        let Some(reading) = value.as_gauge() else {
            return;
        };
        if let Ok(mut gauges) = self.gauges.write()
            && let Some(gauge) = gauges.get_mut(&channel.gauge_name())
        {
            gauge.value = reading;
        }
    }

    /// Current reading of `channel`'s gauge.
    pub fn get(&self, channel: &Channel) -> Option<f64> {
        self.gauges
            .read()
            .ok()?
            .get(&channel.gauge_name())
            .map(|g| g.value)
    }
}

impl Default for ChannelGauges {
    fn default() -> Self {
        Self::new()
    }
}

fn push_metric(
    output: &mut String,
    name: &str,
    kind: &str,
    help: &str,
    value: impl std::fmt::Display,
) {
    let _ = writeln!(output, "# HELP {} {}", name, help);
    let _ = writeln!(output, "# TYPE {} {}", name, kind);
    let _ = writeln!(output, "{} {}", name, value);
}

/// Format gauges and statistics as Prometheus text format.
pub fn format_prometheus_metrics(gauges: &ChannelGauges, stats: &PipelineStats) -> String {
    let mut output = String::with_capacity(4096);

    if let Ok(gauges) = gauges.gauges.read() {
        for (name, gauge) in gauges.iter() {
            push_metric(&mut output, name, "gauge", gauge.help, gauge.value);
        }
    }

    let summary = stats.summary();
    let counters = [
        ("hargassner_monitor_lines_total", "Lines read from the serial line", summary.lines),
        (
            "hargassner_monitor_bytes_processed_total",
            "Total bytes of raw input processed",
            summary.bytes_processed,
        ),
        (
            "hargassner_monitor_process_value_records_total",
            "Process value records received",
            summary.process_value_records,
        ),
        ("hargassner_monitor_event_records_total", "Event records received", summary.event_records),
        (
            "hargassner_monitor_unknown_records_total",
            "Records with an unknown type",
            summary.unknown_records,
        ),
        (
            "hargassner_monitor_rejected_records_total",
            "Lines or records dropped as malformed",
            summary.rejected_records,
        ),
        (
            "hargassner_monitor_field_failures_total",
            "Process value fields that failed to convert",
            summary.field_failures,
        ),
        (
            "hargassner_monitor_forwarded_values_total",
            "Values forwarded to the bus",
            summary.forwarded_values,
        ),
        (
            "hargassner_monitor_suppressed_values_total",
            "Values held back because they did not change",
            summary.suppressed_values,
        ),
    ];
    for (name, help, value) in counters {
        push_metric(&mut output, name, "counter", help, value);
    }

    push_metric(
        &mut output,
        "hargassner_monitor_uptime_seconds",
        "gauge",
        "Time since the monitor started",
        format!("{:.3}", summary.elapsed_secs),
    );

    output
}
