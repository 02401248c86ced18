//! Output formatting and persistence for aggregate tables.
//!
//! Supports pretty-printing, JSON serialization, and flat CSV export.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use csv::WriterBuilder;
use tracing::{debug, info};

use crate::aggregate::{AggregateRow, Metric, MetricValue};
use crate::error::Result;

/// Renders rows as one line per group: key, record count, then metrics.
pub fn render_pretty(rows: &[AggregateRow]) -> String {
    let mut out = String::new();
    for row in rows {
        out.push_str(&format!("{} (n={})", row.key, row.record_count));
        for value in &row.metrics {
            out.push_str("  ");
            out.push_str(&render_metric(value));
        }
        out.push('\n');
    }
    out
}

fn render_metric(value: &MetricValue) -> String {
    let opt = |v: &Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"));
    match value {
        MetricValue::PunctualityRate(v) => format!("punctuality_rate={}", opt(v)),
        MetricValue::MeanDelay(v) => format!("mean_delay={}", opt(v)),
        MetricValue::CancelRate(v) => format!("cancel_rate={}", opt(v)),
        MetricValue::Counts(c) => format!(
            "scheduled={} cancelled={} delayed={} late_over_15={} late_over_30={} late_over_60={}",
            c.scheduled, c.cancelled, c.delayed, c.late_over_15, c.late_over_30, c.late_over_60
        ),
        MetricValue::CauseShare(shares) => {
            let parts: Vec<String> = shares.iter().map(|(k, v)| format!("{k}:{v:.3}")).collect();
            format!("cause_share=[{}]", parts.join(" "))
        }
    }
}

/// Logs aggregate rows in a compact human-readable layout.
pub fn print_pretty(rows: &[AggregateRow]) {
    for line in render_pretty(rows).lines() {
        info!("{line}");
    }
}

/// Logs aggregate rows as pretty-printed JSON.
pub fn print_json(rows: &[AggregateRow]) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(rows)?);
    Ok(())
}

const COUNT_COLUMNS: [&str; 6] = [
    "scheduled",
    "cancelled",
    "delayed",
    "late_over_15",
    "late_over_30",
    "late_over_60",
];

/// Column layout of a flattened table, taken from the first row's key and
/// metrics. Cause columns cover every category seen in any row.
fn table_header(rows: &[AggregateRow]) -> (Vec<String>, BTreeSet<String>) {
    let Some(first) = rows.first() else {
        return (Vec::new(), BTreeSet::new());
    };

    let causes: BTreeSet<String> = rows
        .iter()
        .filter_map(|r| r.cause_share())
        .flat_map(|shares| shares.keys().cloned())
        .collect();

    let mut header: Vec<String> = first
        .key
        .parts()
        .iter()
        .map(|p| p.dimension().name().to_string())
        .collect();
    header.push("record_count".to_string());

    for value in &first.metrics {
        match value.metric() {
            Metric::Counts => {
                for col in COUNT_COLUMNS {
                    header.push(col.to_string());
                }
            }
            Metric::CauseShare => {
                for cause in &causes {
                    header.push(format!("cause_share.{cause}"));
                }
            }
            metric => header.push(metric.name().to_string()),
        }
    }

    (header, causes)
}

fn table_record(row: &AggregateRow, causes: &BTreeSet<String>) -> Vec<String> {
    let cell = |v: &Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();

    let mut record: Vec<String> = row.key.parts().iter().map(|p| p.to_string()).collect();
    record.push(row.record_count.to_string());

    for value in &row.metrics {
        match value {
            MetricValue::PunctualityRate(v) | MetricValue::MeanDelay(v) | MetricValue::CancelRate(v) => {
                record.push(cell(v))
            }
            MetricValue::Counts(c) => {
                for n in [
                    c.scheduled,
                    c.cancelled,
                    c.delayed,
                    c.late_over_15,
                    c.late_over_30,
                    c.late_over_60,
                ] {
                    record.push(n.to_string());
                }
            }
            MetricValue::CauseShare(shares) => {
                for cause in causes {
                    record.push(cell(&shares.get(cause).copied()));
                }
            }
        }
    }
    record
}

/// Writes rows as a flat CSV table: one column per key dimension, the record
/// count, then one column per metric (`cause_share.<category>` for shares).
/// Undefined values are empty cells.
pub fn write_table_csv<W: Write>(writer: W, rows: &[AggregateRow]) -> Result<()> {
    let (header, causes) = table_header(rows);
    let mut writer = WriterBuilder::new().from_writer(writer);

    if !header.is_empty() {
        writer.write_record(&header)?;
    }
    for row in rows {
        writer.write_record(table_record(row, &causes))?;
    }
    writer.flush()?;
    Ok(())
}

/// Saves the CSV table to `path`, replacing any existing file.
pub fn save_table_csv(path: &Path, rows: &[AggregateRow]) -> Result<()> {
    debug!(path = %path.display(), rows = rows.len(), "Writing CSV table");
    let file = File::create(path)?;
    write_table_csv(file, rows)
}
