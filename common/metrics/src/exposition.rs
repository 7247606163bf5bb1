//! Line-oriented text exposition, compatible with Prometheus scrapers.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::histogram::{format_bound, HistogramSnapshot};
use crate::recorder::{Labels, MetricKind, MetricsSnapshot, Series, SeriesKey};

pub const METRIC_INTERNAL_ERRORS: &str = "metrics_recorder_internal_errors_total";
pub const METRIC_UPTIME: &str = "process_uptime_seconds";

struct Family {
    kind: MetricKind,
    total: &'static str,
    histogram: &'static str,
    /// Per-kind aggregate across every label set, rendered from the snapshot.
    overall: &'static str,
    /// Label carrying the series name, for kinds where callers pick it.
    name_label: Option<&'static str>,
}

const FAMILIES: [Family; 3] = [
    Family {
        kind: MetricKind::HttpRequest,
        total: "http_requests_total",
        histogram: "http_request_duration_ms",
        overall: "http_request_duration_ms_all",
        name_label: None,
    },
    Family {
        kind: MetricKind::DbQuery,
        total: "db_queries_total",
        histogram: "db_query_duration_ms",
        overall: "db_query_duration_ms_all",
        name_label: None,
    },
    Family {
        kind: MetricKind::Business,
        total: "business_events_total",
        histogram: "business_event_value",
        overall: "business_event_value_all",
        name_label: Some("metric"),
    },
];

static NO_LABELS: Labels = Labels::new();

fn kind_snapshot(snapshot: &MetricsSnapshot, kind: MetricKind) -> &HistogramSnapshot {
    match kind {
        MetricKind::HttpRequest => &snapshot.http,
        MetricKind::DbQuery => &snapshot.db,
        MetricKind::Business => &snapshot.business,
    }
}

pub(crate) fn render(series: &BTreeMap<SeriesKey, Series>, snapshot: &MetricsSnapshot) -> String {
    let mut out = String::new();

    for family in &FAMILIES {
        render_overall(&mut out, family.overall, kind_snapshot(snapshot, family.kind));

        let members: Vec<(Labels, HistogramSnapshot)> = series
            .iter()
            .filter(|(key, _)| key.kind == family.kind)
            .map(|(key, s)| {
                let mut labels = key.labels.clone();
                if let Some(name_label) = family.name_label {
                    labels.insert(name_label.to_string(), key.name.clone());
                }
                (labels, s.histogram.snapshot())
            })
            .collect();
        if members.is_empty() {
            continue;
        }

        let _ = writeln!(out, "# TYPE {} counter", family.total);
        for (labels, snapshot) in &members {
            line(&mut out, family.total, labels, None, snapshot.count as f64);
        }

        let _ = writeln!(out, "# TYPE {} histogram", family.histogram);
        for (labels, snapshot) in &members {
            histogram_lines(&mut out, family.histogram, labels, snapshot);
        }
    }

    let _ = writeln!(out, "# TYPE http_responses_total counter");
    for (class, count) in &snapshot.http_status_classes {
        line(&mut out, "http_responses_total", &NO_LABELS, Some(("class", class.as_str())), *count as f64);
    }
    let counters = [
        ("http_slow_requests_total", snapshot.slow_requests),
        ("db_query_failures_total", snapshot.db_failures),
        ("db_slow_queries_total", snapshot.slow_queries),
        ("metrics_series_dropped_total", snapshot.dropped_series),
        (METRIC_INTERNAL_ERRORS, snapshot.internal_errors),
    ];
    for (name, value) in counters {
        let _ = writeln!(out, "# TYPE {name} counter");
        let _ = writeln!(out, "{name} {value}");
    }
    let _ = writeln!(out, "# TYPE metrics_series gauge");
    let _ = writeln!(out, "metrics_series {}", snapshot.series_count);
    let _ = writeln!(out, "# TYPE {METRIC_UPTIME} gauge");
    let _ = writeln!(out, "{METRIC_UPTIME} {:.3}", snapshot.uptime_secs);

    out
}

/// Empty kinds are left out.
fn render_overall(out: &mut String, name: &str, snapshot: &HistogramSnapshot) {
    if snapshot.count == 0 {
        return;
    }

    let _ = writeln!(out, "# TYPE {name} histogram");
    histogram_lines(out, name, &NO_LABELS, snapshot);

    let quantile_name = format!("{name}_quantile");
    let _ = writeln!(out, "# TYPE {quantile_name} gauge");
    for (quantile, value) in [("0.5", snapshot.p50), ("0.95", snapshot.p95), ("0.99", snapshot.p99)] {
        line(out, &quantile_name, &NO_LABELS, Some(("quantile", quantile)), value);
    }
    for (suffix, value) in [("min", snapshot.min), ("max", snapshot.max)] {
        let _ = writeln!(out, "# TYPE {name}_{suffix} gauge");
        let _ = writeln!(out, "{name}_{suffix} {value}");
    }
}

fn histogram_lines(out: &mut String, name: &str, labels: &Labels, snapshot: &HistogramSnapshot) {
    let bucket_name = format!("{name}_bucket");
    for bucket in &snapshot.buckets {
        let le = format_bound(bucket.le);
        line(out, &bucket_name, labels, Some(("le", le.as_str())), bucket.cumulative as f64);
    }
    line(out, &format!("{name}_sum"), labels, None, snapshot.sum);
    line(out, &format!("{name}_count"), labels, None, snapshot.count as f64);
}

fn line(out: &mut String, name: &str, labels: &Labels, extra: Option<(&str, &str)>, value: f64) {
    out.push_str(name);
    if !labels.is_empty() || extra.is_some() {
        out.push('{');
        let mut first = true;
        for (k, v) in labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(extra)
        {
            if !first {
                out.push(',');
            }
            first = false;
            out.push_str(k);
            out.push_str("=\"");
            escape_into(out, v);
            out.push('"');
        }
        out.push('}');
    }
    let _ = writeln!(out, " {value}");
}

fn escape_into(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
}
