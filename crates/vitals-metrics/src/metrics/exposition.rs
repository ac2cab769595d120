//! Prometheus text exposition format, version 0.0.4.

use crate::metrics::types::{CollectedMetric, MetricValue};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Renders a registry snapshot. Never fails: a sample that cannot be rendered
/// sensibly still produces a line (`NaN`, `+Inf`) instead of aborting the body.
pub fn render(metrics: &[CollectedMetric]) -> String {
    let mut output = String::new();

    for metric in metrics {
        let name = &metric.descriptor.name;

        output.push_str("# HELP ");
        output.push_str(name);
        output.push(' ');
        output.push_str(&escape_help(&metric.descriptor.help));
        output.push('\n');

        output.push_str("# TYPE ");
        output.push_str(name);
        output.push(' ');
        output.push_str(metric.descriptor.metric_type.as_prometheus_type());
        output.push('\n');

        for sample in &metric.samples {
            match &sample.value {
                MetricValue::Counter(value) | MetricValue::Gauge(value) => {
                    render_sample_line(&mut output, name, &sample.labels, None, *value);
                }
                MetricValue::Info => {
                    render_sample_line(&mut output, name, &sample.labels, None, 1.0);
                }
                MetricValue::Histogram {
                    buckets,
                    count,
                    sum,
                } => {
                    let bucket_name = format!("{name}_bucket");
                    for (bound, cumulative) in buckets {
                        let le = format_bucket_bound(*bound);
                        render_sample_line(
                            &mut output,
                            &bucket_name,
                            &sample.labels,
                            Some(("le", &le)),
                            *cumulative as f64,
                        );
                    }

                    render_sample_line(
                        &mut output,
                        &format!("{name}_sum"),
                        &sample.labels,
                        None,
                        *sum,
                    );
                    render_sample_line(
                        &mut output,
                        &format!("{name}_count"),
                        &sample.labels,
                        None,
                        *count as f64,
                    );
                }
            }
        }
    }

    output
}

fn render_sample_line(
    output: &mut String,
    name: &str,
    labels: &[(String, String)],
    extra_label: Option<(&str, &str)>,
    value: f64,
) {
    output.push_str(name);

    let extra = extra_label.into_iter();
    let mut pairs = labels
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .chain(extra)
        .peekable();

    if pairs.peek().is_some() {
        output.push('{');
        for (index, (key, value)) in pairs.enumerate() {
            if index > 0 {
                output.push(',');
            }
            output.push_str(key);
            output.push_str("=\"");
            output.push_str(&escape_label_value(value));
            output.push('"');
        }
        output.push('}');
    }

    output.push(' ');
    output.push_str(&format_metric_value(value));
    output.push('\n');
}

fn format_metric_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

fn format_bucket_bound(value: f64) -> String {
    if value.is_infinite() {
        "+Inf".to_string()
    } else {
        value.to_string()
    }
}

fn escape_help(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('"', "\\\"")
}
