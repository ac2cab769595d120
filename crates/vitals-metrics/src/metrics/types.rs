#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Info,
}

impl MetricType {
    pub fn as_prometheus_type(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge | Self::Info => "gauge",
            Self::Histogram => "histogram",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::Info => "info",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricDescriptor {
    pub name: String,
    pub help: String,
    pub metric_type: MetricType,
    pub variable_labels: Vec<String>,
    /// Upper bounds of the finite histogram buckets. Empty for other kinds.
    pub buckets: Vec<f64>,
}

impl MetricDescriptor {
    pub fn counter(name: &str, help: &str, variable_labels: &[&str]) -> Self {
        Self::new(name, help, MetricType::Counter, variable_labels, Vec::new())
    }

    pub fn gauge(name: &str, help: &str, variable_labels: &[&str]) -> Self {
        Self::new(name, help, MetricType::Gauge, variable_labels, Vec::new())
    }

    pub fn histogram(name: &str, help: &str, variable_labels: &[&str], buckets: &[f64]) -> Self {
        Self::new(
            name,
            help,
            MetricType::Histogram,
            variable_labels,
            buckets.to_vec(),
        )
    }

    pub fn info(name: &str, help: &str) -> Self {
        Self::new(name, help, MetricType::Info, &[], Vec::new())
    }

    fn new(
        name: &str,
        help: &str,
        metric_type: MetricType,
        variable_labels: &[&str],
        buckets: Vec<f64>,
    ) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            metric_type,
            variable_labels: variable_labels.iter().map(|label| (*label).to_string()).collect(),
            buckets,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter(f64),
    Gauge(f64),
    /// `buckets` holds cumulative counts per upper bound, ending with `+Inf`.
    Histogram {
        buckets: Vec<(f64, u64)>,
        count: u64,
        sum: f64,
    },
    Info,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub labels: Vec<(String, String)>,
    pub value: MetricValue,
}

#[derive(Debug, Clone)]
pub struct CollectedMetric {
    pub descriptor: MetricDescriptor,
    pub samples: Vec<MetricSample>,
}

impl CollectedMetric {
    pub fn sample(&self, label_values: &[&str]) -> Option<&MetricSample> {
        self.samples.iter().find(|sample| {
            sample.labels.len() == label_values.len()
                && sample
                    .labels
                    .iter()
                    .zip(label_values)
                    .all(|((_, value), expected)| value == expected)
        })
    }
}
