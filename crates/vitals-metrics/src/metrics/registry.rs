use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, OnceLock, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use vitals_common::error::{Result, VitalsError};

use crate::metrics::{
    exposition,
    types::{CollectedMetric, MetricDescriptor, MetricSample, MetricType, MetricValue},
};

pub const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

type LabelValues = Vec<String>;

trait RegisteredMetric: Send + Sync {
    fn descriptor(&self) -> &MetricDescriptor;
    fn collect(&self) -> Vec<MetricSample>;
}

/// Handle returned by [`MetricsRegistry::register`]; every update goes through it.
#[derive(Clone)]
pub enum MetricHandle {
    Counter(Arc<CounterMetric>),
    Gauge(Arc<GaugeMetric>),
    Histogram(Arc<HistogramMetric>),
    Info(Arc<InfoMetric>),
}

impl MetricHandle {
    pub fn descriptor(&self) -> &MetricDescriptor {
        match self {
            Self::Counter(metric) => metric.descriptor(),
            Self::Gauge(metric) => metric.descriptor(),
            Self::Histogram(metric) => metric.descriptor(),
            Self::Info(metric) => metric.descriptor(),
        }
    }

    pub fn increment(&self, labels: &[&str], delta: f64) -> Result<()> {
        match self {
            Self::Counter(metric) => metric.inc(labels, delta),
            Self::Gauge(metric) => {
                if delta.is_nan() || delta < 0.0 {
                    return Err(invalid_value(metric.descriptor(), "increment must be >= 0"));
                }
                metric.add(labels, delta)
            }
            _ => Err(self.unsupported("increment")),
        }
    }

    pub fn set(&self, labels: &[&str], value: f64) -> Result<()> {
        match self {
            Self::Gauge(metric) => metric.set(labels, value),
            _ => Err(self.unsupported("set")),
        }
    }

    pub fn observe(&self, labels: &[&str], value: f64) -> Result<()> {
        match self {
            Self::Histogram(metric) => metric.observe(labels, value),
            _ => Err(self.unsupported("observe")),
        }
    }

    fn unsupported(&self, operation: &'static str) -> VitalsError {
        let descriptor = self.descriptor();
        VitalsError::UnsupportedOperation {
            metric: descriptor.name.clone(),
            kind: descriptor.metric_type.as_str(),
            operation,
        }
    }

    fn registered(&self) -> Arc<dyn RegisteredMetric> {
        match self {
            Self::Counter(metric) => metric.clone(),
            Self::Gauge(metric) => metric.clone(),
            Self::Histogram(metric) => metric.clone(),
            Self::Info(metric) => metric.clone(),
        }
    }
}

pub struct MetricsRegistry {
    metrics: RwLock<HashMap<String, Arc<dyn RegisteredMetric>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, descriptor: MetricDescriptor) -> Result<MetricHandle> {
        validate_descriptor(&descriptor)?;

        let handle = match descriptor.metric_type {
            MetricType::Counter => MetricHandle::Counter(Arc::new(CounterMetric::new(descriptor))),
            MetricType::Gauge => MetricHandle::Gauge(Arc::new(GaugeMetric::new(descriptor))),
            MetricType::Histogram => {
                MetricHandle::Histogram(Arc::new(HistogramMetric::new(descriptor)?))
            }
            MetricType::Info => MetricHandle::Info(Arc::new(InfoMetric::new(descriptor))),
        };

        let name = handle.descriptor().name.clone();
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        if metrics.contains_key(&name) {
            return Err(VitalsError::DuplicateMetricName(name));
        }

        metrics.insert(name, handle.registered());
        Ok(handle)
    }

    pub fn register_counter(
        &self,
        name: &str,
        help: &str,
        variable_labels: &[&str],
    ) -> Result<Arc<CounterMetric>> {
        match self.register(MetricDescriptor::counter(name, help, variable_labels))? {
            MetricHandle::Counter(metric) => Ok(metric),
            _ => unreachable!("counter descriptor registers a counter"),
        }
    }

    pub fn register_gauge(
        &self,
        name: &str,
        help: &str,
        variable_labels: &[&str],
    ) -> Result<Arc<GaugeMetric>> {
        match self.register(MetricDescriptor::gauge(name, help, variable_labels))? {
            MetricHandle::Gauge(metric) => Ok(metric),
            _ => unreachable!("gauge descriptor registers a gauge"),
        }
    }

    pub fn register_histogram(
        &self,
        name: &str,
        help: &str,
        variable_labels: &[&str],
        buckets: &[f64],
    ) -> Result<Arc<HistogramMetric>> {
        match self.register(MetricDescriptor::histogram(name, help, variable_labels, buckets))? {
            MetricHandle::Histogram(metric) => Ok(metric),
            _ => unreachable!("histogram descriptor registers a histogram"),
        }
    }

    pub fn register_info(&self, name: &str, help: &str) -> Result<Arc<InfoMetric>> {
        match self.register(MetricDescriptor::info(name, help))? {
            MetricHandle::Info(metric) => Ok(metric),
            _ => unreachable!("info descriptor registers an info metric"),
        }
    }

    /// Reads every series once. Series are read one at a time, so values of
    /// different series may come from slightly different instants.
    pub fn snapshot(&self) -> Vec<CollectedMetric> {
        let metrics = {
            let guard = self.metrics.read().unwrap_or_else(PoisonError::into_inner);
            guard.values().cloned().collect::<Vec<_>>()
        };

        let mut collected = metrics
            .iter()
            .map(|metric| CollectedMetric {
                descriptor: metric.descriptor().clone(),
                samples: metric.collect(),
            })
            .collect::<Vec<_>>();

        collected.sort_by(|left, right| left.descriptor.name.cmp(&right.descriptor.name));
        collected
    }

    pub fn render_prometheus(&self) -> String {
        exposition::render(&self.snapshot())
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Label-value tuple to series map. Lookups share a read lock; only the first
/// observation of a label combination takes the write lock. Updates happen on
/// the returned series after the map lock is released.
struct SeriesMap<T> {
    series: RwLock<HashMap<LabelValues, Arc<T>>>,
}

impl<T> SeriesMap<T> {
    fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_create(
        &self,
        descriptor: &MetricDescriptor,
        labels: &[&str],
        init: impl FnOnce() -> T,
    ) -> Result<Arc<T>> {
        let expected = descriptor.variable_labels.len();
        if labels.len() != expected {
            return Err(VitalsError::LabelArityMismatch {
                metric: descriptor.name.clone(),
                expected,
                actual: labels.len(),
            });
        }

        let label_values = to_label_values(labels);
        {
            // Entries are only ever inserted, so a poisoned map is still consistent.
            let guard = self.series.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = guard.get(&label_values) {
                return Ok(existing.clone());
            }
        }

        let mut guard = self.series.write().unwrap_or_else(PoisonError::into_inner);
        Ok(guard
            .entry(label_values)
            .or_insert_with(|| Arc::new(init()))
            .clone())
    }

    fn get(&self, labels: &[&str]) -> Option<Arc<T>> {
        let guard = self.series.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(&to_label_values(labels)).cloned()
    }

    fn entries(&self) -> Vec<(LabelValues, Arc<T>)> {
        let mut entries = {
            let guard = self.series.read().unwrap_or_else(PoisonError::into_inner);
            guard
                .iter()
                .map(|(labels, series)| (labels.clone(), series.clone()))
                .collect::<Vec<_>>()
        };
        entries.sort_by(|left, right| left.0.cmp(&right.0));
        entries
    }
}

/// `f64` stored as raw bits so counters and gauges stay lock-free.
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    fn fetch_add(&self, delta: f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

pub struct CounterMetric {
    descriptor: MetricDescriptor,
    series: SeriesMap<AtomicF64>,
}

impl CounterMetric {
    fn new(descriptor: MetricDescriptor) -> Self {
        Self {
            descriptor,
            series: SeriesMap::new(),
        }
    }

    pub fn inc(&self, labels: &[&str], value: f64) -> Result<()> {
        if value.is_nan() || value < 0.0 {
            return Err(invalid_value(&self.descriptor, "counter increment must be >= 0"));
        }

        let series = self
            .series
            .get_or_create(&self.descriptor, labels, || AtomicF64::new(0.0))?;
        series.fetch_add(value);
        Ok(())
    }

    pub fn inc_one(&self, labels: &[&str]) -> Result<()> {
        self.inc(labels, 1.0)
    }

    /// Current value of one series; `None` until the series is first touched.
    pub fn get(&self, labels: &[&str]) -> Option<f64> {
        self.series.get(labels).map(|series| series.load())
    }
}

impl RegisteredMetric for CounterMetric {
    fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    fn collect(&self) -> Vec<MetricSample> {
        self.series
            .entries()
            .into_iter()
            .map(|(label_values, value)| MetricSample {
                labels: materialize_labels(&self.descriptor, &label_values),
                value: MetricValue::Counter(value.load()),
            })
            .collect()
    }
}

pub struct GaugeMetric {
    descriptor: MetricDescriptor,
    series: SeriesMap<AtomicF64>,
}

impl GaugeMetric {
    fn new(descriptor: MetricDescriptor) -> Self {
        Self {
            descriptor,
            series: SeriesMap::new(),
        }
    }

    pub fn set(&self, labels: &[&str], value: f64) -> Result<()> {
        let series = self
            .series
            .get_or_create(&self.descriptor, labels, || AtomicF64::new(0.0))?;
        series.store(value);
        Ok(())
    }

    pub fn add(&self, labels: &[&str], delta: f64) -> Result<()> {
        let series = self
            .series
            .get_or_create(&self.descriptor, labels, || AtomicF64::new(0.0))?;
        series.fetch_add(delta);
        Ok(())
    }

    pub fn inc(&self, labels: &[&str]) -> Result<()> {
        self.add(labels, 1.0)
    }

    pub fn dec(&self, labels: &[&str]) -> Result<()> {
        self.add(labels, -1.0)
    }

    pub fn get(&self, labels: &[&str]) -> Option<f64> {
        self.series.get(labels).map(|series| series.load())
    }
}

impl RegisteredMetric for GaugeMetric {
    fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    fn collect(&self) -> Vec<MetricSample> {
        self.series
            .entries()
            .into_iter()
            .map(|(label_values, value)| MetricSample {
                labels: materialize_labels(&self.descriptor, &label_values),
                value: MetricValue::Gauge(value.load()),
            })
            .collect()
    }
}

pub struct HistogramMetric {
    descriptor: MetricDescriptor,
    series: SeriesMap<Mutex<HistogramState>>,
}

/// Non-cumulative per-bucket counts; the last slot is the `+Inf` bucket.
struct HistogramState {
    bucket_counts: Vec<u64>,
    count: u64,
    sum: f64,
}

impl HistogramMetric {
    fn new(mut descriptor: MetricDescriptor) -> Result<Self> {
        descriptor.buckets = normalize_buckets(&descriptor.name, &descriptor.buckets)?;
        Ok(Self {
            descriptor,
            series: SeriesMap::new(),
        })
    }

    pub fn buckets(&self) -> &[f64] {
        &self.descriptor.buckets
    }

    pub fn observe(&self, labels: &[&str], value: f64) -> Result<()> {
        if value.is_nan() {
            return Err(invalid_value(&self.descriptor, "observation is NaN"));
        }

        let buckets = &self.descriptor.buckets;
        let series = self.series.get_or_create(&self.descriptor, labels, || {
            Mutex::new(HistogramState {
                bucket_counts: vec![0; buckets.len() + 1],
                count: 0,
                sum: 0.0,
            })
        })?;

        let bucket_index = buckets
            .iter()
            .position(|bucket| value <= *bucket)
            .unwrap_or(buckets.len());

        let mut state = series.lock().unwrap_or_else(PoisonError::into_inner);
        state.bucket_counts[bucket_index] += 1;
        state.count += 1;
        state.sum += value;
        Ok(())
    }
}

impl RegisteredMetric for HistogramMetric {
    fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    fn collect(&self) -> Vec<MetricSample> {
        self.series
            .entries()
            .into_iter()
            .map(|(label_values, entry)| {
                let (bucket_counts, count, sum) = {
                    let state = entry.lock().unwrap_or_else(PoisonError::into_inner);
                    (state.bucket_counts.clone(), state.count, state.sum)
                };

                let mut cumulative = 0_u64;
                let buckets = self
                    .descriptor
                    .buckets
                    .iter()
                    .copied()
                    .chain(std::iter::once(f64::INFINITY))
                    .zip(bucket_counts)
                    .map(|(bound, bucket_count)| {
                        cumulative = cumulative.saturating_add(bucket_count);
                        (bound, cumulative)
                    })
                    .collect();

                MetricSample {
                    labels: materialize_labels(&self.descriptor, &label_values),
                    value: MetricValue::Histogram {
                        buckets,
                        count,
                        sum,
                    },
                }
            })
            .collect()
    }
}

/// Static key/value record, written once and exported as a constant-1 gauge.
pub struct InfoMetric {
    descriptor: MetricDescriptor,
    values: OnceLock<Vec<(String, String)>>,
}

impl InfoMetric {
    fn new(descriptor: MetricDescriptor) -> Self {
        Self {
            descriptor,
            values: OnceLock::new(),
        }
    }

    pub fn set(&self, values: &[(&str, &str)]) -> Result<()> {
        for (index, (key, _)) in values.iter().enumerate() {
            validate_label_name(&self.descriptor.name, key)?;
            if values[..index].iter().any(|(previous, _)| previous == key) {
                return Err(VitalsError::InvalidLabelName {
                    metric: self.descriptor.name.clone(),
                    label: (*key).to_string(),
                });
            }
        }

        let values = values
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();

        self.values
            .set(values)
            .map_err(|_| VitalsError::InfoAlreadySet(self.descriptor.name.clone()))
    }

    pub fn get(&self) -> Option<&[(String, String)]> {
        self.values.get().map(Vec::as_slice)
    }
}

impl RegisteredMetric for InfoMetric {
    fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    fn collect(&self) -> Vec<MetricSample> {
        self.values
            .get()
            .map(|values| MetricSample {
                labels: values.clone(),
                value: MetricValue::Info,
            })
            .into_iter()
            .collect()
    }
}

fn validate_descriptor(descriptor: &MetricDescriptor) -> Result<()> {
    if !is_valid_name(&descriptor.name, true) {
        return Err(VitalsError::InvalidMetricName(descriptor.name.clone()));
    }

    for (index, label) in descriptor.variable_labels.iter().enumerate() {
        validate_label_name(&descriptor.name, label)?;
        if descriptor.variable_labels[..index].contains(label)
            || (descriptor.metric_type == MetricType::Histogram && label == "le")
        {
            return Err(VitalsError::InvalidLabelName {
                metric: descriptor.name.clone(),
                label: label.clone(),
            });
        }
    }

    if descriptor.metric_type != MetricType::Histogram && !descriptor.buckets.is_empty() {
        return Err(VitalsError::InvalidBuckets {
            metric: descriptor.name.clone(),
            reason: "only histograms take buckets".to_string(),
        });
    }

    Ok(())
}

fn validate_label_name(metric: &str, label: &str) -> Result<()> {
    if is_valid_name(label, false) && !label.starts_with("__") {
        return Ok(());
    }

    Err(VitalsError::InvalidLabelName {
        metric: metric.to_string(),
        label: label.to_string(),
    })
}

fn is_valid_name(name: &str, allow_colon: bool) -> bool {
    let valid_char = |ch: char, first: bool| {
        ch.is_ascii_alphabetic() || ch == '_' || (allow_colon && ch == ':') || (!first && ch.is_ascii_digit())
    };

    let mut chars = name.chars();
    match chars.next() {
        Some(first) if valid_char(first, true) => chars.all(|ch| valid_char(ch, false)),
        _ => false,
    }
}

/// Empty input selects the default buckets. A lone `+Inf` keeps only the
/// implicit `+Inf` bucket.
fn normalize_buckets(metric: &str, buckets: &[f64]) -> Result<Vec<f64>> {
    if buckets.is_empty() {
        return Ok(DEFAULT_BUCKETS.to_vec());
    }

    let mut bounds = buckets.to_vec();
    if bounds.last().is_some_and(|last| *last == f64::INFINITY) {
        bounds.pop();
    }

    if bounds.iter().any(|bound| !bound.is_finite()) {
        return Err(VitalsError::InvalidBuckets {
            metric: metric.to_string(),
            reason: "bucket bounds must be finite".to_string(),
        });
    }

    if bounds.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(VitalsError::InvalidBuckets {
            metric: metric.to_string(),
            reason: "bucket bounds must be strictly ascending".to_string(),
        });
    }

    Ok(bounds)
}

fn to_label_values(labels: &[&str]) -> LabelValues {
    labels.iter().map(|label| (*label).to_string()).collect()
}

fn invalid_value(descriptor: &MetricDescriptor, reason: &str) -> VitalsError {
    VitalsError::InvalidValue {
        metric: descriptor.name.clone(),
        reason: reason.to_string(),
    }
}

fn materialize_labels(descriptor: &MetricDescriptor, values: &[String]) -> Vec<(String, String)> {
    descriptor
        .variable_labels
        .iter()
        .zip(values.iter())
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
