use thiserror::Error;

#[derive(Debug, Error)]
pub enum VitalsError {
    #[error("metric already registered: {0}")]
    DuplicateMetricName(String),
    #[error("label arity mismatch for {metric}: expected {expected} values, got {actual}")]
    LabelArityMismatch {
        metric: String,
        expected: usize,
        actual: usize,
    },
    #[error("invalid metric name: {0}")]
    InvalidMetricName(String),
    #[error("invalid label name {label} on metric {metric}")]
    InvalidLabelName { metric: String, label: String },
    #[error("invalid histogram buckets for {metric}: {reason}")]
    InvalidBuckets { metric: String, reason: String },
    #[error("invalid value for {metric}: {reason}")]
    InvalidValue { metric: String, reason: String },
    #[error("{operation} is not supported by {kind} metric {metric}")]
    UnsupportedOperation {
        metric: String,
        kind: &'static str,
        operation: &'static str,
    },
    #[error("info metric already set: {0}")]
    InfoAlreadySet(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VitalsError {
    /// Configuration errors are programmer mistakes surfaced at registration or
    /// call time. Everything else is a transient runtime condition.
    pub fn is_configuration_error(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, VitalsError>;
