use thiserror::Error;

/// Errors raised by the nugget pipeline and the metric engine.
///
/// Pipeline stages never surface `MalformedOutput` or `ExhaustedRetries` to
/// their callers; both are absorbed into the "failed" sentinel for the
/// affected window. Metric errors are always surfaced.
#[derive(Debug, Error)]
pub enum NuggetError {
    #[error("invalid window configuration: {0}")]
    InvalidWindowConfig(String),
    #[error("malformed model output: {0}")]
    MalformedOutput(String),
    #[error("retry budget exhausted after {attempts} attempts: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },
    #[error("judgment table for query '{query_id}' lacks {field} for nugget '{nugget_id}'")]
    MalformedInputTable {
        query_id: String,
        nugget_id: String,
        field: &'static str,
    },
    #[error("unsupported measure: {0}")]
    UnsupportedMeasure(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("evaluation cancelled")]
    Cancelled,
    #[error("generation backend failed: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Tsv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = NuggetError> = std::result::Result<T, E>;
