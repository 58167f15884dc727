/// Errors raised while loading or validating a calcium dataset.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// The file has no `name` attribute in its schema metadata.
    #[error("dataset {0} has no `name` attribute")]
    MissingName(String),

    /// A column is missing or has an unexpected Arrow type.
    #[error("column {column} in {path}: {reason}")]
    Column {
        path: String,
        column: &'static str,
        reason: String,
    },

    /// Rows of a matrix do not share one length.
    #[error("row {row} has {len} frames, expected {expected}")]
    Ragged {
        row: usize,
        len: usize,
        expected: usize,
    },

    /// Spike labels do not line up with their traces.
    #[error("spikes shape {spikes:?} does not match traces shape {traces:?}")]
    ShapeMismatch {
        traces: (usize, usize),
        spikes: (usize, usize),
    },

    /// Post-normalization statistics are outside the sane range.
    #[error("normalized traces have {stat}={value}, expected a finite value in (-5, 5)")]
    Normalization { stat: &'static str, value: f64 },
}
