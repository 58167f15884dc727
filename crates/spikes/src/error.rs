/// Precondition and invariant violations in the training pipeline.
///
/// These are raised before any work begins (config checks) or when a split
/// invariant does not hold. None of them are recoverable.
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("{traces} traces but {labels} label sequences")]
    LengthMismatch { traces: usize, labels: usize },

    #[error("sequence {index} has {len} frames, shorter than the {window}-frame window")]
    WindowTooLong {
        index: usize,
        len: usize,
        window: usize,
    },

    #[error("{which} set is empty")]
    EmptySplit { which: &'static str },

    #[error("training and validation sets share {overlap} indices")]
    OverlappingSplit { overlap: usize },

    #[error("no metric or loss registered under `{0}`")]
    UnknownName(String),

    #[error("no checkpoint was written during training")]
    NoCheckpoint,
}
