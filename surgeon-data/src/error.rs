/// Failures of the preprocessing routines. Public functions return
/// `anyhow::Result`; these can be recovered with `downcast_ref`.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SurgeonError {
    #[error("observation column `{0}` not found or not categorical")]
    MissingObsColumn(String),

    #[error("condition `{0}` has no code in the label mapping")]
    UnmappedCondition(String),

    #[error("label `{0}` was not seen when the encoder was fit")]
    UnseenLabel(String),

    #[error("train fraction {0} is outside [0, 1]")]
    InvalidFraction(f64),

    #[error("only {available} genes available, {requested} requested")]
    InsufficientGenes { requested: usize, available: usize },

    #[error("gene `{0}` not found")]
    UnknownGene(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("empty data: {0}")]
    EmptyData(String),
}
