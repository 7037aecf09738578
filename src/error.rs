use std::path::PathBuf;

/// Fatal, user-facing pipeline conditions.
///
/// Transient per-request failures never surface here; collectors log them
/// and move on to the next market or symbol.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{path} not found. Run the `{stage}` stage first.")]
    MissingInput { path: PathBuf, stage: &'static str },

    #[error("No markets found for series {0}")]
    NoMarkets(String),

    #[error("No threshold markets found for series {0}")]
    NoThresholds(String),

    #[error("No data retrieved for series {0}")]
    NoMarketData(String),

    #[error("No data retrieved for any reference symbol")]
    NoReferenceData,

    #[error("Market panel is empty")]
    EmptyPanel,

    #[error("Threshold {0} is not present in the market panel")]
    ThresholdNotFound(f64),

    #[error("No overlapping dates between market and reference data")]
    NoOverlap,

    #[error("Column {0} not found in reference data")]
    UnknownColumn(String),
}
