use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a scan unit (or a whole batch) could not be processed.
///
/// The first three variants are per-unit failures: they are caught at the task
/// boundary and recorded in a [`ScanOutcome::Failure`](crate::models::ScanOutcome).
/// `ParallelBackendUnavailable` is only raised while selecting an execution
/// strategy, before any unit is dispatched.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message")]
pub enum ErrorKind {
    /// No series exists for the requested symbol and date range.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// A series was found but is not a valid daily OHLCV sequence.
    #[error("data malformed: {0}")]
    DataMalformed(String),

    /// Unexpected failure while extracting features or classifying.
    #[error("computation error: {0}")]
    ComputationError(String),

    /// The requested task execution strategy cannot be created.
    #[error("parallel backend unavailable: {0}")]
    ParallelBackendUnavailable(String),
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::DataUnavailable(_) => "data_unavailable",
            Self::DataMalformed(_) => "data_malformed",
            Self::ComputationError(_) => "computation_error",
            Self::ParallelBackendUnavailable(_) => "backend_unavailable",
        }
    }
}
