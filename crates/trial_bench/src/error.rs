// Errors raised while running a timed operation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrialError {
    /// The measured operation itself failed; the run is not trustworthy.
    #[error("i/o failure during benchmark: {0}")]
    Io(#[from] std::io::Error),

    /// Cancellation was requested before the named benchmark finished.
    #[error("interrupted while running {benchmark}")]
    Interrupted { benchmark: String },
}
