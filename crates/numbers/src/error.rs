use thiserror::Error;
use trial_bench::TrialError;

#[derive(Debug, Error)]
pub enum NumbersError {
    #[error(transparent)]
    Trial(#[from] TrialError),

    /// Setting up the disk benchmark file failed.
    #[error("disk benchmark setup failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot build setup thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
