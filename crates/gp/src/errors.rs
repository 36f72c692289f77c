use thiserror::Error;

/// A result type for gaussian process algorithms
pub type Result<T> = std::result::Result<T, GpError>;

/// An error when using [`ExactGaussianProcess`](crate::ExactGaussianProcess) or
/// [`VariationalGaussianProcess`](crate::VariationalGaussianProcess) algorithms
#[derive(Error, Debug)]
pub enum GpError {
    /// When likelihood computation fails
    #[error("LikelihoodComputation computation error: {0}")]
    LikelihoodComputationError(String),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a lazy tensor operation fails
    #[error(transparent)]
    TensorError(#[from] lazygp_tensor::TensorError),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
    /// When error during saving
    #[cfg(feature = "persistent")]
    #[error("Save error: {0}")]
    SaveError(#[from] serde_json::Error),
    /// When error during loading
    #[error("Load IO error")]
    LoadIoError(#[from] std::io::Error),
    /// When error during loading
    #[error("Load error: {0}")]
    LoadError(String),
    /// When error due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
}
