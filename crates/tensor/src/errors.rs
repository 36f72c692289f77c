use thiserror::Error;

/// A result type for lazy tensor algebra
pub type Result<T> = std::result::Result<T, TensorError>;

/// An error when operating on a [`LazyTensor`](crate::LazyTensor)
#[derive(Error, Debug)]
pub enum TensorError {
    /// When operand shapes are not compatible
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        actual: Vec<usize>,
    },
    #[error(transparent)]
    /// When linear algebra computation fails
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a matrix is not positive definite even after adding jitter
    #[error("Matrix not positive definite: {0}")]
    NotPositiveDefinite(String),
    /// When error due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValue(String),
}
