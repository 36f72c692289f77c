//! This library implements lazy tensors: symmetric matrices known through a
//! structured representation and never formed densely unless asked for.
//!
//! Gaussian process inference mostly needs products, solves and log-determinants
//! of covariance matrices. Given a fast matrix product, solves are done with
//! preconditioned [conjugate gradients](solvers::conjugate_gradients) and
//! log-determinants with [stochastic Lanczos quadrature](solvers::stochastic_log_det),
//! reducing the O(N^3) cost of a Cholesky decomposition to a few matrix products.
//! Small matrices still go through an exact Cholesky decomposition, the switch is
//! controlled by [LinalgSettings].
//!
//! Available structures:
//! * [NonLazyTensor]: a dense matrix,
//! * [DiagLazyTensor] and its batched version [BatchDiagLazyTensor],
//! * [AddedDiagLazyTensor]: any tensor plus a diagonal,
//! * [ConstantMulLazyTensor]: any tensor times a positive constant,
//! * [SumLazyTensor]: sum of tensors,
//! * [ToeplitzLazyTensor]: stationary kernel on a regular grid,
//! * [InterpolatedLazyTensor]: sparse interpolation `W.B.W^T` of a base tensor (KISS-GP).
//!
//! # Example
//!
//! ```
//! use lazygp_tensor::{AddedDiagLazyTensor, DiagLazyTensor, LazyTensor, LinalgSettings, ToeplitzLazyTensor};
//! use ndarray::array;
//! use std::sync::Arc;
//!
//! let kernel = ToeplitzLazyTensor::new(array![1f64, 0.5, 0.1]).unwrap();
//! let noise = DiagLazyTensor::constant(3, 0.1);
//! let cov = AddedDiagLazyTensor::new(Arc::new(kernel), noise).unwrap();
//!
//! let y = array![[1.], [0.], [-1.]];
//! let (inv_quad, log_det) = cov
//!     .inv_quad_log_det(Some(&y.view()), &LinalgSettings::default())
//!     .unwrap();
//! assert!(inv_quad > 0.);
//! assert!(log_det.is_finite());
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod added_diag;
mod batch_diag;
mod constant_mul;
mod diag;
mod errors;
mod interpolated;
mod lazy_tensor;
mod non_lazy;
mod settings;
pub mod solvers;
mod sum;
mod toeplitz;

pub use added_diag::*;
pub use batch_diag::*;
pub use constant_mul::*;
pub use diag::*;
pub use errors::*;
pub use interpolated::*;
pub use lazy_tensor::*;
pub use non_lazy::*;
pub use settings::*;
pub use sum::*;
pub use toeplitz::*;
