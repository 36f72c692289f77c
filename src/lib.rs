//! `lazygp` is a toolbox for gaussian process inference built on lazily evaluated
//! covariance matrices.
//!
//! * [tensor]: lazy tensors (diagonal, added diagonal, Toeplitz, interpolated, sums...)
//!   and the linear solvers they share (Cholesky, conjugate gradients, stochastic
//!   log determinant estimation),
//! * [gp]: kernels, means, likelihoods, exact and variational gaussian process models
//!   with KISS-GP structured interpolation.
//!
//! # Example
//!
//! ```no_run
//! use lazygp::gp::{kernels::*, mean_models::*, ExactGaussianProcess};
//! use linfa::prelude::*;
//! use ndarray::{Array, Axis};
//!
//! let xt = Array::linspace(0., 1., 100).insert_axis(Axis(1));
//! let yt = xt.column(0).mapv(|v| (2. * std::f64::consts::PI * v).sin());
//!
//! let gp = ExactGaussianProcess::<f64, _, _>::params(
//!         ConstantMean::default(),
//!         ScaleKernel::new(RbfKernel::new()),
//!     )
//!     .fit(&Dataset::new(xt, yt))
//!     .expect("GP fitted");
//! ```
#![warn(missing_docs)]

/// Lazy tensors and linear solvers
pub mod tensor {
    pub use lazygp_tensor::*;
}

/// Gaussian process models
pub mod gp {
    pub use lazygp_gp::*;
}
