//! This library implements [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process) models
//! built on the lazy covariance representations of the `lazygp-tensor` crate.
//!
//! Exact GP regression is implemented by [ExactGaussianProcess] parameterized by [ExactGpParams].
//! Hyperparameters of the mean, the kernel and the gaussian noise are fitted by maximizing
//! the exact marginal log likelihood with Adam steps on its analytic gradient (or with a
//! derivative-free multistart COBYLA optimization).
//!
//! Using a [GridInterpolationKernel](kernels::GridInterpolationKernel) gives KISS-GP regression:
//! the kernel is interpolated from a regular grid so that the training covariance is structured
//! (Toeplitz) and large training sets are handled with iterative solves (conjugate gradients
//! and stochastic log determinant estimation) instead of a Cholesky factorization.
//!
//! Approximate GPs trained by variational inference are implemented by [VariationalGaussianProcess]
//! parameterized by [VariationalGpParams]. Any [Likelihood](likelihoods::Likelihood) can be used,
//! for instance a [BernoulliLikelihood](likelihoods::BernoulliLikelihood) for binary classification.
//! Inducing values are located at (learnable) inducing points or on a KISS-GP grid, and
//! training can proceed by minibatches (stochastic variational inference).
//!
//! # Example
//!
//! ```no_run
//! use lazygp_gp::{kernels::*, mean_models::*, ExactGaussianProcess};
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
//! println!("{gp}");
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
pub mod constraints;
pub mod distributions;
mod errors;
mod hyperparameters;
pub mod kernels;
pub mod likelihoods;
pub mod mean_models;
pub mod metrics;
pub mod mlls;
pub mod variational;
mod variational_algorithm;

mod parameters;
mod variational_parameters;
mod utils;

mod optimization;

pub use algorithm::*;
pub use errors::*;
pub use hyperparameters::{Hyperparameter, Hyperparameters};
pub use optimization::Adam;
pub use parameters::*;
pub use utils::{gauss_hermite, log_norm_cdf, norm_cdf, norm_pdf};
pub use variational_algorithm::*;
pub use variational_parameters::*;
