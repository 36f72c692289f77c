use linfa::Float;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Default matrix size above which iterative solvers replace Cholesky decomposition
pub const MAX_CHOLESKY_SIZE: usize = 800;
/// Default maximum number of conjugate gradients iterations
pub const MAX_CG_ITERATIONS: usize = 1000;
/// Default maximum number of Lanczos iterations used for log-determinant estimation
pub const MAX_LANCZOS_ITERATIONS: usize = 30;
/// Default number of random probes used by stochastic trace estimators
pub const NUM_TRACE_SAMPLES: usize = 10;

/// Numerical settings shared by every solve involving a lazy tensor.
///
/// Small matrices (size below `max_cholesky_size`) are handled exactly with
/// a Cholesky decomposition, larger ones rely on matrix-vector products only:
/// conjugate gradients for solves and stochastic Lanczos quadrature for
/// log-determinants.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))
)]
pub struct LinalgSettings<F: Float> {
    pub(crate) max_cholesky_size: usize,
    pub(crate) max_cg_iterations: usize,
    pub(crate) cg_tolerance: F,
    pub(crate) num_trace_samples: usize,
    pub(crate) max_lanczos_iterations: usize,
    pub(crate) jitter: F,
    pub(crate) seed: u64,
}

impl<F: Float> Default for LinalgSettings<F> {
    fn default() -> Self {
        LinalgSettings {
            max_cholesky_size: MAX_CHOLESKY_SIZE,
            max_cg_iterations: MAX_CG_ITERATIONS,
            cg_tolerance: F::cast(1e-6),
            num_trace_samples: NUM_TRACE_SAMPLES,
            max_lanczos_iterations: MAX_LANCZOS_ITERATIONS,
            jitter: F::cast(1e-6),
            seed: 42,
        }
    }
}

impl<F: Float> LinalgSettings<F> {
    /// Size above which iterative methods are used
    pub fn max_cholesky_size(&self) -> usize {
        self.max_cholesky_size
    }

    /// Maximum number of conjugate gradients iterations
    pub fn max_cg_iterations(&self) -> usize {
        self.max_cg_iterations
    }

    /// Relative residual tolerance of conjugate gradients
    pub fn cg_tolerance(&self) -> F {
        self.cg_tolerance
    }

    /// Number of probe vectors for stochastic estimators
    pub fn num_trace_samples(&self) -> usize {
        self.num_trace_samples
    }

    /// Maximum Lanczos iterations per probe
    pub fn max_lanczos_iterations(&self) -> usize {
        self.max_lanczos_iterations
    }

    /// Relative jitter added to the diagonal when Cholesky fails
    pub fn jitter(&self) -> F {
        self.jitter
    }

    /// Seed of the probe vectors random generator
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Set the size above which iterative methods are used.
    pub fn with_max_cholesky_size(mut self, size: usize) -> Self {
        self.max_cholesky_size = size;
        self
    }

    /// Set the maximum number of conjugate gradients iterations.
    pub fn with_max_cg_iterations(mut self, n_iter: usize) -> Self {
        self.max_cg_iterations = n_iter.max(1);
        self
    }

    /// Set conjugate gradients relative tolerance.
    pub fn with_cg_tolerance(mut self, tol: F) -> Self {
        self.cg_tolerance = tol;
        self
    }

    /// Set the number of probe vectors.
    pub fn with_num_trace_samples(mut self, n: usize) -> Self {
        self.num_trace_samples = n.max(1);
        self
    }

    /// Set the maximum number of Lanczos iterations.
    pub fn with_max_lanczos_iterations(mut self, n: usize) -> Self {
        self.max_lanczos_iterations = n.max(1);
        self
    }

    /// Set the relative jitter.
    pub fn with_jitter(mut self, jitter: F) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the probe random generator seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Whether a matrix of size `n` goes through Cholesky decomposition
    pub fn use_cholesky(&self, n: usize) -> bool {
        n <= self.max_cholesky_size
    }
}
