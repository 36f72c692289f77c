//! Training objectives: exact marginal log likelihood and variational ELBO.

use crate::errors::{GpError, Result};
use crate::kernels::Kernel;
use crate::likelihoods::{GaussianLikelihood, Likelihood};
use crate::mean_models::MeanFunction;
use lazygp_tensor::solvers::{cholesky_solve, psd_safe_cholesky, rademacher_probes};
use lazygp_tensor::{AddedDiagLazyTensor, LazyTensor, LinalgSettings};
use linfa::Float;
use ndarray::{concatenate, Array1, Array2, ArrayBase, ArrayView1, Axis, Data, Ix1, Ix2};
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

/// Exact marginal log likelihood `ln N(y | m(x), K(x, x) + noise * I)` divided by
/// the number of training points.
///
/// Small problems are handled with a Cholesky decomposition. Above
/// [`LinalgSettings::max_cholesky_size`] solves use conjugate gradients,
/// the log-determinant stochastic Lanczos quadrature and the trace term of
/// the gradient Hutchinson's estimator with Rademacher probes.
#[derive(Clone, Debug, Default)]
pub struct ExactMarginalLogLikelihood<F: Float> {
    settings: LinalgSettings<F>,
}

impl<F: Float> ExactMarginalLogLikelihood<F> {
    /// Constructor
    pub fn new(settings: LinalgSettings<F>) -> Self {
        ExactMarginalLogLikelihood { settings }
    }

    /// Linear algebra settings
    pub fn settings(&self) -> &LinalgSettings<F> {
        &self.settings
    }

    fn check_data(
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<()> {
        if x.nrows() != y.len() || x.nrows() == 0 {
            return Err(GpError::InvalidValueError(format!(
                "training data should be non empty with matching sizes, got {} inputs and {} outputs",
                x.nrows(),
                y.len()
            )));
        }
        Ok(())
    }

    /// Marginal log likelihood value
    pub fn value<M: MeanFunction<F>, K: Kernel<F>>(
        &self,
        mean: &M,
        kernel: &K,
        likelihood: &GaussianLikelihood<F>,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<F> {
        Self::check_data(x, y)?;
        let n = x.nrows();
        let residual = (y - &mean.value(x)?).insert_axis(Axis(1));
        let cov = AddedDiagLazyTensor::new(kernel.lazy_covariance(x)?, likelihood.noise_covariance(n))?;
        let (inv_quad, log_det) = cov.inv_quad_log_det(Some(&residual.view()), &self.settings)?;
        Ok(Self::normalized(inv_quad, log_det, n))
    }

    fn normalized(inv_quad: F, log_det: F, n: usize) -> F {
        let nf = F::cast(n);
        F::cast(-0.5) * (inv_quad + log_det + nf * F::cast(2. * std::f64::consts::PI).ln()) / nf
    }

    /// Marginal log likelihood value and its gradient with respect to the raw
    /// hyperparameters ordered as mean, kernel then likelihood ones.
    pub fn value_and_grad<M: MeanFunction<F>, K: Kernel<F>>(
        &self,
        mean: &M,
        kernel: &K,
        likelihood: &GaussianLikelihood<F>,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<(F, Array1<F>)> {
        Self::check_data(x, y)?;
        let n = x.nrows();
        let residual = (y - &mean.value(x)?).insert_axis(Axis(1));
        let noise = likelihood.noise_covariance(n);
        let cov = AddedDiagLazyTensor::new(kernel.lazy_covariance(x)?, noise.clone())?;
        let half = F::cast(0.5);

        // Gradient of the mll is sum_k left_k^T . dK . right_k
        let (value, alpha, left, right) = if self.settings.use_cholesky(n) {
            let chol = psd_safe_cholesky(&cov.evaluate(), &self.settings)?;
            let alpha = cholesky_solve(&chol, &residual)?;
            let eye = Array2::<F>::eye(n);
            let inv = cholesky_solve(&chol, &eye)?;
            let inv_quad = (&alpha * &residual).sum();
            let log_det = chol.diag().mapv(|v| v.ln()).sum() * F::cast(2.);
            let left = concatenate![Axis(1), alpha.mapv(|v| v * half), inv.mapv(|v| -v * half)];
            let right = concatenate![Axis(1), alpha, eye];
            (Self::normalized(inv_quad, log_det, n), alpha, left, right)
        } else {
            let alpha = cov.inv_matmul(&residual.view(), &self.settings)?;
            let inv_quad = (&alpha * &residual).sum();
            let log_det = cov.log_det(&self.settings)?;
            let n_probes = self.settings.num_trace_samples().max(1);
            let mut rng = Xoshiro256Plus::seed_from_u64(self.settings.seed());
            let probes: Array2<F> = rademacher_probes(n, n_probes, &mut rng);
            let solves = cov.inv_matmul(&probes.view(), &self.settings)?;
            let scale = -half / F::cast(n_probes);
            let left = concatenate![Axis(1), alpha.mapv(|v| v * half), solves.mapv(|v| v * scale)];
            let right = concatenate![Axis(1), alpha, probes];
            (Self::normalized(inv_quad, log_det, n), alpha, left, right)
        };

        let alpha = alpha.column(0);
        let mean_grads: Vec<F> = mean
            .gradients(x)?
            .iter()
            .map(|dm| alpha.dot(dm))
            .collect();
        let kernel_grads = kernel.quad_form_gradients(x, &left.view(), &right.view())?;
        let noise_grad = noise.quad_form_derivative(&left.view(), &right.view())?[0].sum()
            * likelihood.noise_hyperparameter().derivative();

        let nf = F::cast(n);
        let grad: Array1<F> = mean_grads
            .into_iter()
            .chain(kernel_grads)
            .chain(std::iter::once(noise_grad))
            .map(|g| g / nf)
            .collect();
        Ok((value, grad))
    }
}

/// Evidence lower bound of a variational GP
///
/// `ELBO = 1/b sum_i E_q(f_i)[ln p(y_i | f_i)] - beta * KL(q(u) || p(u)) / num_data`
/// for a batch of `b` points, an unbiased estimate of the full-data bound
/// divided by `num_data`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VariationalElbo<F: Float> {
    num_data: usize,
    beta: F,
}

impl<F: Float> VariationalElbo<F> {
    /// Bound for a training set of `num_data` points with `beta = 1`
    pub fn new(num_data: usize) -> Self {
        VariationalElbo {
            num_data,
            beta: F::one(),
        }
    }

    /// Set the KL divergence weight
    pub fn with_beta(mut self, beta: F) -> Self {
        self.beta = beta;
        self
    }

    /// Training set size
    pub fn num_data(&self) -> usize {
        self.num_data
    }

    /// KL divergence weight
    pub fn beta(&self) -> F {
        self.beta
    }

    /// Bound value given the latent marginals `q(f_i) = N(f_mean_i, f_var_i)` of a batch
    /// and the divergence of the inducing distribution from its prior
    pub fn value<L: Likelihood<F>>(
        &self,
        likelihood: &L,
        y: &ArrayView1<F>,
        f_mean: &ArrayView1<F>,
        f_var: &ArrayView1<F>,
        kl: F,
    ) -> Result<F> {
        if y.is_empty() || self.num_data == 0 {
            return Err(GpError::InvalidValueError(
                "ELBO needs at least one data point".to_string(),
            ));
        }
        let expected = likelihood.expected_log_prob(y, f_mean, f_var)?;
        let fit = expected.sum() / F::cast(y.len());
        Ok(fit - self.beta * kl / F::cast(self.num_data))
    }
}
