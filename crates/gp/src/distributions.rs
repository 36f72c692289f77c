//! Multivariate normal distributions over lazy covariances.
//!
//! [MultivariateNormal] is the predictive and variational distribution type of the
//! crate: log probability, sampling and [kl_divergence] all go through the
//! [LazyTensor] operations of its covariance under given [LinalgSettings].

use crate::errors::{GpError, Result};
use lazygp_tensor::{LazyTensor, LinalgSettings, NonLazyTensor};
use linfa::Float;
use ndarray::{concatenate, s, Array1, Array2, ArrayView1, Axis};
use rand_xoshiro::Xoshiro256Plus;
use std::sync::Arc;

/// Multivariate normal distribution `N(mean, covariance)` with a lazy covariance
#[derive(Clone, Debug)]
pub struct MultivariateNormal<F: Float> {
    mean: Array1<F>,
    covariance: Arc<dyn LazyTensor<F>>,
}

impl<F: Float> MultivariateNormal<F> {
    /// Constructor, the covariance has to be (n, n) with n the mean size
    pub fn new(mean: Array1<F>, covariance: Arc<dyn LazyTensor<F>>) -> Result<Self> {
        if covariance.shape() != (mean.len(), mean.len()) {
            return Err(GpError::InvalidValueError(format!(
                "covariance of shape {:?} does not match mean of size {}",
                covariance.shape(),
                mean.len()
            )));
        }
        Ok(MultivariateNormal { mean, covariance })
    }

    /// Constructor from a dense covariance matrix
    pub fn from_dense(mean: Array1<F>, covariance: Array2<F>) -> Result<Self> {
        Self::new(mean, Arc::new(NonLazyTensor::try_new(covariance)?))
    }

    /// Dimension of the distribution
    pub fn event_size(&self) -> usize {
        self.mean.len()
    }

    /// Mean vector
    pub fn mean(&self) -> &Array1<F> {
        &self.mean
    }

    /// Covariance as a lazy tensor
    pub fn lazy_covariance(&self) -> &Arc<dyn LazyTensor<F>> {
        &self.covariance
    }

    /// Dense covariance matrix
    pub fn covariance_matrix(&self) -> Array2<F> {
        self.covariance.evaluate()
    }

    /// Marginal variances, negative round-off values are clamped to zero
    pub fn variance(&self) -> Array1<F> {
        self.covariance.diag().mapv(|v| v.max(F::zero()))
    }

    /// Marginal standard deviations
    pub fn stddev(&self) -> Array1<F> {
        self.variance().mapv(|v| v.sqrt())
    }

    /// Lower and upper bounds `mean -/+ 2 stddev`
    pub fn confidence_region(&self) -> (Array1<F>, Array1<F>) {
        let two_std = self.stddev() * F::cast(2.);
        (&self.mean - &two_std, &self.mean + &two_std)
    }

    /// Log density of `y`
    pub fn log_prob(&self, y: &ArrayView1<F>, settings: &LinalgSettings<F>) -> Result<F> {
        if y.len() != self.mean.len() {
            return Err(GpError::InvalidValueError(format!(
                "expected a value of size {}, got {}",
                self.mean.len(),
                y.len()
            )));
        }
        let diff = (y - &self.mean).insert_axis(Axis(1));
        let (inv_quad, log_det) = self
            .covariance
            .inv_quad_log_det(Some(&diff.view()), settings)?;
        let n = F::cast(self.mean.len());
        Ok(F::cast(-0.5) * (inv_quad + log_det + n * F::cast(2. * std::f64::consts::PI).ln()))
    }

    /// Draw `n` samples as rows of a (n, event_size) matrix
    pub fn sample(
        &self,
        n: usize,
        rng: &mut Xoshiro256Plus,
        settings: &LinalgSettings<F>,
    ) -> Result<Array2<F>> {
        let samples = self.covariance.zero_mean_mvn_samples(n, rng, settings)?;
        Ok(samples + &self.mean)
    }
}

/// `KL(q || p)` between two multivariate normals of the same size
pub fn kl_divergence<F: Float>(
    q: &MultivariateNormal<F>,
    p: &MultivariateNormal<F>,
    settings: &LinalgSettings<F>,
) -> Result<F> {
    let n = q.event_size();
    if p.event_size() != n {
        return Err(GpError::InvalidValueError(format!(
            "KL divergence between distributions of sizes {} and {}",
            n,
            p.event_size()
        )));
    }
    let diff = (p.mean() - q.mean()).insert_axis(Axis(1));
    let rhs = concatenate![Axis(1), diff, q.covariance_matrix()];
    let solves = p.lazy_covariance().inv_matmul(&rhs.view(), settings)?;
    let mahalanobis = solves.column(0).dot(&diff.column(0));
    let trace = solves.slice(s![.., 1..]).diag().sum();
    let log_det_p = p.lazy_covariance().log_det(settings)?;
    let log_det_q = q.lazy_covariance().log_det(settings)?;
    Ok(F::cast(0.5) * (trace + mahalanobis - F::cast(n) + log_det_p - log_det_q))
}
