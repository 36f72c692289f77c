//! A module for likelihoods `p(y | f)` linking latent function values to observations.
//!
//! * [GaussianLikelihood]: homoskedastic gaussian noise for regression,
//! * [BernoulliLikelihood]: probit link for binary classification.

use crate::constraints::Constraint;
use crate::distributions::MultivariateNormal;
use crate::errors::{GpError, Result};
use crate::hyperparameters::{check_hyperparameters_len, Hyperparameter, Hyperparameters};
use crate::utils::{
    gauss_hermite, gauss_hermite_expectation, log_norm_cdf, norm_cdf, to_f64, GAUSS_HERMITE_POINTS,
};
use lazygp_tensor::{AddedDiagLazyTensor, DiagLazyTensor};
use linfa::Float;
use ndarray::{Array1, ArrayView1, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lower bound of the gaussian noise variance
pub const GAUSSIAN_NOISE_LOWER_BOUND: f64 = 1e-4;

/// A trait for observation models `p(y | f)` applied independently on each point
pub trait Likelihood<F: Float>:
    Hyperparameters<F> + Clone + fmt::Debug + fmt::Display + Send + Sync
{
    /// `E_q(f_i)[ln p(y_i | f_i)]` for each point where `q(f_i) = N(f_mean_i, f_var_i)`
    fn expected_log_prob(
        &self,
        y: &ArrayView1<F>,
        f_mean: &ArrayView1<F>,
        f_var: &ArrayView1<F>,
    ) -> Result<Array1<F>>;

    /// Mean and variance of `y_i` under `int p(y_i | f_i) q(f_i) df_i`
    fn predictive_mean_var(
        &self,
        f_mean: &ArrayView1<F>,
        f_var: &ArrayView1<F>,
    ) -> Result<(Array1<F>, Array1<F>)>;

    /// `ln int p(y_i | f_i) q(f_i) df_i` for each point
    fn log_marginal(
        &self,
        y: &ArrayView1<F>,
        f_mean: &ArrayView1<F>,
        f_var: &ArrayView1<F>,
    ) -> Result<Array1<F>>;
}

fn check_sizes<F>(y: &ArrayView1<F>, f_mean: &ArrayView1<F>, f_var: &ArrayView1<F>) -> Result<()> {
    if y.len() != f_mean.len() || y.len() != f_var.len() {
        return Err(GpError::InvalidValueError(format!(
            "observations ({}), latent means ({}) and variances ({}) sizes mismatch",
            y.len(),
            f_mean.len(),
            f_var.len()
        )));
    }
    Ok(())
}

/// Gaussian observation noise `y = f + eps` with `eps ~ N(0, noise)`
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct GaussianLikelihood<F: Float> {
    noise: Hyperparameter<F>,
}

impl<F: Float> Default for GaussianLikelihood<F> {
    fn default() -> Self {
        GaussianLikelihood::new()
    }
}

impl<F: Float> GaussianLikelihood<F> {
    /// Noise constrained to be greater than 1e-4, with a raw value initialized to 0
    pub fn new() -> Self {
        GaussianLikelihood {
            noise: Hyperparameter::from_raw(
                F::zero(),
                Constraint::GreaterThan(F::cast(GAUSSIAN_NOISE_LOWER_BOUND)),
            ),
        }
    }

    /// Set the noise variance
    pub fn with_noise(mut self, noise: F) -> Result<Self> {
        self.noise.set_value(noise)?;
        Ok(self)
    }

    /// Noise variance
    pub fn noise(&self) -> F {
        self.noise.value()
    }

    /// Noise variance hyperparameter
    pub fn noise_hyperparameter(&self) -> &Hyperparameter<F> {
        &self.noise
    }

    /// `noise * I` of size n
    pub fn noise_covariance(&self, n: usize) -> DiagLazyTensor<F> {
        DiagLazyTensor::constant(n, self.noise())
    }

    /// Distribution of the observations `N(mean, K + noise * I)` given the latent one `N(mean, K)`
    pub fn marginal(&self, latent: &MultivariateNormal<F>) -> Result<MultivariateNormal<F>> {
        let n = latent.event_size();
        let covariance =
            AddedDiagLazyTensor::new(latent.lazy_covariance().clone(), self.noise_covariance(n))?;
        MultivariateNormal::new(latent.mean().to_owned(), Arc::new(covariance))
    }
}

impl<F: Float> Hyperparameters<F> for GaussianLikelihood<F> {
    fn n_hyperparameters(&self) -> usize {
        1
    }

    fn raw_hyperparameters(&self) -> Array1<F> {
        Array1::from_elem(1, self.noise.raw())
    }

    fn set_raw_hyperparameters(&mut self, raw: &[F]) -> Result<()> {
        check_hyperparameters_len(raw, 1)?;
        self.noise.set_raw(raw[0]);
        Ok(())
    }

    fn hyperparameter_names(&self) -> Vec<String> {
        vec!["noise".to_string()]
    }
}

impl<F: Float> Likelihood<F> for GaussianLikelihood<F> {
    fn expected_log_prob(
        &self,
        y: &ArrayView1<F>,
        f_mean: &ArrayView1<F>,
        f_var: &ArrayView1<F>,
    ) -> Result<Array1<F>> {
        check_sizes(y, f_mean, f_var)?;
        let noise = self.noise();
        let log_norm = F::cast(-0.5) * (F::cast(2. * std::f64::consts::PI) * noise).ln();
        Ok(Zip::from(y)
            .and(f_mean)
            .and(f_var)
            .map_collect(|&yi, &m, &v| {
                log_norm - ((yi - m) * (yi - m) + v) / (F::cast(2.) * noise)
            }))
    }

    fn predictive_mean_var(
        &self,
        f_mean: &ArrayView1<F>,
        f_var: &ArrayView1<F>,
    ) -> Result<(Array1<F>, Array1<F>)> {
        check_sizes(f_mean, f_mean, f_var)?;
        Ok((f_mean.to_owned(), f_var.mapv(|v| v + self.noise())))
    }

    fn log_marginal(
        &self,
        y: &ArrayView1<F>,
        f_mean: &ArrayView1<F>,
        f_var: &ArrayView1<F>,
    ) -> Result<Array1<F>> {
        check_sizes(y, f_mean, f_var)?;
        let noise = self.noise();
        let two_pi = F::cast(2. * std::f64::consts::PI);
        Ok(Zip::from(y)
            .and(f_mean)
            .and(f_var)
            .map_collect(|&yi, &m, &v| {
                let s = v + noise;
                F::cast(-0.5) * ((two_pi * s).ln() + (yi - m) * (yi - m) / s)
            }))
    }
}

impl<F: Float> fmt::Display for GaussianLikelihood<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "noise: {:.3}", self.noise())
    }
}

/// Binary classification with probit link `p(y = 1 | f) = Phi(f)`.
///
/// Labels are 0 or 1, -1 is also accepted as class 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct BernoulliLikelihood();

impl BernoulliLikelihood {
    /// Signs `+1` for class 1 and `-1` for class 0
    fn signs<F: Float>(y: &ArrayView1<F>) -> Result<Vec<f64>> {
        y.iter()
            .map(|&v| {
                if v == F::one() {
                    Ok(1.)
                } else if v == F::zero() || v == -F::one() {
                    Ok(-1.)
                } else {
                    Err(GpError::InvalidValueError(format!(
                        "Bernoulli likelihood expects labels in {{0, 1}} (or -1 for 0), got {v}"
                    )))
                }
            })
            .collect()
    }
}

impl<F: Float> Hyperparameters<F> for BernoulliLikelihood {
    fn n_hyperparameters(&self) -> usize {
        0
    }

    fn raw_hyperparameters(&self) -> Array1<F> {
        Array1::zeros(0)
    }

    fn set_raw_hyperparameters(&mut self, raw: &[F]) -> Result<()> {
        check_hyperparameters_len(raw, 0)
    }

    fn hyperparameter_names(&self) -> Vec<String> {
        vec![]
    }
}

impl<F: Float> Likelihood<F> for BernoulliLikelihood {
    fn expected_log_prob(
        &self,
        y: &ArrayView1<F>,
        f_mean: &ArrayView1<F>,
        f_var: &ArrayView1<F>,
    ) -> Result<Array1<F>> {
        check_sizes(y, f_mean, f_var)?;
        let signs = Self::signs(y)?;
        let (nodes, weights) = gauss_hermite(GAUSS_HERMITE_POINTS)?;
        Ok(gauss_hermite_expectation(
            f_mean,
            f_var,
            &nodes,
            &weights,
            |i, f| log_norm_cdf(signs[i] * f),
        ))
    }

    fn predictive_mean_var(
        &self,
        f_mean: &ArrayView1<F>,
        f_var: &ArrayView1<F>,
    ) -> Result<(Array1<F>, Array1<F>)> {
        check_sizes(f_mean, f_mean, f_var)?;
        let p: Array1<F> = Zip::from(f_mean).and(f_var).map_collect(|&m, &v| {
            let z = to_f64(m) / (1. + to_f64(v).max(0.)).sqrt();
            F::cast(norm_cdf(z))
        });
        let var = p.mapv(|pi| pi * (F::one() - pi));
        Ok((p, var))
    }

    fn log_marginal(
        &self,
        y: &ArrayView1<F>,
        f_mean: &ArrayView1<F>,
        f_var: &ArrayView1<F>,
    ) -> Result<Array1<F>> {
        check_sizes(y, f_mean, f_var)?;
        let signs = Self::signs(y)?;
        Ok(Array1::from_shape_fn(y.len(), |i| {
            let z = to_f64(f_mean[i]) / (1. + to_f64(f_var[i]).max(0.)).sqrt();
            F::cast(log_norm_cdf(signs[i] * z))
        }))
    }
}

impl fmt::Display for BernoulliLikelihood {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Bernoulli")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use lazygp_tensor::{LazyTensor, NonLazyTensor};
    use ndarray::array;

    #[test]
    fn test_gaussian_defaults() {
        let lik = GaussianLikelihood::<f64>::new();
        assert_abs_diff_eq!(lik.noise(), 1e-4 + 2f64.ln(), epsilon = 1e-12);
        let lik = lik.with_noise(0.1).unwrap();
        assert_abs_diff_eq!(lik.noise(), 0.1, epsilon = 1e-12);
        assert!(GaussianLikelihood::<f64>::new().with_noise(1e-5).is_err());
        assert_eq!(format!("{lik}"), "noise: 0.100");
    }

    #[test]
    fn test_gaussian_expectations() {
        let lik = GaussianLikelihood::<f64>::new().with_noise(0.5).unwrap();
        let y = array![1., 0.];
        let m = array![0.5, 0.];
        let v = array![0.2, 0.];
        let elp = lik.expected_log_prob(&y.view(), &m.view(), &v.view()).unwrap();
        let log_norm = -0.5 * (std::f64::consts::PI).ln();
        assert_abs_diff_eq!(elp, array![log_norm - 0.45, log_norm], epsilon = 1e-12);
        let (pm, pv) = lik.predictive_mean_var(&m.view(), &v.view()).unwrap();
        assert_eq!(pm, m);
        assert_abs_diff_eq!(pv, array![0.7, 0.5], epsilon = 1e-12);
        // exact marginal is a gaussian of variance v + noise
        let lm = lik.log_marginal(&y.view(), &m.view(), &v.view()).unwrap();
        let expected = -0.5 * ((2. * std::f64::consts::PI * 0.7).ln() + 0.25 / 0.7);
        assert_abs_diff_eq!(lm[0], expected, epsilon = 1e-12);
        assert!(lik
            .expected_log_prob(&y.view(), &array![1.].view(), &v.view())
            .is_err());
    }

    #[test]
    fn test_gaussian_marginal() {
        let lik = GaussianLikelihood::<f64>::new().with_noise(0.1).unwrap();
        let latent = MultivariateNormal::new(
            array![0., 1.],
            Arc::new(NonLazyTensor::new(array![[1., 0.5], [0.5, 1.]])),
        )
        .unwrap();
        let observed = lik.marginal(&latent).unwrap();
        assert_abs_diff_eq!(
            observed.lazy_covariance().evaluate(),
            array![[1.1, 0.5], [0.5, 1.1]],
            epsilon = 1e-12
        );
        assert_eq!(observed.mean(), latent.mean());
    }

    #[test]
    fn test_bernoulli_predictive() {
        let lik = BernoulliLikelihood();
        let m = array![0., 2., -2.];
        let v = array![1., 0., 3.];
        let (p, var) = lik.predictive_mean_var(&m.view(), &v.view()).unwrap();
        assert_abs_diff_eq!(p[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(p[1], norm_cdf(2.), epsilon = 1e-12);
        assert_abs_diff_eq!(p[2], norm_cdf(-1.), epsilon = 1e-12);
        assert_abs_diff_eq!(var[0], 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_bernoulli_expected_log_prob() {
        let lik = BernoulliLikelihood();
        let y = array![1., 0., -1.];
        let m = array![0.5, 0.5, 0.5];
        let v = array![0., 0., 0.];
        let elp = lik.expected_log_prob(&y.view(), &m.view(), &v.view()).unwrap();
        // degenerate q(f): exactly ln Phi(+/- f)
        assert_abs_diff_eq!(elp[0], norm_cdf(0.5).ln(), epsilon = 1e-10);
        assert_abs_diff_eq!(elp[1], norm_cdf(-0.5).ln(), epsilon = 1e-10);
        assert_abs_diff_eq!(elp[1], elp[2], epsilon = 1e-15);

        // Jensen: E[ln Phi(f)] <= ln E[Phi(f)] = ln Phi(m / sqrt(1 + v))
        let v = array![2., 2., 2.];
        let elp = lik.expected_log_prob(&y.view(), &m.view(), &v.view()).unwrap();
        let lm = lik.log_marginal(&y.view(), &m.view(), &v.view()).unwrap();
        for (e, l) in elp.iter().zip(lm.iter()) {
            assert!(e < l);
        }
        assert!(lik
            .expected_log_prob(&array![2.].view(), &array![0.].view(), &array![1.].view())
            .is_err());
    }
}
