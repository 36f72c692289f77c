use crate::errors::{GpError, Result};
use crate::kernels::Kernel;
use crate::likelihoods::{GaussianLikelihood, GAUSSIAN_NOISE_LOWER_BOUND};
use crate::mean_models::MeanFunction;
use crate::{GP_ADAM_LR, GP_ADAM_N_ITER, GP_COBYLA_MAX_EVAL, GP_COBYLA_MIN_EVAL, GP_OPTIM_N_START};
use lazygp_tensor::LinalgSettings;
use linfa::{Float, ParamGuard};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Hyperparameters optimization method
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub enum Optimizer<F: Float> {
    /// `n_iter` Adam steps with learning rate `lr` using analytic gradients
    Adam {
        /// Learning rate
        lr: F,
        /// Number of iterations
        n_iter: usize,
    },
    /// Derivative-free COBYLA optimization restarted from `n_start` points
    /// with at most `max_eval` evaluations each
    Cobyla {
        /// Number of starting points
        n_start: usize,
        /// Max number of objective evaluations per start
        max_eval: usize,
    },
}

impl<F: Float> Default for Optimizer<F> {
    fn default() -> Self {
        Optimizer::Adam {
            lr: F::cast(GP_ADAM_LR),
            n_iter: GP_ADAM_N_ITER,
        }
    }
}

impl<F: Float> Optimizer<F> {
    /// Multistart COBYLA with default settings
    pub fn cobyla() -> Self {
        Optimizer::Cobyla {
            n_start: GP_OPTIM_N_START,
            max_eval: GP_COBYLA_MAX_EVAL,
        }
    }

    pub(crate) fn check(&self) -> Result<()> {
        match self {
            Optimizer::Adam { lr, .. } if *lr <= F::zero() => Err(GpError::InvalidValueError(
                format!("Adam learning rate should be positive, got {lr}"),
            )),
            Optimizer::Cobyla { n_start, .. } if *n_start == 0 => Err(
                GpError::InvalidValueError("at least one optimization start is required".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// A set of validated exact GP parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, Mean: Serialize, K: Serialize",
        deserialize = "F: Deserialize<'de>, Mean: Deserialize<'de>, K: Deserialize<'de>"
    ))
)]
pub struct ExactGpValidParams<F: Float, Mean: MeanFunction<F>, K: Kernel<F>> {
    /// Mean function m(x), also the optimization starting point of its hyperparameters
    pub(crate) mean: Mean,
    /// Covariance function k(x, x'), also the optimization starting point of its hyperparameters
    pub(crate) kernel: K,
    /// Observation noise model
    pub(crate) likelihood: GaussianLikelihood<F>,
    /// Hyperparameters optimizer
    pub(crate) optimizer: Optimizer<F>,
    /// Linear algebra settings (Cholesky vs iterative solves, jitter)
    pub(crate) settings: LinalgSettings<F>,
    /// Initial noise variance overriding the likelihood one
    pub(crate) initial_noise: Option<F>,
    /// Seed of the multistart points generation
    pub(crate) seed: Option<u64>,
}

impl<F: Float, Mean: MeanFunction<F>, K: Kernel<F>> ExactGpValidParams<F, Mean, K> {
    /// Get mean function
    pub fn mean(&self) -> &Mean {
        &self.mean
    }

    /// Get kernel
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Get likelihood
    pub fn likelihood(&self) -> &GaussianLikelihood<F> {
        &self.likelihood
    }

    /// Get optimizer
    pub fn optimizer(&self) -> &Optimizer<F> {
        &self.optimizer
    }

    /// Get linear algebra settings
    pub fn settings(&self) -> &LinalgSettings<F> {
        &self.settings
    }

    /// Get initial noise variance
    pub fn initial_noise(&self) -> Option<F> {
        self.initial_noise
    }

    /// Get seed
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for the execution of
/// the [exact GP algorithm](crate::ExactGaussianProcess).
pub struct ExactGpParams<F: Float, Mean: MeanFunction<F>, K: Kernel<F>>(
    ExactGpValidParams<F, Mean, K>,
);

impl<F: Float, Mean: MeanFunction<F>, K: Kernel<F>> ExactGpParams<F, Mean, K> {
    /// A constructor for exact GP parameters given mean and kernel,
    /// the likelihood is a default [GaussianLikelihood]
    pub fn new(mean: Mean, kernel: K) -> ExactGpParams<F, Mean, K> {
        Self(ExactGpValidParams {
            mean,
            kernel,
            likelihood: GaussianLikelihood::default(),
            optimizer: Optimizer::default(),
            settings: LinalgSettings::default(),
            initial_noise: None,
            seed: None,
        })
    }

    /// A constructor for exact GP parameters from validated parameters
    pub fn new_from_valid(params: &ExactGpValidParams<F, Mean, K>) -> Self {
        Self(params.clone())
    }

    /// Set mean function.
    pub fn mean(mut self, mean: Mean) -> Self {
        self.0.mean = mean;
        self
    }

    /// Set kernel.
    pub fn kernel(mut self, kernel: K) -> Self {
        self.0.kernel = kernel;
        self
    }

    /// Set likelihood.
    pub fn likelihood(mut self, likelihood: GaussianLikelihood<F>) -> Self {
        self.0.likelihood = likelihood;
        self
    }

    /// Set hyperparameters optimizer.
    pub fn optimizer(mut self, optimizer: Optimizer<F>) -> Self {
        self.0.optimizer = optimizer;
        self
    }

    /// Optimize with `n_iter` Adam steps of learning rate `lr`.
    pub fn adam(mut self, lr: F, n_iter: usize) -> Self {
        self.0.optimizer = Optimizer::Adam { lr, n_iter };
        self
    }

    /// Optimize with multistart COBYLA.
    /// Given max_eval has to be greater than [crate::GP_COBYLA_MIN_EVAL] otherwise
    /// it is raised to that value.
    pub fn cobyla(mut self, n_start: usize, max_eval: usize) -> Self {
        self.0.optimizer = Optimizer::Cobyla {
            n_start,
            max_eval: GP_COBYLA_MIN_EVAL.max(max_eval),
        };
        self
    }

    /// Set linear algebra settings.
    pub fn settings(mut self, settings: LinalgSettings<F>) -> Self {
        self.0.settings = settings;
        self
    }

    /// Set the noise variance the optimization starts from.
    pub fn initial_noise(mut self, noise: F) -> Self {
        self.0.initial_noise = Some(noise);
        self
    }

    /// Set the seed used to draw multistart points.
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.0.seed = seed;
        self
    }
}

impl<F: Float, Mean: MeanFunction<F>, K: Kernel<F>> From<ExactGpValidParams<F, Mean, K>>
    for ExactGpParams<F, Mean, K>
{
    fn from(valid: ExactGpValidParams<F, Mean, K>) -> Self {
        ExactGpParams(valid)
    }
}

impl<F: Float, Mean: MeanFunction<F>, K: Kernel<F>> ParamGuard for ExactGpParams<F, Mean, K> {
    type Checked = ExactGpValidParams<F, Mean, K>;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        self.0.optimizer.check()?;
        if let Some(noise) = self.0.initial_noise {
            if noise <= F::cast(GAUSSIAN_NOISE_LOWER_BOUND) {
                return Err(GpError::InvalidValueError(format!(
                    "initial noise should be greater than {GAUSSIAN_NOISE_LOWER_BOUND}, got {noise}"
                )));
            }
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::RbfKernel;
    use crate::mean_models::ConstantMean;

    #[test]
    fn test_exact_params_checks() {
        let params = ExactGpParams::<f64, _, _>::new(ConstantMean::default(), RbfKernel::new());
        let valid = params.clone().check().unwrap();
        assert_eq!(
            valid.optimizer(),
            &Optimizer::Adam {
                lr: 0.1,
                n_iter: 50
            }
        );
        assert!(params.clone().adam(-1., 10).check().is_err());
        assert!(params.clone().cobyla(0, 100).check().is_err());
        assert!(params.clone().initial_noise(1e-5).check().is_err());
        let valid = params.cobyla(2, 1).check().unwrap();
        assert_eq!(
            valid.optimizer(),
            &Optimizer::Cobyla {
                n_start: 2,
                max_eval: GP_COBYLA_MIN_EVAL
            }
        );
    }
}
