use crate::errors::{GpError, Result};
use crate::kernels::Kernel;
use crate::likelihoods::Likelihood;
use crate::mean_models::MeanFunction;
use crate::variational::Inducings;
use crate::{GP_ADAM_LR, GP_ADAM_N_ITER};
use lazygp_tensor::LinalgSettings;
use linfa::{Float, ParamGuard};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// A set of validated variational GP parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, Mean: Serialize, K: Serialize, L: Serialize",
        deserialize = "F: Deserialize<'de>, Mean: Deserialize<'de>, K: Deserialize<'de>, L: Deserialize<'de>"
    ))
)]
pub struct VariationalGpValidParams<F: Float, Mean: MeanFunction<F>, K: Kernel<F>, L: Likelihood<F>> {
    /// Mean function m(x)
    pub(crate) mean: Mean,
    /// Covariance function k(x, x')
    pub(crate) kernel: K,
    /// Observation model p(y | f)
    pub(crate) likelihood: L,
    /// Inducing points specification
    pub(crate) inducings: Inducings<F>,
    /// Whether inducing points locations are optimized
    pub(crate) learn_inducing_locations: bool,
    /// Adam learning rate
    pub(crate) lr: F,
    /// Number of Adam iterations (epochs when training by minibatches)
    pub(crate) n_iter: usize,
    /// Minibatch size, full batch when None
    pub(crate) batch_size: Option<usize>,
    /// Weight of the KL divergence term of the ELBO
    pub(crate) beta: F,
    /// Linear algebra settings
    pub(crate) settings: LinalgSettings<F>,
    /// Seed of inducing points selection and minibatches shuffling
    pub(crate) seed: Option<u64>,
}

impl<F: Float, Mean: MeanFunction<F>, K: Kernel<F>, L: Likelihood<F>>
    VariationalGpValidParams<F, Mean, K, L>
{
    /// Get mean function
    pub fn mean(&self) -> &Mean {
        &self.mean
    }

    /// Get kernel
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Get likelihood
    pub fn likelihood(&self) -> &L {
        &self.likelihood
    }

    /// Get inducing points specification
    pub fn inducings(&self) -> &Inducings<F> {
        &self.inducings
    }

    /// Whether inducing points locations are learnt
    pub fn learn_inducing_locations(&self) -> bool {
        self.learn_inducing_locations
    }

    /// Get Adam learning rate
    pub fn lr(&self) -> F {
        self.lr
    }

    /// Get number of iterations
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    /// Get minibatch size
    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    /// Get KL divergence weight
    pub fn beta(&self) -> F {
        self.beta
    }

    /// Get linear algebra settings
    pub fn settings(&self) -> &LinalgSettings<F> {
        &self.settings
    }

    /// Get seed
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for the execution of
/// the [variational GP algorithm](crate::VariationalGaussianProcess).
pub struct VariationalGpParams<F: Float, Mean: MeanFunction<F>, K: Kernel<F>, L: Likelihood<F>>(
    VariationalGpValidParams<F, Mean, K, L>,
);

impl<F: Float, Mean: MeanFunction<F>, K: Kernel<F>, L: Likelihood<F>>
    VariationalGpParams<F, Mean, K, L>
{
    /// A constructor for variational GP parameters given mean, kernel and likelihood
    pub fn new(mean: Mean, kernel: K, likelihood: L) -> Self {
        Self(VariationalGpValidParams {
            mean,
            kernel,
            likelihood,
            inducings: Inducings::default(),
            learn_inducing_locations: true,
            lr: F::cast(GP_ADAM_LR),
            n_iter: GP_ADAM_N_ITER,
            batch_size: None,
            beta: F::one(),
            settings: LinalgSettings::default(),
            seed: None,
        })
    }

    /// A constructor for variational GP parameters from validated parameters
    pub fn new_from_valid(params: &VariationalGpValidParams<F, Mean, K, L>) -> Self {
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
    pub fn likelihood(mut self, likelihood: L) -> Self {
        self.0.likelihood = likelihood;
        self
    }

    /// Specify inducing points: randomly picked, given or a KISS-GP grid.
    pub fn inducings(mut self, inducings: Inducings<F>) -> Self {
        self.0.inducings = inducings;
        self
    }

    /// Set whether inducing points locations are optimized.
    pub fn learn_inducing_locations(mut self, learn: bool) -> Self {
        self.0.learn_inducing_locations = learn;
        self
    }

    /// Optimize with `n_iter` Adam steps (or epochs with minibatches) of learning rate `lr`.
    pub fn adam(mut self, lr: F, n_iter: usize) -> Self {
        self.0.lr = lr;
        self.0.n_iter = n_iter;
        self
    }

    /// Train by minibatches of the given size (stochastic variational inference).
    pub fn batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.0.batch_size = batch_size;
        self
    }

    /// Set the weight of the KL divergence term.
    pub fn beta(mut self, beta: F) -> Self {
        self.0.beta = beta;
        self
    }

    /// Set linear algebra settings.
    pub fn settings(mut self, settings: LinalgSettings<F>) -> Self {
        self.0.settings = settings;
        self
    }

    /// Set the seed used for inducing points selection and minibatches.
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.0.seed = seed;
        self
    }
}

impl<F: Float, Mean: MeanFunction<F>, K: Kernel<F>, L: Likelihood<F>>
    From<VariationalGpValidParams<F, Mean, K, L>> for VariationalGpParams<F, Mean, K, L>
{
    fn from(valid: VariationalGpValidParams<F, Mean, K, L>) -> Self {
        VariationalGpParams(valid)
    }
}

impl<F: Float, Mean: MeanFunction<F>, K: Kernel<F>, L: Likelihood<F>> ParamGuard
    for VariationalGpParams<F, Mean, K, L>
{
    type Checked = VariationalGpValidParams<F, Mean, K, L>;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if self.0.lr <= F::zero() {
            return Err(GpError::InvalidValueError(format!(
                "Adam learning rate should be positive, got {}",
                self.0.lr
            )));
        }
        if self.0.beta < F::zero() {
            return Err(GpError::InvalidValueError(format!(
                "KL divergence weight should be non negative, got {}",
                self.0.beta
            )));
        }
        if self.0.batch_size == Some(0) {
            return Err(GpError::InvalidValueError(
                "minibatch size should be positive".to_string(),
            ));
        }
        match &self.0.inducings {
            Inducings::Randomized(0) => Err(GpError::InvalidValueError(
                "at least one inducing point is required".to_string(),
            )),
            Inducings::Grid { size, .. } if *size < 4 => Err(GpError::InvalidValueError(format!(
                "interpolation grid needs at least 4 points, got {size}"
            ))),
            _ => Ok(&self.0),
        }
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
    use crate::likelihoods::BernoulliLikelihood;
    use crate::mean_models::ConstantMean;

    #[test]
    fn test_variational_params_checks() {
        let params = VariationalGpParams::<f64, _, _, _>::new(
            ConstantMean::default(),
            RbfKernel::new(),
            BernoulliLikelihood::default(),
        );
        let valid = params.clone().check().unwrap();
        assert_eq!(valid.inducings(), &Inducings::Randomized(10));
        assert!(valid.learn_inducing_locations());
        assert_eq!(valid.lr(), 0.1);
        assert_eq!(valid.n_iter(), 50);
        assert_eq!(valid.batch_size(), None);
        assert_eq!(valid.beta(), 1.);

        assert!(params.clone().adam(0., 10).check().is_err());
        assert!(params.clone().beta(-1.).check().is_err());
        assert!(params.clone().batch_size(Some(0)).check().is_err());
        assert!(params
            .clone()
            .inducings(Inducings::Randomized(0))
            .check()
            .is_err());
        assert!(params
            .clone()
            .inducings(Inducings::Grid {
                size: 2,
                bounds: None
            })
            .check()
            .is_err());
        assert!(params.batch_size(Some(16)).check().is_ok());
    }
}
