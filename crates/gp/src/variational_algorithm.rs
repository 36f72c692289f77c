use crate::distributions::MultivariateNormal;
use crate::errors::{GpError, Result};
use crate::hyperparameters::{concat_raw, split_raw, Hyperparameters};
use crate::kernels::Kernel;
use crate::likelihoods::Likelihood;
use crate::mean_models::MeanFunction;
use crate::mlls::VariationalElbo;
use crate::optimization::Adam;
use crate::utils::to_f64;
use crate::variational::InducingStrategy;
use crate::variational_parameters::{VariationalGpParams, VariationalGpValidParams};

use finitediff::FiniteDiff;
use lazygp_tensor::LinalgSettings;
use linfa::prelude::{DatasetBase, Fit, Float, PredictInplace};
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Axis, Data, Ix1, Ix2};
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

use log::{debug, info, warn};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Approximate Gaussian Process trained by variational inference.
///
/// The posterior on inducing values is approximated by `q(u) = N(m, S)` and
/// every hyperparameter (mean, kernel, likelihood, variational parameters and
/// optionally inducing locations) is fitted by maximizing the evidence lower bound (ELBO).
/// Any [Likelihood] can be used, hence non-gaussian observations as binary labels
/// with a [BernoulliLikelihood](crate::likelihoods::BernoulliLikelihood).
///
/// Inducing values are either located at inducing points (whitened strategy) or on a
/// regular grid (KISS-GP), see [Inducings](crate::variational::Inducings).
/// When a minibatch size is given, each iteration is an epoch of stochastic steps
/// on shuffled minibatches.
///
/// # Example
///
/// ```no_run
/// use lazygp_gp::{kernels::*, likelihoods::*, mean_models::*, variational::Inducings};
/// use lazygp_gp::VariationalGaussianProcess;
/// use linfa::prelude::*;
/// use ndarray::{Array, Axis};
///
/// let xt = Array::linspace(0., 1., 30).insert_axis(Axis(1));
/// let yt = xt.column(0).mapv(|v| if v > 0.5 { 1. } else { 0. });
///
/// let gp = VariationalGaussianProcess::<f64, _, _, _>::params(
///         ConstantMean::default(),
///         ScaleKernel::new(RbfKernel::new()),
///         BernoulliLikelihood::default(),
///     )
///     .inducings(Inducings::Randomized(10))
///     .seed(Some(42))
///     .fit(&Dataset::new(xt, yt))
///     .expect("GP fitted");
///
/// let xtest = Array::linspace(0., 1., 11).insert_axis(Axis(1));
/// let proba = gp.predict_proba(&xtest).expect("class probabilities");
/// ```
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, Mean: Serialize, K: Serialize, L: Serialize",
        deserialize = "F: Deserialize<'de>, Mean: Deserialize<'de>, K: Deserialize<'de>, L: Deserialize<'de>"
    ))
)]
pub struct VariationalGaussianProcess<F: Float, Mean: MeanFunction<F>, K: Kernel<F>, L: Likelihood<F>>
{
    /// Fitted mean function
    mean: Mean,
    /// Fitted kernel
    kernel: K,
    /// Fitted likelihood
    likelihood: L,
    /// Fitted variational strategy
    strategy: InducingStrategy<F>,
    /// ELBO values along the optimization
    elbo_history: Vec<F>,
    /// Training dataset (input, output)
    pub(crate) training_data: (Array2<F>, Array1<F>),
    /// Parameters used to fit this model
    pub(crate) params: VariationalGpValidParams<F, Mean, K, L>,
}

impl<F: Float, Mean: MeanFunction<F>, K: Kernel<F>, L: Likelihood<F>> fmt::Display
    for VariationalGaussianProcess<F, Mean, K, L>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "VGP(mean={}, kernel={}, likelihood={}, {})",
            self.mean, self.kernel, self.likelihood, self.strategy
        )
    }
}

impl<F: Float, Mean: MeanFunction<F>, K: Kernel<F>, L: Likelihood<F>>
    VariationalGaussianProcess<F, Mean, K, L>
{
    /// Variational GP parameters constructor
    pub fn params(mean: Mean, kernel: K, likelihood: L) -> VariationalGpParams<F, Mean, K, L> {
        VariationalGpParams::new(mean, kernel, likelihood)
    }

    fn check_dims(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<()> {
        if x.ncols() != self.training_data.0.ncols() {
            return Err(GpError::InvalidValueError(format!(
                "expected {}-dimensional inputs, got {}",
                self.training_data.0.ncols(),
                x.ncols()
            )));
        }
        Ok(())
    }

    /// Approximate posterior distribution of the latent function at `x`
    pub fn predict(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<MultivariateNormal<F>> {
        self.check_dims(x)?;
        self.strategy
            .predict(&self.mean, &self.kernel, x, &self.params.settings)
    }

    /// Latent marginal means and variances at `x`
    pub fn predict_valvar(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array1<F>, Array1<F>)> {
        self.check_dims(x)?;
        self.strategy
            .marginals(&self.mean, &self.kernel, x, &self.params.settings)
    }

    /// Latent mean at n given `x` points specified as a (n, nx) matrix
    pub fn predict_values(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        Ok(self.predict_valvar(x)?.0)
    }

    /// Latent variance at n given `x` points specified as a (n, nx) matrix
    pub fn predict_var(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        Ok(self.predict_valvar(x)?.1)
    }

    /// Mean and variance of the observations at `x` through the likelihood
    pub fn predictive_mean_var(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array1<F>, Array1<F>)> {
        let (f_mean, f_var) = self.predict_valvar(x)?;
        self.likelihood
            .predictive_mean_var(&f_mean.view(), &f_var.view())
    }

    /// Mean of the observations at `x`, for binary labels the probability of the positive class
    pub fn predict_proba(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        Ok(self.predictive_mean_var(x)?.0)
    }

    /// Log predictive density `ln p(y_i | x_i)` of each given observation
    pub fn predictive_log_prob(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<Array1<F>> {
        let (f_mean, f_var) = self.predict_valvar(x)?;
        self.likelihood
            .log_marginal(&y.view(), &f_mean.view(), &f_var.view())
    }

    /// ELBO values recorded at each iteration
    pub fn elbo_history(&self) -> &[F] {
        &self.elbo_history
    }

    /// Fitted mean function
    pub fn mean(&self) -> &Mean {
        &self.mean
    }

    /// Fitted kernel
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Fitted likelihood
    pub fn likelihood(&self) -> &L {
        &self.likelihood
    }

    /// Fitted variational strategy
    pub fn strategy(&self) -> &InducingStrategy<F> {
        &self.strategy
    }

    /// Training data (x, y)
    pub fn training_data(&self) -> &(Array2<F>, Array1<F>) {
        &self.training_data
    }
}

#[cfg(feature = "persistent")]
impl<F, Mean, K, L> VariationalGaussianProcess<F, Mean, K, L>
where
    F: Float + Serialize + for<'de> Deserialize<'de>,
    Mean: MeanFunction<F> + Serialize + for<'de> Deserialize<'de>,
    K: Kernel<F> + Serialize + for<'de> Deserialize<'de>,
    L: Likelihood<F> + Serialize + for<'de> Deserialize<'de>,
{
    /// Save the model in the given file as JSON
    pub fn save(&self, path: &str) -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::File::create(path)?;
        let bytes = serde_json::to_vec(self)?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Load a model from the given JSON file
    pub fn load(path: &str) -> Result<Box<Self>> {
        let data = std::fs::read(path)?;
        let gp: Self =
            serde_json::from_slice(&data).map_err(|err| GpError::LoadError(err.to_string()))?;
        Ok(Box::new(gp))
    }
}

impl<F, D, Mean, K, L> PredictInplace<ArrayBase<D, Ix2>, Array1<F>>
    for VariationalGaussianProcess<F, Mean, K, L>
where
    F: Float,
    D: Data<Elem = F>,
    Mean: MeanFunction<F>,
    K: Kernel<F>,
    L: Likelihood<F>,
{
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<F>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );
        match self.predict_proba(x) {
            Ok(values) => *y = values,
            Err(err) => {
                log::error!("VGP prediction failed: {err}");
                y.fill(F::nan());
            }
        }
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<F> {
        Array1::zeros((x.nrows(),))
    }
}

/// Components of a variational GP updated during the ELBO maximization
struct VariationalGpComponents<F: Float, Mean: MeanFunction<F>, K: Kernel<F>, L: Likelihood<F>> {
    mean: Mean,
    kernel: K,
    likelihood: L,
    strategy: InducingStrategy<F>,
}

impl<F: Float, Mean: MeanFunction<F>, K: Kernel<F>, L: Likelihood<F>>
    VariationalGpComponents<F, Mean, K, L>
{
    fn raw(&self) -> Array1<F> {
        let components: [&dyn Hyperparameters<F>; 4] =
            [&self.mean, &self.kernel, &self.likelihood, &self.strategy];
        concat_raw(&components)
    }

    fn set_raw(&mut self, raw: &[F]) -> Result<()> {
        let mut components: [&mut dyn Hyperparameters<F>; 4] = [
            &mut self.mean,
            &mut self.kernel,
            &mut self.likelihood,
            &mut self.strategy,
        ];
        split_raw(&mut components, raw)
    }

    fn with_raw(&self, raw: &[F]) -> Result<Self> {
        let mut updated = VariationalGpComponents {
            mean: self.mean.clone(),
            kernel: self.kernel.clone(),
            likelihood: self.likelihood.clone(),
            strategy: self.strategy.clone(),
        };
        updated.set_raw(raw)?;
        Ok(updated)
    }

    /// Negative ELBO on the (x, y) batch
    fn loss(
        &self,
        elbo: &VariationalElbo<F>,
        x: &Array2<F>,
        y: &ArrayView1<F>,
        settings: &LinalgSettings<F>,
    ) -> Result<F> {
        let (f_mean, f_var) = self
            .strategy
            .marginals(&self.mean, &self.kernel, x, settings)?;
        let kl = self
            .strategy
            .kl_divergence(&self.mean, &self.kernel, settings)?;
        Ok(-elbo.value(&self.likelihood, y, &f_mean.view(), &f_var.view(), kl)?)
    }
}

/// Indices of the training points split in shuffled minibatches,
/// a single batch of all points in order when no size is given
fn make_batches(n: usize, batch_size: Option<usize>, rng: &mut Xoshiro256Plus) -> Vec<Vec<usize>> {
    let mut indices: Vec<usize> = (0..n).collect();
    match batch_size {
        Some(size) if size < n => {
            indices.shuffle(rng);
            indices.chunks(size).map(|c| c.to_vec()).collect()
        }
        _ => vec![indices],
    }
}

impl<F, Mean, K, L, D, T> Fit<ArrayBase<D, Ix2>, ArrayBase<T, Ix1>, GpError>
    for VariationalGpValidParams<F, Mean, K, L>
where
    F: Float,
    Mean: MeanFunction<F>,
    K: Kernel<F>,
    L: Likelihood<F>,
    D: Data<Elem = F>,
    T: Data<Elem = F>,
{
    type Object = VariationalGaussianProcess<F, Mean, K, L>;

    /// Fit variational GP parameters by maximizing the ELBO
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<T, Ix1>>,
    ) -> Result<Self::Object> {
        let x = dataset.records().to_owned();
        let y = dataset.targets().to_owned();
        if x.nrows() != y.len() || x.nrows() == 0 {
            return Err(GpError::InvalidValueError(format!(
                "training data should be non empty with matching sizes, got {} inputs and {} outputs",
                x.nrows(),
                y.len()
            )));
        }
        let mut rng = match self.seed {
            Some(seed) => Xoshiro256Plus::seed_from_u64(seed),
            None => Xoshiro256Plus::from_entropy(),
        };

        let mut kernel = self.kernel.clone();
        kernel.prepare(&x)?;
        let strategy = InducingStrategy::from_inducings(
            &self.inducings,
            &x.view(),
            self.learn_inducing_locations,
            &mut rng,
        )?;
        let mut gp = VariationalGpComponents {
            mean: self.mean.clone(),
            kernel,
            likelihood: self.likelihood.clone(),
            strategy,
        };
        let elbo = VariationalElbo::new(x.nrows()).with_beta(self.beta);
        debug!(
            "Variational GP with {} ({} raw parameters)",
            gp.strategy,
            gp.raw().len()
        );

        let now = Instant::now();
        let mut raw = gp.raw();
        let mut adam = Adam::new(self.lr, raw.len());
        let mut elbo_history = Vec::with_capacity(self.n_iter);
        for i in 0..self.n_iter {
            let batches = make_batches(x.nrows(), self.batch_size, &mut rng);
            let mut epoch_loss = F::zero();
            for batch in batches.iter() {
                let xb = x.select(Axis(0), batch);
                let yb = y.select(Axis(0), batch);
                let loss = gp.loss(&elbo, &xb, &yb.view(), &self.settings)?;
                epoch_loss += loss;

                let objfn = |raw: &Vec<f64>| -> f64 {
                    let raw: Vec<F> = raw.iter().map(|&v| F::cast(v)).collect();
                    match gp
                        .with_raw(&raw)
                        .and_then(|c| c.loss(&elbo, &xb, &yb.view(), &self.settings))
                    {
                        Ok(loss) => to_f64(loss),
                        Err(_) => f64::NAN,
                    }
                };
                let grad = raw.mapv(to_f64).to_vec().central_diff(&objfn);
                // components hitting an invalid region are left unchanged
                let grad: Array1<F> = grad
                    .iter()
                    .map(|&g| if g.is_finite() { F::cast(g) } else { F::zero() })
                    .collect();
                adam.step(&mut raw, &grad.view());
                gp.set_raw(&raw.to_vec())?;
            }
            let loss = epoch_loss / F::cast(batches.len());
            if !loss.is_finite() {
                warn!("Non finite ELBO at iteration {}", i + 1);
            }
            info!(
                "Iter {}/{} - Loss: {:.3}   {}   {}",
                i + 1,
                self.n_iter,
                loss,
                gp.kernel,
                gp.likelihood
            );
            elbo_history.push(-loss);
        }
        debug!("elapsed optim = {:?}", now.elapsed().as_millis());

        let VariationalGpComponents {
            mean,
            kernel,
            likelihood,
            strategy,
        } = gp;
        Ok(VariationalGaussianProcess {
            mean,
            kernel,
            likelihood,
            strategy,
            elbo_history,
            training_data: (x, y),
            params: self.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{RbfKernel, ScaleKernel};
    use crate::likelihoods::{BernoulliLikelihood, GaussianLikelihood};
    use crate::mean_models::ConstantMean;
    use crate::variational::Inducings;
    use approx::assert_abs_diff_eq;
    use linfa::prelude::Dataset;
    use ndarray::{array, Array, Zip};
    use ndarray_npy::write_npy;
    use ndarray_rand::rand_distr::Normal;
    use ndarray_rand::RandomExt;

    fn step_data(n: usize) -> (Array2<f64>, Array1<f64>) {
        let xt = Array::linspace(0., 1., n).insert_axis(Axis(1));
        let yt = xt.column(0).mapv(|v| if v > 0.5 { 1. } else { 0. });
        (xt, yt)
    }

    fn accuracy(proba: &Array1<f64>, labels: &Array1<f64>) -> f64 {
        let good = Zip::from(proba).and(labels).fold(0, |acc, p, l| {
            if (*p > 0.5) == (*l > 0.5) {
                acc + 1
            } else {
                acc
            }
        });
        good as f64 / labels.len() as f64
    }

    #[test]
    fn test_variational_classification() {
        let (xt, yt) = step_data(30);
        let gp = VariationalGaussianProcess::<f64, _, _, _>::params(
            ConstantMean::default(),
            ScaleKernel::new(RbfKernel::new().lengthscale(&[0.2]).unwrap()),
            BernoulliLikelihood::default(),
        )
        .inducings(Inducings::Randomized(10))
        .adam(0.1, 40)
        .seed(Some(42))
        .fit(&Dataset::new(xt.clone(), yt.clone()))
        .expect("VGP fit error");

        let history = gp.elbo_history();
        assert_eq!(history.len(), 40);
        assert!(history[39] > history[0]);
        assert_eq!(gp.strategy().num_inducing(), 10);

        let proba = gp.predict_proba(&xt).unwrap();
        assert!(proba.iter().all(|p| *p > 0. && *p < 1.));
        assert!(accuracy(&proba, &yt) >= 0.9);

        let test_dir = "target/tests";
        std::fs::create_dir_all(test_dir).ok();
        write_npy(format!("{test_dir}/vgp_classification_proba.npy"), &proba).expect("proba saved");
    }

    #[test]
    fn test_kissgp_classification() {
        let (xt, yt) = step_data(40);
        let gp = VariationalGaussianProcess::<f64, _, _, _>::params(
            ConstantMean::default(),
            ScaleKernel::new(RbfKernel::new().lengthscale(&[0.2]).unwrap()),
            BernoulliLikelihood::default(),
        )
        .inducings(Inducings::Grid {
            size: 16,
            bounds: None,
        })
        .adam(0.1, 30)
        .seed(Some(42))
        .fit(&Dataset::new(xt.clone(), yt.clone()))
        .expect("KISS-GP classification fit error");

        assert!(format!("{gp}").ends_with("grid of 16 points)"));
        let proba = gp.predict_proba(&xt).unwrap();
        assert!(accuracy(&proba, &yt) >= 0.9);
        let latent = gp.predict(&array![[0.1], [0.9]]).unwrap();
        assert!(latent.mean()[0] < latent.mean()[1]);
    }

    #[test]
    fn test_svi_regression() {
        let n = 200;
        let xt = Array::linspace(0., 1., n).insert_axis(Axis(1));
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let eps = Array1::random_using(n, Normal::new(0., 0.1).unwrap(), &mut rng);
        let yt = xt.column(0).mapv(|v| (2. * std::f64::consts::PI * v).sin()) + eps;

        let params = VariationalGaussianProcess::<f64, _, _, _>::params(
            ConstantMean::default(),
            ScaleKernel::new(RbfKernel::new().lengthscale(&[0.2]).unwrap()),
            GaussianLikelihood::default(),
        )
        .inducings(Inducings::Randomized(10))
        .learn_inducing_locations(false)
        .batch_size(Some(50))
        .adam(0.1, 20)
        .seed(Some(42));
        let gp = params
            .fit(&Dataset::new(xt.clone(), yt.clone()))
            .expect("SVI fit error");
        assert_eq!(gp.elbo_history().len(), 20);
        assert!(gp.elbo_history()[19] > gp.elbo_history()[0]);

        let xtest = Array::linspace(0.05, 0.95, 19).insert_axis(Axis(1));
        let truth = xtest.column(0).mapv(|v| (2. * std::f64::consts::PI * v).sin());
        let pred = gp.predict_values(&xtest).unwrap();
        let mse = (&pred - &truth).mapv(|v| v * v).mean().unwrap();
        assert!(mse < 0.15, "mse = {mse}");

        let (mean, var) = gp.predictive_mean_var(&xtest).unwrap();
        assert_abs_diff_eq!(mean, pred, epsilon = 1e-12);
        let latent_var = gp.predict_var(&xtest).unwrap();
        assert_abs_diff_eq!(var, latent_var + gp.likelihood().noise(), epsilon = 1e-12);

        // same seed, same minibatches
        let again = params.fit(&Dataset::new(xt, yt)).unwrap();
        assert_eq!(gp.elbo_history(), again.elbo_history());
    }

    #[test]
    fn test_make_batches() {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let batches = make_batches(10, Some(4), &mut rng);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].len(), 2);
        let mut all: Vec<usize> = batches.concat();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
        assert_eq!(make_batches(3, None, &mut rng), vec![vec![0, 1, 2]]);
        assert_eq!(make_batches(3, Some(5), &mut rng), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_variational_fit_errors() {
        let params = VariationalGaussianProcess::<f64, _, _, _>::params(
            ConstantMean::default(),
            RbfKernel::new(),
            BernoulliLikelihood::default(),
        );
        let ds = Dataset::new(array![[0.], [1.]], array![0., 1., 1.]);
        assert!(params.clone().fit(&ds).is_err());
        let ds = Dataset::new(array![[0.], [1.]], array![0., 1.]);
        let located = params
            .clone()
            .inducings(Inducings::Located(array![[0., 1.]]))
            .fit(&ds);
        assert!(located.is_err());
        let labels = Dataset::new(array![[0.], [1.]], array![0., 2.]);
        assert!(params.adam(0.1, 1).fit(&labels).is_err());
    }

    #[cfg(feature = "persistent")]
    #[test]
    fn test_save_load() {
        let (xt, yt) = step_data(10);
        let gp = VariationalGaussianProcess::<f64, _, _, _>::params(
            ConstantMean::default(),
            RbfKernel::new(),
            BernoulliLikelihood::default(),
        )
        .inducings(Inducings::Randomized(4))
        .adam(0.1, 2)
        .seed(Some(42))
        .fit(&Dataset::new(xt, yt))
        .unwrap();
        let test_dir = "target/tests";
        std::fs::create_dir_all(test_dir).ok();
        let path = format!("{test_dir}/vgp.json");
        gp.save(&path).expect("VGP saving");
        let loaded = VariationalGaussianProcess::<
            f64,
            ConstantMean<f64>,
            RbfKernel<f64>,
            BernoulliLikelihood,
        >::load(&path)
        .expect("VGP loading");
        let xtest = array![[0.3], [0.6]];
        assert_abs_diff_eq!(
            gp.predict_proba(&xtest).unwrap(),
            loaded.predict_proba(&xtest).unwrap(),
            epsilon = 1e-12
        );
    }
}
