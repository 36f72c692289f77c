use crate::distributions::MultivariateNormal;
use crate::errors::{GpError, Result};
use crate::hyperparameters::{concat_raw, split_raw, Hyperparameters};
use crate::kernels::Kernel;
use crate::likelihoods::GaussianLikelihood;
use crate::mean_models::MeanFunction;
use crate::mlls::ExactMarginalLogLikelihood;
use crate::optimization::{cobyla_minimize_raw, prepare_multistart, Adam, CobylaSettings};
use crate::parameters::{ExactGpParams, ExactGpValidParams, Optimizer};
use crate::utils::to_f64;

use lazygp_tensor::{AddedDiagLazyTensor, LazyTensor};
use linfa::prelude::{DatasetBase, Fit, Float, PredictInplace};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2, Zip};
use rand_xoshiro::Xoshiro256Plus;

use log::{debug, info};
use rayon::prelude::*;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Default Adam learning rate
pub const GP_ADAM_LR: f64 = 0.1;
/// Default number of Adam iterations
pub const GP_ADAM_N_ITER: usize = 50;
/// Default number of multistart COBYLA optimizations
pub const GP_OPTIM_N_START: usize = 10;
/// Minimum of function evaluations for COBYLA optimizer
pub const GP_COBYLA_MIN_EVAL: usize = 25;
/// Maximum of function evaluations for COBYLA optimizer
pub const GP_COBYLA_MAX_EVAL: usize = 1000;

/// Exact Gaussian Process regression model.
///
/// The latent function `f ~ GP(m(x), k(x, x'))` is observed through gaussian
/// noise `y = f(x) + eps`. Hyperparameters of the mean, the kernel and the noise
/// are fitted by maximizing the exact marginal log likelihood, either with Adam
/// steps on its analytic gradient or with a derivative-free multistart COBYLA.
///
/// With a [GridInterpolationKernel](crate::kernels::GridInterpolationKernel) (KISS-GP)
/// the training covariance is structured and large training sets are handled with
/// iterative solves (see [LinalgSettings](lazygp_tensor::LinalgSettings)).
///
/// # Features
///
/// ## serializable
///
/// The `serializable` feature enables the serialization of GP models using the [`serde crate`](https://serde.rs/).
///
/// ## persistent
///
/// The `persistent` feature enables `save()`/`load()` methods storing GP models as JSON.
///
/// # Example
///
/// ```no_run
/// use lazygp_gp::{kernels::*, mean_models::*, ExactGaussianProcess};
/// use linfa::prelude::*;
/// use ndarray::{Array, Axis};
///
/// let xt = Array::linspace(0., 1., 100).insert_axis(Axis(1));
/// let yt = xt.column(0).mapv(|v| (2. * std::f64::consts::PI * v).sin());
///
/// let gp = ExactGaussianProcess::<f64, _, _>::params(
///         ConstantMean::default(),
///         ScaleKernel::new(RbfKernel::new()),
///     )
///     .adam(0.1, 50)
///     .fit(&Dataset::new(xt, yt))
///     .expect("GP fitted");
///
/// let xtest = Array::linspace(0., 1., 51).insert_axis(Axis(1));
/// let prediction = gp.predict_observed(&xtest).expect("GP prediction");
/// let (lower, upper) = prediction.confidence_region();
/// ```
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, Mean: Serialize, K: Serialize",
        deserialize = "F: Deserialize<'de>, Mean: Deserialize<'de>, K: Deserialize<'de>"
    ))
)]
pub struct ExactGaussianProcess<F: Float, Mean: MeanFunction<F>, K: Kernel<F>> {
    /// Fitted mean function
    mean: Mean,
    /// Fitted kernel
    kernel: K,
    /// Fitted noise model
    likelihood: GaussianLikelihood<F>,
    /// Solution of `(K + noise * I) . alpha = y - m(x)`
    alpha: Array1<F>,
    /// Marginal log likelihood (divided by the number of points) of the fitted model
    log_marginal_likelihood: F,
    /// Loss (negative normalized marginal log likelihood) along the optimization
    history: Vec<F>,
    /// Training dataset (input, output)
    pub(crate) training_data: (Array2<F>, Array1<F>),
    /// Parameters used to fit this model
    pub(crate) params: ExactGpValidParams<F, Mean, K>,
}

impl<F: Float, Mean: MeanFunction<F>, K: Kernel<F>> fmt::Display
    for ExactGaussianProcess<F, Mean, K>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GP(mean={}, kernel={}, likelihood={}, mll={})",
            self.mean, self.kernel, self.likelihood, self.log_marginal_likelihood,
        )
    }
}

impl<F: Float, Mean: MeanFunction<F>, K: Kernel<F>> ExactGaussianProcess<F, Mean, K> {
    /// Exact GP parameters constructor
    pub fn params(mean: Mean, kernel: K) -> ExactGpParams<F, Mean, K> {
        ExactGpParams::new(mean, kernel)
    }

    /// Training covariance `K(x, x) + noise * I`
    fn training_covariance(&self) -> Result<AddedDiagLazyTensor<F>> {
        let xt = &self.training_data.0;
        Ok(AddedDiagLazyTensor::new(
            self.kernel.lazy_covariance(xt)?,
            self.likelihood.noise_covariance(xt.nrows()),
        )?)
    }

    /// Cross covariance `K(xt, x)` and its solve `(K + noise * I)^-1 . K(xt, x)`
    fn cross_solve(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<(Array2<F>, Array2<F>)> {
        let kxt = self.kernel.forward(&self.training_data.0, x)?;
        let solved = self
            .training_covariance()?
            .inv_matmul(&kxt.view(), &self.params.settings)?;
        Ok((kxt, solved))
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

    /// Posterior mean of the latent function at n given `x` points specified as a (n, nx) matrix.
    pub fn predict_values(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        self.check_dims(x)?;
        let kxt = self.kernel.forward(x, &self.training_data.0)?;
        Ok(self.mean.value(x)? + kxt.dot(&self.alpha))
    }

    /// Posterior variance of the latent function at n given `x` points specified as a (n, nx) matrix.
    pub fn predict_var(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        Ok(self.predict_valvar(x)?.1)
    }

    /// Posterior mean and variance of the latent function at `x`
    pub fn predict_valvar(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array1<F>, Array1<F>)> {
        self.check_dims(x)?;
        let (kxt, solved) = self.cross_solve(x)?;
        let mean = self.mean.value(x)? + kxt.t().dot(&self.alpha);
        let reduction = (&kxt * &solved).sum_axis(Axis(0));
        let var = Zip::from(&self.kernel.forward_diag(x)?)
            .and(&reduction)
            .map_collect(|&k, &r| (k - r).max(F::zero()));
        Ok((mean, var))
    }

    /// Posterior distribution of the latent function at `x`
    pub fn predict(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<MultivariateNormal<F>> {
        self.check_dims(x)?;
        let (kxt, solved) = self.cross_solve(x)?;
        let mean = self.mean.value(x)? + kxt.t().dot(&self.alpha);
        let cov = self.kernel.forward(x, x)? - kxt.t().dot(&solved);
        MultivariateNormal::from_dense(mean, cov)
    }

    /// Posterior distribution of the noisy observations at `x`
    pub fn predict_observed(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<MultivariateNormal<F>> {
        self.likelihood.marginal(&self.predict(x)?)
    }

    /// Draw `n_traj` trajectories of the latent posterior at `x`,
    /// returned as a (x.nrows(), n_traj) matrix
    pub fn sample(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        n_traj: usize,
        rng: &mut Xoshiro256Plus,
    ) -> Result<Array2<F>> {
        Ok(self
            .predict(x)?
            .sample(n_traj, rng, &self.params.settings)?
            .reversed_axes())
    }

    /// Marginal log likelihood of the fitted model divided by the number of training points
    pub fn log_marginal_likelihood(&self) -> F {
        self.log_marginal_likelihood
    }

    /// Loss values (negative normalized marginal log likelihood) recorded during optimization
    pub fn training_history(&self) -> &[F] {
        &self.history
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
    pub fn likelihood(&self) -> &GaussianLikelihood<F> {
        &self.likelihood
    }

    /// Training data (x, y)
    pub fn training_data(&self) -> &(Array2<F>, Array1<F>) {
        &self.training_data
    }

    /// Input and output dimensions
    pub fn dims(&self) -> (usize, usize) {
        (self.training_data.0.ncols(), 1)
    }
}

#[cfg(feature = "persistent")]
impl<F, Mean, K> ExactGaussianProcess<F, Mean, K>
where
    F: Float + Serialize + for<'de> Deserialize<'de>,
    Mean: MeanFunction<F> + Serialize + for<'de> Deserialize<'de>,
    K: Kernel<F> + Serialize + for<'de> Deserialize<'de>,
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

impl<F, D, Mean, K> PredictInplace<ArrayBase<D, Ix2>, Array1<F>> for ExactGaussianProcess<F, Mean, K>
where
    F: Float,
    D: Data<Elem = F>,
    Mean: MeanFunction<F>,
    K: Kernel<F>,
{
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<F>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );
        match self.predict_values(x) {
            Ok(values) => *y = values,
            Err(err) => {
                log::error!("GP prediction failed: {err}");
                y.fill(F::nan());
            }
        }
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<F> {
        Array1::zeros((x.nrows(),))
    }
}

/// Components of an exact GP updated during hyperparameters optimization
struct ExactGpComponents<F: Float, Mean: MeanFunction<F>, K: Kernel<F>> {
    mean: Mean,
    kernel: K,
    likelihood: GaussianLikelihood<F>,
}

impl<F: Float, Mean: MeanFunction<F>, K: Kernel<F>> ExactGpComponents<F, Mean, K> {
    fn raw(&self) -> Array1<F> {
        let components: [&dyn Hyperparameters<F>; 3] = [&self.mean, &self.kernel, &self.likelihood];
        concat_raw(&components)
    }

    fn set_raw(&mut self, raw: &[F]) -> Result<()> {
        let mut components: [&mut dyn Hyperparameters<F>; 3] =
            [&mut self.mean, &mut self.kernel, &mut self.likelihood];
        split_raw(&mut components, raw)
    }

    fn with_raw(&self, raw: &[F]) -> Result<Self> {
        let mut updated = ExactGpComponents {
            mean: self.mean.clone(),
            kernel: self.kernel.clone(),
            likelihood: self.likelihood,
        };
        updated.set_raw(raw)?;
        Ok(updated)
    }
}

impl<F: Float, Mean: MeanFunction<F>, K: Kernel<F>, D: Data<Elem = F>>
    Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, GpError> for ExactGpValidParams<F, Mean, K>
{
    type Object = ExactGaussianProcess<F, Mean, K>;

    /// Fit GP hyperparameters by maximizing the exact marginal likelihood
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
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

        let mut likelihood = self.likelihood;
        if let Some(noise) = self.initial_noise {
            likelihood = likelihood.with_noise(noise)?;
        }
        let mut gp = ExactGpComponents {
            mean: self.mean.clone(),
            kernel: self.kernel.clone(),
            likelihood,
        };
        gp.kernel.prepare(&x)?;
        let mll = ExactMarginalLogLikelihood::new(self.settings.clone());

        let now = Instant::now();
        let mut history = vec![];
        match self.optimizer {
            Optimizer::Adam { lr, n_iter } => {
                let mut raw = gp.raw();
                let mut adam = Adam::new(lr, raw.len());
                for i in 0..n_iter {
                    gp.set_raw(&raw.to_vec())?;
                    let (value, grad) =
                        mll.value_and_grad(&gp.mean, &gp.kernel, &gp.likelihood, &x, &y)?;
                    let loss = -value;
                    info!(
                        "Iter {}/{} - Loss: {:.3}   {}   {}",
                        i + 1,
                        n_iter,
                        loss,
                        gp.kernel,
                        gp.likelihood
                    );
                    history.push(loss);
                    adam.step(&mut raw, &grad.mapv(|g| -g).view());
                }
                gp.set_raw(&raw.to_vec())?;
            }
            Optimizer::Cobyla { n_start, max_eval } => {
                let negative_mll = |raw: &[f64]| -> f64 {
                    let raw: Vec<F> = raw.iter().map(|&v| F::cast(v)).collect();
                    match gp
                        .with_raw(&raw)
                        .and_then(|c| mll.value(&c.mean, &c.kernel, &c.likelihood, &x, &y))
                    {
                        Ok(value) => -to_f64(value),
                        Err(_) => f64::INFINITY,
                    }
                };
                let (starts, bounds) = prepare_multistart(n_start, &gp.raw(), self.seed);
                debug!("Optimize with multistart raw = {starts:?} and bounds = {bounds:?}");
                let (fmin, best) = (0..starts.nrows())
                    .into_par_iter()
                    .map(|i| {
                        cobyla_minimize_raw(
                            negative_mll,
                            &starts.row(i).to_vec(),
                            &bounds,
                            CobylaSettings::default().with_max_eval(max_eval),
                        )
                    })
                    .reduce(
                        || (f64::INFINITY, starts.row(0).to_owned()),
                        |a, b| if b.0 < a.0 { b } else { a },
                    );
                let best: Vec<F> = best.iter().map(|&v| F::cast(v)).collect();
                gp.set_raw(&best)?;
                info!(
                    "Cobyla multistart - Loss: {:.3}   {}   {}",
                    fmin, gp.kernel, gp.likelihood
                );
                history.push(F::cast(fmin));
            }
        }
        debug!("elapsed optim = {:?}", now.elapsed().as_millis());

        let ExactGpComponents {
            mean,
            kernel,
            likelihood,
        } = gp;
        let log_marginal_likelihood = mll.value(&mean, &kernel, &likelihood, &x, &y)?;
        let residual = (&y - &mean.value(&x)?).insert_axis(Axis(1));
        let cov = AddedDiagLazyTensor::new(
            kernel.lazy_covariance(&x)?,
            likelihood.noise_covariance(x.nrows()),
        )?;
        let alpha = cov
            .inv_matmul(&residual.view(), &self.settings)?
            .remove_axis(Axis(1));
        Ok(ExactGaussianProcess {
            mean,
            kernel,
            likelihood,
            alpha,
            log_marginal_likelihood,
            history,
            training_data: (x, y),
            params: self.clone(),
        })
    }
}
