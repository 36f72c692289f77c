//! Variational approximations `q(u)` of the GP posterior on inducing values.
//!
//! * [CholeskyVariationalDistribution]: `q(u) = N(m, L.L^T)` with a free lower triangular `L`,
//! * [VariationalStrategy]: whitened strategy with (learnable) inducing points,
//! * [GridInterpolationVariationalStrategy]: KISS-GP strategy where inducing points
//!   are a fixed regular grid and predictions interpolate the grid values.

use crate::distributions::{kl_divergence, MultivariateNormal};
use crate::errors::{GpError, Result};
use crate::hyperparameters::{check_hyperparameters_len, Hyperparameters};
use crate::kernels::Kernel;
use crate::mean_models::MeanFunction;
use crate::utils::{cubic_interpolation, make_grid, padded_bounds};
use lazygp_tensor::solvers::psd_safe_cholesky;
use lazygp_tensor::{left_interp, InterpolatedLazyTensor, LazyTensor, LinalgSettings, NonLazyTensor};
use linfa::Float;
use linfa_linalg::triangular::{SolveTriangular, UPLO};
use ndarray::{Array1, Array2, ArrayBase, ArrayView2, Axis, Data, Ix2, Zip};
use ndarray_rand::rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256Plus;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Padding of the training input range used to place a variational grid
const GRID_PADDING: f64 = 0.1;

/// Inducing points specification
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
#[non_exhaustive]
pub enum Inducings<F: Float> {
    /// `usize` points are selected randomly in the training dataset
    Randomized(usize),
    /// Points are given as a (npoints, nx) matrix
    Located(Array2<F>),
    /// KISS-GP regular grid of `size` points on one-dimensional inputs,
    /// bounds default to the padded training range
    Grid {
        /// Number of grid points
        size: usize,
        /// Grid bounds
        bounds: Option<(F, F)>,
    },
}

impl<F: Float> Default for Inducings<F> {
    fn default() -> Inducings<F> {
        Self::Randomized(10)
    }
}

/// `q(u) = N(m, L.L^T)` where `L` is lower triangular.
///
/// Raw hyperparameters are the mean followed by the lower triangle of `L` row by row.
/// Diagonal entries are unconstrained, their sign does not matter.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct CholeskyVariationalDistribution<F: Float> {
    mean: Array1<F>,
    chol: Array2<F>,
}

impl<F: Float> CholeskyVariationalDistribution<F> {
    /// `N(0, I)` over `num_inducing` values
    pub fn new(num_inducing: usize) -> Self {
        CholeskyVariationalDistribution {
            mean: Array1::zeros(num_inducing),
            chol: Array2::eye(num_inducing),
        }
    }

    /// Number of inducing values
    pub fn num_inducing(&self) -> usize {
        self.mean.len()
    }

    /// Variational mean `m`
    pub fn mean(&self) -> &Array1<F> {
        &self.mean
    }

    /// Lower triangular factor `L`
    pub fn chol_factor(&self) -> &Array2<F> {
        &self.chol
    }

    /// Variational covariance `S = L.L^T`
    pub fn covariance(&self) -> Array2<F> {
        self.chol.dot(&self.chol.t())
    }

    /// `q(u)` as a multivariate normal
    pub fn distribution(&self) -> Result<MultivariateNormal<F>> {
        MultivariateNormal::from_dense(self.mean.to_owned(), self.covariance())
    }

    /// `KL(q(u) || N(0, I))`
    pub fn kl_from_standard_normal(&self) -> F {
        let m = F::cast(self.num_inducing());
        let trace = self.chol.mapv(|v| v * v).sum();
        let maha = self.mean.dot(&self.mean);
        let log_det = self.chol.diag().mapv(|v| (v * v).ln()).sum();
        F::cast(0.5) * (trace + maha - m - log_det)
    }
}

impl<F: Float> Hyperparameters<F> for CholeskyVariationalDistribution<F> {
    fn n_hyperparameters(&self) -> usize {
        let m = self.num_inducing();
        m + m * (m + 1) / 2
    }

    fn raw_hyperparameters(&self) -> Array1<F> {
        let m = self.num_inducing();
        let mut raw = self.mean.to_vec();
        for i in 0..m {
            raw.extend(self.chol.row(i).iter().take(i + 1));
        }
        Array1::from_vec(raw)
    }

    fn set_raw_hyperparameters(&mut self, raw: &[F]) -> Result<()> {
        check_hyperparameters_len(raw, self.n_hyperparameters())?;
        let m = self.num_inducing();
        self.mean.assign(&Array1::from_vec(raw[..m].to_vec()));
        let mut offset = m;
        for i in 0..m {
            for j in 0..=i {
                self.chol[[i, j]] = raw[offset];
                offset += 1;
            }
        }
        Ok(())
    }

    fn hyperparameter_names(&self) -> Vec<String> {
        let m = self.num_inducing();
        let mut names: Vec<String> = (0..m).map(|i| format!("variational_mean[{i}]")).collect();
        for i in 0..m {
            for j in 0..=i {
                names.push(format!("chol_variational_covar[{i},{j}]"));
            }
        }
        names
    }
}

/// Whitened variational strategy.
///
/// Inducing values are `u = L_zz.v` where `L_zz` is the Cholesky factor of `K(z, z)`
/// and `q(v) = N(m, S)` is a [CholeskyVariationalDistribution]. With `A = L_zz^-1.K(z, x)`:
///
/// * `f_mean = mu(x) + A^T.m`
/// * `f_cov = K(x, x) - A^T.A + A^T.S.A`
/// * `KL(q(u) || p(u)) = KL(q(v) || N(0, I))`
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct VariationalStrategy<F: Float> {
    inducing_points: Array2<F>,
    learn_inducing_locations: bool,
    variational: CholeskyVariationalDistribution<F>,
}

impl<F: Float> VariationalStrategy<F> {
    /// Strategy on the given (m, nx) inducing points
    pub fn new(inducing_points: Array2<F>, learn_inducing_locations: bool) -> Self {
        let variational = CholeskyVariationalDistribution::new(inducing_points.nrows());
        VariationalStrategy {
            inducing_points,
            learn_inducing_locations,
            variational,
        }
    }

    /// Inducing points `z`
    pub fn inducing_points(&self) -> &Array2<F> {
        &self.inducing_points
    }

    /// Whether inducing locations are optimized
    pub fn learn_inducing_locations(&self) -> bool {
        self.learn_inducing_locations
    }

    /// `q(v)`
    pub fn variational_distribution(&self) -> &CholeskyVariationalDistribution<F> {
        &self.variational
    }

    /// `A = L_zz^-1.K(z, x)`
    fn projection<K: Kernel<F>>(
        &self,
        kernel: &K,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        settings: &LinalgSettings<F>,
    ) -> Result<Array2<F>> {
        let mut kzz = kernel.forward(&self.inducing_points, &self.inducing_points)?;
        kzz.diag_mut().mapv_inplace(|v| v + settings.jitter());
        let lzz = psd_safe_cholesky(&kzz, settings)?;
        let kzx = kernel.forward(&self.inducing_points, x)?;
        Ok(lzz.solve_triangular(&kzx, UPLO::Lower)?)
    }

    /// Latent marginal means and variances at `x`
    pub fn marginals<M: MeanFunction<F>, K: Kernel<F>>(
        &self,
        mean: &M,
        kernel: &K,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        settings: &LinalgSettings<F>,
    ) -> Result<(Array1<F>, Array1<F>)> {
        let a = self.projection(kernel, x, settings)?;
        let f_mean = mean.value(x)? + a.t().dot(self.variational.mean());
        let la = self.variational.chol_factor().t().dot(&a);
        let f_var = Zip::from(&kernel.forward_diag(x)?)
            .and(&a.mapv(|v| v * v).sum_axis(Axis(0)))
            .and(&la.mapv(|v| v * v).sum_axis(Axis(0)))
            .map_collect(|&k, &prior, &post| (k - prior + post).max(F::zero()));
        Ok((f_mean, f_var))
    }

    /// Latent predictive distribution at `x` with its full covariance
    pub fn predict<M: MeanFunction<F>, K: Kernel<F>>(
        &self,
        mean: &M,
        kernel: &K,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        settings: &LinalgSettings<F>,
    ) -> Result<MultivariateNormal<F>> {
        let a = self.projection(kernel, x, settings)?;
        let f_mean = mean.value(x)? + a.t().dot(self.variational.mean());
        let la = self.variational.chol_factor().t().dot(&a);
        let f_cov = kernel.forward(x, x)? - a.t().dot(&a) + la.t().dot(&la);
        MultivariateNormal::from_dense(f_mean, f_cov)
    }

    /// `KL(q(u) || p(u))`
    pub fn kl_divergence(&self) -> F {
        self.variational.kl_from_standard_normal()
    }
}

impl<F: Float> Hyperparameters<F> for VariationalStrategy<F> {
    fn n_hyperparameters(&self) -> usize {
        let n_locations = if self.learn_inducing_locations {
            self.inducing_points.len()
        } else {
            0
        };
        self.variational.n_hyperparameters() + n_locations
    }

    fn raw_hyperparameters(&self) -> Array1<F> {
        let mut raw = self.variational.raw_hyperparameters().to_vec();
        if self.learn_inducing_locations {
            raw.extend(self.inducing_points.iter());
        }
        Array1::from_vec(raw)
    }

    fn set_raw_hyperparameters(&mut self, raw: &[F]) -> Result<()> {
        check_hyperparameters_len(raw, self.n_hyperparameters())?;
        let nv = self.variational.n_hyperparameters();
        self.variational.set_raw_hyperparameters(&raw[..nv])?;
        if self.learn_inducing_locations {
            let shape = self.inducing_points.dim();
            self.inducing_points = Array2::from_shape_vec(shape, raw[nv..].to_vec())
                .map_err(|e| GpError::InvalidValueError(e.to_string()))?;
        }
        Ok(())
    }

    fn hyperparameter_names(&self) -> Vec<String> {
        let mut names = self.variational.hyperparameter_names();
        if self.learn_inducing_locations {
            let (m, d) = self.inducing_points.dim();
            for i in 0..m {
                for j in 0..d {
                    names.push(format!("inducing_points[{i},{j}]"));
                }
            }
        }
        names
    }
}

/// KISS-GP variational strategy on one-dimensional inputs.
///
/// Inducing values `u` live on a regular grid, `q(u) = N(m, S)` is a
/// [CholeskyVariationalDistribution] and latent values are interpolated
/// with the cubic interpolation matrix `W` of the inputs:
///
/// * `f_mean = W.m`
/// * `f_var = diag(W.S.W^T)`
/// * `KL(q(u) || N(mu(grid), K(grid, grid)))`
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct GridInterpolationVariationalStrategy<F: Float> {
    grid_size: usize,
    grid_bounds: Option<(F, F)>,
    grid: Option<Array1<F>>,
    variational: CholeskyVariationalDistribution<F>,
}

impl<F: Float> GridInterpolationVariationalStrategy<F> {
    /// Strategy on a grid of `grid_size >= 4` points placed when training
    pub fn new(grid_size: usize) -> Result<Self> {
        if grid_size < 4 {
            return Err(GpError::InvalidValueError(format!(
                "grid size should be at least 4, got {grid_size}"
            )));
        }
        Ok(GridInterpolationVariationalStrategy {
            grid_size,
            grid_bounds: None,
            grid: None,
            variational: CholeskyVariationalDistribution::new(grid_size),
        })
    }

    /// Fix the grid bounds `[lower, upper]`
    pub fn with_grid_bounds(mut self, lower: F, upper: F) -> Result<Self> {
        self.grid = Some(make_grid(self.grid_size, (lower, upper))?);
        self.grid_bounds = Some((lower, upper));
        Ok(self)
    }

    /// Place the grid over the padded range of the training inputs unless bounds were given
    pub fn prepare(&mut self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<()> {
        if x.ncols() != 1 {
            return Err(GpError::InvalidValueError(format!(
                "grid interpolation strategy only supports 1-d inputs, got dimension {}",
                x.ncols()
            )));
        }
        if self.grid_bounds.is_none() {
            let bounds = padded_bounds(x, F::cast(GRID_PADDING))?;
            self.grid = Some(make_grid(self.grid_size, bounds)?);
        }
        Ok(())
    }

    /// Grid points once placed
    pub fn grid(&self) -> Option<&Array1<F>> {
        self.grid.as_ref()
    }

    /// `q(u)`
    pub fn variational_distribution(&self) -> &CholeskyVariationalDistribution<F> {
        &self.variational
    }

    fn placed_grid(&self) -> Result<&Array1<F>> {
        self.grid.as_ref().ok_or_else(|| {
            GpError::InvalidValueError("variational grid is not placed yet".to_string())
        })
    }

    fn interpolated_covariance(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array1<F>, InterpolatedLazyTensor<F>)> {
        let grid = self.placed_grid()?;
        let (indices, values) = cubic_interpolation(x, grid)?;
        let m = self.variational.mean().view().insert_axis(Axis(1));
        let f_mean = left_interp(&indices, &values, &m).remove_axis(Axis(1));
        let s: Arc<dyn LazyTensor<F>> =
            Arc::new(NonLazyTensor::try_new(self.variational.covariance())?);
        Ok((f_mean, InterpolatedLazyTensor::new(s, indices, values)?))
    }

    /// Latent marginal means and variances at `x`
    pub fn marginals(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<(Array1<F>, Array1<F>)> {
        let (f_mean, cov) = self.interpolated_covariance(x)?;
        Ok((f_mean, cov.diag().mapv(|v| v.max(F::zero()))))
    }

    /// Latent predictive distribution at `x` with a lazy interpolated covariance
    pub fn predict(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<MultivariateNormal<F>> {
        let (f_mean, cov) = self.interpolated_covariance(x)?;
        MultivariateNormal::new(f_mean, Arc::new(cov))
    }

    /// `KL(q(u) || N(mu(grid), K(grid, grid)))`
    pub fn kl_divergence<M: MeanFunction<F>, K: Kernel<F>>(
        &self,
        mean: &M,
        kernel: &K,
        settings: &LinalgSettings<F>,
    ) -> Result<F> {
        let grid = self.placed_grid()?;
        let grid2d = grid.view().insert_axis(Axis(1));
        let mut kuu = kernel.forward(&grid2d, &grid2d)?;
        kuu.diag_mut().mapv_inplace(|v| v + settings.jitter());
        let prior = MultivariateNormal::from_dense(mean.value(&grid2d)?, kuu)?;
        kl_divergence(&self.variational.distribution()?, &prior, settings)
    }
}

impl<F: Float> Hyperparameters<F> for GridInterpolationVariationalStrategy<F> {
    fn n_hyperparameters(&self) -> usize {
        self.variational.n_hyperparameters()
    }

    fn raw_hyperparameters(&self) -> Array1<F> {
        self.variational.raw_hyperparameters()
    }

    fn set_raw_hyperparameters(&mut self, raw: &[F]) -> Result<()> {
        self.variational.set_raw_hyperparameters(raw)
    }

    fn hyperparameter_names(&self) -> Vec<String> {
        self.variational.hyperparameter_names()
    }
}

/// Variational strategy selected from an [Inducings] specification
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub enum InducingStrategy<F: Float> {
    /// Whitened strategy on inducing points
    Points(VariationalStrategy<F>),
    /// KISS-GP strategy on a regular grid
    Grid(GridInterpolationVariationalStrategy<F>),
}

impl<F: Float> InducingStrategy<F> {
    /// Build the strategy given the training inputs
    pub fn from_inducings(
        inducings: &Inducings<F>,
        x: &ArrayView2<F>,
        learn_inducing_locations: bool,
        rng: &mut Xoshiro256Plus,
    ) -> Result<Self> {
        match inducings {
            Inducings::Randomized(n) => {
                if *n == 0 {
                    return Err(GpError::InvalidValueError(
                        "at least one inducing point is required".to_string(),
                    ));
                }
                let z = select_inducing_points(*n, x, rng);
                Ok(Self::Points(VariationalStrategy::new(z, learn_inducing_locations)))
            }
            Inducings::Located(z) => {
                if z.ncols() != x.ncols() || z.nrows() == 0 {
                    return Err(GpError::InvalidValueError(format!(
                        "inducing points of shape {:?} do not match inputs of dimension {}",
                        z.shape(),
                        x.ncols()
                    )));
                }
                Ok(Self::Points(VariationalStrategy::new(
                    z.to_owned(),
                    learn_inducing_locations,
                )))
            }
            Inducings::Grid { size, bounds } => {
                let mut strategy = GridInterpolationVariationalStrategy::new(*size)?;
                if let Some((lo, hi)) = bounds {
                    strategy = strategy.with_grid_bounds(*lo, *hi)?;
                }
                strategy.prepare(x)?;
                Ok(Self::Grid(strategy))
            }
        }
    }

    /// Latent marginal means and variances at `x`
    pub fn marginals<M: MeanFunction<F>, K: Kernel<F>>(
        &self,
        mean: &M,
        kernel: &K,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        settings: &LinalgSettings<F>,
    ) -> Result<(Array1<F>, Array1<F>)> {
        match self {
            Self::Points(s) => s.marginals(mean, kernel, x, settings),
            Self::Grid(s) => s.marginals(x),
        }
    }

    /// Latent predictive distribution at `x`
    pub fn predict<M: MeanFunction<F>, K: Kernel<F>>(
        &self,
        mean: &M,
        kernel: &K,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        settings: &LinalgSettings<F>,
    ) -> Result<MultivariateNormal<F>> {
        match self {
            Self::Points(s) => s.predict(mean, kernel, x, settings),
            Self::Grid(s) => s.predict(x),
        }
    }

    /// `KL(q(u) || p(u))`
    pub fn kl_divergence<M: MeanFunction<F>, K: Kernel<F>>(
        &self,
        mean: &M,
        kernel: &K,
        settings: &LinalgSettings<F>,
    ) -> Result<F> {
        match self {
            Self::Points(s) => Ok(s.kl_divergence()),
            Self::Grid(s) => s.kl_divergence(mean, kernel, settings),
        }
    }

    /// Number of inducing values
    pub fn num_inducing(&self) -> usize {
        match self {
            Self::Points(s) => s.variational_distribution().num_inducing(),
            Self::Grid(s) => s.variational_distribution().num_inducing(),
        }
    }

    fn as_hyperparameters(&self) -> &dyn Hyperparameters<F> {
        match self {
            Self::Points(s) => s,
            Self::Grid(s) => s,
        }
    }

    fn as_hyperparameters_mut(&mut self) -> &mut dyn Hyperparameters<F> {
        match self {
            Self::Points(s) => s,
            Self::Grid(s) => s,
        }
    }
}

impl<F: Float> Hyperparameters<F> for InducingStrategy<F> {
    fn n_hyperparameters(&self) -> usize {
        self.as_hyperparameters().n_hyperparameters()
    }

    fn raw_hyperparameters(&self) -> Array1<F> {
        self.as_hyperparameters().raw_hyperparameters()
    }

    fn set_raw_hyperparameters(&mut self, raw: &[F]) -> Result<()> {
        self.as_hyperparameters_mut().set_raw_hyperparameters(raw)
    }

    fn hyperparameter_names(&self) -> Vec<String> {
        self.as_hyperparameters().hyperparameter_names()
    }
}

impl<F: Float> fmt::Display for InducingStrategy<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Points(s) => write!(f, "{} inducing points", s.inducing_points().nrows()),
            Self::Grid(s) => write!(f, "grid of {} points", s.grid_size),
        }
    }
}

/// Inducing points initialized on `n_inducing` distinct training inputs drawn at random,
/// kept in training order (all inputs when fewer than `n_inducing`)
fn select_inducing_points<F: Float>(
    n_inducing: usize,
    x: &ArrayView2<F>,
    rng: &mut Xoshiro256Plus,
) -> Array2<F> {
    let mut rows: Vec<usize> = (0..x.nrows()).collect();
    rows.shuffle(rng);
    rows.truncate(n_inducing);
    rows.sort_unstable();
    x.select(Axis(0), &rows)
}
