//! A module for covariance functions (kernels) with learnable hyperparameters.
//!
//! The following kernels are implemented:
//! * radial basis function (squared exponential) [RbfKernel],
//! * Matern 1/2, 3/2 and 5/2 [MaternKernel],
//! * output scaling of any kernel [ScaleKernel],
//! * structured kernel interpolation of a one-dimensional kernel on a regular grid
//!   [GridInterpolationKernel] (KISS-GP).
//!
//! Stationary kernels use a lengthscale shared by every input dimension or one
//! lengthscale per dimension (ARD). Every hyperparameter gradient is analytic.

use crate::constraints::Constraint;
use crate::errors::{GpError, Result};
use crate::hyperparameters::{check_hyperparameters_len, Hyperparameter, Hyperparameters};
use crate::utils::{cubic_interpolation, make_grid, padded_bounds, pairwise_differences};
use lazygp_tensor::{
    ConstantMulLazyTensor, InterpolatedLazyTensor, LazyTensor, NonLazyTensor, ToeplitzLazyTensor,
};
use linfa::Float;
use ndarray::{concatenate, s, Array1, Array2, Array3, ArrayBase, ArrayView2, Axis, Data, Ix2, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Padding of the training input range used to place a KISS-GP grid
const GRID_PADDING: f64 = 0.1;

/// A trait for covariance functions `k(x, x')` used by gaussian process models
pub trait Kernel<F: Float>:
    Hyperparameters<F> + Clone + fmt::Debug + fmt::Display + Send + Sync
{
    /// Covariance matrix `K[i, j] = k(x1_i, x2_j)` of shape (n1, n2)
    fn forward(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array2<F>>;

    /// Diagonal `k(x_i, x_i)` of the covariance matrix of `x`
    fn forward_diag(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        Ok(self.forward(x, x)?.diag().to_owned())
    }

    /// Derivatives `dK / d raw_j` of the (n1, n2) covariance matrix, one per raw hyperparameter
    fn gradients(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Vec<Array2<F>>>;

    /// For every raw hyperparameter j, `sum_k left[:, k]^T . dK(x, x) / d raw_j . right[:, k]`
    fn quad_form_gradients(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        left: &ArrayView2<F>,
        right: &ArrayView2<F>,
    ) -> Result<Array1<F>> {
        check_quad_form(x.nrows(), left, right)?;
        let outer = left.dot(&right.t());
        Ok(self
            .gradients(x, x)?
            .iter()
            .map(|g| (g * &outer).sum())
            .collect())
    }

    /// Training covariance `K(x, x)` as a lazy tensor
    fn lazy_covariance(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Arc<dyn LazyTensor<F>>> {
        let dense = NonLazyTensor::try_new(self.forward(x, x)?)?;
        Ok(Arc::new(dense))
    }

    /// Whether `k(x, x')` only depends on `x - x'`
    fn is_stationary(&self) -> bool {
        false
    }

    /// Hook called with the training inputs before hyperparameters optimization
    fn prepare(&mut self, _x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<()> {
        Ok(())
    }
}

fn check_quad_form<F: Float>(n: usize, left: &ArrayView2<F>, right: &ArrayView2<F>) -> Result<()> {
    if left.nrows() != n || right.nrows() != n || left.ncols() != right.ncols() {
        return Err(GpError::InvalidValueError(format!(
            "quadratic form operands should be ({n}, k) matrices, got {:?} and {:?}",
            left.shape(),
            right.shape()
        )));
    }
    Ok(())
}

/// Positive lengthscale(s) of a stationary kernel: a single shared value or one per dimension
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
struct Lengthscale<F: Float> {
    values: Vec<Hyperparameter<F>>,
}

impl<F: Float> Lengthscale<F> {
    fn new(n: usize) -> Self {
        Lengthscale {
            values: vec![Hyperparameter::from_raw(F::zero(), Constraint::Positive); n],
        }
    }

    fn set(&mut self, values: &[F]) -> Result<()> {
        if values.len() != self.values.len() {
            return Err(GpError::InvalidValueError(format!(
                "expected {} lengthscale values, got {}",
                self.values.len(),
                values.len()
            )));
        }
        for (h, &v) in self.values.iter_mut().zip(values) {
            h.set_value(v)?;
        }
        Ok(())
    }

    fn values(&self) -> Array1<F> {
        self.values.iter().map(|h| h.value()).collect()
    }

    fn is_ard(&self) -> bool {
        self.values.len() > 1
    }

    /// Differences `(x1_i - x2_j) / l` as a (n1, n2, d) array
    fn scaled_differences(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array3<F>> {
        if x1.ncols() != x2.ncols() {
            return Err(GpError::InvalidValueError(format!(
                "inputs dimensions mismatch: {} vs {}",
                x1.ncols(),
                x2.ncols()
            )));
        }
        if self.is_ard() && self.values.len() != x1.ncols() {
            return Err(GpError::InvalidValueError(format!(
                "ARD kernel with {} lengthscales used on {}-dimensional inputs",
                self.values.len(),
                x1.ncols()
            )));
        }
        let mut d = pairwise_differences(x1, x2)?;
        let ls = self.values();
        if self.is_ard() {
            d /= &ls;
        } else {
            d /= ls[0];
        }
        Ok(d)
    }

    /// Derivatives `dK / d raw_l` of a stationary kernel given its scaled
    /// differences and `G(r) = (dk/dr) / r` evaluated on every pair
    fn gradients(&self, scaled: &Array3<F>, g: &Array2<F>) -> Vec<Array2<F>> {
        let ls = self.values();
        let sq = scaled.mapv(|v| v * v);
        if self.is_ard() {
            // dr/dl_k = -s_k^2 / (r l_k)
            self.values
                .iter()
                .enumerate()
                .map(|(k, h)| {
                    let sk = sq.index_axis(Axis(2), k);
                    Zip::from(g)
                        .and(&sk)
                        .map_collect(|&gv, &s| -gv * s / ls[k] * h.derivative())
                })
                .collect()
        } else {
            let r2 = sq.sum_axis(Axis(2));
            let h = &self.values[0];
            vec![Zip::from(g)
                .and(&r2)
                .map_collect(|&gv, &s| -gv * s / ls[0] * h.derivative())]
        }
    }

    fn raw(&self) -> Vec<F> {
        self.values.iter().map(|h| h.raw()).collect()
    }

    fn set_raw(&mut self, raw: &[F]) {
        for (h, &r) in self.values.iter_mut().zip(raw) {
            h.set_raw(r);
        }
    }

    fn names(&self) -> Vec<String> {
        if self.is_ard() {
            (0..self.values.len())
                .map(|i| format!("lengthscale[{i}]"))
                .collect()
        } else {
            vec!["lengthscale".to_string()]
        }
    }
}

impl<F: Float> fmt::Display for Lengthscale<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_ard() {
            let values: Vec<String> = self
                .values
                .iter()
                .map(|h| format!("{:.3}", h.value()))
                .collect();
            write!(f, "lengthscale: [{}]", values.join(", "))
        } else {
            write!(f, "lengthscale: {:.3}", self.values[0].value())
        }
    }
}

/// Scaled distances `r` given scaled differences
fn distances<F: Float>(scaled: &Array3<F>) -> Array2<F> {
    scaled.mapv(|v| v * v).sum_axis(Axis(2)).mapv(|v| v.sqrt())
}

macro_rules! impl_stationary_hyperparameters {
    ($kernel:ident) => {
        impl<F: Float> Hyperparameters<F> for $kernel<F> {
            fn n_hyperparameters(&self) -> usize {
                self.lengthscale.values.len()
            }

            fn raw_hyperparameters(&self) -> Array1<F> {
                Array1::from_vec(self.lengthscale.raw())
            }

            fn set_raw_hyperparameters(&mut self, raw: &[F]) -> Result<()> {
                check_hyperparameters_len(raw, self.n_hyperparameters())?;
                self.lengthscale.set_raw(raw);
                Ok(())
            }

            fn hyperparameter_names(&self) -> Vec<String> {
                self.lengthscale.names()
            }
        }
    };
}

/// Radial basis function kernel `k(x, x') = exp(-r^2 / 2)` with `r = |x - x'| / l`
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct RbfKernel<F: Float> {
    lengthscale: Lengthscale<F>,
}

impl<F: Float> Default for RbfKernel<F> {
    fn default() -> Self {
        RbfKernel::new()
    }
}

impl<F: Float> RbfKernel<F> {
    /// Kernel with a single lengthscale initialized to `softplus(0) = 0.693`
    pub fn new() -> Self {
        RbfKernel {
            lengthscale: Lengthscale::new(1),
        }
    }

    /// Kernel with one lengthscale per input dimension
    pub fn with_ard(dim: usize) -> Self {
        RbfKernel {
            lengthscale: Lengthscale::new(dim.max(1)),
        }
    }

    /// Set lengthscale value(s)
    pub fn lengthscale(mut self, values: &[F]) -> Result<Self> {
        self.lengthscale.set(values)?;
        Ok(self)
    }

    /// Lengthscale value(s)
    pub fn lengthscale_values(&self) -> Array1<F> {
        self.lengthscale.values()
    }
}

impl_stationary_hyperparameters!(RbfKernel);

impl<F: Float> Kernel<F> for RbfKernel<F> {
    fn forward(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array2<F>> {
        let scaled = self.lengthscale.scaled_differences(x1, x2)?;
        Ok(scaled
            .mapv(|v| v * v)
            .sum_axis(Axis(2))
            .mapv(|r2| (F::cast(-0.5) * r2).exp()))
    }

    fn forward_diag(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        Ok(Array1::ones(x.nrows()))
    }

    fn gradients(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Vec<Array2<F>>> {
        let scaled = self.lengthscale.scaled_differences(x1, x2)?;
        // G(r) = -exp(-r^2 / 2)
        let g = scaled
            .mapv(|v| v * v)
            .sum_axis(Axis(2))
            .mapv(|r2| -(F::cast(-0.5) * r2).exp());
        Ok(self.lengthscale.gradients(&scaled, &g))
    }

    fn is_stationary(&self) -> bool {
        true
    }
}

impl<F: Float> fmt::Display for RbfKernel<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.lengthscale)
    }
}

/// Smoothness parameter of a Matern kernel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum MaternNu {
    /// nu = 1/2, `k = exp(-r)`
    Half,
    /// nu = 3/2, `k = (1 + sqrt(3) r) exp(-sqrt(3) r)`
    ThreeHalves,
    /// nu = 5/2, `k = (1 + sqrt(5) r + 5 r^2 / 3) exp(-sqrt(5) r)`
    FiveHalves,
}

impl TryFrom<f64> for MaternNu {
    type Error = GpError;
    fn try_from(nu: f64) -> Result<Self> {
        match nu {
            v if v == 0.5 => Ok(MaternNu::Half),
            v if v == 1.5 => Ok(MaternNu::ThreeHalves),
            v if v == 2.5 => Ok(MaternNu::FiveHalves),
            v => Err(GpError::InvalidValueError(format!(
                "Matern nu should be one of 0.5, 1.5 or 2.5, got {v}"
            ))),
        }
    }
}

impl fmt::Display for MaternNu {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            MaternNu::Half => "1/2",
            MaternNu::ThreeHalves => "3/2",
            MaternNu::FiveHalves => "5/2",
        };
        write!(f, "{s}")
    }
}

/// Matern kernel of smoothness 1/2, 3/2 or 5/2 with `r = |x - x'| / l`
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct MaternKernel<F: Float> {
    nu: MaternNu,
    lengthscale: Lengthscale<F>,
}

impl<F: Float> MaternKernel<F> {
    /// Kernel with a single lengthscale initialized to `softplus(0) = 0.693`
    pub fn new(nu: MaternNu) -> Self {
        MaternKernel {
            nu,
            lengthscale: Lengthscale::new(1),
        }
    }

    /// Kernel with one lengthscale per input dimension
    pub fn with_ard(nu: MaternNu, dim: usize) -> Self {
        MaternKernel {
            nu,
            lengthscale: Lengthscale::new(dim.max(1)),
        }
    }

    /// Set lengthscale value(s)
    pub fn lengthscale(mut self, values: &[F]) -> Result<Self> {
        self.lengthscale.set(values)?;
        Ok(self)
    }

    /// Lengthscale value(s)
    pub fn lengthscale_values(&self) -> Array1<F> {
        self.lengthscale.values()
    }

    /// Smoothness
    pub fn nu(&self) -> MaternNu {
        self.nu
    }

    fn value(&self, r: F) -> F {
        match self.nu {
            MaternNu::Half => (-r).exp(),
            MaternNu::ThreeHalves => {
                let sr = F::cast(3.).sqrt() * r;
                (F::one() + sr) * (-sr).exp()
            }
            MaternNu::FiveHalves => {
                let sr = F::cast(5.).sqrt() * r;
                (F::one() + sr + sr * sr / F::cast(3.)) * (-sr).exp()
            }
        }
    }

    /// `(dk/dr) / r`, set to zero at r = 0 for nu = 1/2 where every
    /// lengthscale derivative vanishes anyway
    fn grad_profile(&self, r: F) -> F {
        match self.nu {
            MaternNu::Half => {
                if r > F::zero() {
                    -(-r).exp() / r
                } else {
                    F::zero()
                }
            }
            MaternNu::ThreeHalves => {
                let sr = F::cast(3.).sqrt() * r;
                F::cast(-3.) * (-sr).exp()
            }
            MaternNu::FiveHalves => {
                let sr = F::cast(5.).sqrt() * r;
                F::cast(-5. / 3.) * (F::one() + sr) * (-sr).exp()
            }
        }
    }
}

impl_stationary_hyperparameters!(MaternKernel);

impl<F: Float> Kernel<F> for MaternKernel<F> {
    fn forward(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array2<F>> {
        let scaled = self.lengthscale.scaled_differences(x1, x2)?;
        Ok(distances(&scaled).mapv(|r| self.value(r)))
    }

    fn forward_diag(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        Ok(Array1::ones(x.nrows()))
    }

    fn gradients(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Vec<Array2<F>>> {
        let scaled = self.lengthscale.scaled_differences(x1, x2)?;
        let g = distances(&scaled).mapv(|r| self.grad_profile(r));
        Ok(self.lengthscale.gradients(&scaled, &g))
    }

    fn is_stationary(&self) -> bool {
        true
    }
}

impl<F: Float> fmt::Display for MaternKernel<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "matern{}  {}", self.nu, self.lengthscale)
    }
}

/// `outputscale * k(x, x')` for a base kernel `k`
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, K: Serialize",
        deserialize = "F: Deserialize<'de>, K: Deserialize<'de>"
    ))
)]
pub struct ScaleKernel<F: Float, K: Kernel<F>> {
    base_kernel: K,
    outputscale: Hyperparameter<F>,
}

impl<F: Float, K: Kernel<F>> ScaleKernel<F, K> {
    /// Scaled kernel with outputscale initialized to `softplus(0) = 0.693`
    pub fn new(base_kernel: K) -> Self {
        ScaleKernel {
            base_kernel,
            outputscale: Hyperparameter::from_raw(F::zero(), Constraint::Positive),
        }
    }

    /// Set outputscale value
    pub fn outputscale(mut self, value: F) -> Result<Self> {
        self.outputscale.set_value(value)?;
        Ok(self)
    }

    /// Outputscale value
    pub fn outputscale_value(&self) -> F {
        self.outputscale.value()
    }

    /// Scaled kernel
    pub fn base_kernel(&self) -> &K {
        &self.base_kernel
    }
}

impl<F: Float, K: Kernel<F>> Hyperparameters<F> for ScaleKernel<F, K> {
    fn n_hyperparameters(&self) -> usize {
        1 + self.base_kernel.n_hyperparameters()
    }

    fn raw_hyperparameters(&self) -> Array1<F> {
        let mut raw = vec![self.outputscale.raw()];
        raw.extend(self.base_kernel.raw_hyperparameters());
        Array1::from_vec(raw)
    }

    fn set_raw_hyperparameters(&mut self, raw: &[F]) -> Result<()> {
        check_hyperparameters_len(raw, self.n_hyperparameters())?;
        self.outputscale.set_raw(raw[0]);
        self.base_kernel.set_raw_hyperparameters(&raw[1..])
    }

    fn hyperparameter_names(&self) -> Vec<String> {
        let mut names = vec!["outputscale".to_string()];
        names.extend(self.base_kernel.hyperparameter_names());
        names
    }
}

impl<F: Float, K: Kernel<F>> Kernel<F> for ScaleKernel<F, K> {
    fn forward(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array2<F>> {
        Ok(self.base_kernel.forward(x1, x2)? * self.outputscale.value())
    }

    fn forward_diag(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        Ok(self.base_kernel.forward_diag(x)? * self.outputscale.value())
    }

    fn gradients(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Vec<Array2<F>>> {
        let c = self.outputscale.value();
        let mut grads = vec![self.base_kernel.forward(x1, x2)? * self.outputscale.derivative()];
        grads.extend(
            self.base_kernel
                .gradients(x1, x2)?
                .into_iter()
                .map(|g| g * c),
        );
        Ok(grads)
    }

    fn quad_form_gradients(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        left: &ArrayView2<F>,
        right: &ArrayView2<F>,
    ) -> Result<Array1<F>> {
        check_quad_form(x.nrows(), left, right)?;
        let covar = self.lazy_covariance(x)?;
        // first entry is the derivative w.r.t. the outputscale
        let d_outputscale = covar
            .quad_form_derivative(left, right)?
            .first()
            .and_then(|d| d.iter().next().copied())
            .ok_or_else(|| {
                GpError::InvalidValueError("scaled covariance without outputscale".to_string())
            })?;
        let d_scale = d_outputscale * self.outputscale.derivative();
        let base_grads =
            self.base_kernel.quad_form_gradients(x, left, right)? * self.outputscale.value();
        Ok(concatenate![Axis(0), Array1::from_elem(1, d_scale), base_grads])
    }

    fn lazy_covariance(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Arc<dyn LazyTensor<F>>> {
        let base = self.base_kernel.lazy_covariance(x)?;
        Ok(Arc::new(ConstantMulLazyTensor::new(
            base,
            self.outputscale.value(),
        )?))
    }

    fn is_stationary(&self) -> bool {
        self.base_kernel.is_stationary()
    }

    fn prepare(&mut self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<()> {
        self.base_kernel.prepare(x)
    }
}

impl<F: Float, K: Kernel<F>> fmt::Display for ScaleKernel<F, K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "outputscale: {:.3}  {}",
            self.outputscale.value(),
            self.base_kernel
        )
    }
}

/// Structured kernel interpolation (KISS-GP) of a base kernel on a regular one-dimensional grid.
///
/// `K(x1, x2) ~ W1 . K_uu . W2^T` where `K_uu` is the base kernel evaluated on the
/// grid and each `W` holds the 4 cubic interpolation weights of every input. With a
/// stationary base kernel `K_uu` is Toeplitz, so a product with the training covariance
/// costs `O(n + m^2)` instead of `O(n^2)`.
///
/// The grid has `grid_size >= 4` points spaced by `h = (b - a) / (grid_size - 3)` and
/// covers `[a - h, b + h]`, `[a, b]` being the grid bounds. Unless given explicitly, the
/// bounds are the training inputs range padded by 10% on each side (see [`Kernel::prepare`]).
///
/// Only one-dimensional inputs are supported.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, K: Serialize",
        deserialize = "F: Deserialize<'de>, K: Deserialize<'de>"
    ))
)]
pub struct GridInterpolationKernel<F: Float, K: Kernel<F>> {
    base_kernel: K,
    grid_size: usize,
    grid_bounds: Option<(F, F)>,
    grid: Option<Array1<F>>,
}

impl<F: Float, K: Kernel<F>> GridInterpolationKernel<F, K> {
    /// Interpolated kernel on a grid of `grid_size` points placed when training
    pub fn new(base_kernel: K, grid_size: usize) -> Result<Self> {
        if grid_size < 4 {
            return Err(GpError::InvalidValueError(format!(
                "grid size should be at least 4, got {grid_size}"
            )));
        }
        Ok(GridInterpolationKernel {
            base_kernel,
            grid_size,
            grid_bounds: None,
            grid: None,
        })
    }

    /// Fix the grid bounds `[lower, upper]`
    pub fn with_grid_bounds(mut self, lower: F, upper: F) -> Result<Self> {
        self.grid = Some(make_grid(self.grid_size, (lower, upper))?);
        self.grid_bounds = Some((lower, upper));
        Ok(self)
    }

    /// Interpolated kernel
    pub fn base_kernel(&self) -> &K {
        &self.base_kernel
    }

    /// Number of grid points
    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    /// Grid points once placed
    pub fn grid(&self) -> Option<&Array1<F>> {
        self.grid.as_ref()
    }

    fn check_dim(x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<()> {
        if x.ncols() != 1 {
            return Err(GpError::InvalidValueError(format!(
                "grid interpolation kernel only supports 1-d inputs, got dimension {}",
                x.ncols()
            )));
        }
        Ok(())
    }

    /// Placed grid, or a grid covering both inputs when not placed yet
    fn grid_for(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array1<F>> {
        Self::check_dim(x1)?;
        Self::check_dim(x2)?;
        match &self.grid {
            Some(grid) => Ok(grid.to_owned()),
            None => {
                let all = concatenate![Axis(0), x1.view(), x2.view()];
                make_grid(self.grid_size, padded_bounds(&all, F::cast(GRID_PADDING))?)
            }
        }
    }

    /// Base kernel on the grid: Toeplitz when stationary, dense otherwise
    fn grid_covariance(&self, grid: &Array1<F>) -> Result<Arc<dyn LazyTensor<F>>> {
        let grid2d = grid.view().insert_axis(Axis(1));
        if self.base_kernel.is_stationary() {
            let column = self
                .base_kernel
                .forward(&grid2d.slice(s![0..1, ..]), &grid2d)?
                .row(0)
                .to_owned();
            Ok(Arc::new(ToeplitzLazyTensor::new(column)?))
        } else {
            let dense = self.base_kernel.forward(&grid2d, &grid2d)?;
            Ok(Arc::new(NonLazyTensor::try_new(dense)?))
        }
    }

    fn interpolated(
        base: Arc<dyn LazyTensor<F>>,
        grid: &Array1<F>,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<InterpolatedLazyTensor<F>> {
        let (li, lv) = cubic_interpolation(x1, grid)?;
        let (ri, rv) = cubic_interpolation(x2, grid)?;
        Ok(InterpolatedLazyTensor::new_cross(base, li, lv, ri, rv)?)
    }
}

impl<F: Float, K: Kernel<F>> Hyperparameters<F> for GridInterpolationKernel<F, K> {
    fn n_hyperparameters(&self) -> usize {
        self.base_kernel.n_hyperparameters()
    }

    fn raw_hyperparameters(&self) -> Array1<F> {
        self.base_kernel.raw_hyperparameters()
    }

    fn set_raw_hyperparameters(&mut self, raw: &[F]) -> Result<()> {
        self.base_kernel.set_raw_hyperparameters(raw)
    }

    fn hyperparameter_names(&self) -> Vec<String> {
        self.base_kernel.hyperparameter_names()
    }
}

impl<F: Float, K: Kernel<F>> Kernel<F> for GridInterpolationKernel<F, K> {
    fn forward(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array2<F>> {
        let grid = self.grid_for(x1, x2)?;
        let base = self.grid_covariance(&grid)?;
        Ok(Self::interpolated(base, &grid, x1, x2)?.evaluate())
    }

    fn forward_diag(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        let grid = self.grid_for(x, x)?;
        let base = self.grid_covariance(&grid)?;
        Ok(Self::interpolated(base, &grid, x, x)?.diag())
    }

    fn gradients(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Vec<Array2<F>>> {
        let grid = self.grid_for(x1, x2)?;
        let grid2d = grid.view().insert_axis(Axis(1));
        self.base_kernel
            .gradients(&grid2d, &grid2d)?
            .into_iter()
            .map(|g| {
                let base: Arc<dyn LazyTensor<F>> = Arc::new(NonLazyTensor::try_new(g)?);
                Ok(Self::interpolated(base, &grid, x1, x2)?.evaluate())
            })
            .collect()
    }

    fn quad_form_gradients(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        left: &ArrayView2<F>,
        right: &ArrayView2<F>,
    ) -> Result<Array1<F>> {
        check_quad_form(x.nrows(), left, right)?;
        let grid = self.grid_for(x, x)?;
        let (indices, values) = cubic_interpolation(x, &grid)?;
        let covar = InterpolatedLazyTensor::new(self.grid_covariance(&grid)?, indices, values)?;
        // derivative w.r.t. the grid covariance representation: Toeplitz column or dense matrix
        let d_repr = covar
            .quad_form_derivative(left, right)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                GpError::InvalidValueError("grid covariance without representation".to_string())
            })?;
        let grid2d = grid.view().insert_axis(Axis(1));
        let repr_grads = if self.base_kernel.is_stationary() {
            // c[d] = k(g_0, g_d)
            self.base_kernel.gradients(&grid2d.slice(s![0..1, ..]), &grid2d)?
        } else {
            self.base_kernel.gradients(&grid2d, &grid2d)?
        };
        if let Some(g) = repr_grads.iter().find(|g| g.len() != d_repr.len()) {
            return Err(GpError::InvalidValueError(format!(
                "grid covariance gradient of size {} does not match representation of size {}",
                g.len(),
                d_repr.len()
            )));
        }
        Ok(repr_grads
            .iter()
            .map(|g| {
                g.iter()
                    .zip(d_repr.iter())
                    .fold(F::zero(), |acc, (&dk, &dr)| acc + dk * dr)
            })
            .collect())
    }

    fn lazy_covariance(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Arc<dyn LazyTensor<F>>> {
        let grid = self.grid_for(x, x)?;
        let base = self.grid_covariance(&grid)?;
        let (indices, values) = cubic_interpolation(x, &grid)?;
        Ok(Arc::new(InterpolatedLazyTensor::new(base, indices, values)?))
    }

    fn is_stationary(&self) -> bool {
        self.base_kernel.is_stationary()
    }

    fn prepare(&mut self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<()> {
        Self::check_dim(x)?;
        if self.grid_bounds.is_none() {
            let bounds = padded_bounds(x, F::cast(GRID_PADDING))?;
            self.grid = Some(make_grid(self.grid_size, bounds)?);
        }
        self.base_kernel.prepare(x)
    }
}

impl<F: Float, K: Kernel<F>> fmt::Display for GridInterpolationKernel<F, K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.base_kernel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};
    use paste::paste;

    fn finite_difference_gradients<K: Kernel<f64>>(
        kernel: &K,
        x1: &Array2<f64>,
        x2: &Array2<f64>,
    ) -> Vec<Array2<f64>> {
        let raw = kernel.raw_hyperparameters();
        let h = 1e-6;
        (0..raw.len())
            .map(|j| {
                let mut plus = kernel.clone();
                let mut rp = raw.clone();
                rp[j] += h;
                plus.set_raw_hyperparameters(rp.as_slice().unwrap()).unwrap();
                let mut minus = kernel.clone();
                let mut rm = raw.clone();
                rm[j] -= h;
                minus.set_raw_hyperparameters(rm.as_slice().unwrap()).unwrap();
                (plus.forward(x1, x2).unwrap() - minus.forward(x1, x2).unwrap()) / (2. * h)
            })
            .collect()
    }

    fn check_gradients<K: Kernel<f64>>(kernel: &K, x1: &Array2<f64>, x2: &Array2<f64>) {
        let grads = kernel.gradients(x1, x2).unwrap();
        let expected = finite_difference_gradients(kernel, x1, x2);
        assert_eq!(grads.len(), kernel.n_hyperparameters());
        for (g, e) in grads.iter().zip(&expected) {
            assert_abs_diff_eq!(g, e, epsilon = 1e-6);
        }
    }

    fn inputs() -> (Array2<f64>, Array2<f64>) {
        (
            array![[0., 0.5], [0.3, -0.2], [1., 1.], [-0.7, 0.4]],
            array![[0.1, 0.5], [0.9, 0.8], [-1., 0.]],
        )
    }

    macro_rules! test_kernel {
        ($name:ident, $kernel:expr) => {
            paste! {
                #[test]
                fn [<test_ $name _gradients>]() {
                    let (x1, x2) = inputs();
                    let kernel = $kernel;
                    check_gradients(&kernel, &x1, &x2);
                    check_gradients(&kernel, &x1, &x1);
                }

                #[test]
                fn [<test_ $name _forward>]() {
                    let (x1, x2) = inputs();
                    let kernel = $kernel;
                    let k = kernel.forward(&x1, &x2).unwrap();
                    assert_eq!(k.dim(), (4, 3));
                    let kxx = kernel.forward(&x1, &x1).unwrap();
                    assert_abs_diff_eq!(kxx, kxx.t(), epsilon = 1e-12);
                    assert_abs_diff_eq!(
                        kernel.forward_diag(&x1).unwrap(),
                        kxx.diag().to_owned(),
                        epsilon = 1e-12
                    );
                    assert_abs_diff_eq!(
                        kernel.lazy_covariance(&x1).unwrap().evaluate(),
                        kxx,
                        epsilon = 1e-12
                    );
                }

                #[test]
                fn [<test_ $name _quad_form_gradients>]() {
                    let (x1, _) = inputs();
                    let kernel = $kernel;
                    let left = array![[1., 0.], [0.5, 1.], [-1., 2.], [0.2, 0.]];
                    let right = array![[0.3, 1.], [1., -1.], [0.1, 0.], [2., 0.5]];
                    let qf = kernel.quad_form_gradients(&x1, &left.view(), &right.view()).unwrap();
                    let grads = kernel.gradients(&x1, &x1).unwrap();
                    for (q, g) in qf.iter().zip(&grads) {
                        let expected = (&left * &g.dot(&right)).sum();
                        assert_abs_diff_eq!(*q, expected, epsilon = 1e-10);
                    }
                }
            }
        };
    }

    test_kernel!(rbf, RbfKernel::<f64>::new().lengthscale(&[0.8]).unwrap());
    test_kernel!(rbf_ard, RbfKernel::<f64>::with_ard(2).lengthscale(&[0.8, 1.5]).unwrap());
    test_kernel!(matern12, MaternKernel::<f64>::new(MaternNu::Half));
    test_kernel!(
        matern32_ard,
        MaternKernel::<f64>::with_ard(MaternNu::ThreeHalves, 2)
            .lengthscale(&[0.5, 2.])
            .unwrap()
    );
    test_kernel!(matern52, MaternKernel::<f64>::new(MaternNu::FiveHalves));
    test_kernel!(
        scale_rbf,
        ScaleKernel::new(RbfKernel::<f64>::with_ard(2)).outputscale(2.).unwrap()
    );

    #[test]
    fn test_rbf_values() {
        let kernel = RbfKernel::<f64>::new().lengthscale(&[2.]).unwrap();
        let k = kernel.forward(&array![[0.], [1.]], &array![[0.], [3.]]).unwrap();
        assert_abs_diff_eq!(k[[0, 0]], 1., epsilon = 1e-12);
        assert_abs_diff_eq!(k[[1, 1]], (-0.5f64).exp(), epsilon = 1e-12);
        assert!(kernel.is_stationary());
        assert!(RbfKernel::<f64>::with_ard(3)
            .forward(&array![[0., 1.]], &array![[1., 1.]])
            .is_err());
        assert_abs_diff_eq!(
            RbfKernel::<f64>::new().lengthscale_values()[0],
            2f64.ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_matern_values() {
        let x1 = array![[0.]];
        let x2 = array![[1.]];
        let k12 = MaternKernel::<f64>::new(MaternNu::Half).lengthscale(&[1.]).unwrap();
        assert_abs_diff_eq!(k12.forward(&x1, &x2).unwrap()[[0, 0]], (-1f64).exp(), epsilon = 1e-12);
        let k52 = MaternKernel::<f64>::new(MaternNu::FiveHalves).lengthscale(&[1.]).unwrap();
        let s5 = 5f64.sqrt();
        assert_abs_diff_eq!(
            k52.forward(&x1, &x2).unwrap()[[0, 0]],
            (1. + s5 + 5. / 3.) * (-s5).exp(),
            epsilon = 1e-12
        );
        assert_eq!(MaternNu::try_from(1.5).unwrap(), MaternNu::ThreeHalves);
        assert!(MaternNu::try_from(1.).is_err());
    }

    #[test]
    fn test_scale_kernel() {
        let kernel = ScaleKernel::new(RbfKernel::<f64>::new()).outputscale(3.).unwrap();
        let x = array![[0.], [0.5]];
        assert_abs_diff_eq!(kernel.forward_diag(&x).unwrap(), array![3., 3.], epsilon = 1e-12);
        assert_eq!(kernel.n_hyperparameters(), 2);
        assert_eq!(
            kernel.hyperparameter_names(),
            vec!["outputscale".to_string(), "lengthscale".to_string()]
        );
        assert_eq!(format!("{kernel}"), "outputscale: 3.000  lengthscale: 0.693");
    }

    fn grid_kernel() -> GridInterpolationKernel<f64, ScaleKernel<f64, RbfKernel<f64>>> {
        let mut kernel = GridInterpolationKernel::new(
            ScaleKernel::new(RbfKernel::new().lengthscale(&[0.3]).unwrap()),
            100,
        )
        .unwrap();
        let x = Array::linspace(0., 1., 20).insert_axis(Axis(1));
        kernel.prepare(&x).unwrap();
        kernel
    }

    #[test]
    fn test_grid_interpolation_approximates_base_kernel() {
        let kernel = grid_kernel();
        let grid = kernel.grid().unwrap();
        assert_eq!(grid.len(), 100);
        // bounds padded by 10%: first interior point at -0.1
        assert_abs_diff_eq!(grid[1], -0.1, epsilon = 1e-12);
        let x = array![[0.05], [0.33], [0.71], [0.99]];
        let exact = kernel.base_kernel().forward(&x, &x).unwrap();
        let approx = kernel.forward(&x, &x).unwrap();
        assert_abs_diff_eq!(approx, exact, epsilon = 1e-3);
        let lazy = kernel.lazy_covariance(&x).unwrap();
        assert_abs_diff_eq!(lazy.evaluate(), approx, epsilon = 1e-12);
        assert_abs_diff_eq!(kernel.forward_diag(&x).unwrap(), approx.diag(), epsilon = 1e-12);
    }

    #[test]
    fn test_grid_interpolation_gradients() {
        let kernel = grid_kernel();
        let x = array![[0.05], [0.33], [0.71], [0.99]];
        check_gradients(&kernel, &x, &x);
        let left = array![[1.], [0.5], [-1.], [0.2]];
        let right = array![[0.3], [1.], [0.1], [2.]];
        let qf = kernel
            .quad_form_gradients(&x, &left.view(), &right.view())
            .unwrap();
        let grads = kernel.gradients(&x, &x).unwrap();
        for (q, g) in qf.iter().zip(&grads) {
            assert_abs_diff_eq!(*q, (&left * &g.dot(&right)).sum(), epsilon = 1e-10);
        }
    }

    #[test]
    fn test_grid_interpolation_quad_form_matches_finite_differences() {
        let kernel = grid_kernel();
        let x = Array::linspace(0.02f64, 0.97, 15).insert_axis(Axis(1));
        let left = x.mapv(|v| (3. * v).sin());
        let right = x.mapv(|v| 1. - v * v);
        let qf = kernel
            .quad_form_gradients(&x, &left.view(), &right.view())
            .unwrap();
        let quad = |k: &GridInterpolationKernel<f64, ScaleKernel<f64, RbfKernel<f64>>>| {
            left.t().dot(&k.forward(&x, &x).unwrap()).dot(&right)[[0, 0]]
        };
        let raw = kernel.raw_hyperparameters();
        assert_eq!(qf.len(), raw.len());
        for j in 0..raw.len() {
            let mut plus = kernel.clone();
            let mut rp = raw.clone();
            rp[j] += 1e-6;
            plus.set_raw_hyperparameters(rp.as_slice().unwrap()).unwrap();
            let mut minus = kernel.clone();
            let mut rm = raw.clone();
            rm[j] -= 1e-6;
            minus.set_raw_hyperparameters(rm.as_slice().unwrap()).unwrap();
            let fd = (quad(&plus) - quad(&minus)) / 2e-6;
            assert_abs_diff_eq!(qf[j], fd, epsilon = 1e-5);
        }
    }

    /// `variance * x . x'`, not stationary
    #[derive(Clone, Debug)]
    struct LinearKernel {
        variance: Hyperparameter<f64>,
    }

    impl Hyperparameters<f64> for LinearKernel {
        fn n_hyperparameters(&self) -> usize {
            1
        }

        fn raw_hyperparameters(&self) -> Array1<f64> {
            array![self.variance.raw()]
        }

        fn set_raw_hyperparameters(&mut self, raw: &[f64]) -> Result<()> {
            check_hyperparameters_len(raw, 1)?;
            self.variance.set_raw(raw[0]);
            Ok(())
        }

        fn hyperparameter_names(&self) -> Vec<String> {
            vec!["variance".to_string()]
        }
    }

    impl Kernel<f64> for LinearKernel {
        fn forward(
            &self,
            x1: &ArrayBase<impl Data<Elem = f64>, Ix2>,
            x2: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        ) -> Result<Array2<f64>> {
            Ok(x1.dot(&x2.t()) * self.variance.value())
        }

        fn gradients(
            &self,
            x1: &ArrayBase<impl Data<Elem = f64>, Ix2>,
            x2: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        ) -> Result<Vec<Array2<f64>>> {
            Ok(vec![x1.dot(&x2.t()) * self.variance.derivative()])
        }
    }

    impl fmt::Display for LinearKernel {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "variance: {:.3}", self.variance.value())
        }
    }

    #[test]
    fn test_grid_interpolation_dense_grid_gradients() {
        let base = LinearKernel {
            variance: Hyperparameter::new(2., Constraint::Positive).unwrap(),
        };
        let mut kernel = GridInterpolationKernel::new(base, 12).unwrap();
        let x = array![[0.1], [0.4], [0.45], [0.9]];
        kernel.prepare(&x).unwrap();
        assert!(!kernel.is_stationary());
        let left = array![[1., 0.], [0.5, 1.], [-1., 2.], [0.2, 0.]];
        let right = array![[0.3, 1.], [1., -1.], [0.1, 0.], [2., 0.5]];
        let qf = kernel
            .quad_form_gradients(&x, &left.view(), &right.view())
            .unwrap();
        let grads = kernel.gradients(&x, &x).unwrap();
        assert_eq!(qf.len(), 1);
        assert_abs_diff_eq!(qf[0], (&left * &grads[0].dot(&right)).sum(), epsilon = 1e-10);
    }

    #[test]
    fn test_grid_interpolation_errors() {
        let kernel = grid_kernel();
        assert!(kernel.forward(&array![[0., 1.]], &array![[0., 1.]]).is_err());
        assert!(kernel.forward(&array![[5.]], &array![[0.]]).is_err());
        assert!(GridInterpolationKernel::new(RbfKernel::<f64>::new(), 3).is_err());
        let fixed = GridInterpolationKernel::new(RbfKernel::<f64>::new(), 10)
            .unwrap()
            .with_grid_bounds(0., 7.)
            .unwrap();
        assert_abs_diff_eq!(fixed.grid().unwrap()[1], 0., epsilon = 1e-12);
        assert_abs_diff_eq!(fixed.grid().unwrap()[8], 7., epsilon = 1e-12);
    }
}
