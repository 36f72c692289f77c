use crate::errors::{GpError, Result};
use libm::erfc;
use linfa::Float;
use linfa_linalg::eigh::*;
use ndarray::{Array1, Array2, Array3, ArrayBase, ArrayView1, Data, Ix2};
use ndarray_stats::QuantileExt;
use num_traits::ToPrimitive;

/// Number of Gauss-Hermite nodes used for one-dimensional expectations
pub(crate) const GAUSS_HERMITE_POINTS: usize = 20;

/// Below this value `ln(Phi(z))` switches to its asymptotic expansion
const LOG_NORM_CDF_TAIL: f64 = -30.;

/// Conversion to f64 (NaN when not representable)
pub(crate) fn to_f64<F: Float>(v: F) -> f64 {
    v.to_f64().unwrap_or(f64::NAN)
}

/// Computes differences between each row of x and each row of y
/// resulting in a 3d array of shape (nrows(x), nrows(y), ncols(x)).
/// Fails if x and y have not the same column numbers
pub fn pairwise_differences<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Result<Array3<F>> {
    if x.ncols() != y.ncols() {
        return Err(GpError::InvalidValueError(format!(
            "pairwise differences of {}-dimensional and {}-dimensional points",
            x.ncols(),
            y.ncols()
        )));
    }
    Ok(Array3::from_shape_fn(
        (x.nrows(), y.nrows(), x.ncols()),
        |(i, j, k)| x[[i, k]] - y[[j, k]],
    ))
}

/// Standard normal cumulative distribution function
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// Standard normal probability density function
pub fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2. * std::f64::consts::PI).sqrt()
}

/// `ln(Phi(x))`, accurate in the far left tail where `Phi(x)` underflows
pub fn log_norm_cdf(x: f64) -> f64 {
    if x > LOG_NORM_CDF_TAIL {
        norm_cdf(x).ln()
    } else {
        // Phi(x) ~ phi(x) / -x * (1 - 1/x^2 + 3/x^4)
        let x2 = x * x;
        -0.5 * x2 - (-x).ln() - 0.5 * (2. * std::f64::consts::PI).ln()
            + (1. - 1. / x2 + 3. / (x2 * x2)).ln()
    }
}

/// Gauss-Hermite nodes and weights for `int exp(-x^2) g(x) dx`, computed with the
/// Golub-Welsch algorithm: nodes are the eigenvalues of the Jacobi matrix of the
/// Hermite polynomials, weights come from the first components of the eigenvectors.
pub fn gauss_hermite(n: usize) -> Result<(Array1<f64>, Array1<f64>)> {
    if n == 0 {
        return Err(GpError::InvalidValueError(
            "Gauss-Hermite quadrature needs at least one point".to_string(),
        ));
    }
    let mut jacobi = Array2::<f64>::zeros((n, n));
    for k in 1..n {
        let b = (k as f64 / 2.).sqrt();
        jacobi[[k - 1, k]] = b;
        jacobi[[k, k - 1]] = b;
    }
    let (nodes, vectors) = jacobi.eigh_into()?;
    let weights = vectors
        .row(0)
        .mapv(|v| std::f64::consts::PI.sqrt() * v * v);
    Ok((nodes, weights))
}

/// `E[g(f)]` for each `f_i ~ N(mean_i, var_i)` using Gauss-Hermite quadrature
pub(crate) fn gauss_hermite_expectation<F: Float>(
    mean: &ArrayView1<F>,
    var: &ArrayView1<F>,
    nodes: &Array1<f64>,
    weights: &Array1<f64>,
    g: impl Fn(usize, f64) -> f64,
) -> Array1<F> {
    let scale = std::f64::consts::PI.sqrt();
    Array1::from_shape_fn(mean.len(), |i| {
        let mu = to_f64(mean[i]);
        let sigma = to_f64(var[i]).max(0.).sqrt();
        let sum: f64 = nodes
            .iter()
            .zip(weights)
            .map(|(&x, &w)| w * g(i, mu + std::f64::consts::SQRT_2 * sigma * x))
            .sum();
        F::cast(sum / scale)
    })
}

/// Bounds of one-dimensional inputs padded on each side by `padding` times the range.
/// A degenerate range is widened by one unit on each side.
pub fn padded_bounds<F: Float>(x: &ArrayBase<impl Data<Elem = F>, Ix2>, padding: F) -> Result<(F, F)> {
    let col = x.column(0);
    let lo = *col.min().map_err(|e| GpError::InvalidValueError(e.to_string()))?;
    let hi = *col.max().map_err(|e| GpError::InvalidValueError(e.to_string()))?;
    let span = hi - lo;
    if span <= F::zero() {
        return Ok((lo - F::one(), hi + F::one()));
    }
    Ok((lo - padding * span, hi + padding * span))
}

/// Regular grid of `size` points whose interior `[a, b]` is padded by one
/// spacing `h = (b - a) / (size - 3)` on each side: points are `a - h + j * h`.
pub fn make_grid<F: Float>(size: usize, bounds: (F, F)) -> Result<Array1<F>> {
    let (a, b) = bounds;
    if size < 4 {
        return Err(GpError::InvalidValueError(format!(
            "grid size should be at least 4, got {size}"
        )));
    }
    if b <= a {
        return Err(GpError::InvalidValueError(format!(
            "grid bounds should be increasing, got ({a}, {b})"
        )));
    }
    let h = (b - a) / F::cast(size - 3);
    Ok(Array1::from_shape_fn(size, |j| a - h + F::cast(j) * h))
}

/// Keys cubic convolution kernel with a = -0.5
fn cubic_weight<F: Float>(d: F) -> F {
    let a = F::cast(-0.5);
    let d = d.abs();
    if d <= F::one() {
        (a + F::cast(2.)) * d * d * d - (a + F::cast(3.)) * d * d + F::one()
    } else if d < F::cast(2.) {
        a * d * d * d - F::cast(5.) * a * d * d + F::cast(8.) * a * d - F::cast(4.) * a
    } else {
        F::zero()
    }
}

/// Cubic interpolation of one-dimensional inputs onto a regular `grid`.
///
/// Returns (n, 4) indices and values: row i holds the grid points surrounding
/// `x[i]` and their interpolation weights. Inputs have to lie within the grid
/// interior `[grid[1], grid[m - 2]]`.
pub fn cubic_interpolation<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    grid: &Array1<F>,
) -> Result<(Array2<usize>, Array2<F>)> {
    if x.ncols() != 1 {
        return Err(GpError::InvalidValueError(format!(
            "grid interpolation only supports 1-d inputs, got dimension {}",
            x.ncols()
        )));
    }
    let m = grid.len();
    if m < 4 {
        return Err(GpError::InvalidValueError(format!(
            "grid size should be at least 4, got {m}"
        )));
    }
    let h = grid[1] - grid[0];
    let tol = h * F::cast(1e-6);
    let (lower, upper) = (grid[1], grid[m - 2]);
    let mut indices = Array2::<usize>::zeros((x.nrows(), 4));
    let mut values = Array2::<F>::zeros((x.nrows(), 4));
    for (i, &xi) in x.column(0).iter().enumerate() {
        if xi < lower - tol || xi > upper + tol {
            return Err(GpError::InvalidValueError(format!(
                "input {xi} is outside of the interpolation grid bounds [{lower}, {upper}]"
            )));
        }
        let s = (xi - grid[0]) / h;
        let base = s.floor().to_usize().unwrap_or(1).clamp(1, m - 3);
        let t = s - F::cast(base);
        for (a, offset) in [-1isize, 0, 1, 2].iter().enumerate() {
            indices[[i, a]] = (base as isize + offset) as usize;
            values[[i, a]] = cubic_weight(t - F::cast(*offset));
        }
    }
    Ok((indices, values))
}
