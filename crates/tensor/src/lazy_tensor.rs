use crate::errors::{Result, TensorError};
use crate::settings::LinalgSettings;
use crate::solvers::{
    cholesky_solve, conjugate_gradients, psd_safe_cholesky, standard_normal,
    stochastic_log_det,
};
use linfa::Float;
use linfa_linalg::triangular::{SolveTriangular, UPLO};
use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis};
use rand_xoshiro::Xoshiro256Plus;
use std::fmt;

/// A symmetric (n, n) matrix only known through a structured representation.
///
/// Implementors provide at least a matrix product, their diagonal and a dense
/// evaluation. Solves, log-determinants and sampling come for free: dense
/// Cholesky for small sizes, conjugate gradients and stochastic Lanczos
/// quadrature otherwise (see [`LinalgSettings`]). Structured tensors override
/// them whenever an exact cheap formula exists.
pub trait LazyTensor<F: Float>: fmt::Debug + Send + Sync {
    /// Shape (n, n) of the represented matrix
    fn shape(&self) -> (usize, usize);

    /// Number of rows (and columns) of the represented matrix
    fn size(&self) -> usize {
        self.shape().0
    }

    /// Matrix product `A . rhs` where rhs is a (n, k) matrix
    fn matmul(&self, rhs: &ArrayView2<F>) -> Result<Array2<F>>;

    /// Matrix product `A^T . rhs`
    fn t_matmul(&self, rhs: &ArrayView2<F>) -> Result<Array2<F>> {
        check_rows(self.shape(), rhs)?;
        Ok(self.evaluate().t().dot(rhs))
    }

    /// Matrix vector product `A . v`
    fn matvec(&self, v: &ArrayView1<F>) -> Result<Array1<F>> {
        let col = v.view().insert_axis(Axis(1));
        Ok(self.matmul(&col)?.remove_axis(Axis(1)))
    }

    /// Diagonal of the matrix
    fn diag(&self) -> Array1<F>;

    /// Dense (n, n) matrix
    fn evaluate(&self) -> Array2<F>;

    /// Entries `A[left[k], right[k]]`
    fn get_indices(&self, left: &[usize], right: &[usize]) -> Result<Array1<F>> {
        check_indices(self.shape(), left, right)?;
        let dense = self.evaluate();
        Ok(left
            .iter()
            .zip(right)
            .map(|(&i, &j)| dense[[i, j]])
            .collect())
    }

    /// Arrays the tensor is built upon
    fn representation(&self) -> Vec<ArrayD<F>>;

    /// Gradient of `sum_k left[:, k]^T . A . right[:, k]` with respect to
    /// each array of the [representation](LazyTensor::representation).
    fn quad_form_derivative(
        &self,
        left: &ArrayView2<F>,
        right: &ArrayView2<F>,
    ) -> Result<Vec<ArrayD<F>>> {
        check_rows(self.shape(), left)?;
        check_rows(self.shape(), right)?;
        Ok(vec![left.dot(&right.t()).into_dyn()])
    }

    /// Solve `A . x = rhs`
    fn inv_matmul(&self, rhs: &ArrayView2<F>, settings: &LinalgSettings<F>) -> Result<Array2<F>> {
        check_rows(self.shape(), rhs)?;
        if settings.use_cholesky(self.size()) {
            let chol = psd_safe_cholesky(&self.evaluate(), settings)?;
            cholesky_solve(&chol, rhs)
        } else {
            conjugate_gradients(self, rhs, settings)
        }
    }

    /// Compute both `sum_k rhs[:, k]^T . A^-1 . rhs[:, k]` (zero when `rhs` is None)
    /// and `log|A|`.
    fn inv_quad_log_det(
        &self,
        rhs: Option<&ArrayView2<F>>,
        settings: &LinalgSettings<F>,
    ) -> Result<(F, F)> {
        if let Some(rhs) = rhs {
            check_rows(self.shape(), rhs)?;
        }
        if settings.use_cholesky(self.size()) {
            let chol = psd_safe_cholesky(&self.evaluate(), settings)?;
            let log_det = chol.diag().mapv(|v| v.ln()).sum() * F::cast(2.);
            let inv_quad = match rhs {
                Some(rhs) => {
                    let half = chol.solve_triangular(rhs, UPLO::Lower)?;
                    half.mapv(|v| v * v).sum()
                }
                None => F::zero(),
            };
            Ok((inv_quad, log_det))
        } else {
            let inv_quad = match rhs {
                Some(rhs) => {
                    let solves = conjugate_gradients(self, rhs, settings)?;
                    (&solves * rhs).sum()
                }
                None => F::zero(),
            };
            let log_det = stochastic_log_det(self, settings)?;
            Ok((inv_quad, log_det))
        }
    }

    /// Log-determinant `log|A|`
    fn log_det(&self, settings: &LinalgSettings<F>) -> Result<F> {
        Ok(self.inv_quad_log_det(None, settings)?.1)
    }

    /// Draw `num_samples` samples of `N(0, A)` as rows of a (num_samples, n) matrix
    fn zero_mean_mvn_samples(
        &self,
        num_samples: usize,
        rng: &mut Xoshiro256Plus,
        settings: &LinalgSettings<F>,
    ) -> Result<Array2<F>> {
        let chol = psd_safe_cholesky(&self.evaluate(), settings)?;
        let eps = standard_normal((self.size(), num_samples), rng);
        Ok(chol.dot(&eps).reversed_axes())
    }
}

pub(crate) fn check_rows<F: Float>(shape: (usize, usize), rhs: &ArrayView2<F>) -> Result<()> {
    if rhs.nrows() != shape.1 {
        return Err(TensorError::ShapeMismatch {
            expected: vec![shape.1, rhs.ncols()],
            actual: rhs.shape().to_vec(),
        });
    }
    Ok(())
}

pub(crate) fn check_indices(shape: (usize, usize), left: &[usize], right: &[usize]) -> Result<()> {
    if left.len() != right.len() {
        return Err(TensorError::ShapeMismatch {
            expected: vec![left.len()],
            actual: vec![right.len()],
        });
    }
    if let Some(bad) = left.iter().chain(right).find(|&&i| i >= shape.0) {
        return Err(TensorError::InvalidValue(format!(
            "index {} out of bounds for size {}",
            bad, shape.0
        )));
    }
    Ok(())
}
