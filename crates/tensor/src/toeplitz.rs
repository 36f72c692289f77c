use crate::errors::{Result, TensorError};
use crate::lazy_tensor::{check_indices, check_rows, LazyTensor};
use linfa::Float;
use ndarray::{Array1, Array2, ArrayD, ArrayView2, Zip};

/// Symmetric Toeplitz matrix `T[i, j] = c[|i - j|]` given its first column `c`.
///
/// Stationary kernels evaluated on a regular grid give such matrices,
/// only the n values of the first column are stored.
#[derive(Clone, Debug, PartialEq)]
pub struct ToeplitzLazyTensor<F: Float> {
    column: Array1<F>,
}

impl<F: Float> ToeplitzLazyTensor<F> {
    /// Constructor from the first column, which must not be empty
    pub fn new(column: Array1<F>) -> Result<Self> {
        if column.is_empty() {
            return Err(TensorError::InvalidValue(
                "Toeplitz column should not be empty".to_string(),
            ));
        }
        Ok(ToeplitzLazyTensor { column })
    }

    /// First column
    pub fn column(&self) -> &Array1<F> {
        &self.column
    }
}

impl<F: Float> LazyTensor<F> for ToeplitzLazyTensor<F> {
    fn shape(&self) -> (usize, usize) {
        (self.column.len(), self.column.len())
    }

    fn matmul(&self, rhs: &ArrayView2<F>) -> Result<Array2<F>> {
        check_rows(self.shape(), rhs)?;
        let n = self.column.len();
        let mut res = Array2::zeros((n, rhs.ncols()));
        for (i, mut row) in res.rows_mut().into_iter().enumerate() {
            for j in 0..n {
                row.scaled_add(self.column[i.abs_diff(j)], &rhs.row(j));
            }
        }
        Ok(res)
    }

    fn t_matmul(&self, rhs: &ArrayView2<F>) -> Result<Array2<F>> {
        self.matmul(rhs)
    }

    fn diag(&self) -> Array1<F> {
        Array1::from_elem(self.column.len(), self.column[0])
    }

    fn evaluate(&self) -> Array2<F> {
        let n = self.column.len();
        Array2::from_shape_fn((n, n), |(i, j)| self.column[i.abs_diff(j)])
    }

    fn get_indices(&self, left: &[usize], right: &[usize]) -> Result<Array1<F>> {
        check_indices(self.shape(), left, right)?;
        Ok(left
            .iter()
            .zip(right)
            .map(|(&i, &j)| self.column[i.abs_diff(j)])
            .collect())
    }

    fn representation(&self) -> Vec<ArrayD<F>> {
        vec![self.column.to_owned().into_dyn()]
    }

    /// Derivative with respect to `c[d]` gathers every entry of `left . right^T`
    /// lying at distance d from the main diagonal.
    fn quad_form_derivative(
        &self,
        left: &ArrayView2<F>,
        right: &ArrayView2<F>,
    ) -> Result<Vec<ArrayD<F>>> {
        check_rows(self.shape(), left)?;
        check_rows(self.shape(), right)?;
        let outer = left.dot(&right.t());
        let mut grad = Array1::<F>::zeros(self.column.len());
        Zip::indexed(&outer).for_each(|(i, j), &v| grad[i.abs_diff(j)] += v);
        Ok(vec![grad.into_dyn()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::LinalgSettings;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_toeplitz_evaluate_and_matmul() {
        let t = ToeplitzLazyTensor::new(array![4., 1., 0.5]).unwrap();
        let dense = array![[4., 1., 0.5], [1., 4., 1.], [0.5, 1., 4.]];
        assert_abs_diff_eq!(t.evaluate(), dense);
        let rhs = array![[1., 0.], [2., 1.], [3., -1.]];
        assert_abs_diff_eq!(t.matmul(&rhs.view()).unwrap(), dense.dot(&rhs));
        assert_abs_diff_eq!(t.diag(), array![4., 4., 4.]);
        assert!(ToeplitzLazyTensor::<f64>::new(array![]).is_err());
    }

    #[test]
    fn test_toeplitz_get_indices() {
        let t = ToeplitzLazyTensor::new(array![4., 1., 0.5]).unwrap();
        assert_eq!(
            t.get_indices(&[0, 2, 1, 2], &[2, 0, 1, 1]).unwrap(),
            array![0.5, 0.5, 4., 1.]
        );
    }

    #[test]
    fn test_toeplitz_quad_form_derivative() {
        let t = ToeplitzLazyTensor::new(array![4., 1., 0.5]).unwrap();
        let left = array![[1.], [2.], [3.]];
        let right = array![[1.], [1.], [1.]];
        let grad = t.quad_form_derivative(&left.view(), &right.view()).unwrap();
        // distance 0: 1+2+3, distance 1: (1+2)+(2+3), distance 2: 1+3
        assert_eq!(grad[0], array![6., 8., 4.].into_dyn());
    }

    #[test]
    fn test_toeplitz_cg_solve() {
        let t = ToeplitzLazyTensor::new(array![4., 1., 0.5, 0.1]).unwrap();
        let rhs = array![[1.], [0.], [0.], [1.]];
        let settings = LinalgSettings::default()
            .with_max_cholesky_size(0)
            .with_cg_tolerance(1e-10);
        let x = t.inv_matmul(&rhs.view(), &settings).unwrap();
        assert_abs_diff_eq!(t.evaluate().dot(&x), rhs, epsilon = 1e-8);
    }
}
