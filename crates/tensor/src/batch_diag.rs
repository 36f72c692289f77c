use crate::diag::DiagLazyTensor;
use crate::errors::{Result, TensorError};
use crate::solvers::standard_normal;
use linfa::Float;
use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView3, Axis};
use rand_xoshiro::Xoshiro256Plus;

/// A batch of b diagonal (n, n) matrices stored as a (b, n) array of diagonals
#[derive(Clone, Debug, PartialEq)]
pub struct BatchDiagLazyTensor<F: Float> {
    diag: Array2<F>,
}

impl<F: Float> BatchDiagLazyTensor<F> {
    /// Constructor from the (b, n) diagonals
    pub fn new(diag: Array2<F>) -> Self {
        BatchDiagLazyTensor { diag }
    }

    /// Stack diagonal tensors of the same size as a batch
    pub fn from_tensors(tensors: &[DiagLazyTensor<F>]) -> Result<Self> {
        let n = tensors.first().map(|t| t.values().len()).unwrap_or(0);
        let mut diag = Array2::zeros((tensors.len(), n));
        for (mut row, t) in diag.rows_mut().into_iter().zip(tensors) {
            if t.values().len() != n {
                return Err(TensorError::ShapeMismatch {
                    expected: vec![n],
                    actual: vec![t.values().len()],
                });
            }
            row.assign(t.values());
        }
        Ok(BatchDiagLazyTensor { diag })
    }

    /// Number of matrices in the batch
    pub fn batch_shape(&self) -> usize {
        self.diag.nrows()
    }

    /// Shape (b, n, n)
    pub fn shape(&self) -> (usize, usize, usize) {
        let (b, n) = self.diag.dim();
        (b, n, n)
    }

    /// The `i`-th diagonal tensor of the batch
    pub fn get(&self, i: usize) -> Result<DiagLazyTensor<F>> {
        if i >= self.batch_shape() {
            return Err(TensorError::InvalidValue(format!(
                "batch index {} out of bounds for batch size {}",
                i,
                self.batch_shape()
            )));
        }
        Ok(DiagLazyTensor::new(self.diag.row(i).to_owned()))
    }

    /// Batched product: (b, n, k) rhs gives (b, n, k)
    pub fn matmul(&self, rhs: &ArrayView3<F>) -> Result<Array3<F>> {
        let (b, n, _) = self.shape();
        if rhs.dim().0 != b || rhs.dim().1 != n {
            return Err(TensorError::ShapeMismatch {
                expected: vec![b, n, rhs.dim().2],
                actual: rhs.shape().to_vec(),
            });
        }
        Ok(rhs * &self.diag.view().insert_axis(Axis(2)))
    }

    /// Batched transpose product, same as [`BatchDiagLazyTensor::matmul`]
    pub fn t_matmul(&self, rhs: &ArrayView3<F>) -> Result<Array3<F>> {
        self.matmul(rhs)
    }

    /// Entries `A[batch[k]][left[k], right[k]]`
    pub fn batch_get_indices(
        &self,
        batch: &[usize],
        left: &[usize],
        right: &[usize],
    ) -> Result<Array1<F>> {
        if batch.len() != left.len() || left.len() != right.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![batch.len(), batch.len()],
                actual: vec![left.len(), right.len()],
            });
        }
        let (b, n) = self.diag.dim();
        batch
            .iter()
            .zip(left.iter().zip(right))
            .map(|(&k, (&i, &j))| {
                if k >= b || i >= n || j >= n {
                    Err(TensorError::InvalidValue(format!(
                        "index ({k}, {i}, {j}) out of bounds for shape ({b}, {n}, {n})"
                    )))
                } else if i == j {
                    Ok(self.diag[[k, i]])
                } else {
                    Ok(F::zero())
                }
            })
            .collect()
    }

    /// Add `added` (a single value or a vector of size n) to every diagonal of the batch
    pub fn add_diag(&self, added: &ArrayView1<F>) -> Result<Self> {
        let n = self.diag.ncols();
        let diag = match added.len() {
            1 => self.diag.mapv(|v| v + added[0]),
            m if m == n => &self.diag + added,
            m => {
                return Err(TensorError::ShapeMismatch {
                    expected: vec![n],
                    actual: vec![m],
                })
            }
        };
        Ok(BatchDiagLazyTensor { diag })
    }

    /// Sum the whole batch into a single diagonal tensor
    pub fn sum_batch(&self) -> DiagLazyTensor<F> {
        DiagLazyTensor::new(self.diag.sum_axis(Axis(0)))
    }

    /// Sum each group of `sum_batch_size` consecutive matrices, giving a batch of
    /// b / sum_batch_size matrices.
    pub fn sum_batch_by(&self, sum_batch_size: usize) -> Result<Self> {
        let (b, n) = self.diag.dim();
        if sum_batch_size == 0 || b % sum_batch_size != 0 {
            return Err(TensorError::InvalidValue(format!(
                "cannot sum batch of size {b} by groups of {sum_batch_size}"
            )));
        }
        let n_groups = b / sum_batch_size;
        let mut diag = Array2::zeros((n_groups, n));
        for (g, mut row) in diag.rows_mut().into_iter().enumerate() {
            let start = g * sum_batch_size;
            row.assign(
                &self
                    .diag
                    .slice(s![start..start + sum_batch_size, ..])
                    .sum_axis(Axis(0)),
            );
        }
        Ok(BatchDiagLazyTensor { diag })
    }

    /// Diagonals as a (b, n) array
    pub fn diag(&self) -> Array2<F> {
        self.diag.to_owned()
    }

    /// Dense (b, n, n) array
    pub fn evaluate(&self) -> Array3<F> {
        let (b, n, _) = self.shape();
        let mut res = Array3::zeros((b, n, n));
        for (k, d) in self.diag.rows().into_iter().enumerate() {
            res.slice_mut(s![k, .., ..]).assign(&Array2::from_diag(&d));
        }
        res
    }

    /// Draw `num_samples` samples of each `N(0, A_k)` as a (num_samples, b, n) array
    pub fn zero_mean_mvn_samples(
        &self,
        num_samples: usize,
        rng: &mut Xoshiro256Plus,
    ) -> Result<Array3<F>> {
        if let Some(v) = self.diag.iter().find(|&&v| v < F::zero()) {
            return Err(TensorError::NotPositiveDefinite(format!(
                "cannot sample with negative variance {v}"
            )));
        }
        let (b, n) = self.diag.dim();
        let base_samples: Array2<F> = standard_normal((num_samples, b * n), rng);
        let base_samples = base_samples
            .into_shape((num_samples, b, n))
            .map_err(|e| TensorError::InvalidValue(e.to_string()))?;
        Ok(base_samples * &self.diag.mapv(|v| v.sqrt()).insert_axis(Axis(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};
    use ndarray_rand::rand::SeedableRng;

    fn batch() -> BatchDiagLazyTensor<f64> {
        BatchDiagLazyTensor::new(array![[1., 2.], [3., 4.], [5., 6.], [7., 8.]])
    }

    #[test]
    fn test_shapes_and_get() {
        let t = batch();
        assert_eq!(t.shape(), (4, 2, 2));
        assert_eq!(t.get(1).unwrap().values(), &array![3., 4.]);
        assert!(t.get(4).is_err());
    }

    #[test]
    fn test_batch_matmul() {
        let t = batch();
        let rhs = Array::from_elem((4, 2, 1), 1.);
        let res = t.matmul(&rhs.view()).unwrap();
        assert_eq!(res.slice(s![.., .., 0]), t.diag());
        let dense = t.evaluate();
        assert_eq!(dense[[2, 0, 0]], 5.);
        assert_eq!(dense[[2, 0, 1]], 0.);
    }

    #[test]
    fn test_batch_get_indices() {
        let t = batch();
        let res = t.batch_get_indices(&[0, 1, 3], &[1, 0, 1], &[1, 1, 1]).unwrap();
        assert_eq!(res, array![2., 0., 8.]);
    }

    #[test]
    fn test_sum_batch() {
        let t = batch();
        assert_eq!(t.sum_batch().values(), &array![16., 20.]);
        let grouped = t.sum_batch_by(2).unwrap();
        assert_eq!(grouped.diag(), array![[4., 6.], [12., 14.]]);
        assert!(t.sum_batch_by(3).is_err());
    }

    #[test]
    fn test_batch_samples() {
        let t = BatchDiagLazyTensor::new(array![[1., 4.], [9., 0.]]);
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let samples = t.zero_mean_mvn_samples(10000, &mut rng).unwrap();
        assert_eq!(samples.dim(), (10000, 2, 2));
        let var = samples.var_axis(Axis(0), 0.);
        assert_abs_diff_eq!(var, array![[1., 4.], [9., 0.]], epsilon = 0.5);
    }
}
