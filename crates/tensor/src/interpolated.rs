use crate::errors::{Result, TensorError};
use crate::lazy_tensor::LazyTensor;
use crate::settings::LinalgSettings;
use linfa::Float;
use ndarray::{Array1, Array2, ArrayD, ArrayView2};
use rand_xoshiro::Xoshiro256Plus;
use std::sync::Arc;

/// Sparse interpolation of a base tensor: `W_l . B . W_r^T`.
///
/// `B` is a (m, m) lazy tensor (typically a kernel evaluated on a grid of
/// inducing points) and each `W` is a (n, m) sparse matrix whose row i has
/// k non-zero entries `values[i, a]` at columns `indices[i, a]`.
/// `W` is never formed densely: a product costs `O(n k)` on top of a product with `B`.
///
/// Left and right interpolations may differ (cross-covariance between test and
/// training points), the tensor is then rectangular and only products,
/// entries and dense evaluation are meaningful.
#[derive(Clone, Debug)]
pub struct InterpolatedLazyTensor<F: Float> {
    base: Arc<dyn LazyTensor<F>>,
    left_indices: Array2<usize>,
    left_values: Array2<F>,
    right_indices: Array2<usize>,
    right_values: Array2<F>,
}

/// Check (n, k) interpolation arrays against a base of size m
fn check_interp<F: Float>(indices: &Array2<usize>, values: &Array2<F>, m: usize) -> Result<()> {
    if indices.dim() != values.dim() {
        return Err(TensorError::ShapeMismatch {
            expected: indices.shape().to_vec(),
            actual: values.shape().to_vec(),
        });
    }
    if let Some(bad) = indices.iter().find(|&&i| i >= m) {
        return Err(TensorError::InvalidValue(format!(
            "interpolation index {bad} out of bounds for base size {m}"
        )));
    }
    Ok(())
}

/// `W^T . rhs` where the (n, m) interpolation matrix `W` is given by its
/// (n, k) `indices` and `values`, rhs is (n, p) and the result (m, p).
pub fn left_t_interp<F: Float>(
    indices: &Array2<usize>,
    values: &Array2<F>,
    rhs: &ArrayView2<F>,
    m: usize,
) -> Array2<F> {
    let mut res = Array2::zeros((m, rhs.ncols()));
    for (i, (idx, val)) in indices.rows().into_iter().zip(values.rows()).enumerate() {
        for (&j, &w) in idx.iter().zip(val.iter()) {
            res.row_mut(j).scaled_add(w, &rhs.row(i));
        }
    }
    res
}

/// `W . rhs` with rhs (m, p) giving (n, p)
pub fn left_interp<F: Float>(
    indices: &Array2<usize>,
    values: &Array2<F>,
    rhs: &ArrayView2<F>,
) -> Array2<F> {
    let mut res = Array2::zeros((indices.nrows(), rhs.ncols()));
    for (mut row, (idx, val)) in res
        .rows_mut()
        .into_iter()
        .zip(indices.rows().into_iter().zip(values.rows()))
    {
        for (&j, &w) in idx.iter().zip(val.iter()) {
            row.scaled_add(w, &rhs.row(j));
        }
    }
    res
}

impl<F: Float> InterpolatedLazyTensor<F> {
    /// Symmetric interpolation `W . B . W^T`
    pub fn new(
        base: Arc<dyn LazyTensor<F>>,
        indices: Array2<usize>,
        values: Array2<F>,
    ) -> Result<Self> {
        Self::new_cross(base, indices.clone(), values.clone(), indices, values)
    }

    /// General interpolation `W_l . B . W_r^T`
    pub fn new_cross(
        base: Arc<dyn LazyTensor<F>>,
        left_indices: Array2<usize>,
        left_values: Array2<F>,
        right_indices: Array2<usize>,
        right_values: Array2<F>,
    ) -> Result<Self> {
        let m = base.size();
        check_interp(&left_indices, &left_values, m)?;
        check_interp(&right_indices, &right_values, m)?;
        Ok(InterpolatedLazyTensor {
            base,
            left_indices,
            left_values,
            right_indices,
            right_values,
        })
    }

    /// Base tensor `B`
    pub fn base(&self) -> &Arc<dyn LazyTensor<F>> {
        &self.base
    }

    /// Left interpolation indices and values
    pub fn left_interpolation(&self) -> (&Array2<usize>, &Array2<F>) {
        (&self.left_indices, &self.left_values)
    }

    /// Right interpolation indices and values
    pub fn right_interpolation(&self) -> (&Array2<usize>, &Array2<F>) {
        (&self.right_indices, &self.right_values)
    }

    fn is_symmetric(&self) -> bool {
        self.left_indices == self.right_indices && self.left_values == self.right_values
    }

    fn check_rhs(&self, nrows: usize, rhs: &ArrayView2<F>) -> Result<()> {
        if rhs.nrows() != nrows {
            return Err(TensorError::ShapeMismatch {
                expected: vec![nrows, rhs.ncols()],
                actual: rhs.shape().to_vec(),
            });
        }
        Ok(())
    }

    /// Entries `A[left[k], right[k]]` gathered from the base tensor entries
    fn interpolated_entries(&self, left: &[usize], right: &[usize]) -> Result<Array1<F>> {
        let k_l = self.left_indices.ncols();
        let k_r = self.right_indices.ncols();
        let mut base_left = Vec::with_capacity(left.len() * k_l * k_r);
        let mut base_right = Vec::with_capacity(left.len() * k_l * k_r);
        for (&i, &j) in left.iter().zip(right) {
            for a in 0..k_l {
                for b in 0..k_r {
                    base_left.push(self.left_indices[[i, a]]);
                    base_right.push(self.right_indices[[j, b]]);
                }
            }
        }
        let base_entries = self.base.get_indices(&base_left, &base_right)?;
        let mut res = Array1::zeros(left.len());
        let mut p = 0;
        for (r, (&i, &j)) in res.iter_mut().zip(left.iter().zip(right)) {
            for a in 0..k_l {
                for b in 0..k_r {
                    *r += self.left_values[[i, a]] * self.right_values[[j, b]] * base_entries[p];
                    p += 1;
                }
            }
        }
        Ok(res)
    }
}

impl<F: Float> LazyTensor<F> for InterpolatedLazyTensor<F> {
    fn shape(&self) -> (usize, usize) {
        (self.left_indices.nrows(), self.right_indices.nrows())
    }

    fn matmul(&self, rhs: &ArrayView2<F>) -> Result<Array2<F>> {
        self.check_rhs(self.shape().1, rhs)?;
        let projected =
            left_t_interp(&self.right_indices, &self.right_values, rhs, self.base.size());
        let base_res = self.base.matmul(&projected.view())?;
        Ok(left_interp(
            &self.left_indices,
            &self.left_values,
            &base_res.view(),
        ))
    }

    fn t_matmul(&self, rhs: &ArrayView2<F>) -> Result<Array2<F>> {
        self.check_rhs(self.shape().0, rhs)?;
        let projected =
            left_t_interp(&self.left_indices, &self.left_values, rhs, self.base.size());
        let base_res = self.base.t_matmul(&projected.view())?;
        Ok(left_interp(
            &self.right_indices,
            &self.right_values,
            &base_res.view(),
        ))
    }

    fn diag(&self) -> Array1<F> {
        let n = self.shape().0.min(self.shape().1);
        let idx: Vec<usize> = (0..n).collect();
        // indices are validated at construction
        self.interpolated_entries(&idx, &idx)
            .unwrap_or_else(|_| self.evaluate().diag().to_owned())
    }

    fn evaluate(&self) -> Array2<F> {
        let dense_base = self.base.evaluate();
        let left_base = left_interp(&self.left_indices, &self.left_values, &dense_base.view());
        // (W_l B) W_r^T = (W_r (W_l B)^T)^T
        left_interp(&self.right_indices, &self.right_values, &left_base.t()).reversed_axes()
    }

    fn get_indices(&self, left: &[usize], right: &[usize]) -> Result<Array1<F>> {
        if left.len() != right.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![left.len()],
                actual: vec![right.len()],
            });
        }
        let (n_l, n_r) = self.shape();
        if let Some((&i, &j)) = left
            .iter()
            .zip(right)
            .find(|&(&i, &j)| i >= n_l || j >= n_r)
        {
            return Err(TensorError::InvalidValue(format!(
                "index ({i}, {j}) out of bounds for shape ({n_l}, {n_r})"
            )));
        }
        self.interpolated_entries(left, right)
    }

    fn representation(&self) -> Vec<ArrayD<F>> {
        self.base.representation()
    }

    fn quad_form_derivative(
        &self,
        left: &ArrayView2<F>,
        right: &ArrayView2<F>,
    ) -> Result<Vec<ArrayD<F>>> {
        self.check_rhs(self.shape().0, left)?;
        self.check_rhs(self.shape().1, right)?;
        let m = self.base.size();
        let left_proj = left_t_interp(&self.left_indices, &self.left_values, left, m);
        let right_proj = left_t_interp(&self.right_indices, &self.right_values, right, m);
        self.base
            .quad_form_derivative(&left_proj.view(), &right_proj.view())
    }

    fn zero_mean_mvn_samples(
        &self,
        num_samples: usize,
        rng: &mut Xoshiro256Plus,
        settings: &LinalgSettings<F>,
    ) -> Result<Array2<F>> {
        if !self.is_symmetric() {
            return Err(TensorError::InvalidValue(
                "cannot sample from a cross interpolated tensor".to_string(),
            ));
        }
        // W u with u ~ N(0, B) has covariance W B W^T
        let base_samples = self.base.zero_mean_mvn_samples(num_samples, rng, settings)?;
        Ok(left_interp(&self.left_indices, &self.left_values, &base_samples.t()).reversed_axes())
    }
}
