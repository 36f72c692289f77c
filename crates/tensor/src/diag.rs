use crate::errors::{Result, TensorError};
use crate::lazy_tensor::{check_indices, check_rows, LazyTensor};
use crate::settings::LinalgSettings;
use crate::solvers::standard_normal;
use linfa::Float;
use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis};
use rand_xoshiro::Xoshiro256Plus;
use std::ops::Add;

/// Diagonal matrix `diag(d)` stored as its diagonal vector `d` of size n.
///
/// Products, solves, log-determinant and sampling are all O(n).
#[derive(Clone, Debug, PartialEq)]
pub struct DiagLazyTensor<F: Float> {
    diag: Array1<F>,
}

impl<F: Float> DiagLazyTensor<F> {
    /// Constructor from the diagonal values
    pub fn new(diag: Array1<F>) -> Self {
        DiagLazyTensor { diag }
    }

    /// `value * I` of size n
    pub fn constant(n: usize, value: F) -> Self {
        DiagLazyTensor {
            diag: Array1::from_elem(n, value),
        }
    }

    /// Diagonal values
    pub fn values(&self) -> &Array1<F> {
        &self.diag
    }

    /// Symmetric matrix: the transpose is the tensor itself
    pub fn transpose(&self) -> &Self {
        self
    }

    /// Add `added` to the diagonal. `added` is either a single value broadcasted
    /// to every diagonal entry or a vector of size n.
    pub fn add_diag(&self, added: &ArrayView1<F>) -> Result<Self> {
        let n = self.diag.len();
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
        Ok(DiagLazyTensor { diag })
    }

    fn check_positive(&self) -> Result<()> {
        if let Some(v) = self.diag.iter().find(|&&v| v <= F::zero()) {
            return Err(TensorError::NotPositiveDefinite(format!(
                "diagonal entry {v} is not positive"
            )));
        }
        Ok(())
    }
}

impl<F: Float> Add for &DiagLazyTensor<F> {
    type Output = DiagLazyTensor<F>;

    /// Sum of two diagonal tensors of the same size is diagonal
    fn add(self, other: &DiagLazyTensor<F>) -> DiagLazyTensor<F> {
        DiagLazyTensor {
            diag: &self.diag + &other.diag,
        }
    }
}

impl<F: Float> LazyTensor<F> for DiagLazyTensor<F> {
    fn shape(&self) -> (usize, usize) {
        (self.diag.len(), self.diag.len())
    }

    fn matmul(&self, rhs: &ArrayView2<F>) -> Result<Array2<F>> {
        check_rows(self.shape(), rhs)?;
        Ok(rhs * &self.diag.view().insert_axis(Axis(1)))
    }

    fn t_matmul(&self, rhs: &ArrayView2<F>) -> Result<Array2<F>> {
        self.matmul(rhs)
    }

    fn matvec(&self, v: &ArrayView1<F>) -> Result<Array1<F>> {
        if v.len() != self.diag.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![self.diag.len()],
                actual: vec![v.len()],
            });
        }
        Ok(&self.diag * v)
    }

    fn diag(&self) -> Array1<F> {
        self.diag.to_owned()
    }

    fn evaluate(&self) -> Array2<F> {
        Array2::from_diag(&self.diag)
    }

    fn get_indices(&self, left: &[usize], right: &[usize]) -> Result<Array1<F>> {
        check_indices(self.shape(), left, right)?;
        Ok(left
            .iter()
            .zip(right)
            .map(|(&i, &j)| if i == j { self.diag[i] } else { F::zero() })
            .collect())
    }

    fn representation(&self) -> Vec<ArrayD<F>> {
        vec![self.diag.to_owned().into_dyn()]
    }

    fn quad_form_derivative(
        &self,
        left: &ArrayView2<F>,
        right: &ArrayView2<F>,
    ) -> Result<Vec<ArrayD<F>>> {
        check_rows(self.shape(), left)?;
        check_rows(self.shape(), right)?;
        Ok(vec![(left * right).sum_axis(Axis(1)).into_dyn()])
    }

    fn inv_matmul(&self, rhs: &ArrayView2<F>, _settings: &LinalgSettings<F>) -> Result<Array2<F>> {
        check_rows(self.shape(), rhs)?;
        self.check_positive()?;
        Ok(rhs / &self.diag.view().insert_axis(Axis(1)))
    }

    fn inv_quad_log_det(
        &self,
        rhs: Option<&ArrayView2<F>>,
        _settings: &LinalgSettings<F>,
    ) -> Result<(F, F)> {
        self.check_positive()?;
        let inv_quad = match rhs {
            Some(rhs) => {
                check_rows(self.shape(), rhs)?;
                (rhs.mapv(|v| v * v) / &self.diag.view().insert_axis(Axis(1))).sum()
            }
            None => F::zero(),
        };
        Ok((inv_quad, self.diag.mapv(|v| v.ln()).sum()))
    }

    fn zero_mean_mvn_samples(
        &self,
        num_samples: usize,
        rng: &mut Xoshiro256Plus,
        _settings: &LinalgSettings<F>,
    ) -> Result<Array2<F>> {
        if let Some(v) = self.diag.iter().find(|&&v| v < F::zero()) {
            return Err(TensorError::NotPositiveDefinite(format!(
                "cannot sample with negative variance {v}"
            )));
        }
        let base_samples: Array2<F> = standard_normal((num_samples, self.diag.len()), rng);
        Ok(base_samples * &self.diag.mapv(|v| v.sqrt()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Axis};
    use ndarray_rand::rand::SeedableRng;

    #[test]
    fn test_matmul_matvec() {
        let t = DiagLazyTensor::new(array![1., 2., 3.]);
        let rhs = array![[1., 2.], [3., 4.], [5., 6.]];
        assert_abs_diff_eq!(
            t.matmul(&rhs.view()).unwrap(),
            array![[1., 2.], [6., 8.], [15., 18.]]
        );
        assert_abs_diff_eq!(
            t.t_matmul(&rhs.view()).unwrap(),
            t.evaluate().dot(&rhs)
        );
        assert_abs_diff_eq!(t.matvec(&array![1., 1., 1.].view()).unwrap(), array![1., 2., 3.]);
        assert!(t.matmul(&array![[1.], [2.]].view()).is_err());
    }

    #[test]
    fn test_get_indices() {
        let t = DiagLazyTensor::new(array![1., 2., 3.]);
        let res = t.get_indices(&[0, 1, 2, 2], &[0, 2, 2, 1]).unwrap();
        assert_eq!(res, array![1., 0., 3., 0.]);
    }

    #[test]
    fn test_quad_form_derivative() {
        let t = DiagLazyTensor::new(array![1., 2.]);
        let left = array![[1., 2.], [3., 4.]];
        let right = array![[5., 6.], [7., 8.]];
        let deriv = t.quad_form_derivative(&left.view(), &right.view()).unwrap();
        assert_eq!(deriv.len(), 1);
        assert_eq!(deriv[0], array![17., 53.].into_dyn());
    }

    #[test]
    fn test_add_diag_and_sum() {
        let t = DiagLazyTensor::new(array![1., 2.]);
        assert_eq!(t.add_diag(&array![0.5].view()).unwrap().values(), &array![1.5, 2.5]);
        assert_eq!(
            t.add_diag(&array![1., 2.].view()).unwrap().values(),
            &array![2., 4.]
        );
        assert!(t.add_diag(&array![1., 2., 3.].view()).is_err());
        let s = &t + &DiagLazyTensor::constant(2, 1.);
        assert_eq!(s.values(), &array![2., 3.]);
        assert_eq!(t.transpose(), &t);
    }

    #[test]
    fn test_solves_and_log_det() {
        let t = DiagLazyTensor::new(array![2., 4.]);
        let settings = LinalgSettings::default();
        let rhs = array![[2.], [4.]];
        assert_abs_diff_eq!(t.inv_matmul(&rhs.view(), &settings).unwrap(), array![[1.], [1.]]);
        let (inv_quad, log_det) = t.inv_quad_log_det(Some(&rhs.view()), &settings).unwrap();
        assert_abs_diff_eq!(inv_quad, 6., epsilon = 1e-12);
        assert_abs_diff_eq!(log_det, 8f64.ln(), epsilon = 1e-12);
        assert!(DiagLazyTensor::new(array![1., 0.])
            .log_det(&settings)
            .is_err());
    }

    #[test]
    fn test_zero_mean_mvn_samples() {
        let t = DiagLazyTensor::new(array![0.25, 4.]);
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let samples = t
            .zero_mean_mvn_samples(20000, &mut rng, &LinalgSettings::default())
            .unwrap();
        assert_eq!(samples.dim(), (20000, 2));
        let var = samples.var_axis(Axis(0), 0.);
        assert_abs_diff_eq!(var, array![0.25, 4.], epsilon = 0.15);
    }
}
