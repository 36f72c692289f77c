use crate::diag::DiagLazyTensor;
use crate::errors::{Result, TensorError};
use crate::lazy_tensor::{check_indices, check_rows, LazyTensor};
use crate::settings::LinalgSettings;
use linfa::Float;
use ndarray::{Array1, Array2, ArrayD, ArrayView2};
use rand_xoshiro::Xoshiro256Plus;
use std::sync::Arc;

/// `A + D` where `A` is any lazy tensor and `D` a diagonal one.
///
/// This is typically a prior covariance plus an observation noise.
#[derive(Clone, Debug)]
pub struct AddedDiagLazyTensor<F: Float> {
    base: Arc<dyn LazyTensor<F>>,
    diag: DiagLazyTensor<F>,
}

impl<F: Float> AddedDiagLazyTensor<F> {
    /// Constructor, shapes of `base` and `diag` have to match
    pub fn new(base: Arc<dyn LazyTensor<F>>, diag: DiagLazyTensor<F>) -> Result<Self> {
        if base.shape() != diag.shape() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![base.size(), base.size()],
                actual: vec![diag.size(), diag.size()],
            });
        }
        Ok(AddedDiagLazyTensor { base, diag })
    }

    /// The non diagonal part `A`
    pub fn base(&self) -> &Arc<dyn LazyTensor<F>> {
        &self.base
    }

    /// The diagonal part `D`
    pub fn diag_tensor(&self) -> &DiagLazyTensor<F> {
        &self.diag
    }
}

impl<F: Float> LazyTensor<F> for AddedDiagLazyTensor<F> {
    fn shape(&self) -> (usize, usize) {
        self.base.shape()
    }

    fn matmul(&self, rhs: &ArrayView2<F>) -> Result<Array2<F>> {
        check_rows(self.shape(), rhs)?;
        Ok(self.base.matmul(rhs)? + self.diag.matmul(rhs)?)
    }

    fn t_matmul(&self, rhs: &ArrayView2<F>) -> Result<Array2<F>> {
        check_rows(self.shape(), rhs)?;
        Ok(self.base.t_matmul(rhs)? + self.diag.matmul(rhs)?)
    }

    fn diag(&self) -> Array1<F> {
        self.base.diag() + self.diag.values()
    }

    fn evaluate(&self) -> Array2<F> {
        let mut dense = self.base.evaluate();
        dense
            .diag_mut()
            .zip_mut_with(self.diag.values(), |a, &d| *a += d);
        dense
    }

    fn get_indices(&self, left: &[usize], right: &[usize]) -> Result<Array1<F>> {
        check_indices(self.shape(), left, right)?;
        Ok(self.base.get_indices(left, right)? + self.diag.get_indices(left, right)?)
    }

    fn representation(&self) -> Vec<ArrayD<F>> {
        let mut repr = self.base.representation();
        repr.extend(self.diag.representation());
        repr
    }

    fn quad_form_derivative(
        &self,
        left: &ArrayView2<F>,
        right: &ArrayView2<F>,
    ) -> Result<Vec<ArrayD<F>>> {
        let mut derivs = self.base.quad_form_derivative(left, right)?;
        derivs.extend(self.diag.quad_form_derivative(left, right)?);
        Ok(derivs)
    }

    fn zero_mean_mvn_samples(
        &self,
        num_samples: usize,
        rng: &mut Xoshiro256Plus,
        settings: &LinalgSettings<F>,
    ) -> Result<Array2<F>> {
        // A + D covariance is the sum of independent N(0, A) and N(0, D) draws
        let base = self.base.zero_mean_mvn_samples(num_samples, rng, settings)?;
        let noise = self.diag.zero_mean_mvn_samples(num_samples, rng, settings)?;
        Ok(base + noise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::non_lazy::NonLazyTensor;
    use crate::settings::LinalgSettings;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Axis};
    use ndarray_rand::rand::SeedableRng;

    fn added() -> AddedDiagLazyTensor<f64> {
        let base = NonLazyTensor::new(array![[2., 1.], [1., 2.]]);
        AddedDiagLazyTensor::new(Arc::new(base), DiagLazyTensor::new(array![0.5, 1.])).unwrap()
    }

    #[test]
    fn test_added_diag_matmul() {
        let t = added();
        let rhs = array![[1.], [2.]];
        assert_abs_diff_eq!(t.matmul(&rhs.view()).unwrap(), array![[4.5], [7.]]);
        assert_abs_diff_eq!(t.evaluate(), array![[2.5, 1.], [1., 3.]]);
        assert_abs_diff_eq!(t.diag(), array![2.5, 3.]);
        assert_abs_diff_eq!(
            t.get_indices(&[0, 1], &[1, 1]).unwrap(),
            array![1., 3.]
        );
    }

    #[test]
    fn test_added_diag_shape_mismatch() {
        let base = NonLazyTensor::new(array![[2., 1.], [1., 2.]]);
        assert!(AddedDiagLazyTensor::new(Arc::new(base), DiagLazyTensor::constant(3, 1.)).is_err());
    }

    #[test]
    fn test_added_diag_quad_form_derivative() {
        let t = added();
        let left = array![[1.], [2.]];
        let right = array![[3.], [4.]];
        let derivs = t.quad_form_derivative(&left.view(), &right.view()).unwrap();
        assert_eq!(derivs.len(), 2);
        assert_eq!(derivs[0], array![[3., 4.], [6., 8.]].into_dyn());
        assert_eq!(derivs[1], array![3., 8.].into_dyn());
    }

    #[test]
    fn test_added_diag_solves_match_dense() {
        let t = added();
        let rhs = array![[1., 0.], [0., 1.]];
        let chol_settings = LinalgSettings::default();
        let cg_settings = LinalgSettings::default()
            .with_max_cholesky_size(0)
            .with_cg_tolerance(1e-10);
        let inv = t.inv_matmul(&rhs.view(), &chol_settings).unwrap();
        let inv_cg = t.inv_matmul(&rhs.view(), &cg_settings).unwrap();
        assert_abs_diff_eq!(t.evaluate().dot(&inv), rhs, epsilon = 1e-10);
        assert_abs_diff_eq!(inv, inv_cg, epsilon = 1e-8);
        let (_, logdet) = t.inv_quad_log_det(None, &chol_settings).unwrap();
        assert_abs_diff_eq!(logdet, (2.5 * 3. - 1f64).ln(), epsilon = 1e-10);
    }

    #[test]
    fn test_added_diag_samples() {
        let t = added();
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let samples = t
            .zero_mean_mvn_samples(20000, &mut rng, &LinalgSettings::default())
            .unwrap();
        let cov = samples.t().dot(&samples) / 20000.;
        assert_abs_diff_eq!(cov, t.evaluate(), epsilon = 0.15);
        assert_abs_diff_eq!(samples.sum_axis(Axis(0)) / 20000., array![0., 0.], epsilon = 0.05);
    }
}
