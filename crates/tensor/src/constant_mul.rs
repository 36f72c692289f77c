use crate::errors::{Result, TensorError};
use crate::lazy_tensor::{check_rows, LazyTensor};
use crate::settings::LinalgSettings;
use linfa::Float;
use ndarray::{arr0, Array1, Array2, ArrayD, ArrayView2};
use rand_xoshiro::Xoshiro256Plus;
use std::sync::Arc;

/// `c . A` for a positive constant `c`, typically a kernel outputscale.
#[derive(Clone, Debug)]
pub struct ConstantMulLazyTensor<F: Float> {
    base: Arc<dyn LazyTensor<F>>,
    constant: F,
}

impl<F: Float> ConstantMulLazyTensor<F> {
    /// Constructor, `constant` has to be positive
    pub fn new(base: Arc<dyn LazyTensor<F>>, constant: F) -> Result<Self> {
        if constant <= F::zero() {
            return Err(TensorError::InvalidValue(format!(
                "constant multiplier should be positive, got {constant}"
            )));
        }
        Ok(ConstantMulLazyTensor { base, constant })
    }

    /// The scaled tensor `A`
    pub fn base(&self) -> &Arc<dyn LazyTensor<F>> {
        &self.base
    }

    /// The multiplier `c`
    pub fn constant(&self) -> F {
        self.constant
    }
}

impl<F: Float> LazyTensor<F> for ConstantMulLazyTensor<F> {
    fn shape(&self) -> (usize, usize) {
        self.base.shape()
    }

    fn matmul(&self, rhs: &ArrayView2<F>) -> Result<Array2<F>> {
        Ok(self.base.matmul(rhs)? * self.constant)
    }

    fn t_matmul(&self, rhs: &ArrayView2<F>) -> Result<Array2<F>> {
        Ok(self.base.t_matmul(rhs)? * self.constant)
    }

    fn diag(&self) -> Array1<F> {
        self.base.diag() * self.constant
    }

    fn evaluate(&self) -> Array2<F> {
        self.base.evaluate() * self.constant
    }

    fn get_indices(&self, left: &[usize], right: &[usize]) -> Result<Array1<F>> {
        Ok(self.base.get_indices(left, right)? * self.constant)
    }

    /// The constant comes first, followed by the base representation
    fn representation(&self) -> Vec<ArrayD<F>> {
        let mut repr = vec![arr0(self.constant).into_dyn()];
        repr.extend(self.base.representation());
        repr
    }

    fn quad_form_derivative(
        &self,
        left: &ArrayView2<F>,
        right: &ArrayView2<F>,
    ) -> Result<Vec<ArrayD<F>>> {
        check_rows(self.shape(), left)?;
        let base_right = self.base.matmul(right)?;
        let d_constant = (left * &base_right).sum();
        let mut derivs = vec![arr0(d_constant).into_dyn()];
        derivs.extend(
            self.base
                .quad_form_derivative(left, right)?
                .into_iter()
                .map(|d| d * self.constant),
        );
        Ok(derivs)
    }

    fn inv_matmul(&self, rhs: &ArrayView2<F>, settings: &LinalgSettings<F>) -> Result<Array2<F>> {
        Ok(self.base.inv_matmul(rhs, settings)? / self.constant)
    }

    fn inv_quad_log_det(
        &self,
        rhs: Option<&ArrayView2<F>>,
        settings: &LinalgSettings<F>,
    ) -> Result<(F, F)> {
        let (inv_quad, log_det) = self.base.inv_quad_log_det(rhs, settings)?;
        let n = F::cast(self.size());
        Ok((inv_quad / self.constant, log_det + n * self.constant.ln()))
    }

    fn zero_mean_mvn_samples(
        &self,
        num_samples: usize,
        rng: &mut Xoshiro256Plus,
        settings: &LinalgSettings<F>,
    ) -> Result<Array2<F>> {
        Ok(self.base.zero_mean_mvn_samples(num_samples, rng, settings)? * self.constant.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::non_lazy::NonLazyTensor;
    use crate::toeplitz::ToeplitzLazyTensor;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_constant_mul_products() {
        let base = ToeplitzLazyTensor::new(array![2., 0.5]).unwrap();
        let t = ConstantMulLazyTensor::new(Arc::new(base), 3.).unwrap();
        assert_abs_diff_eq!(t.evaluate(), array![[6., 1.5], [1.5, 6.]]);
        let rhs = array![[1.], [2.]];
        assert_abs_diff_eq!(t.matmul(&rhs.view()).unwrap(), array![[9.], [13.5]]);
        assert_abs_diff_eq!(t.diag(), array![6., 6.]);
        assert!(ConstantMulLazyTensor::new(t.base().clone(), 0.).is_err());
    }

    #[test]
    fn test_constant_mul_quad_form_derivative() {
        let base = NonLazyTensor::new(array![[2., 1.], [1., 2.]]);
        let t = ConstantMulLazyTensor::new(Arc::new(base), 2.).unwrap();
        let left = array![[1.], [0.]];
        let right = array![[1.], [1.]];
        let derivs = t.quad_form_derivative(&left.view(), &right.view()).unwrap();
        assert_eq!(derivs.len(), 2);
        // left^T A right
        assert_abs_diff_eq!(derivs[0].sum(), 3.);
        assert_eq!(derivs[1], array![[2., 2.], [0., 0.]].into_dyn());
    }

    #[test]
    fn test_constant_mul_solves() {
        let base = NonLazyTensor::new(array![[2., 1.], [1., 2.]]);
        let t = ConstantMulLazyTensor::new(Arc::new(base), 2.).unwrap();
        let settings = LinalgSettings::default();
        let rhs = array![[1.], [1.]];
        let x = t.inv_matmul(&rhs.view(), &settings).unwrap();
        assert_abs_diff_eq!(t.evaluate().dot(&x), rhs, epsilon = 1e-12);
        let (inv_quad, log_det) = t.inv_quad_log_det(Some(&rhs.view()), &settings).unwrap();
        assert_abs_diff_eq!(inv_quad, 1. / 3., epsilon = 1e-12);
        assert_abs_diff_eq!(log_det, 12f64.ln(), epsilon = 1e-12);
    }
}
