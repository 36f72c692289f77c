use crate::errors::{Result, TensorError};
use crate::lazy_tensor::{check_indices, check_rows, LazyTensor};
use crate::settings::LinalgSettings;
use linfa::Float;
use ndarray::{Array1, Array2, ArrayD, ArrayView2};
use rand_xoshiro::Xoshiro256Plus;
use std::sync::Arc;

/// Sum of lazy tensors of the same shape
#[derive(Clone, Debug)]
pub struct SumLazyTensor<F: Float> {
    tensors: Vec<Arc<dyn LazyTensor<F>>>,
}

impl<F: Float> SumLazyTensor<F> {
    /// Constructor, at least one tensor is required and all shapes have to match
    pub fn new(tensors: Vec<Arc<dyn LazyTensor<F>>>) -> Result<Self> {
        let first = tensors.first().ok_or_else(|| {
            TensorError::InvalidValue("SumLazyTensor requires at least one tensor".to_string())
        })?;
        let shape = first.shape();
        if let Some(t) = tensors.iter().find(|t| t.shape() != shape) {
            return Err(TensorError::ShapeMismatch {
                expected: vec![shape.0, shape.1],
                actual: vec![t.shape().0, t.shape().1],
            });
        }
        Ok(SumLazyTensor { tensors })
    }

    /// Summed tensors
    pub fn tensors(&self) -> &[Arc<dyn LazyTensor<F>>] {
        &self.tensors
    }
}

impl<F: Float> LazyTensor<F> for SumLazyTensor<F> {
    fn shape(&self) -> (usize, usize) {
        self.tensors[0].shape()
    }

    fn matmul(&self, rhs: &ArrayView2<F>) -> Result<Array2<F>> {
        check_rows(self.shape(), rhs)?;
        let mut res = Array2::zeros((self.size(), rhs.ncols()));
        for t in self.tensors.iter() {
            res += &t.matmul(rhs)?;
        }
        Ok(res)
    }

    fn t_matmul(&self, rhs: &ArrayView2<F>) -> Result<Array2<F>> {
        check_rows(self.shape(), rhs)?;
        let mut res = Array2::zeros((self.size(), rhs.ncols()));
        for t in self.tensors.iter() {
            res += &t.t_matmul(rhs)?;
        }
        Ok(res)
    }

    fn diag(&self) -> Array1<F> {
        self.tensors
            .iter()
            .fold(Array1::zeros(self.size()), |acc, t| acc + t.diag())
    }

    fn evaluate(&self) -> Array2<F> {
        self.tensors
            .iter()
            .fold(Array2::zeros(self.shape()), |acc, t| acc + t.evaluate())
    }

    fn get_indices(&self, left: &[usize], right: &[usize]) -> Result<Array1<F>> {
        check_indices(self.shape(), left, right)?;
        let mut res = Array1::zeros(left.len());
        for t in self.tensors.iter() {
            res += &t.get_indices(left, right)?;
        }
        Ok(res)
    }

    fn representation(&self) -> Vec<ArrayD<F>> {
        self.tensors
            .iter()
            .flat_map(|t| t.representation())
            .collect()
    }

    fn quad_form_derivative(
        &self,
        left: &ArrayView2<F>,
        right: &ArrayView2<F>,
    ) -> Result<Vec<ArrayD<F>>> {
        let mut derivs = vec![];
        for t in self.tensors.iter() {
            derivs.extend(t.quad_form_derivative(left, right)?);
        }
        Ok(derivs)
    }

    fn zero_mean_mvn_samples(
        &self,
        num_samples: usize,
        rng: &mut Xoshiro256Plus,
        settings: &LinalgSettings<F>,
    ) -> Result<Array2<F>> {
        let mut res = Array2::zeros((num_samples, self.size()));
        for t in self.tensors.iter() {
            res += &t.zero_mean_mvn_samples(num_samples, rng, settings)?;
        }
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagLazyTensor;
    use crate::non_lazy::NonLazyTensor;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_sum_lazy_tensor() {
        let a: Arc<dyn LazyTensor<f64>> = Arc::new(NonLazyTensor::new(array![[1., 2.], [2., 1.]]));
        let b: Arc<dyn LazyTensor<f64>> = Arc::new(DiagLazyTensor::new(array![3., 4.]));
        let s = SumLazyTensor::new(vec![a, b]).unwrap();
        assert_abs_diff_eq!(s.evaluate(), array![[4., 2.], [2., 5.]]);
        assert_abs_diff_eq!(s.diag(), array![4., 5.]);
        assert_abs_diff_eq!(
            s.matmul(&array![[1.], [1.]].view()).unwrap(),
            array![[6.], [7.]]
        );
        assert_eq!(s.representation().len(), 2);
        assert!(SumLazyTensor::<f64>::new(vec![]).is_err());
    }


    #[test]
    fn test_sum_quad_form_derivative() {
        let a: Arc<dyn LazyTensor<f64>> = Arc::new(NonLazyTensor::new(array![[1., 0.], [0., 1.]]));
        let b: Arc<dyn LazyTensor<f64>> = Arc::new(DiagLazyTensor::new(array![1., 1.]));
        let s = SumLazyTensor::new(vec![a, b]).unwrap();
        let left = array![[1.], [2.]];
        let derivs = s.quad_form_derivative(&left.view(), &left.view()).unwrap();
        assert_eq!(derivs[0], array![[1., 2.], [2., 4.]].into_dyn());
        assert_eq!(derivs[1], array![1., 4.].into_dyn());
    }

    #[test]
    fn test_sum_shape_mismatch() {
        let a: Arc<dyn LazyTensor<f64>> = Arc::new(DiagLazyTensor::new(array![1., 1.]));
        let b: Arc<dyn LazyTensor<f64>> = Arc::new(DiagLazyTensor::new(array![1., 1., 1.]));
        assert!(SumLazyTensor::new(vec![a, b]).is_err());
    }
}
