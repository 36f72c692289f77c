use crate::errors::{Result, TensorError};
use crate::lazy_tensor::{check_rows, LazyTensor};
use linfa::Float;
use ndarray::{Array1, Array2, ArrayD, ArrayView2};

/// A dense symmetric matrix seen as a lazy tensor
#[derive(Clone, Debug)]
pub struct NonLazyTensor<F: Float> {
    mat: Array2<F>,
}

impl<F: Float> NonLazyTensor<F> {
    /// Wrap a dense matrix.
    ///
    /// *Panics* if the matrix is not square, use [`NonLazyTensor::try_new`] to get an error instead.
    pub fn new(mat: Array2<F>) -> Self {
        assert!(mat.is_square(), "NonLazyTensor expects a square matrix");
        NonLazyTensor { mat }
    }

    /// Wrap a dense matrix checking it is square
    pub fn try_new(mat: Array2<F>) -> Result<Self> {
        if !mat.is_square() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![mat.nrows(), mat.nrows()],
                actual: mat.shape().to_vec(),
            });
        }
        Ok(NonLazyTensor { mat })
    }

    /// Underlying dense matrix
    pub fn matrix(&self) -> &Array2<F> {
        &self.mat
    }
}

impl<F: Float> LazyTensor<F> for NonLazyTensor<F> {
    fn shape(&self) -> (usize, usize) {
        self.mat.dim()
    }

    fn matmul(&self, rhs: &ArrayView2<F>) -> Result<Array2<F>> {
        check_rows(self.shape(), rhs)?;
        Ok(self.mat.dot(rhs))
    }

    fn t_matmul(&self, rhs: &ArrayView2<F>) -> Result<Array2<F>> {
        check_rows(self.shape(), rhs)?;
        Ok(self.mat.t().dot(rhs))
    }

    fn diag(&self) -> Array1<F> {
        self.mat.diag().to_owned()
    }

    fn evaluate(&self) -> Array2<F> {
        self.mat.to_owned()
    }

    fn representation(&self) -> Vec<ArrayD<F>> {
        vec![self.mat.to_owned().into_dyn()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::LinalgSettings;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use ndarray_rand::rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    #[test]
    fn test_dense_samples_use_given_settings() {
        // indefinite: default jitter cannot make it decomposable
        let t = NonLazyTensor::new(array![[1., 2.], [2., 1.]]);
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        assert!(t.zero_mean_mvn_samples(10, &mut rng, &LinalgSettings::default()).is_err());
        let settings = LinalgSettings::default().with_jitter(10.);
        let samples = t.zero_mean_mvn_samples(10, &mut rng, &settings).unwrap();
        assert_eq!(samples.dim(), (10, 2));
    }

    #[test]
    fn test_dense_samples_covariance() {
        let t = NonLazyTensor::new(array![[2., 0.5], [0.5, 1.]]);
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let samples = t
            .zero_mean_mvn_samples(20000, &mut rng, &LinalgSettings::default())
            .unwrap();
        let cov = samples.t().dot(&samples) / 20000.;
        assert_abs_diff_eq!(cov, t.evaluate(), epsilon = 0.1);
    }
}
