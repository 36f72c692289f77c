//! A module for metrics to evaluate Gaussian Process models performances.
//!
//! Point-wise predictive metrics compare held-out observations with the predictive
//! mean and variance of a model:
//! * [mean_squared_error],
//! * [negative_log_predictive_density] under gaussian predictive marginals,
//! * [mean_standardized_log_loss], the previous one relative to a trivial gaussian
//!   model fitted on the training outputs.
//!
//! [PredictScore] implements Q2 predictive coefficient with cross validation.

use crate::errors::{GpError, Result};
use crate::kernels::Kernel;
use crate::mean_models::MeanFunction;
use crate::{ExactGaussianProcess, ExactGpParams};
use linfa::dataset::Dataset;
use linfa::{
    traits::{Fit, Predict, PredictInplace},
    Float, ParamGuard,
};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Zip};

fn check_lengths<F>(
    y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    others: &[&ArrayBase<impl Data<Elem = F>, Ix1>],
) -> Result<()> {
    if y.is_empty() || others.iter().any(|o| o.len() != y.len()) {
        return Err(GpError::InvalidValueError(format!(
            "metrics need non empty arrays of the same length, got {} observations and {:?}",
            y.len(),
            others.iter().map(|o| o.len()).collect::<Vec<_>>()
        )));
    }
    Ok(())
}

/// Mean of `(y_i - pred_i)^2`
pub fn mean_squared_error<F: Float>(
    y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    pred: &ArrayBase<impl Data<Elem = F>, Ix1>,
) -> Result<F> {
    check_lengths(y, &[pred])?;
    Ok(Zip::from(y)
        .and(pred)
        .fold(F::zero(), |acc, &y, &p| acc + (y - p) * (y - p))
        / F::cast(y.len()))
}

/// Mean of `-ln N(y_i; mean_i, var_i)`
pub fn negative_log_predictive_density<F: Float>(
    y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    mean: &ArrayBase<impl Data<Elem = F>, Ix1>,
    var: &ArrayBase<impl Data<Elem = F>, Ix1>,
) -> Result<F> {
    check_lengths(y, &[mean])?;
    check_lengths(y, &[var])?;
    if var.iter().any(|v| *v <= F::zero()) {
        return Err(GpError::InvalidValueError(
            "predictive variances should be positive".to_string(),
        ));
    }
    let two_pi = F::cast(2. * std::f64::consts::PI);
    let half = F::cast(0.5);
    let sum = Zip::from(y).and(mean).and(var).fold(F::zero(), |acc, &y, &m, &v| {
        acc + half * (two_pi * v).ln() + (y - m) * (y - m) / (F::cast(2.) * v)
    });
    Ok(sum / F::cast(y.len()))
}

/// Negative log predictive density minus the one of the trivial model
/// `N(mean(y_train), var(y_train))`, negative values are better than the trivial model
pub fn mean_standardized_log_loss<F: Float>(
    y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    mean: &ArrayBase<impl Data<Elem = F>, Ix1>,
    var: &ArrayBase<impl Data<Elem = F>, Ix1>,
    y_train: &ArrayBase<impl Data<Elem = F>, Ix1>,
) -> Result<F> {
    if y_train.len() < 2 {
        return Err(GpError::InvalidValueError(
            "at least two training outputs are needed".to_string(),
        ));
    }
    let train_mean = y_train.sum() / F::cast(y_train.len());
    let train_var = y_train.var(F::zero());
    let trivial_mean = Array1::from_elem(y.len(), train_mean);
    let trivial_var = Array1::from_elem(y.len(), train_var);
    Ok(negative_log_predictive_density(y, mean, var)?
        - negative_log_predictive_density(y, &trivial_mean, &trivial_var)?)
}

/// A trait for Q2 predictive coefficient cross validation score
pub trait PredictScore<F, ER, P, O>
where
    F: Float,
    ER: std::error::Error + From<linfa::error::Error>,
    P: Fit<Array2<F>, Array1<F>, ER, Object = O> + ParamGuard,
    O: PredictInplace<Array2<F>, Array1<F>>,
{
    /// Return the training data (xt, yt)
    fn training_data(&self) -> &(Array2<F>, Array1<F>);

    /// Return the model parameters
    fn params(&self) -> P;

    /// Compute quality metric Q2 with kfold cross validation
    fn q2_score(&self, kfold: usize) -> std::result::Result<F, ER> {
        let (xt, yt) = self.training_data();
        let dataset = Dataset::new(xt.to_owned(), yt.to_owned());
        let yt_mean = yt.sum() / F::cast(yt.len());
        // Predictive Residual Sum of Squares
        let mut press = F::zero();
        // Total Sum of Squares
        let mut tss = F::zero();
        for (train, valid) in dataset.fold(kfold).into_iter() {
            let model: O = self.params().fit(&train)?;
            let pred = model.predict(valid.records());
            press += (valid.targets() - pred).mapv(|v| v * v).sum();
            tss += (valid.targets() - yt_mean).mapv(|v| v * v).sum();
        }
        Ok(F::one() - press / tss)
    }

    /// Q2 predictive coefficient with Leave-One-Out Cross-Validation
    fn looq2_score(&self) -> std::result::Result<F, ER> {
        self.q2_score(self.training_data().0.nrows())
    }
}

impl<F, Mean, K> PredictScore<F, GpError, ExactGpParams<F, Mean, K>, Self>
    for ExactGaussianProcess<F, Mean, K>
where
    F: Float,
    Mean: MeanFunction<F>,
    K: Kernel<F>,
{
    fn training_data(&self) -> &(Array2<F>, Array1<F>) {
        &self.training_data
    }

    fn params(&self) -> ExactGpParams<F, Mean, K> {
        ExactGpParams::from(self.params.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{RbfKernel, ScaleKernel};
    use crate::mean_models::ConstantMean;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array, Axis};

    #[test]
    fn test_pointwise_metrics() {
        let y = array![1., 2., 3.];
        assert_abs_diff_eq!(mean_squared_error(&y, &y).unwrap(), 0.);
        assert_abs_diff_eq!(
            mean_squared_error(&y, &array![2., 2., 2.]).unwrap(),
            2. / 3.
        );
        let nlpd = negative_log_predictive_density(&y, &y, &array![1., 1., 1.]).unwrap();
        assert_abs_diff_eq!(nlpd, 0.5 * (2. * std::f64::consts::PI).ln(), epsilon = 1e-12);
        // trivial model scores zero
        let msll = mean_standardized_log_loss(
            &y,
            &array![2., 2., 2.],
            &array![2. / 3., 2. / 3., 2. / 3.],
            &y,
        )
        .unwrap();
        assert_abs_diff_eq!(msll, 0., epsilon = 1e-12);
        assert!(mean_squared_error(&y, &array![1.]).is_err());
        assert!(negative_log_predictive_density(&y, &y, &array![1., 0., 1.]).is_err());
    }

    #[test]
    fn test_q2_exact_gp() {
        let xt = Array::linspace(0., 1., 20).insert_axis(Axis(1));
        let yt = xt.column(0).mapv(|v| (2. * std::f64::consts::PI * v).sin());
        let gp = ExactGaussianProcess::<f64, _, _>::params(
            ConstantMean::default(),
            ScaleKernel::new(RbfKernel::new()),
        )
        .adam(0.1, 30)
        .fit(&Dataset::new(xt.clone(), yt.clone()))
        .expect("GP fit error");

        assert!(gp.q2_score(5).unwrap() > 0.9);
        assert!(gp.looq2_score().unwrap() > 0.9);

        let (mean, var) = gp.predict_valvar(&xt).unwrap();
        let var = var + gp.likelihood().noise();
        let msll = mean_standardized_log_loss(&yt, &mean, &var, &yt).unwrap();
        assert!(msll < 0.);
    }
}
