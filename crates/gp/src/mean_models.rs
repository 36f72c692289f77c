//! A module for mean functions `m(x)` of the GP prior.
//!
//! The following models are implemented:
//! * zero,
//! * constant (one learnable value),
//! * linear (learnable weights and bias).

use crate::constraints::Constraint;
use crate::errors::{GpError, Result};
use crate::hyperparameters::{check_hyperparameters_len, Hyperparameter, Hyperparameters};
use linfa::Float;
use ndarray::{Array1, ArrayBase, Data, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// A trait for mean functions used by GP models
pub trait MeanFunction<F: Float>:
    Hyperparameters<F> + Clone + fmt::Debug + fmt::Display + Send + Sync
{
    /// Mean values at the given `x` data points specified as a (n, nx) matrix
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>>;

    /// Derivatives `dm(x) / d raw_j`, one (n,) vector per raw hyperparameter
    fn gradients(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Vec<Array1<F>>>;
}

/// Zero function as mean of the GP
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct ZeroMean();

impl From<ZeroMean> for String {
    fn from(_item: ZeroMean) -> String {
        "ZeroMean".to_string()
    }
}

impl TryFrom<String> for ZeroMean {
    type Error = &'static str;
    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s == "ZeroMean" {
            Ok(Self::default())
        } else {
            Err("Bad string value for ZeroMean, should be \'ZeroMean\'")
        }
    }
}

impl<F: Float> Hyperparameters<F> for ZeroMean {
    fn n_hyperparameters(&self) -> usize {
        0
    }

    fn raw_hyperparameters(&self) -> Array1<F> {
        Array1::zeros(0)
    }

    fn set_raw_hyperparameters(&mut self, raw: &[F]) -> Result<()> {
        check_hyperparameters_len(raw, 0)
    }

    fn hyperparameter_names(&self) -> Vec<String> {
        vec![]
    }
}

impl<F: Float> MeanFunction<F> for ZeroMean {
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        Ok(Array1::zeros(x.nrows()))
    }

    fn gradients(&self, _x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Vec<Array1<F>>> {
        Ok(vec![])
    }
}

impl fmt::Display for ZeroMean {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ZeroMean")
    }
}

/// A learnable constant function as mean of the GP
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct ConstantMean<F: Float> {
    constant: Hyperparameter<F>,
}

impl<F: Float> Default for ConstantMean<F> {
    fn default() -> Self {
        ConstantMean::new(F::zero())
    }
}

impl<F: Float> ConstantMean<F> {
    /// Constant mean initialized to `value`
    pub fn new(value: F) -> Self {
        ConstantMean {
            constant: Hyperparameter::from_raw(value, Constraint::Unconstrained),
        }
    }

    /// Current constant
    pub fn constant(&self) -> F {
        self.constant.value()
    }
}

impl<F: Float> Hyperparameters<F> for ConstantMean<F> {
    fn n_hyperparameters(&self) -> usize {
        1
    }

    fn raw_hyperparameters(&self) -> Array1<F> {
        Array1::from_elem(1, self.constant.raw())
    }

    fn set_raw_hyperparameters(&mut self, raw: &[F]) -> Result<()> {
        check_hyperparameters_len(raw, 1)?;
        self.constant.set_raw(raw[0]);
        Ok(())
    }

    fn hyperparameter_names(&self) -> Vec<String> {
        vec!["constant".to_string()]
    }
}

impl<F: Float> MeanFunction<F> for ConstantMean<F> {
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        Ok(Array1::from_elem(x.nrows(), self.constant.value()))
    }

    fn gradients(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Vec<Array1<F>>> {
        Ok(vec![Array1::ones(x.nrows())])
    }
}

impl<F: Float> fmt::Display for ConstantMean<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "constant: {:.3}", self.constant.value())
    }
}

/// A learnable affine function `w^T x + b` as mean of the GP
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct LinearMean<F: Float> {
    weights: Array1<F>,
    bias: F,
}

impl<F: Float> LinearMean<F> {
    /// Linear mean for `input_dim`-dimensional inputs, weights and bias initialized to zero
    pub fn new(input_dim: usize) -> Self {
        LinearMean {
            weights: Array1::zeros(input_dim),
            bias: F::zero(),
        }
    }

    /// Weights `w`
    pub fn weights(&self) -> &Array1<F> {
        &self.weights
    }

    /// Bias `b`
    pub fn bias(&self) -> F {
        self.bias
    }

    fn check_dim(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<()> {
        if x.ncols() != self.weights.len() {
            return Err(GpError::InvalidValueError(format!(
                "linear mean expects {}-dimensional inputs, got {}",
                self.weights.len(),
                x.ncols()
            )));
        }
        Ok(())
    }
}

impl<F: Float> Hyperparameters<F> for LinearMean<F> {
    fn n_hyperparameters(&self) -> usize {
        self.weights.len() + 1
    }

    fn raw_hyperparameters(&self) -> Array1<F> {
        let mut raw = self.weights.to_vec();
        raw.push(self.bias);
        Array1::from_vec(raw)
    }

    fn set_raw_hyperparameters(&mut self, raw: &[F]) -> Result<()> {
        check_hyperparameters_len(raw, self.n_hyperparameters())?;
        let d = self.weights.len();
        self.weights.assign(&Array1::from_vec(raw[..d].to_vec()));
        self.bias = raw[d];
        Ok(())
    }

    fn hyperparameter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = (0..self.weights.len())
            .map(|i| format!("weights[{i}]"))
            .collect();
        names.push("bias".to_string());
        names
    }
}

impl<F: Float> MeanFunction<F> for LinearMean<F> {
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        self.check_dim(x)?;
        Ok(x.dot(&self.weights) + self.bias)
    }

    fn gradients(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Vec<Array1<F>>> {
        self.check_dim(x)?;
        let mut grads: Vec<Array1<F>> = x.columns().into_iter().map(|c| c.to_owned()).collect();
        grads.push(Array1::ones(x.nrows()));
        Ok(grads)
    }
}

impl<F: Float> fmt::Display for LinearMean<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let w: Vec<String> = self.weights.iter().map(|v| format!("{v:.3}")).collect();
        write!(f, "weights: [{}]  bias: {:.3}", w.join(", "), self.bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_zero_and_constant() {
        let x = array![[1., 2.], [3., 4.], [5., 6.]];
        let zero: Array1<f64> = ZeroMean().value(&x).unwrap();
        assert_eq!(zero, array![0., 0., 0.]);
        assert_eq!(<ZeroMean as Hyperparameters<f64>>::n_hyperparameters(&ZeroMean()), 0);

        let mut constant = ConstantMean::new(1.5);
        assert_eq!(constant.value(&x).unwrap(), array![1.5, 1.5, 1.5]);
        constant.set_raw_hyperparameters(&[-2.]).unwrap();
        assert_eq!(constant.constant(), -2.);
        assert_eq!(constant.gradients(&x).unwrap(), vec![array![1., 1., 1.]]);
        assert!(constant.set_raw_hyperparameters(&[1., 2.]).is_err());
    }

    #[test]
    fn test_linear() {
        let x = array![[1., 2.], [3., 4.]];
        let mut linear = LinearMean::new(2);
        assert_eq!(linear.value(&x).unwrap(), array![0., 0.]);
        linear.set_raw_hyperparameters(&[1., -1., 0.5]).unwrap();
        assert_abs_diff_eq!(linear.value(&x).unwrap(), array![-0.5, -0.5]);
        let grads = linear.gradients(&x).unwrap();
        assert_eq!(grads, vec![array![1., 3.], array![2., 4.], array![1., 1.]]);
        assert_eq!(
            linear.hyperparameter_names(),
            vec!["weights[0]", "weights[1]", "bias"]
        );
        assert!(linear.value(&array![[1.]]).is_err());
    }

    #[cfg(feature = "serializable")]
    #[test]
    fn test_save_load() {
        let data = r#""ZeroMean""#;
        let mean: ZeroMean = serde_json::from_str(data).unwrap();
        assert_eq!(mean, ZeroMean());
    }
}
