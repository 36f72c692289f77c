use crate::constraints::Constraint;
use crate::errors::{GpError, Result};
use linfa::Float;
use ndarray::Array1;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// A learnable scalar stored as an unconstrained raw value and its constraint
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct Hyperparameter<F: Float> {
    raw: F,
    constraint: Constraint<F>,
}

impl<F: Float> Hyperparameter<F> {
    /// Hyperparameter with the given constrained `value`
    pub fn new(value: F, constraint: Constraint<F>) -> Result<Self> {
        Ok(Hyperparameter {
            raw: constraint.inverse_transform(value)?,
            constraint,
        })
    }

    /// Hyperparameter with the given raw value
    pub fn from_raw(raw: F, constraint: Constraint<F>) -> Self {
        Hyperparameter { raw, constraint }
    }

    /// Constrained value
    pub fn value(&self) -> F {
        self.constraint.transform(self.raw)
    }

    /// Set the constrained value, an error when it does not satisfy the constraint
    pub fn set_value(&mut self, value: F) -> Result<()> {
        self.raw = self.constraint.inverse_transform(value)?;
        Ok(())
    }

    /// Raw value
    pub fn raw(&self) -> F {
        self.raw
    }

    /// Set the raw value
    pub fn set_raw(&mut self, raw: F) {
        self.raw = raw;
    }

    /// `d value / d raw` at the current raw value
    pub fn derivative(&self) -> F {
        self.constraint.derivative(self.raw)
    }

    /// Constraint
    pub fn constraint(&self) -> &Constraint<F> {
        &self.constraint
    }
}

/// Access to the learnable parameters of a model component as one flat raw vector.
///
/// Kernels, means, likelihoods and variational strategies implement it so that
/// trainers can optimize all of them at once.
pub trait Hyperparameters<F: Float> {
    /// Number of raw hyperparameters
    fn n_hyperparameters(&self) -> usize;

    /// Raw hyperparameters as a flat vector
    fn raw_hyperparameters(&self) -> Array1<F>;

    /// Set raw hyperparameters from a slice of length `n_hyperparameters()`
    fn set_raw_hyperparameters(&mut self, raw: &[F]) -> Result<()>;

    /// Names of the hyperparameters in the order of [`Hyperparameters::raw_hyperparameters`]
    fn hyperparameter_names(&self) -> Vec<String>;
}

/// Error out when `raw` does not hold `expected` values
pub(crate) fn check_hyperparameters_len<F>(raw: &[F], expected: usize) -> Result<()> {
    if raw.len() != expected {
        return Err(GpError::InvalidValueError(format!(
            "expected {} raw hyperparameters, got {}",
            expected,
            raw.len()
        )));
    }
    Ok(())
}

/// Raw hyperparameters of several components concatenated in order
pub(crate) fn concat_raw<F: Float>(components: &[&dyn Hyperparameters<F>]) -> Array1<F> {
    components
        .iter()
        .flat_map(|c| c.raw_hyperparameters().to_vec())
        .collect()
}

/// Distribute a concatenated raw vector back over its components
pub(crate) fn split_raw<F: Float>(
    components: &mut [&mut dyn Hyperparameters<F>],
    raw: &[F],
) -> Result<()> {
    let total: usize = components.iter().map(|c| c.n_hyperparameters()).sum();
    check_hyperparameters_len(raw, total)?;
    let mut offset = 0;
    for c in components.iter_mut() {
        let n = c.n_hyperparameters();
        c.set_raw_hyperparameters(&raw[offset..offset + n])?;
        offset += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    struct Pair {
        a: Hyperparameter<f64>,
        b: Hyperparameter<f64>,
    }

    impl Hyperparameters<f64> for Pair {
        fn n_hyperparameters(&self) -> usize {
            2
        }
        fn raw_hyperparameters(&self) -> Array1<f64> {
            array![self.a.raw(), self.b.raw()]
        }
        fn set_raw_hyperparameters(&mut self, raw: &[f64]) -> Result<()> {
            check_hyperparameters_len(raw, 2)?;
            self.a.set_raw(raw[0]);
            self.b.set_raw(raw[1]);
            Ok(())
        }
        fn hyperparameter_names(&self) -> Vec<String> {
            vec!["a".to_string(), "b".to_string()]
        }
    }

    #[test]
    fn test_hyperparameter() {
        let mut h = Hyperparameter::new(0.5, Constraint::Positive).unwrap();
        assert_abs_diff_eq!(h.value(), 0.5, epsilon = 1e-12);
        h.set_value(2.).unwrap();
        assert_abs_diff_eq!(h.value(), 2., epsilon = 1e-12);
        assert!(h.set_value(-2.).is_err());
        h.set_raw(0.);
        assert_abs_diff_eq!(h.value(), 2f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(h.derivative(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_concat_and_split() {
        let mut p = Pair {
            a: Hyperparameter::from_raw(1., Constraint::Unconstrained),
            b: Hyperparameter::from_raw(2., Constraint::Positive),
        };
        let mut q = Pair {
            a: Hyperparameter::from_raw(3., Constraint::Unconstrained),
            b: Hyperparameter::from_raw(4., Constraint::Positive),
        };
        let components: [&dyn Hyperparameters<f64>; 2] = [&p, &q];
        assert_eq!(concat_raw(&components), array![1., 2., 3., 4.]);
        let mut components: [&mut dyn Hyperparameters<f64>; 2] = [&mut p, &mut q];
        split_raw(&mut components, &[5., 6., 7., 8.]).unwrap();
        assert!(split_raw(&mut components, &[1.]).is_err());
        assert_eq!(p.raw_hyperparameters(), array![5., 6.]);
        assert_eq!(q.raw_hyperparameters(), array![7., 8.]);
    }
}
