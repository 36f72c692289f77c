//! Constraints mapping raw optimizer values to feasible hyperparameter values.
//!
//! Hyperparameters are stored unconstrained so that gradient steps never leave the
//! feasible set, see [Constraint::transform] and [Constraint::inverse_transform].

use crate::errors::{GpError, Result};
use linfa::Float;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Above this raw value softplus is the identity up to machine precision
const SOFTPLUS_THRESHOLD: f64 = 20.;

/// Mapping from an unconstrained raw value to the feasible set of a hyperparameter.
///
/// Optimizers work on raw values, models on transformed values.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub enum Constraint<F: Float> {
    /// `softplus(raw)` in `(0, inf)`
    Positive,
    /// `lower + softplus(raw)` in `(lower, inf)`
    GreaterThan(F),
    /// `lower + (upper - lower) * sigmoid(raw)` in `(lower, upper)`
    Interval(F, F),
    /// Identity
    Unconstrained,
}

fn softplus<F: Float>(x: F) -> F {
    if x > F::cast(SOFTPLUS_THRESHOLD) {
        x
    } else {
        x.exp().ln_1p()
    }
}

fn inverse_softplus<F: Float>(y: F) -> F {
    if y > F::cast(SOFTPLUS_THRESHOLD) {
        y
    } else {
        y.exp_m1().ln()
    }
}

fn sigmoid<F: Float>(x: F) -> F {
    F::one() / (F::one() + (-x).exp())
}

impl<F: Float> Constraint<F> {
    /// Constrained value of the `raw` value
    pub fn transform(&self, raw: F) -> F {
        match *self {
            Constraint::Positive => softplus(raw),
            Constraint::GreaterThan(lower) => lower + softplus(raw),
            Constraint::Interval(lower, upper) => lower + (upper - lower) * sigmoid(raw),
            Constraint::Unconstrained => raw,
        }
    }

    /// Raw value of the constrained `value`, an error when `value` is not feasible
    pub fn inverse_transform(&self, value: F) -> Result<F> {
        if !self.is_feasible(value) {
            return Err(GpError::InvalidValueError(format!(
                "value {value} does not satisfy constraint {self}"
            )));
        }
        Ok(match *self {
            Constraint::Positive => inverse_softplus(value),
            Constraint::GreaterThan(lower) => inverse_softplus(value - lower),
            Constraint::Interval(lower, upper) => {
                let p = (value - lower) / (upper - lower);
                (p / (F::one() - p)).ln()
            }
            Constraint::Unconstrained => value,
        })
    }

    /// Derivative `d transform(raw) / d raw`
    pub fn derivative(&self, raw: F) -> F {
        match *self {
            Constraint::Positive | Constraint::GreaterThan(_) => sigmoid(raw),
            Constraint::Interval(lower, upper) => {
                let s = sigmoid(raw);
                (upper - lower) * s * (F::one() - s)
            }
            Constraint::Unconstrained => F::one(),
        }
    }

    /// Whether `value` lies in the (open) feasible set
    pub fn is_feasible(&self, value: F) -> bool {
        if !value.is_finite() {
            return false;
        }
        match *self {
            Constraint::Positive => value > F::zero(),
            Constraint::GreaterThan(lower) => value > lower,
            Constraint::Interval(lower, upper) => value > lower && value < upper,
            Constraint::Unconstrained => true,
        }
    }
}

impl<F: Float> fmt::Display for Constraint<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Constraint::Positive => write!(f, "Positive"),
            Constraint::GreaterThan(lower) => write!(f, "GreaterThan({lower})"),
            Constraint::Interval(lower, upper) => write!(f, "Interval({lower}, {upper})"),
            Constraint::Unconstrained => write!(f, "Unconstrained"),
        }
    }
}
