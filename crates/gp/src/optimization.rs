use crate::utils::to_f64;
use cobyla::{minimize, Func, RhoBeg, StopTols};
use linfa::Float;
use log::warn;
use ndarray::{arr1, Array1, Array2, ArrayView1, Zip};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

/// Half width of the box around the initial raw hyperparameters explored by multistart
pub(crate) const MULTISTART_RADIUS: f64 = 2.;

/// Adam optimizer with bias correction.
///
/// Minimizes a loss given its gradient: each [`Adam::step`] updates the
/// parameters in place.
#[derive(Clone, Debug)]
pub struct Adam<F: Float> {
    lr: F,
    beta1: F,
    beta2: F,
    eps: F,
    m: Array1<F>,
    v: Array1<F>,
    t: i32,
}

impl<F: Float> Adam<F> {
    /// Optimizer of `n` parameters with learning rate `lr` and default
    /// moments decay rates (0.9, 0.999)
    pub fn new(lr: F, n: usize) -> Self {
        Adam {
            lr,
            beta1: F::cast(0.9),
            beta2: F::cast(0.999),
            eps: F::cast(1e-8),
            m: Array1::zeros(n),
            v: Array1::zeros(n),
            t: 0,
        }
    }

    /// Learning rate
    pub fn lr(&self) -> F {
        self.lr
    }

    /// Number of steps done
    pub fn n_steps(&self) -> usize {
        self.t as usize
    }

    /// One descent step of `params` along the loss gradient `grad`
    pub fn step(&mut self, params: &mut Array1<F>, grad: &ArrayView1<F>) {
        self.t += 1;
        let (b1, b2) = (self.beta1, self.beta2);
        Zip::from(&mut self.m)
            .and(grad)
            .for_each(|m, &g| *m = b1 * *m + (F::one() - b1) * g);
        Zip::from(&mut self.v)
            .and(grad)
            .for_each(|v, &g| *v = b2 * *v + (F::one() - b2) * g * g);
        let m_corr = F::one() - b1.powi(self.t);
        let v_corr = F::one() - b2.powi(self.t);
        let (lr, eps) = (self.lr, self.eps);
        Zip::from(params)
            .and(&self.m)
            .and(&self.v)
            .for_each(|p, &m, &v| {
                let m_hat = m / m_corr;
                let v_hat = v / v_corr;
                *p -= lr * m_hat / (v_hat.sqrt() + eps);
            });
    }
}

/// Stopping rules of a COBYLA run on raw hyperparameters
#[derive(Clone, Copy, Debug)]
pub(crate) struct CobylaSettings {
    /// Initial trust region radius in raw space
    pub rhobeg: f64,
    pub ftol_rel: f64,
    pub max_eval: usize,
}

impl Default for CobylaSettings {
    fn default() -> Self {
        CobylaSettings {
            rhobeg: 0.5,
            ftol_rel: 1e-4,
            max_eval: 200,
        }
    }
}

impl CobylaSettings {
    pub fn with_max_eval(self, max_eval: usize) -> Self {
        CobylaSettings { max_eval, ..self }
    }
}

/// Starting points of a multistart optimization: the given initial raw
/// hyperparameters first, then `n_start - 1` points drawn uniformly in
/// `init -/+ MULTISTART_RADIUS`. Bounds are the box around `init`.
pub(crate) fn prepare_multistart<F: Float>(
    n_start: usize,
    init: &Array1<F>,
    seed: Option<u64>,
) -> (Array2<f64>, Vec<(f64, f64)>) {
    let init = init.mapv(to_f64);
    let bounds: Vec<(f64, f64)> = init
        .iter()
        .map(|&v| (v - MULTISTART_RADIUS, v + MULTISTART_RADIUS))
        .collect();
    let mut rng = match seed {
        Some(seed) => Xoshiro256Plus::seed_from_u64(seed),
        None => Xoshiro256Plus::from_entropy(),
    };
    let n_start = n_start.max(1);
    let mut starts = Array2::zeros((n_start, init.len()));
    starts.row_mut(0).assign(&init);
    for mut row in starts.rows_mut().into_iter().skip(1) {
        Zip::from(&mut row)
            .and(&arr1(&bounds.iter().map(|b| b.0).collect::<Vec<_>>()))
            .and(&arr1(&bounds.iter().map(|b| b.1).collect::<Vec<_>>()))
            .for_each(|v, &lo, &up| *v = rng.gen_range(lo..up));
    }
    (starts, bounds)
}

/// Minimize a loss of the raw hyperparameters with COBYLA from `raw0` within `bounds`.
///
/// Raw points with NaN components score `+inf` without calling `loss`, so do NaN
/// losses. A failed run keeps its last point with an infinite score so that it
/// loses against any other start.
pub(crate) fn cobyla_minimize_raw<L>(
    loss: L,
    raw0: &[f64],
    bounds: &[(f64, f64)],
    settings: CobylaSettings,
) -> (f64, Array1<f64>)
where
    L: Fn(&[f64]) -> f64,
{
    let scored = |raw: &[f64], _: &mut ()| -> f64 {
        if raw.iter().any(|v| v.is_nan()) {
            return f64::INFINITY;
        }
        let value = loss(raw);
        if value.is_nan() {
            f64::INFINITY
        } else {
            value
        }
    };
    let no_constraints: Vec<&dyn Func<()>> = vec![];
    let tols = StopTols {
        ftol_rel: settings.ftol_rel,
        ..StopTols::default()
    };
    match minimize(
        scored,
        raw0,
        bounds,
        &no_constraints,
        (),
        settings.max_eval,
        RhoBeg::All(settings.rhobeg),
        Some(tols),
    ) {
        Ok((_, raw_opt, loss_opt)) => (loss_opt, arr1(&raw_opt)),
        Err((status, raw_last, _)) => {
            warn!("COBYLA stopped on raw hyperparameters with status {status:?}");
            (f64::INFINITY, arr1(&raw_last))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_adam_minimizes_quadratic() {
        let target = array![1., -2.];
        let mut x = array![0., 0.];
        let mut adam = Adam::new(0.1, 2);
        for _ in 0..500 {
            let grad = (&x - &target) * 2.;
            adam.step(&mut x, &grad.view());
        }
        assert_eq!(adam.n_steps(), 500);
        assert_abs_diff_eq!(x, target, epsilon = 5e-2);
    }

    #[test]
    fn test_adam_first_step_is_lr() {
        // bias correction makes the first step exactly lr * sign(grad)
        let mut x = array![0., 0.];
        let mut adam = Adam::new(0.1, 2);
        adam.step(&mut x, &array![3., -0.01].view());
        assert_abs_diff_eq!(x, array![-0.1, 0.1], epsilon = 1e-5);
    }

    #[test]
    fn test_prepare_multistart() {
        let init = array![0.5, -1.];
        let (starts, bounds) = prepare_multistart(5, &init, Some(42));
        assert_eq!(starts.dim(), (5, 2));
        assert_eq!(starts.row(0), init);
        assert_eq!(bounds, vec![(-1.5, 2.5), (-3., 1.)]);
        for row in starts.rows() {
            for (v, b) in row.iter().zip(&bounds) {
                assert!(*v >= b.0 && *v <= b.1);
            }
        }
        let (again, _) = prepare_multistart(5, &init, Some(42));
        assert_eq!(starts, again);
    }

    #[test]
    fn test_cobyla_minimize_raw() {
        let loss = |raw: &[f64]| (raw[0] - 1.).powi(2) + (raw[1] + 0.5).powi(2);
        let (fmin, best) = cobyla_minimize_raw(
            loss,
            &[0., 0.],
            &[(-2., 2.), (-2., 2.)],
            CobylaSettings::default(),
        );
        assert_abs_diff_eq!(fmin, 0., epsilon = 1e-3);
        assert_abs_diff_eq!(best, array![1., -0.5], epsilon = 5e-2);
    }

    #[test]
    fn test_cobyla_minimize_raw_nan_loss() {
        let (fmin, _) = cobyla_minimize_raw(
            |_: &[f64]| f64::NAN,
            &[0.],
            &[(-1., 1.)],
            CobylaSettings::default().with_max_eval(10),
        );
        assert_eq!(fmin, f64::INFINITY);
    }
}
