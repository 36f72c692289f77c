//! Exact GP regression of a noisy sine: fit the hyperparameters by maximizing
//! the marginal likelihood, then predict with confidence regions.
use env_logger::{Builder, Env};
use lazygp_gp::kernels::{RbfKernel, ScaleKernel};
use lazygp_gp::mean_models::ConstantMean;
use lazygp_gp::ExactGaussianProcess;
use linfa::prelude::*;
use ndarray::{Array, Array1, Axis, Zip};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;

const PI: f64 = std::f64::consts::PI;

fn main() {
    let env = Env::new().filter_or("LAZYGP_LOG", "info");
    let mut builder = Builder::from_env(env);
    let builder = builder.target(env_logger::Target::Stdout);
    builder.try_init().ok();

    let mut rng = Xoshiro256Plus::seed_from_u64(42);
    let xt = Array::linspace(0., 1., 100).insert_axis(Axis(1));
    let noise = Array1::random_using(100, Normal::new(0., 0.2).unwrap(), &mut rng);
    let yt = xt.column(0).mapv(|v| (2. * PI * v).sin()) + noise;

    let gp = ExactGaussianProcess::<f64, _, _>::params(
        ConstantMean::default(),
        ScaleKernel::new(RbfKernel::new()),
    )
    .adam(0.1, 50)
    .fit(&Dataset::new(xt, yt))
    .expect("GP fitted");
    println!("{gp}");

    let xtest = Array::linspace(0., 1., 51).insert_axis(Axis(1));
    let observed = gp.predict_observed(&xtest).expect("GP prediction");
    let (lower, upper) = observed.confidence_region();
    println!("{:>6} {:>8} {:>8} {:>8}", "x", "mean", "lower", "upper");
    Zip::from(xtest.column(0))
        .and(observed.mean())
        .and(&lower)
        .and(&upper)
        .for_each(|x, m, l, u| println!("{x:>6.2} {m:>8.3} {l:>8.3} {u:>8.3}"));
}
