//! KISS-GP regression on a thousand points: the kernel is interpolated from a
//! regular grid and the marginal likelihood is computed with iterative solves.
use env_logger::{Builder, Env};
use lazygp_gp::kernels::{GridInterpolationKernel, RbfKernel, ScaleKernel};
use lazygp_gp::mean_models::ConstantMean;
use lazygp_gp::metrics::mean_squared_error;
use lazygp_gp::ExactGaussianProcess;
use lazygp_tensor::LinalgSettings;
use linfa::prelude::*;
use ndarray::{Array, Array1, Axis};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;
use std::time::Instant;

const PI: f64 = std::f64::consts::PI;

fn main() {
    let env = Env::new().filter_or("LAZYGP_LOG", "info");
    let mut builder = Builder::from_env(env);
    let builder = builder.target(env_logger::Target::Stdout);
    builder.try_init().ok();

    let n = 1000;
    let mut rng = Xoshiro256Plus::seed_from_u64(42);
    let xt = Array::linspace(0., 1., n).insert_axis(Axis(1));
    let noise = Array1::random_using(n, Normal::new(0., 0.2).unwrap(), &mut rng);
    let yt = xt.column(0).mapv(|v| (4. * PI * v).sin()) + noise;

    let kernel = GridInterpolationKernel::new(ScaleKernel::new(RbfKernel::new()), 400)
        .expect("grid kernel");
    let now = Instant::now();
    let gp = ExactGaussianProcess::<f64, _, _>::params(ConstantMean::default(), kernel)
        .adam(0.1, 30)
        .settings(LinalgSettings::default().with_max_cholesky_size(0))
        .fit(&Dataset::new(xt, yt))
        .expect("KISS-GP fitted");
    println!("{gp}");
    println!("Training time: {:?}", now.elapsed());

    let xtest = Array::linspace(0., 1., 51).insert_axis(Axis(1));
    let truth = xtest.column(0).mapv(|v| (4. * PI * v).sin());
    let prediction = gp.predict_values(&xtest).expect("KISS-GP prediction");
    println!(
        "Test MSE: {:.4}",
        mean_squared_error(&truth, &prediction).expect("MSE")
    );
}
