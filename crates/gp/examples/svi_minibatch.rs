//! Stochastic variational inference: a sparse GP regression trained by
//! minibatches on a larger dataset.
use env_logger::{Builder, Env};
use lazygp_gp::kernels::{MaternKernel, MaternNu, ScaleKernel};
use lazygp_gp::likelihoods::GaussianLikelihood;
use lazygp_gp::mean_models::ConstantMean;
use lazygp_gp::metrics::{mean_squared_error, negative_log_predictive_density};
use lazygp_gp::variational::Inducings;
use lazygp_gp::VariationalGaussianProcess;
use linfa::prelude::*;
use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::{Normal, Uniform};
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;

fn target(x: &Array2<f64>) -> Array1<f64> {
    x.map_axis(Axis(1), |row| {
        (3. * row[0]).sin() + 0.5 * (5. * row[1]).cos()
    })
}

fn main() {
    let env = Env::new().filter_or("LAZYGP_LOG", "info");
    let mut builder = Builder::from_env(env);
    let builder = builder.target(env_logger::Target::Stdout);
    builder.try_init().ok();

    let mut rng = Xoshiro256Plus::seed_from_u64(42);
    let n = 2000;
    let x = Array2::random_using((n, 2), Uniform::new(0., 1.), &mut rng);
    let y = target(&x) + Array1::random_using(n, Normal::new(0., 0.1).unwrap(), &mut rng);
    let (train, test) = Dataset::new(x, y).split_with_ratio(0.8);

    let gp = VariationalGaussianProcess::<f64, _, _, _>::params(
        ConstantMean::default(),
        ScaleKernel::new(MaternKernel::with_ard(MaternNu::FiveHalves, 2)),
        GaussianLikelihood::default(),
    )
    .inducings(Inducings::Randomized(25))
    .batch_size(Some(200))
    .adam(0.05, 10)
    .seed(Some(42))
    .fit(&train)
    .expect("SVGP fitted");
    println!("{gp}");

    let (mean, var) = gp
        .predictive_mean_var(test.records())
        .expect("SVGP prediction");
    println!(
        "Test MSE: {:.4}  NLPD: {:.4}",
        mean_squared_error(test.targets(), &mean).expect("MSE"),
        negative_log_predictive_density(test.targets(), &mean, &var).expect("NLPD")
    );
}
