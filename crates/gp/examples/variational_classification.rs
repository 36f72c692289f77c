//! Binary classification with a variational GP and a probit likelihood,
//! inducing points start at the training inputs and are learnt.
use env_logger::{Builder, Env};
use lazygp_gp::kernels::{RbfKernel, ScaleKernel};
use lazygp_gp::likelihoods::BernoulliLikelihood;
use lazygp_gp::mean_models::ConstantMean;
use lazygp_gp::variational::Inducings;
use lazygp_gp::VariationalGaussianProcess;
use linfa::prelude::*;
use ndarray::{Array, Axis, Zip};

const PI: f64 = std::f64::consts::PI;

fn main() {
    let env = Env::new().filter_or("LAZYGP_LOG", "info");
    let mut builder = Builder::from_env(env);
    let builder = builder.target(env_logger::Target::Stdout);
    builder.try_init().ok();

    let xt = Array::linspace(0., 1., 10).insert_axis(Axis(1));
    let yt = xt
        .column(0)
        .mapv(|v| if (4. * PI * v).cos() >= 0. { 1. } else { 0. });

    let gp = VariationalGaussianProcess::<f64, _, _, _>::params(
        ConstantMean::default(),
        ScaleKernel::new(RbfKernel::new()),
        BernoulliLikelihood::default(),
    )
    .inducings(Inducings::Located(xt.to_owned()))
    .adam(0.1, 50)
    .seed(Some(42))
    .fit(&Dataset::new(xt, yt))
    .expect("variational GP fitted");
    println!("{gp}");

    let xtest = Array::linspace(0., 1., 21).insert_axis(Axis(1));
    let proba = gp.predict_proba(&xtest).expect("class probabilities");
    println!("{:>6} {:>8} {:>6}", "x", "p(y=1)", "class");
    Zip::from(xtest.column(0))
        .and(&proba)
        .for_each(|x, p| println!("{x:>6.2} {p:>8.3} {:>6}", u8::from(*p >= 0.5)));
}
