//! Binary classification where inducing values live on a KISS-GP grid and
//! predictions interpolate them.
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

    // labels in {-1, 1}
    let xt = Array::linspace(0., 1., 26).insert_axis(Axis(1));
    let yt = xt.column(0).mapv(|v| (4. * PI * v).cos().signum());

    let gp = VariationalGaussianProcess::<f64, _, _, _>::params(
        ConstantMean::default(),
        ScaleKernel::new(RbfKernel::new()),
        BernoulliLikelihood::default(),
    )
    .inducings(Inducings::Grid {
        size: 32,
        bounds: Some((0., 1.)),
    })
    .adam(0.1, 50)
    .seed(Some(42))
    .fit(&Dataset::new(xt.clone(), yt.clone()))
    .expect("KISS-GP classifier fitted");
    println!("{gp}");

    let proba = gp.predict_proba(&xt).expect("class probabilities");
    let errors = Zip::from(&proba)
        .and(&yt)
        .fold(0, |acc, p, y| if (*p >= 0.5) != (*y > 0.) { acc + 1 } else { acc });
    println!("Training errors: {errors}/{}", yt.len());
}
