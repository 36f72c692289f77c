use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use lazygp_gp::kernels::{GridInterpolationKernel, RbfKernel, ScaleKernel};
use lazygp_gp::likelihoods::BernoulliLikelihood;
use lazygp_gp::mean_models::ConstantMean;
use lazygp_gp::variational::Inducings;
use lazygp_gp::{ExactGaussianProcess, VariationalGaussianProcess};
use lazygp_tensor::LinalgSettings;
use linfa::prelude::{Dataset, Fit};
use ndarray::{Array, Array1, Array2, Axis};

fn sine_data(n: usize) -> (Array2<f64>, Array1<f64>) {
    let xt = Array::linspace(0., 1., n).insert_axis(Axis(1));
    let yt = xt
        .column(0)
        .mapv(|v| (4. * std::f64::consts::PI * v).sin() + 0.1 * (37. * v).cos());
    (xt, yt)
}

fn criterion_exact_gp(c: &mut Criterion) {
    let mut group = c.benchmark_group("exact gp");
    group.sample_size(10);
    for n in [100, 400] {
        let (xt, yt) = sine_data(n);
        let dataset = Dataset::new(xt, yt);
        group.bench_with_input(BenchmarkId::new("rbf", n), &n, |b, _| {
            b.iter(|| {
                std::hint::black_box(
                    ExactGaussianProcess::<f64, _, _>::params(
                        ConstantMean::default(),
                        ScaleKernel::new(RbfKernel::new()),
                    )
                    .adam(0.1, 10)
                    .fit(&dataset)
                    .expect("GP fit error"),
                )
            });
        });
    }
    for n in [1000, 4000] {
        let (xt, yt) = sine_data(n);
        let dataset = Dataset::new(xt, yt);
        group.bench_with_input(BenchmarkId::new("kiss-gp", n), &n, |b, _| {
            b.iter(|| {
                let kernel = GridInterpolationKernel::new(ScaleKernel::new(RbfKernel::new()), 200)
                    .expect("grid kernel");
                std::hint::black_box(
                    ExactGaussianProcess::<f64, _, _>::params(ConstantMean::default(), kernel)
                        .adam(0.1, 10)
                        .settings(LinalgSettings::default().with_max_cholesky_size(0))
                        .fit(&dataset)
                        .expect("KISS-GP fit error"),
                )
            });
        });
    }
    group.finish();
}

fn criterion_variational_gp(c: &mut Criterion) {
    let mut group = c.benchmark_group("variational gp");
    group.sample_size(10);
    let (xt, yt) = sine_data(200);
    let labels = yt.mapv(|v| if v > 0. { 1. } else { 0. });
    let dataset = Dataset::new(xt, labels);
    for n_inducing in [10, 20] {
        group.bench_with_input(
            BenchmarkId::new("bernoulli", n_inducing),
            &n_inducing,
            |b, &m| {
                b.iter(|| {
                    std::hint::black_box(
                        VariationalGaussianProcess::<f64, _, _, _>::params(
                            ConstantMean::default(),
                            ScaleKernel::new(RbfKernel::new()),
                            BernoulliLikelihood::default(),
                        )
                        .inducings(Inducings::Randomized(m))
                        .adam(0.1, 5)
                        .seed(Some(42))
                        .fit(&dataset)
                        .expect("VGP fit error"),
                    )
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, criterion_exact_gp, criterion_variational_gp);
criterion_main!(benches);
