use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use lazygp_tensor::{
    AddedDiagLazyTensor, DiagLazyTensor, InterpolatedLazyTensor, LazyTensor, LinalgSettings,
    NonLazyTensor, ToeplitzLazyTensor,
};
use ndarray::{Array1, Array2};
use std::sync::Arc;

fn rbf_column(m: usize) -> Array1<f64> {
    Array1::from_shape_fn(m, |i| (-0.5 * (i as f64 * 0.05).powi(2)).exp())
}

fn criterion_solves(c: &mut Criterion) {
    let mut group = c.benchmark_group("inv_quad_log_det");
    group.sample_size(10);
    for n in [200, 1000] {
        let dense = ToeplitzLazyTensor::new(rbf_column(n)).unwrap().evaluate();
        let cov = AddedDiagLazyTensor::new(
            Arc::new(NonLazyTensor::new(dense)),
            DiagLazyTensor::constant(n, 0.1),
        )
        .unwrap();
        let y = Array2::from_shape_fn((n, 1), |(i, _)| (i as f64 * 0.1).sin());
        let cholesky = LinalgSettings::default().with_max_cholesky_size(n);
        let iterative = LinalgSettings::default().with_max_cholesky_size(0);
        group.bench_with_input(BenchmarkId::new("cholesky", n), &n, |b, _| {
            b.iter(|| std::hint::black_box(cov.inv_quad_log_det(Some(&y.view()), &cholesky)))
        });
        group.bench_with_input(BenchmarkId::new("cg+slq", n), &n, |b, _| {
            b.iter(|| std::hint::black_box(cov.inv_quad_log_det(Some(&y.view()), &iterative)))
        });
    }
    group.finish();
}

fn criterion_interpolated(c: &mut Criterion) {
    let mut group = c.benchmark_group("interpolated_matmul");
    let m = 100;
    for n in [1000, 10000] {
        let base = ToeplitzLazyTensor::new(rbf_column(m)).unwrap();
        let indices = Array2::from_shape_fn((n, 4), |(i, a)| (i * (m - 4) / n + a).min(m - 1));
        let values = Array2::from_elem((n, 4), 0.25);
        let t = InterpolatedLazyTensor::new(Arc::new(base), indices, values).unwrap();
        let rhs = Array2::from_elem((n, 1), 1.);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| std::hint::black_box(t.matmul(&rhs.view())))
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_solves, criterion_interpolated);
criterion_main!(benches);
