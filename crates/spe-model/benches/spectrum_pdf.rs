//! Criterion benchmarks for spectrum density evaluation.
//!
//! Measures one full evaluation (all peaks up to truncation) per density over a
//! grid the size of a fine fit-curve, for low and high illumination.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use spe_core::Model;
use spe_model::{SpectrumKind, SpectrumPdf};

fn bench_densities(c: &mut Criterion) {
    let x: Vec<f64> = (0..2000).map(|i| -2.0 + 10.0 * i as f64 / 1999.0).collect();
    let mut out = vec![0.0; x.len()];

    let mut group = c.benchmark_group("spectrum_pdf");
    for kind in SpectrumKind::ALL {
        for lambda in [0.7, 3.0] {
            let mut pdf = SpectrumPdf::from_kind(kind, 1).unwrap();
            pdf.update_initial([("lambda", lambda)]).unwrap();
            let params = pdf.parameter_init();
            group.bench_with_input(
                BenchmarkId::new(kind.name(), format!("lambda={lambda}")),
                &params,
                |b, params| {
                    b.iter(|| {
                        pdf.evaluate_into(&x, params, 0, &mut out).unwrap();
                        black_box(out[1000])
                    })
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_densities);
criterion_main!(benches);
