use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ifusim::spectral::{
    convolve_cube, EdgeMode, LogWavelengthGrid, RegridStrategy, Regridder, SpectrumOrField,
};
use ndarray::{Array1, Array3};

const NL: usize = 4563;

fn make_cube(rows: usize, cols: usize) -> (SpectrumOrField, Array3<f64>, Array3<f64>) {
    // Source grid shifted by a third of a pixel from the target
    let logl = Array3::from_shape_fn((NL, rows, cols), |(l, i, j)| {
        3.5589 + (l as f64 + 0.33 + 0.01 * (i + j) as f64) * 1.0e-4
    });
    let flux = Array3::from_shape_fn((NL, rows, cols), |(l, _, _)| {
        1.0 + 0.1 * (l as f64 / 40.0).sin()
    });
    let ivar = Array3::ones((NL, rows, cols));
    (SpectrumOrField::Field(logl), flux, ivar)
}

fn bench_regrid(c: &mut Criterion) {
    let grid = LogWavelengthGrid::new(3.5589, 1.0e-4, NL).expect("valid grid");
    let (logl, flux, ivar) = make_cube(16, 16);

    let mut group = c.benchmark_group("regrid");
    group.sample_size(20);
    for strategy in [RegridStrategy::Nearest, RegridStrategy::InverseDistanceWeighted] {
        let regridder = Regridder::new(grid.clone(), strategy);
        group.bench_function(format!("{strategy}_16x16"), |b| {
            b.iter(|| {
                regridder
                    .regrid(black_box(&logl), black_box(flux.view()), black_box(ivar.view()))
                    .expect("regrid")
            })
        });
    }
    group.finish();
}

fn bench_convolve(c: &mut Criterion) {
    let (_, flux, _) = make_cube(16, 16);
    let widths = SpectrumOrField::Uniform(Array1::from_shape_fn(NL, |l| {
        1.0 + l as f64 / NL as f64
    }));

    let mut group = c.benchmark_group("convolve");
    group.sample_size(20);
    group.bench_function("variable_width_16x16", |b| {
        b.iter(|| {
            convolve_cube(black_box(flux.view()), black_box(&widths), EdgeMode::Zero)
                .expect("convolve")
        })
    });
    group.finish();
}

criterion_group!(benches, bench_regrid, bench_convolve);
criterion_main!(benches);
