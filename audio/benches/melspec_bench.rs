use criterion::{black_box, criterion_group, criterion_main, Criterion};
use birdnet_audio::{new_kernel, Backend, FrameBatch, MelSpecConfig, SpectralExtractor};

fn test_window(n: usize) -> Vec<f32> {
    let mut state = 0x2545_F491_4F6C_DD1Du64;
    (0..n)
        .map(|i| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let noise = ((state >> 33) as f32) / (u32::MAX as f32) - 0.25;
            let tone = (2.0 * std::f32::consts::PI * 4_000.0 * i as f32 / 48_000.0).sin();
            0.5 * tone + 0.1 * noise
        })
        .collect()
}

fn bench_kernel_transform(c: &mut Criterion) {
    let window = test_window(144_000);
    let batch = FrameBatch::new(&window, 2048, 278).unwrap();

    for backend in [Backend::Cpu, Backend::Parallel] {
        let kernel = new_kernel(backend, 2048, None).unwrap();
        c.bench_function(&format!("kernel_transform_{backend}"), |b| {
            b.iter(|| {
                let spectrum = kernel.transform(black_box(&batch)).unwrap();
                black_box(spectrum.batch());
            });
        });
    }
}

fn bench_melspec_extract(c: &mut Criterion) {
    let window = test_window(144_000);

    for backend in [Backend::Cpu, Backend::Parallel] {
        let extractor = SpectralExtractor::new(MelSpecConfig::default(), backend, None).unwrap();
        c.bench_function(&format!("melspec_extract_{backend}"), |b| {
            b.iter(|| {
                let spec = extractor.extract(black_box(&window)).unwrap();
                black_box(spec.as_slice().len());
            });
        });
    }
}

criterion_group!(benches, bench_kernel_transform, bench_melspec_extract);
criterion_main!(benches);
