//! Benchmarks for feature extraction, similarity kernels and index search.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pictor_core::driver::{ColorDriver, FeatureDriver, IdfDriver};
use pictor_core::image::Image;
use pictor_core::index::{FlatIndex, IndexEntry};
use pictor_core::similarity::{cosine_similarity, histogram_intersection};
use pictor_core::RecordId;
use rand::Rng;

fn generate_random_image(width: usize, height: usize) -> Image {
    let mut rng = rand::thread_rng();
    let pixels = (0..width * height).map(|_| rng.gen::<[u8; 3]>()).collect();
    Image::from_pixels(width, height, pixels).unwrap()
}

fn generate_random_histogram(dim: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    let mut v: Vec<f32> = (0..dim).map(|_| rng.gen_range(0.0..1.0)).collect();
    pictor_core::similarity::l1_normalize(&mut v);
    v
}

fn bench_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract");
    let color = ColorDriver::default();
    let idf = IdfDriver::new();

    for side in [64, 256, 512].iter() {
        let image = generate_random_image(*side, *side);
        group.throughput(Throughput::Elements((*side * *side) as u64));
        group.bench_with_input(BenchmarkId::new("color", side), side, |bench, _| {
            bench.iter(|| color.extract(black_box(&image)))
        });
        group.bench_with_input(BenchmarkId::new("idf", side), side, |bench, _| {
            bench.iter(|| idf.extract(black_box(&image)))
        });
    }

    group.finish();
}

fn bench_kernels(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernels");

    for dim in [80, 128, 1024].iter() {
        let a = generate_random_histogram(*dim);
        let b = generate_random_histogram(*dim);

        group.throughput(Throughput::Elements(*dim as u64));
        group.bench_with_input(BenchmarkId::new("intersection", dim), dim, |bench, _| {
            bench.iter(|| histogram_intersection(black_box(&a), black_box(&b)))
        });
        group.bench_with_input(BenchmarkId::new("cosine", dim), dim, |bench, _| {
            bench.iter(|| cosine_similarity(black_box(&a), black_box(&b)))
        });
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("flat_search");
    let driver = ColorDriver::default();

    for num_records in [1000, 10000, 50000].iter() {
        let index = FlatIndex::new();
        for seq in 0..*num_records {
            let mut values = generate_random_histogram(64);
            values.extend(generate_random_histogram(16));
            let feature = pictor_core::FeatureVector::new(driver.tag(), values);
            index
                .insert(IndexEntry {
                    id: RecordId::generate(),
                    seq: seq as u64,
                    feature,
                })
                .unwrap();
        }

        let query = driver.extract(&generate_random_image(32, 32)).unwrap();

        group.throughput(Throughput::Elements(*num_records as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(num_records),
            num_records,
            |bench, _| {
                bench.iter(|| index.search(black_box(&query), 10, |a, b| driver.similarity(a, b)))
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_extract, bench_kernels, bench_search);
criterion_main!(benches);
