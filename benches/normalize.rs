use std::hint::black_box;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use rand::prelude::*;
use signprep::dataset::{HOLDOUT_RATIO, SPLIT_SEED, stratified_split};
use signprep::detector::NUM_KEYPOINTS;
use signprep::landmark::normalize;

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("Landmark");
    let mut rng = rand::rng();
    let hands = (0..4096)
        .map(|_| std::array::from_fn::<_, NUM_KEYPOINTS, _>(|_| [rng.random(), rng.random(), rng.random()]))
        .collect::<Vec<[[f32; 3]; NUM_KEYPOINTS]>>();

    group.throughput(Throughput::Elements(hands.len() as u64));
    group.bench_function("normalize", |b| {
        b.iter(|| hands.iter().map(|kps| normalize(black_box(kps))[0]).sum::<f32>())
    });
    group.finish();
}

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("Split");
    // 29 个类别，与字母手语数据集相当
    let labels = (0..87_000).map(|i| format!("C{}", i % 29)).collect::<Vec<_>>();
    let indices = (0..labels.len()).collect::<Vec<_>>();

    group.throughput(Throughput::Elements(labels.len() as u64));
    group.bench_function("stratified_split", |b| {
        b.iter(|| stratified_split(&labels, black_box(&indices), HOLDOUT_RATIO, SPLIT_SEED))
    });
    group.finish();
}

criterion_group!(benches, bench_normalize, bench_split);
criterion_main!(benches);
