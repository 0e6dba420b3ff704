//! Benchmarks for Tracebin build and query paths
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::path::Path;
use tempfile::tempdir;
use tracebin::query::{bin_width, BinAccumulator};
use tracebin::{Config, IndexMode, IndexReader, IndexWriter, RangeQuery, SplittingRule};

fn bench_config(dir: &Path, mode: IndexMode, rule: SplittingRule) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.to_string_lossy().to_string();
    config.storage.capacity_bytes = 1 << 30;
    config.index.mode = mode;
    config.index.splitting_rule = rule;
    config
}

fn fill(writer: &mut IndexWriter, tracks: usize, per_track: usize) {
    for track in 0..tracks {
        let name = format!("rank{}", track);
        let mut t = 0.0;
        for i in 0..per_track {
            let length = 1.0 + ((i * 31 + track * 7) % 97) as f64;
            let primitive = if i % 4 == 0 { "mpi_wait" } else { "compute" };
            writer.insert(&name, t, t + length, primitive, &format!("{}-{}", track, i));
            t += length + ((i * 13) % 29) as f64;
        }
    }
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    group.sample_size(10);

    for rule in [
        SplittingRule::Fair,
        SplittingRule::Midpoint,
        SplittingRule::MaxDistance,
    ] {
        group.throughput(Throughput::Elements(8 * 2_000));
        group.bench_function(format!("per_track_{}", rule), |b| {
            b.iter(|| {
                let dir = tempdir().unwrap();
                let config = bench_config(dir.path(), IndexMode::PerTrack, rule);
                let mut writer = IndexWriter::new(&config);
                fill(&mut writer, 8, 2_000);
                writer.build().unwrap()
            })
        });
    }

    group.bench_function("two_dimensional_fair", |b| {
        b.iter(|| {
            let dir = tempdir().unwrap();
            let config = bench_config(dir.path(), IndexMode::TwoDimensional, SplittingRule::Fair);
            let mut writer = IndexWriter::new(&config);
            fill(&mut writer, 8, 2_000);
            writer.build().unwrap()
        })
    });

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");

    let dir = tempdir().unwrap();
    let config = bench_config(dir.path(), IndexMode::PerTrack, SplittingRule::Fair);
    let mut writer = IndexWriter::new(&config);
    fill(&mut writer, 16, 10_000);
    writer.build().unwrap();
    let reader = IndexReader::open(&config).unwrap();

    group.bench_function("overview_1000_bins", |b| {
        let query = RangeQuery::new(0.0, 1_000_000.0, 1000);
        b.iter(|| reader.range_query(black_box(&query)).unwrap())
    });

    group.bench_function("pan_warm", |b| {
        let mut offset = 0.0;
        b.iter(|| {
            offset = (offset + 500.0) % 500_000.0;
            let query = RangeQuery::new(100_000.0 + offset, 110_000.0 + offset, 500);
            reader.range_query(black_box(&query)).unwrap()
        })
    });

    group.bench_function("zoom_cold", |b| {
        let query = RangeQuery::new(250_000.0, 251_000.0, 500);
        b.iter(|| {
            reader.clear_cache();
            reader.range_query(black_box(&query)).unwrap()
        })
    });

    group.bench_function("filtered_overview", |b| {
        let query = RangeQuery::new(0.0, 1_000_000.0, 1000).with_filter("primitive", "mpi_wait");
        b.iter(|| reader.range_query(black_box(&query)).unwrap())
    });

    group.bench_function("nearest_event", |b| {
        b.iter(|| reader.nearest_event(black_box(123_456.0), "rank3"))
    });

    group.finish();
}

fn bench_bins(c: &mut Criterion) {
    let mut group = c.benchmark_group("bins");
    group.throughput(Throughput::Elements(10_000));

    group.bench_function("accumulate_10000_segments", |b| {
        let width = bin_width(0.0, 100_000.0, 1000);
        b.iter(|| {
            let mut acc = BinAccumulator::new(0.0, 100_000.0, 1000);
            for i in 0..10_000 {
                let start = i as f64 * 10.0 + 0.25 * width;
                acc.add(start, start + 7.0);
            }
            acc.finish()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_build, bench_query, bench_bins);
criterion_main!(benches);
