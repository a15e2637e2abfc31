use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use geowatch::{Coordinate, GeoWatch, geohash, ranges_for_circle};

fn benchmark_geohash_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("geohash_codec");

    let coord = Coordinate::new(40.7128, -74.0060).unwrap();
    for precision in [6, 10, 22] {
        group.bench_with_input(
            BenchmarkId::new("encode", precision),
            &precision,
            |b, &precision| b.iter(|| geohash::encode(black_box(&coord), precision).unwrap()),
        );
    }

    let hash = geohash::encode(&coord, 10).unwrap();
    group.bench_function("decode_10", |b| {
        b.iter(|| geohash::decode(black_box(&hash)).unwrap())
    });

    group.finish();
}

fn benchmark_range_decomposition(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_decomposition");

    let city = Coordinate::new(40.7128, -74.0060).unwrap();
    for radius_km in [0.5, 5.0, 100.0, 8_587.0] {
        group.bench_with_input(
            BenchmarkId::new("ranges_for_circle", radius_km),
            &radius_km,
            |b, &radius_km| b.iter(|| ranges_for_circle(black_box(&city), radius_km, 10)),
        );
    }

    // High latitude stresses the precision-lowering path.
    let arctic = Coordinate::new(82.0, 10.0).unwrap();
    group.bench_function("ranges_for_circle_high_latitude", |b| {
        b.iter(|| ranges_for_circle(black_box(&arctic), 50.0, 10))
    });

    group.finish();
}

fn benchmark_query_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_scan");

    let watch = GeoWatch::memory();
    for i in 0..10_000 {
        let lat = ((i % 100) as f64) * 0.001;
        let lng = ((i / 100) as f64) * 0.001;
        let coord = Coordinate::new(lat, lng).unwrap();
        watch.set_location(&format!("key:{i}"), &coord).unwrap();
    }

    let center = Coordinate::new(0.05, 0.05).unwrap();
    group.bench_function("initial_scan_10k_docs", |b| {
        b.iter(|| {
            let query = watch.query(black_box(&center), 2.0).unwrap();
            query.members().len()
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_geohash_codec,
    benchmark_range_decomposition,
    benchmark_query_scan
);
criterion_main!(benches);
