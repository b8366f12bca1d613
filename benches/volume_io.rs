//! Criterion benchmarks for medvol decoding.
//!
//! Run with: cargo bench --bench volume_io
//!
//! Tracks:
//! - load() for plain and gzipped NIfTI in both byte orders
//! - NRRD int32 to float64 widening
//! - endian swapping on its own
//! - histogram intensity estimation
//! - RAS reordering and F-order materialization

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use flate2::write::GzEncoder;
use flate2::Compression;
use medvol::{voxels, CollectingSink, VolumeLoader};
use std::io::Write;

/// Float32 NIfTI-1 with a diagonal sform. `flip_x` mirrors the x axis.
fn nifti_bytes<E: ByteOrder>(shape: [usize; 3], flip_x: bool) -> Vec<u8> {
    let numel: usize = shape.iter().product();
    let mut bytes = vec![0u8; 352 + numel * 4];
    E::write_i32(&mut bytes[0..4], 348);
    E::write_i16(&mut bytes[40..42], 3);
    for (i, d) in shape.iter().enumerate() {
        E::write_i16(&mut bytes[42 + i * 2..44 + i * 2], *d as i16);
    }
    E::write_i16(&mut bytes[70..72], 16);
    E::write_i16(&mut bytes[72..74], 32);
    for i in 0..4 {
        E::write_f32(&mut bytes[76 + i * 4..80 + i * 4], 1.0);
    }
    E::write_f32(&mut bytes[108..112], 352.0);
    E::write_f32(&mut bytes[112..116], 1.0);
    E::write_i16(&mut bytes[254..256], 1);
    E::write_f32(&mut bytes[280..284], if flip_x { -1.0 } else { 1.0 });
    E::write_f32(&mut bytes[300..304], 1.0);
    E::write_f32(&mut bytes[320..324], 1.0);
    bytes[344..348].copy_from_slice(b"n+1\0");
    for i in 0..numel {
        E::write_f32(&mut bytes[352 + i * 4..356 + i * 4], (i % 256) as f32);
    }
    bytes
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

const SHAPES: &[[usize; 3]] = &[[64, 64, 64], [128, 128, 64], [197, 233, 189]];

fn label(shape: &[usize; 3]) -> String {
    let mb = shape.iter().product::<usize>() * 4 / (1024 * 1024);
    format!("{}x{}x{} ({} MB)", shape[0], shape[1], shape[2], mb)
}

fn bench_load_nifti(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_nifti");
    group.sample_size(20);
    let sink = CollectingSink::new();
    let loader = VolumeLoader::new().diagnostics(&sink);

    for shape in SHAPES {
        let le = nifti_bytes::<LittleEndian>(*shape, false);
        let be = nifti_bytes::<BigEndian>(*shape, false);
        let gz = gzip(&le);
        let label = label(shape);
        group.throughput(Throughput::Bytes((le.len() - 352) as u64));

        group.bench_with_input(BenchmarkId::new("little_endian", &label), &le, |b, bytes| {
            b.iter(|| black_box(loader.load("bench.nii", black_box(bytes), None).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("big_endian", &label), &be, |b, bytes| {
            b.iter(|| black_box(loader.load("bench.nii", black_box(bytes), None).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("gzip", &label), &gz, |b, bytes| {
            b.iter(|| black_box(loader.load("bench.nii.gz", black_box(bytes), None).unwrap()))
        });
        sink.take();
    }
    group.finish();
}

fn bench_nrrd_widening(c: &mut Criterion) {
    let mut group = c.benchmark_group("nrrd_int_to_f64");
    let loader = VolumeLoader::new();

    for &n in &[32usize, 64, 128] {
        let mut bytes = format!(
            "NRRD0004\ntype: int\ndimension: 3\nsizes: {n} {n} {n}\nencoding: raw\nendian: little\n\n"
        )
        .into_bytes();
        bytes.extend((0..(n * n * n) as i32).flat_map(|v| (v % 1000).to_le_bytes()));
        group.throughput(Throughput::Elements((n * n * n) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &bytes, |b, bytes| {
            b.iter(|| black_box(loader.load("bench.nrrd", black_box(bytes), None).unwrap()))
        });
    }
    group.finish();
}

fn bench_swap(c: &mut Criterion) {
    let mut group = c.benchmark_group("endian_swap");
    let len = 16 * 1024 * 1024;
    let mut buf: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    group.throughput(Throughput::Bytes(len as u64));
    group.bench_function("swap16", |b| b.iter(|| voxels::swap16(black_box(&mut buf))));
    group.bench_function("swap32", |b| b.iter(|| voxels::swap32(black_box(&mut buf))));
    group.bench_function("swap64", |b| b.iter(|| voxels::swap64(black_box(&mut buf))));
    group.finish();
}

fn bench_views(c: &mut Criterion) {
    let mut group = c.benchmark_group("views");
    let shape = [128, 128, 64];
    let bytes = nifti_bytes::<LittleEndian>(shape, true);
    let mut img = VolumeLoader::new().load("bench.nii", &bytes, None).unwrap();
    let label = label(&shape);
    let sink = CollectingSink::new();

    group.bench_function(BenchmarkId::new("intensity_histogram", &label), |b| {
        b.iter(|| img.recalculate_intensity_range(black_box(&sink)))
    });

    group.bench_function(BenchmarkId::new("ras_voxels", &label), |b| {
        b.iter(|| black_box(img.ras_voxels().unwrap()))
    });
    group.bench_function(BenchmarkId::new("to_f32", &label), |b| {
        b.iter(|| black_box(img.to_f32().unwrap()))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_load_nifti,
    bench_nrrd_widening,
    bench_swap,
    bench_views
);
criterion_main!(benches);
