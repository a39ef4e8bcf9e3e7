//! Benchmarks for tree construction and batch maintenance.
//!
//! Run with: cargo bench -p dyntopo-pbvh

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use dyntopo_mesh::primitives::{quad_grid, subdivided_box};
use dyntopo_mesh::{DynMesh, FaceId};
use dyntopo_pbvh::Pbvh;
use glam::Vec3;

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    for n in [16usize, 48, 96] {
        let mesh = subdivided_box(n, 1.0);
        group.throughput(Throughput::Elements(mesh.face_count() as u64));
        group.bench_with_input(BenchmarkId::new("box", n), &mesh, |b, mesh| {
            b.iter(|| Pbvh::build_with_leaf_limit(black_box(mesh), 100));
        });
    }
    let grid = quad_grid(256, 256, 1.0);
    group.throughput(Throughput::Elements(grid.face_count() as u64));
    group.bench_function("grid_256", |b| {
        b.iter(|| Pbvh::build_with_leaf_limit(black_box(&grid), 100));
    });
    group.finish();
}

/// Remove a strip of faces and run maintenance on a fresh tree
fn delete_strip(mesh: &DynMesh, nx: usize) -> Option<bool> {
    let mut mesh = mesh.clone();
    let mut pbvh = Pbvh::build_with_leaf_limit(&mesh, 64).ok()?;
    for x in 0..nx {
        let face = FaceId(x as u32);
        pbvh.remove_face(&mesh, face);
        mesh.remove_face(face);
    }
    Some(pbvh.after_edit_batch(&mesh, true))
}

fn bench_after_edit_batch(c: &mut Criterion) {
    let mesh = quad_grid(128, 128, 1.0);
    c.bench_function("after_edit_batch/delete_strip", |b| {
        b.iter(|| delete_strip(black_box(&mesh), 128));
    });
}

fn bench_queries(c: &mut Criterion) {
    let mut mesh = subdivided_box(64, 1.0);
    let Ok(mut pbvh) = Pbvh::build_with_leaf_limit(&mesh, 100) else {
        return;
    };
    c.bench_function("raycast/box_64", |b| {
        b.iter(|| pbvh.raycast(&mesh, black_box(Vec3::new(0.1, 0.2, 5.0)), Vec3::NEG_Z));
    });
    c.bench_function("update_normals/box_64", |b| {
        b.iter(|| {
            let leaves = pbvh.leaf_indices();
            pbvh.update_leaf_normals(&mut mesh, &leaves);
        });
    });
}

criterion_group!(benches, bench_build, bench_after_edit_batch, bench_queries);
criterion_main!(benches);
