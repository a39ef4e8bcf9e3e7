//! Procedural meshes used by tests and benchmarks.

use glam::{Vec2, Vec3};

use super::types::{FaceAttributes, VertexId};
use super::DynMesh;

/// Vertex index of grid point `(x, y)` in a grid `nx` cells wide
#[inline]
pub fn grid_vertex(nx: usize, x: usize, y: usize) -> VertexId {
    VertexId((y * (nx + 1) + x) as u32)
}

fn grid_vertices(mesh: &mut DynMesh, nx: usize, ny: usize, cell_size: f32) {
    for y in 0..=ny {
        for x in 0..=nx {
            mesh.add_vertex(
                Vec3::new(x as f32 * cell_size, y as f32 * cell_size, 0.0),
                Vec3::Z,
            );
        }
    }
}

fn grid_uv(nx: usize, ny: usize, x: usize, y: usize) -> Vec2 {
    Vec2::new(x as f32 / nx.max(1) as f32, y as f32 / ny.max(1) as f32)
}

/// A flat `nx` x `ny` grid of quads in the XY plane, facing +Z.
///
/// Face `y * nx + x` covers cell `(x, y)`; every corner carries a UV.
pub fn quad_grid(nx: usize, ny: usize, cell_size: f32) -> DynMesh {
    let mut mesh = DynMesh::new();
    grid_vertices(&mut mesh, nx, ny, cell_size);

    for y in 0..ny {
        for x in 0..nx {
            let corners = [(x, y), (x + 1, y), (x + 1, y + 1), (x, y + 1)];
            let verts: Vec<VertexId> = corners
                .iter()
                .map(|&(cx, cy)| grid_vertex(nx, cx, cy))
                .collect();
            let uvs = corners
                .iter()
                .map(|&(cx, cy)| grid_uv(nx, ny, cx, cy))
                .collect();
            mesh.add_face(
                &verts,
                FaceAttributes {
                    uvs: Some(uvs),
                    ..Default::default()
                },
            )
            .expect("grid corners are valid");
        }
    }

    mesh.store_original_positions();
    mesh
}

/// A flat grid with each cell split into two triangles.
pub fn triangle_grid(nx: usize, ny: usize, cell_size: f32) -> DynMesh {
    let mut mesh = DynMesh::new();
    grid_vertices(&mut mesh, nx, ny, cell_size);

    for y in 0..ny {
        for x in 0..nx {
            let v00 = grid_vertex(nx, x, y);
            let v10 = grid_vertex(nx, x + 1, y);
            let v11 = grid_vertex(nx, x + 1, y + 1);
            let v01 = grid_vertex(nx, x, y + 1);
            for tri in [[v00, v10, v11], [v00, v11, v01]] {
                mesh.add_face(&tri, FaceAttributes::default())
                    .expect("grid corners are valid");
            }
        }
    }

    mesh.store_original_positions();
    mesh
}

/// A closed axis-aligned box of `2 * n * n * 6` triangles centered on the origin.
pub fn subdivided_box(n: usize, half_extent: f32) -> DynMesh {
    let n = n.max(1);
    let mut positions: Vec<Vec3> = Vec::new();
    let mut index_of = std::collections::HashMap::<[i64; 3], u32>::new();
    let mut indices: Vec<u32> = Vec::new();

    // (normal axis, sign) for each side
    let sides: [(usize, f32); 6] = [
        (0, 1.0),
        (0, -1.0),
        (1, 1.0),
        (1, -1.0),
        (2, 1.0),
        (2, -1.0),
    ];

    let mut point = |axis: usize, sign: f32, i: usize, j: usize| -> u32 {
        let u = (i as f32 / n as f32) * 2.0 - 1.0;
        let v = (j as f32 / n as f32) * 2.0 - 1.0;
        let mut p = [0.0f32; 3];
        p[axis] = sign;
        p[(axis + 1) % 3] = u;
        p[(axis + 2) % 3] = v;
        let key = [
            (p[0] * 1_000_000.0) as i64,
            (p[1] * 1_000_000.0) as i64,
            (p[2] * 1_000_000.0) as i64,
        ];
        *index_of.entry(key).or_insert_with(|| {
            positions.push(Vec3::from_array(p) * half_extent);
            (positions.len() - 1) as u32
        })
    };

    for (axis, sign) in sides {
        for j in 0..n {
            for i in 0..n {
                let a = point(axis, sign, i, j);
                let b = point(axis, sign, i + 1, j);
                let c = point(axis, sign, i + 1, j + 1);
                let d = point(axis, sign, i, j + 1);
                if sign > 0.0 {
                    indices.extend_from_slice(&[a, b, c, a, c, d]);
                } else {
                    indices.extend_from_slice(&[a, c, b, a, d, c]);
                }
            }
        }
    }

    DynMesh::from_triangles(&positions, &indices).expect("box indices are valid")
}
