//! Vertex and face normal recomputation for edited leaves.
//!
//! Phase one runs one task per leaf: it recomputes the leaf's face normals
//! and accumulates every unique vertex whose incident faces all belong to
//! the leaf. Such vertices are touched by exactly one task, so no
//! synchronization is needed. Everything else is returned as a border
//! vertex and accumulated afterwards on the calling thread.

use std::collections::HashMap;

use dyntopo_mesh::{DynMesh, FaceId, VertexId};
use glam::Vec3;
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::node::{NodeFlags, NodeIndex};
use crate::spin::SpinVec3;
use crate::tree::Pbvh;

/// Phase-one output of one leaf
#[derive(Default)]
struct LeafNormals {
    faces: Vec<(FaceId, Vec3)>,
    interior: Vec<(VertexId, Vec3)>,
    border: Vec<VertexId>,
}

/// Unit normal from an accumulated sum.
///
/// Degenerate sums fall back to the direction of the vertex position, then
/// to the previous normal.
fn finish_normal(sum: Vec3, position: Vec3, previous: Vec3) -> Vec3 {
    sum.try_normalize()
        .or_else(|| position.try_normalize())
        .unwrap_or(previous)
}

/// Sum of incident face normals in disk order
fn accumulate(mesh: &DynMesh, vertex: VertexId) -> Vec3 {
    mesh.vertex_faces(vertex)
        .iter()
        .fold(Vec3::ZERO, |sum, &f| sum + mesh.compute_face_normal(f))
}

impl Pbvh {
    /// Recompute normals of every leaf flagged `UPDATE_NORMALS`.
    ///
    /// Returns the number of leaves processed.
    pub fn update_normals(&mut self, mesh: &mut DynMesh) -> usize {
        let leaves: Vec<NodeIndex> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| {
                n.is_leaf()
                    && n.flags.contains(NodeFlags::UPDATE_NORMALS)
                    && !n.flags.contains(NodeFlags::DELETE)
            })
            .map(|(i, _)| NodeIndex(i as u32))
            .collect();
        if leaves.is_empty() {
            return 0;
        }
        self.update_leaf_normals(mesh, &leaves);
        leaves.len()
    }

    /// Recompute face and vertex normals for the given leaves
    pub fn update_leaf_normals(&mut self, mesh: &mut DynMesh, leaves: &[NodeIndex]) {
        let tree = &*self;
        let shared = &*mesh;
        let results: Vec<LeafNormals> = leaves
            .par_iter()
            .map(|&leaf| tree.leaf_normals(shared, leaf))
            .collect();

        let mut border: Vec<VertexId> = Vec::new();
        let mut interior = 0usize;
        for result in results {
            for (f, normal) in result.faces {
                mesh.set_face_normal(f, normal);
            }
            for (v, sum) in result.interior {
                let vertex = mesh.vertex(v).map(|v| (v.position, v.normal));
                if let Some((position, previous)) = vertex {
                    mesh.set_vertex_normal(v, finish_normal(sum, position, previous));
                    interior += 1;
                }
            }
            border.extend(result.border);
        }

        border.sort_unstable();
        border.dedup();
        for &v in &border {
            let Some((position, previous)) = mesh.vertex(v).map(|v| (v.position, v.normal)) else {
                continue;
            };
            let sum = accumulate(mesh, v);
            mesh.set_vertex_normal(v, finish_normal(sum, position, previous));
        }

        for &leaf in leaves {
            if let Some(node) = self.nodes.get_mut(leaf.index()) {
                node.flags.remove(NodeFlags::UPDATE_NORMALS);
            }
        }
        debug!(
            "update_normals: {} leaves, {} interior and {} border vertices",
            leaves.len(),
            interior,
            border.len()
        );
    }

    /// Phase one for a single leaf; reads only
    fn leaf_normals(&self, mesh: &DynMesh, leaf: NodeIndex) -> LeafNormals {
        let Some(data) = self.leaf(leaf) else {
            return LeafNormals::default();
        };
        let mut out = LeafNormals {
            faces: data
                .sorted_faces()
                .into_iter()
                .map(|f| (f, mesh.compute_face_normal(f)))
                .collect(),
            ..Default::default()
        };

        for v in data.sorted_unique_vertices() {
            let faces = mesh.vertex_faces(v);
            if faces.is_empty() {
                // Loose vertices keep their normal
                continue;
            }
            if faces.iter().all(|&f| self.owners.face(f) == Some(leaf)) {
                let sum = faces
                    .iter()
                    .fold(Vec3::ZERO, |sum, &f| sum + mesh.compute_face_normal(f));
                out.interior.push((v, sum));
            } else {
                out.border.push(v);
            }
        }
        // Shared vertices may belong to a leaf that is not being updated
        let mut other: Vec<VertexId> = data.other_vertices.iter().copied().collect();
        other.sort_unstable();
        out.border.extend(other);

        trace!(
            "leaf_normals: {:?} {} faces, {} interior, {} border",
            leaf,
            out.faces.len(),
            out.interior.len(),
            out.border.len()
        );
        out
    }

    /// Recompute vertex normals with unordered concurrent accumulation.
    ///
    /// Every face around a vertex of `leaves` adds its normal through a
    /// [`SpinVec3`]. Summation order varies between runs, so results may
    /// differ in the last bits from [`Pbvh::update_leaf_normals`].
    pub fn accumulate_normals_unordered(&mut self, mesh: &mut DynMesh, leaves: &[NodeIndex]) {
        let mut vertices: Vec<VertexId> = leaves
            .iter()
            .filter_map(|&l| self.leaf(l))
            .flat_map(|l| l.unique_vertices.iter().chain(l.other_vertices.iter()).copied())
            .collect();
        vertices.sort_unstable();
        vertices.dedup();
        vertices.retain(|&v| mesh.vertex_face_count(v) > 0);

        let slots: HashMap<VertexId, usize> =
            vertices.iter().enumerate().map(|(i, &v)| (v, i)).collect();
        let sums: Vec<SpinVec3> = vertices.iter().map(|_| SpinVec3::default()).collect();

        let mut faces: Vec<FaceId> = vertices
            .iter()
            .flat_map(|&v| mesh.vertex_faces(v))
            .collect();
        faces.sort_unstable();
        faces.dedup();

        let shared = &*mesh;
        faces.par_iter().for_each(|&f| {
            let normal = shared.compute_face_normal(f);
            for v in shared.face_vertices(f) {
                if let Some(&slot) = slots.get(v) {
                    sums[slot].add(normal);
                }
            }
        });

        for (v, sum) in vertices.into_iter().zip(sums) {
            let Some((position, previous)) = mesh.vertex(v).map(|v| (v.position, v.normal)) else {
                continue;
            };
            mesh.set_vertex_normal(v, finish_normal(sum.into_inner(), position, previous));
        }
        for &leaf in leaves {
            if let Some(node) = self.nodes.get_mut(leaf.index()) {
                node.flags.remove(NodeFlags::UPDATE_NORMALS);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::grid_tree;
    use dyntopo_mesh::primitives::{grid_vertex, subdivided_box};

    fn vertex_normals(mesh: &DynMesh) -> Vec<(VertexId, [u32; 3])> {
        mesh.vertices()
            .map(|v| (v.id, v.normal.to_array().map(f32::to_bits)))
            .collect()
    }

    fn bump_center(mesh: &mut DynMesh) {
        let v = grid_vertex(6, 3, 3);
        mesh.set_vertex_position(v, Vec3::new(3.0, 3.0, 1.0));
    }

    #[test]
    fn test_flat_grid_normals_face_up() {
        let (mut mesh, mut pbvh) = grid_tree(6, 6, 4);
        for v in mesh.vertices().map(|v| v.id).collect::<Vec<_>>() {
            mesh.set_vertex_normal(v, Vec3::X);
        }
        let leaves = pbvh.leaf_indices().len();
        assert_eq!(pbvh.update_normals(&mut mesh), leaves);
        for v in mesh.vertices() {
            assert!((v.normal - Vec3::Z).length() < 1e-6, "{:?}", v.normal);
        }
        // Flags were consumed
        assert_eq!(pbvh.update_normals(&mut mesh), 0);
    }

    #[test]
    fn test_border_vertex_sees_every_face() {
        let (mut mesh, mut pbvh) = grid_tree(6, 6, 4);
        bump_center(&mut mesh);
        let center = grid_vertex(6, 3, 3);
        let owner = pbvh.vertex_owner(center).unwrap();

        // Only the owner is updated; the neighbors' faces still count
        pbvh.update_leaf_normals(&mut mesh, &[owner]);
        let normal = mesh.vertex(center).unwrap().normal;
        assert!((normal - Vec3::Z).length() < 1e-5, "{normal:?}");
    }

    #[test]
    fn test_normals_are_bit_identical_across_runs() {
        let mesh = subdivided_box(5, 1.0);
        let mut pbvh = crate::Pbvh::build_with_leaf_limit(&mesh, 12).unwrap();
        let leaves = pbvh.leaf_indices();

        let mut first = mesh.clone();
        pbvh.update_leaf_normals(&mut first, &leaves);
        let mut second = first.clone();
        pbvh.update_leaf_normals(&mut second, &leaves);
        assert_eq!(vertex_normals(&first), vertex_normals(&second));
    }

    #[test]
    fn test_box_corner_normals_point_outward() {
        let mut mesh = subdivided_box(4, 1.0);
        let mut pbvh = crate::Pbvh::build_with_leaf_limit(&mesh, 10).unwrap();
        pbvh.update_normals(&mut mesh);
        for v in mesh.vertices() {
            assert!(v.normal.dot(v.position) > 0.0);
            assert!((v.normal.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_unordered_matches_ordered() {
        let (mut ordered, mut pbvh) = grid_tree(6, 6, 4);
        bump_center(&mut ordered);
        let mut unordered = ordered.clone();
        let leaves = pbvh.leaf_indices();

        pbvh.update_leaf_normals(&mut ordered, &leaves);
        pbvh.accumulate_normals_unordered(&mut unordered, &leaves);
        for (a, b) in ordered.vertices().zip(unordered.vertices()) {
            assert!((a.normal - b.normal).length() < 1e-5);
        }
    }

    #[test]
    fn test_degenerate_sum_falls_back_to_position() {
        assert_eq!(
            finish_normal(Vec3::ZERO, Vec3::new(0.0, 2.0, 0.0), Vec3::X),
            Vec3::Y
        );
        assert_eq!(finish_normal(Vec3::ZERO, Vec3::ZERO, Vec3::X), Vec3::X);
    }
}
