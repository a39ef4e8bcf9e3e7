//! Adaptive bounding volume hierarchy for dynamic-topology sculpting.
//!
//! This crate keeps a binary tree of bounding boxes over a [`DynMesh`]
//! whose leaves own disjoint sets of faces and vertices:
//! - Parallel bulk build by widest-axis centroid partitioning
//! - Incremental face/vertex insertion and removal during a stroke
//! - Join, balance and compaction at stroke boundaries
//! - Lazy per-leaf triangulation caches for queries and draw buffers
//! - Two-phase parallel normal updates
//!
//! # Architecture
//!
//! Nodes live in a single `Vec` and refer to their children by index. Each
//! mesh element's owning leaf is recorded in an [`OwnerTable`], a weak
//! lookup that the tree rewrites whenever nodes move. The mesh itself is
//! never stored; editing code passes it into every call.
//!
//! ## Key Components
//!
//! - **Node**: tagged leaf/internal kind plus independent update flags
//! - **Build / Split**: partitioning of whole meshes and over-full leaves
//! - **Insert / Ownership**: bookkeeping for elements created or removed
//! - **Balance**: join, overlap dissolve, compaction and re-insertion
//! - **Triangulation**: deduplicated per-leaf triangle caches
//! - **Normals / Query**: parallel consumers of the leaf sets
//!
//! [`DynMesh`]: dyntopo_mesh::DynMesh

pub mod aabb;
mod balance;
mod build;
mod insert;
pub mod node;
mod normals;
pub mod owner;
mod ownership;
pub mod query;
pub mod spin;
mod split;
mod tree;
pub mod triangulation;
pub mod validate;

#[cfg(test)]
mod test_support;

pub use aabb::Aabb;
pub use dyntopo_config::PbvhConfig;
pub use node::{LeafData, Node, NodeFlags, NodeIndex, NodeKind};
pub use owner::{NODE_NONE, OwnerTable};
pub use query::RayHit;
pub use spin::SpinVec3;
pub use tree::{Pbvh, PbvhStats};
pub use triangulation::{MaterialTriangulation, TriBuffers, TriFace, TriVertex, Triangulation};
pub use validate::PbvhError;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{assert_consistent, grid_tree};
    use dyntopo_mesh::primitives::{grid_vertex, subdivided_box, triangle_grid};
    use dyntopo_mesh::{DynMesh, FaceAttributes, FaceId, VertexId};
    use glam::Vec3;

    fn sorted_faces(pbvh: &Pbvh) -> Vec<FaceId> {
        let mut faces: Vec<FaceId> = pbvh
            .nodes()
            .iter()
            .filter_map(Node::leaf)
            .flat_map(|l| l.faces.iter().copied())
            .collect();
        faces.sort_unstable();
        faces
    }

    /// Replace a face with a fan of triangles around a new center vertex
    fn poke_face(mesh: &mut DynMesh, pbvh: &mut Pbvh, face: FaceId) -> VertexId {
        let verts: Vec<VertexId> = mesh.face_vertices(face).to_vec();
        let centroid = mesh.face_centroid(face);
        let center = pbvh.create_vertex(mesh, centroid, Vec3::Z);
        pbvh.remove_face(mesh, face);
        mesh.remove_face(face);
        for i in 0..verts.len() {
            let tri = [verts[i], verts[(i + 1) % verts.len()], center];
            let new_face = mesh.add_face(&tri, FaceAttributes::default()).unwrap();
            assert!(pbvh.insert_face(mesh, new_face).is_some());
        }
        center
    }

    #[test]
    fn test_build_grid_partitions_all_faces() {
        let (mesh, pbvh) = grid_tree(10, 10, 8);
        let stats = pbvh.stats();
        assert!(stats.leaves > 1);
        assert_eq!(stats.faces, 100);
        for leaf in pbvh.leaf_indices() {
            assert!(pbvh.nodes()[leaf.index()].face_count() <= 8);
        }
        for vertex in mesh.vertices() {
            let owner = pbvh.vertex_owner(vertex.id).unwrap();
            assert!(pbvh.leaf(owner).unwrap().unique_vertices.contains(&vertex.id));
        }
        assert_eq!(stats.unique_vertices, mesh.vertex_count());
        assert_consistent(&mesh, &pbvh);
    }

    #[test]
    fn test_remove_one_face_then_balance() {
        let (mut mesh, mut pbvh) = grid_tree(10, 10, 8);
        assert!(pbvh.remove_face(&mesh, FaceId(44)));
        mesh.remove_face(FaceId(44));
        pbvh.after_edit_batch(&mesh, true);

        assert_eq!(pbvh.total_face_count(), 99);
        assert_eq!(pbvh.stats().empty_leaves, 0);
        assert_consistent(&mesh, &pbvh);
    }

    #[test]
    fn test_insert_face_with_new_vertex() {
        let (mut mesh, mut pbvh) = grid_tree(10, 10, 8);
        let a = grid_vertex(10, 10, 4);
        let b = grid_vertex(10, 10, 5);
        let c = pbvh.create_vertex(&mut mesh, Vec3::new(11.0, 4.5, 0.0), Vec3::Z);
        let face = mesh.add_face(&[a, c, b], FaceAttributes::default()).unwrap();

        let leaf = pbvh.insert_face(&mesh, face).unwrap();
        assert_eq!(pbvh.face_owner(face), Some(leaf));
        assert!(pbvh.leaf(leaf).unwrap().faces.contains(&face));
        let bounds = pbvh.nodes()[leaf.index()].bounds;
        for v in [a, b, c] {
            assert!(bounds.contains_point(mesh.position(v)));
        }
    }

    #[test]
    fn test_leaves_respect_limit_after_growth() {
        let (mut mesh, mut pbvh) = grid_tree(6, 6, 6);
        for f in 0..12 {
            poke_face(&mut mesh, &mut pbvh, FaceId(f));
        }
        pbvh.after_edit_batch(&mesh, false);
        let max_depth = pbvh.config().max_depth;
        for node in pbvh.nodes() {
            assert!(node.face_count() <= 6 || node.depth >= max_depth);
        }
        assert_eq!(pbvh.total_face_count(), 36 - 12 + 48);
        assert_consistent(&mesh, &pbvh);
    }

    #[test]
    fn test_bounds_update_is_idempotent() {
        let mut mesh = triangle_grid(8, 8, 1.0);
        let mut pbvh = Pbvh::build_with_leaf_limit(&mesh, 10).unwrap();
        mesh.set_vertex_position(VertexId(40), Vec3::new(4.0, 4.0, 2.0));
        let leaves: Vec<NodeIndex> = pbvh.leaf_indices();
        pbvh.mark_normals_dirty(&leaves);

        pbvh.update_bounds(&mesh);
        let first: Vec<Aabb> = pbvh.nodes().iter().map(|n| n.bounds).collect();
        pbvh.update_bounds(&mesh);
        let second: Vec<Aabb> = pbvh.nodes().iter().map(|n| n.bounds).collect();
        assert_eq!(first, second);

        for node in pbvh.nodes() {
            if let Some([a, b]) = node.children() {
                let union = pbvh.nodes()[a.index()]
                    .bounds
                    .union(&pbvh.nodes()[b.index()].bounds);
                assert_eq!(node.bounds, union);
            }
        }
        assert_eq!(pbvh.nodes()[0].bounds.max.z, 2.0);
    }

    #[test]
    fn test_compaction_leaves_no_dangling_nodes() {
        let (mut mesh, mut pbvh) = grid_tree(8, 8, 4);
        for y in 0..8 {
            for x in 0..3 {
                let face = FaceId((y * 8 + x) as u32);
                pbvh.remove_face(&mesh, face);
                mesh.remove_face(face);
            }
        }
        pbvh.after_edit_batch(&mesh, true);
        let len = pbvh.node_count();
        for node in pbvh.nodes() {
            assert!(!node.flags.contains(NodeFlags::DELETE));
            if let Some([a, b]) = node.children() {
                assert!(a.index() < len && b.index() < len);
            }
        }
        assert_consistent(&mesh, &pbvh);
    }

    #[test]
    fn test_balance_cycle_conserves_faces() {
        let mut mesh = subdivided_box(6, 1.0);
        let mut pbvh = Pbvh::build_with_leaf_limit(&mesh, 12).unwrap();
        // Pull one side out so sibling boxes overlap after the bounds update
        let moved: Vec<VertexId> = mesh
            .vertices()
            .filter(|v| v.position.x > 0.99)
            .map(|v| v.id)
            .collect();
        for &v in &moved {
            let p = mesh.position(v);
            mesh.set_vertex_position(v, p + Vec3::new(-1.5, 0.0, 0.0));
        }
        let leaves = pbvh.leaf_indices();
        pbvh.mark_normals_dirty(&leaves);

        let before = sorted_faces(&pbvh);
        pbvh.after_edit_batch(&mesh, true);
        assert_eq!(sorted_faces(&pbvh), before);
        assert_consistent(&mesh, &pbvh);
    }

    #[test]
    fn test_stroke_batches_stay_consistent() {
        let (mut mesh, mut pbvh) = grid_tree(8, 8, 6);
        let mut next = 0u32;
        for batch in 0..4 {
            for _ in 0..5 {
                // Skip faces already poked in an earlier batch
                while !mesh.is_face_alive(FaceId(next)) {
                    next += 1;
                }
                poke_face(&mut mesh, &mut pbvh, FaceId(next));
                next += 3;
            }
            pbvh.after_edit_batch(&mesh, batch % 2 == 1);
            assert_eq!(pbvh.total_face_count(), mesh.face_count());
            assert_consistent(&mesh, &pbvh);
        }

        let hit = pbvh.raycast(&mesh, Vec3::new(4.3, 4.6, 3.0), Vec3::NEG_Z);
        assert!(hit.is_some_and(|h| (h.distance - 3.0).abs() < 1e-5));
        assert!(pbvh.update_normals(&mut mesh) > 0);
    }
}
