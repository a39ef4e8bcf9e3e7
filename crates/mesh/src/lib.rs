//! Dynamic mesh for sculpting with live topology edits
//!
//! Provides the adjacency the sculpting BVH needs from its mesh layer:
//! - stable [`VertexId`] / [`EdgeId`] / [`FaceId`] handles (removed elements
//!   are tombstoned, never renumbered)
//! - per-vertex disk cycles (edges around a vertex)
//! - per-edge radial cycles (faces around an edge)
//! - per-face material, face set, hidden flag and per-corner UVs
//!
//! Topology editing (edge split/collapse) lives with the callers; this
//! crate only creates and removes whole elements.

mod construction;
mod modification;
pub mod primitives;
mod topology;
mod types;
mod validation;

use std::collections::HashMap;

pub use types::{Edge, EdgeId, Face, FaceAttributes, FaceId, MeshError, Vertex, VertexId};

/// Dynamic polygon mesh with disk and radial adjacency
#[derive(Debug, Clone, Default)]
pub struct DynMesh {
    pub(crate) vertices: Vec<Vertex>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) faces: Vec<Face>,
    /// Map from sorted vertex pair to the live edge joining them
    pub(crate) edge_map: HashMap<(VertexId, VertexId), EdgeId>,
    pub(crate) live_vertices: usize,
    pub(crate) live_faces: usize,
}

/// Sorted key for the undirected edge between two vertices
#[inline]
pub(crate) fn edge_key(a: VertexId, b: VertexId) -> (VertexId, VertexId) {
    if a <= b { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn single_triangle() -> DynMesh {
        DynMesh::from_triangles(
            &[
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(0.5, 1.0, 0.0),
            ],
            &[0, 1, 2],
        )
        .unwrap()
    }

    #[test]
    fn test_from_triangles_single_triangle() {
        let mesh = single_triangle();
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.edge_count(), 3);
        assert_eq!(mesh.face_count(), 1);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_face_vertices() {
        let mesh = single_triangle();
        assert_eq!(mesh.face_vertices(FaceId(0)).len(), 3);
    }

    #[test]
    fn test_vertex_faces() {
        let mesh = single_triangle();
        let faces = mesh.vertex_faces(VertexId(0));
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0], FaceId(0));
    }
}
