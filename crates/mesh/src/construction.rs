//! Construction methods for DynMesh.

use glam::Vec3;

use super::types::{FaceAttributes, MeshError, VertexId};
use super::DynMesh;

impl DynMesh {
    /// Create an empty mesh
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mesh from positions and a triangle index list.
    ///
    /// Degenerate triangles (repeated indices) are skipped with a warning.
    pub fn from_triangles(positions: &[Vec3], indices: &[u32]) -> Result<Self, MeshError> {
        if indices.len() % 3 != 0 {
            return Err(MeshError::BadIndexCount(indices.len()));
        }

        let polygons: Vec<Vec<u32>> = indices.chunks(3).map(|tri| tri.to_vec()).collect();
        Self::from_polygons(positions, &polygons)
    }

    /// Build a mesh from positions and polygon corner lists.
    pub fn from_polygons(positions: &[Vec3], polygons: &[Vec<u32>]) -> Result<Self, MeshError> {
        let mut mesh = Self::new();
        mesh.vertices.reserve(positions.len());
        mesh.faces.reserve(polygons.len());

        for &position in positions {
            mesh.add_vertex(position, Vec3::ZERO);
        }

        let mut skipped = 0usize;
        for polygon in polygons {
            let verts: Vec<VertexId> = polygon.iter().map(|&i| VertexId(i)).collect();
            match mesh.add_face(&verts, FaceAttributes::default()) {
                Ok(_) => {}
                Err(MeshError::RepeatedVertex(_)) => skipped += 1,
                Err(e) => return Err(e),
            }
        }

        if skipped > 0 {
            tracing::debug!("from_polygons: skipped {} degenerate polygons", skipped);
        }

        mesh.recalculate_face_normals();
        mesh.recalculate_vertex_normals();
        mesh.store_original_positions();
        Ok(mesh)
    }
}
