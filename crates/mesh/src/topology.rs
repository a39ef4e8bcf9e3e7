//! Topology query methods for DynMesh.

use glam::Vec3;
use smallvec::SmallVec;

use super::types::{Edge, EdgeId, Face, FaceId, Vertex, VertexId};
use super::{edge_key, DynMesh};

impl DynMesh {
    // ========================================================================
    // Accessors
    // ========================================================================

    /// Get a live vertex by ID
    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.vertices.get(id.index()).filter(|v| v.alive)
    }

    /// Get a mutable live vertex by ID
    pub fn vertex_mut(&mut self, id: VertexId) -> Option<&mut Vertex> {
        self.vertices.get_mut(id.index()).filter(|v| v.alive)
    }

    /// Get a live edge by ID
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.index()).filter(|e| e.alive)
    }

    /// Get a live face by ID
    pub fn face(&self, id: FaceId) -> Option<&Face> {
        self.faces.get(id.index()).filter(|f| f.alive)
    }

    /// Get a mutable live face by ID
    pub fn face_mut(&mut self, id: FaceId) -> Option<&mut Face> {
        self.faces.get_mut(id.index()).filter(|f| f.alive)
    }

    /// Iterate over live vertices
    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> + '_ {
        self.vertices.iter().filter(|v| v.alive)
    }

    /// Iterate over live faces
    pub fn faces(&self) -> impl Iterator<Item = &Face> + '_ {
        self.faces.iter().filter(|f| f.alive)
    }

    /// Iterate over live edges
    pub fn edges(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.iter().filter(|e| e.alive)
    }

    /// Number of live vertices
    pub fn vertex_count(&self) -> usize {
        self.live_vertices
    }

    /// Number of live faces
    pub fn face_count(&self) -> usize {
        self.live_faces
    }

    /// Number of live edges
    pub fn edge_count(&self) -> usize {
        self.edge_map.len()
    }

    /// One past the largest vertex ID ever allocated
    pub fn vertex_id_bound(&self) -> usize {
        self.vertices.len()
    }

    /// One past the largest face ID ever allocated
    pub fn face_id_bound(&self) -> usize {
        self.faces.len()
    }

    pub fn is_vertex_alive(&self, id: VertexId) -> bool {
        self.vertex(id).is_some()
    }

    pub fn is_face_alive(&self, id: FaceId) -> bool {
        self.face(id).is_some()
    }

    /// Position of a vertex (zero for removed vertices)
    pub fn position(&self, id: VertexId) -> Vec3 {
        self.vertex(id).map(|v| v.position).unwrap_or(Vec3::ZERO)
    }

    // ========================================================================
    // Topology Queries
    // ========================================================================

    /// Edges around a vertex (its disk cycle)
    pub fn vertex_edges(&self, vertex_id: VertexId) -> &[EdgeId] {
        match self.vertex(vertex_id) {
            Some(v) => &v.edges,
            None => &[],
        }
    }

    /// Faces around an edge (its radial cycle)
    pub fn edge_faces(&self, edge_id: EdgeId) -> &[FaceId] {
        match self.edge(edge_id) {
            Some(e) => &e.faces,
            None => &[],
        }
    }

    /// All faces adjacent to a vertex, walking its disk then each radial cycle.
    ///
    /// Each face is reported once, in disk order.
    pub fn vertex_faces(&self, vertex_id: VertexId) -> SmallVec<[FaceId; 8]> {
        let mut faces: SmallVec<[FaceId; 8]> = SmallVec::new();
        for &edge_id in self.vertex_edges(vertex_id) {
            for &face_id in self.edge_faces(edge_id) {
                if !faces.contains(&face_id) {
                    faces.push(face_id);
                }
            }
        }
        faces
    }

    /// Number of faces adjacent to a vertex
    pub fn vertex_face_count(&self, vertex_id: VertexId) -> usize {
        self.vertex_faces(vertex_id).len()
    }

    /// All vertices adjacent to a vertex (connected by an edge)
    pub fn adjacent_vertices(&self, vertex_id: VertexId) -> SmallVec<[VertexId; 8]> {
        self.vertex_edges(vertex_id)
            .iter()
            .filter_map(|&e| self.edge(e))
            .map(|e| e.other_vertex(vertex_id))
            .collect()
    }

    /// Corner vertices of a face in winding order
    pub fn face_vertices(&self, face_id: FaceId) -> &[VertexId] {
        match self.face(face_id) {
            Some(f) => &f.verts,
            None => &[],
        }
    }

    /// Edges bounding a face, parallel to its corners
    pub fn face_edges(&self, face_id: FaceId) -> &[EdgeId] {
        match self.face(face_id) {
            Some(f) => &f.edges,
            None => &[],
        }
    }

    /// Find the edge joining two vertices
    pub fn find_edge(&self, a: VertexId, b: VertexId) -> Option<EdgeId> {
        self.edge_map.get(&edge_key(a, b)).copied()
    }

    /// Check if an edge borders fewer than two faces
    pub fn is_boundary_edge(&self, edge_id: EdgeId) -> bool {
        self.edge_faces(edge_id).len() < 2
    }

    /// Check if a vertex is on the boundary (or isolated)
    pub fn is_boundary_vertex(&self, vertex_id: VertexId) -> bool {
        let edges = self.vertex_edges(vertex_id);
        edges.is_empty() || edges.iter().any(|&e| self.is_boundary_edge(e))
    }

    // ========================================================================
    // Geometry
    // ========================================================================

    /// Average of a face's corner positions
    pub fn face_centroid(&self, face_id: FaceId) -> Vec3 {
        let verts = self.face_vertices(face_id);
        if verts.is_empty() {
            return Vec3::ZERO;
        }
        let sum: Vec3 = verts.iter().map(|&v| self.position(v)).sum();
        sum / verts.len() as f32
    }

    /// Newell normal of a face from current positions
    pub fn compute_face_normal(&self, face_id: FaceId) -> Vec3 {
        let verts = self.face_vertices(face_id);
        if verts.len() < 3 {
            return Vec3::ZERO;
        }
        if verts.len() == 3 {
            let p0 = self.position(verts[0]);
            let p1 = self.position(verts[1]);
            let p2 = self.position(verts[2]);
            return (p1 - p0).cross(p2 - p0).normalize_or_zero();
        }

        let mut normal = Vec3::ZERO;
        for i in 0..verts.len() {
            let a = self.position(verts[i]);
            let b = self.position(verts[(i + 1) % verts.len()]);
            normal.x += (a.y - b.y) * (a.z + b.z);
            normal.y += (a.z - b.z) * (a.x + b.x);
            normal.z += (a.x - b.x) * (a.y + b.y);
        }
        normal.normalize_or_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::quad_grid;

    #[test]
    fn test_interior_vertex_disk_and_faces() {
        // 2x2 quads: the center vertex (index 4) touches all four faces
        let mesh = quad_grid(2, 2, 1.0);
        let center = VertexId(4);
        assert_eq!(mesh.vertex_edges(center).len(), 4);
        assert_eq!(mesh.vertex_faces(center).len(), 4);
        assert!(!mesh.is_boundary_vertex(center));
        assert!(mesh.is_boundary_vertex(VertexId(0)));
    }

    #[test]
    fn test_face_centroid_and_normal() {
        let mesh = quad_grid(1, 1, 2.0);
        let centroid = mesh.face_centroid(FaceId(0));
        assert!((centroid - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-6);
        let normal = mesh.compute_face_normal(FaceId(0));
        assert!((normal - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn test_adjacent_vertices() {
        let mesh = quad_grid(2, 2, 1.0);
        let mut neighbors = mesh.adjacent_vertices(VertexId(4)).to_vec();
        neighbors.sort();
        assert_eq!(
            neighbors,
            vec![VertexId(1), VertexId(3), VertexId(5), VertexId(7)]
        );
    }
}
