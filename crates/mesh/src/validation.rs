//! Adjacency validation for DynMesh.

use super::types::MeshError;
use super::{edge_key, DynMesh};

impl DynMesh {
    /// Validate disk and radial adjacency.
    ///
    /// Checks that:
    /// 1. Every live face's edges are live, join its consecutive corners and
    ///    list the face in their radial cycle
    /// 2. Every live edge is in both endpoints' disk cycles and the edge map
    /// 3. Every radial entry is a live face that uses the edge
    pub fn validate(&self) -> Result<(), MeshError> {
        for face in self.faces() {
            let n = face.verts.len();
            if face.edges.len() != n {
                return Err(MeshError::InvalidTopology(format!(
                    "Face {:?}: {} corners but {} edges",
                    face.id,
                    n,
                    face.edges.len()
                )));
            }
            for i in 0..n {
                let edge = self.edge(face.edges[i]).ok_or_else(|| {
                    MeshError::InvalidTopology(format!(
                        "Face {:?}: edge {:?} is missing",
                        face.id, face.edges[i]
                    ))
                })?;
                let (a, b) = edge_key(face.verts[i], face.verts[(i + 1) % n]);
                if edge.verts != [a, b] {
                    return Err(MeshError::InvalidTopology(format!(
                        "Face {:?}: edge {:?} does not join corners {:?}-{:?}",
                        face.id, edge.id, a, b
                    )));
                }
                if !edge.faces.contains(&face.id) {
                    return Err(MeshError::InvalidTopology(format!(
                        "Face {:?}: missing from radial cycle of {:?}",
                        face.id, edge.id
                    )));
                }
            }
        }

        for edge in self.edges() {
            for v in edge.verts {
                let vertex = self.vertex(v).ok_or_else(|| {
                    MeshError::InvalidTopology(format!(
                        "Edge {:?}: endpoint {:?} is missing",
                        edge.id, v
                    ))
                })?;
                if !vertex.edges.contains(&edge.id) {
                    return Err(MeshError::InvalidTopology(format!(
                        "Edge {:?}: missing from disk cycle of {:?}",
                        edge.id, v
                    )));
                }
            }
            if self.find_edge(edge.verts[0], edge.verts[1]) != Some(edge.id) {
                return Err(MeshError::InvalidTopology(format!(
                    "Edge {:?}: not registered in edge map",
                    edge.id
                )));
            }
            for &face_id in &edge.faces {
                let face = self.face(face_id).ok_or_else(|| {
                    MeshError::InvalidTopology(format!(
                        "Edge {:?}: radial face {:?} is missing",
                        edge.id, face_id
                    ))
                })?;
                if !face.edges.contains(&edge.id) {
                    return Err(MeshError::InvalidTopology(format!(
                        "Edge {:?}: radial face {:?} does not use it",
                        edge.id, face_id
                    )));
                }
            }
        }

        for vertex in self.vertices() {
            if let Some(&dead) = vertex.edges.iter().find(|&&e| self.edge(e).is_none()) {
                return Err(MeshError::InvalidTopology(format!(
                    "Vertex {:?}: disk cycle holds removed edge {:?}",
                    vertex.id, dead
                )));
            }
        }

        Ok(())
    }
}
