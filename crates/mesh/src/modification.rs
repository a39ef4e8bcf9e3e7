//! Modification methods for DynMesh.

use glam::{Vec2, Vec3};
use smallvec::SmallVec;
use tracing::trace;

use super::types::{Edge, EdgeId, Face, FaceAttributes, FaceId, MeshError, Vertex, VertexId};
use super::{edge_key, DynMesh};

impl DynMesh {
    /// Add a new loose vertex to the mesh.
    ///
    /// Returns the ID of the newly created vertex.
    pub fn add_vertex(&mut self, position: Vec3, normal: Vec3) -> VertexId {
        let id = VertexId(self.vertices.len() as u32);
        self.vertices.push(Vertex {
            id,
            position,
            normal,
            original_position: position,
            edges: SmallVec::new(),
            hidden: false,
            alive: true,
        });
        self.live_vertices += 1;
        id
    }

    /// Add a polygon face over existing vertices.
    ///
    /// Edges are created as needed and shared with existing faces; the
    /// face is linked into every edge's radial cycle.
    pub fn add_face(
        &mut self,
        verts: &[VertexId],
        attributes: FaceAttributes,
    ) -> Result<FaceId, MeshError> {
        if verts.len() < 3 {
            return Err(MeshError::TooFewCorners(verts.len()));
        }
        for (i, &v) in verts.iter().enumerate() {
            if !self.is_vertex_alive(v) {
                return Err(MeshError::MissingVertex(v));
            }
            if verts[..i].contains(&v) {
                return Err(MeshError::RepeatedVertex(v));
            }
        }
        if let Some(uvs) = &attributes.uvs {
            if uvs.len() != verts.len() {
                return Err(MeshError::UvCountMismatch {
                    corners: verts.len(),
                    uvs: uvs.len(),
                });
            }
        }

        let face_id = FaceId(self.faces.len() as u32);
        let n = verts.len();
        let mut edges: SmallVec<[EdgeId; 4]> = SmallVec::with_capacity(n);
        for i in 0..n {
            let edge_id = self.ensure_edge(verts[i], verts[(i + 1) % n]);
            self.edges[edge_id.index()].faces.push(face_id);
            edges.push(edge_id);
        }

        self.faces.push(Face {
            id: face_id,
            verts: verts.iter().copied().collect(),
            edges,
            uvs: attributes.uvs.map(|uvs| uvs.into_iter().collect()),
            normal: Vec3::ZERO,
            material: attributes.material,
            face_set: attributes.face_set,
            hidden: attributes.hidden,
            alive: true,
        });
        self.live_faces += 1;

        let normal = self.compute_face_normal(face_id);
        self.faces[face_id.index()].normal = normal;

        trace!("add_face: {:?} with {} corners", face_id, n);
        Ok(face_id)
    }

    /// Find or create the edge joining two vertices
    fn ensure_edge(&mut self, a: VertexId, b: VertexId) -> EdgeId {
        let key = edge_key(a, b);
        if let Some(&edge_id) = self.edge_map.get(&key) {
            return edge_id;
        }

        let edge_id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge {
            id: edge_id,
            verts: [key.0, key.1],
            faces: SmallVec::new(),
            alive: true,
        });
        self.edge_map.insert(key, edge_id);
        self.vertices[a.index()].edges.push(edge_id);
        self.vertices[b.index()].edges.push(edge_id);
        edge_id
    }

    /// Remove a face, unlinking it from its edges' radial cycles.
    ///
    /// Edges left without faces are removed too; vertices are kept (they may
    /// become loose).
    pub fn remove_face(&mut self, face_id: FaceId) -> bool {
        let edges = match self.face_mut(face_id) {
            Some(face) => {
                face.alive = false;
                face.edges.clone()
            }
            None => return false,
        };
        self.live_faces -= 1;

        for edge_id in edges {
            let edge = &mut self.edges[edge_id.index()];
            edge.faces.retain(|f| *f != face_id);
            if edge.faces.is_empty() {
                self.remove_edge(edge_id);
            }
        }

        trace!("remove_face: {:?}", face_id);
        true
    }

    fn remove_edge(&mut self, edge_id: EdgeId) {
        let edge = &mut self.edges[edge_id.index()];
        if !edge.alive {
            return;
        }
        edge.alive = false;
        let [a, b] = edge.verts;
        self.edge_map.remove(&edge_key(a, b));
        for v in [a, b] {
            self.vertices[v.index()].edges.retain(|e| *e != edge_id);
        }
    }

    /// Remove a vertex along with every face using it.
    ///
    /// Returns the removed faces so callers can update any structure that
    /// referenced them (they should have been detached beforehand).
    pub fn remove_vertex(&mut self, vertex_id: VertexId) -> Vec<FaceId> {
        if !self.is_vertex_alive(vertex_id) {
            return Vec::new();
        }

        let faces: Vec<FaceId> = self.vertex_faces(vertex_id).to_vec();
        for &face_id in &faces {
            self.remove_face(face_id);
        }

        let edges: Vec<EdgeId> = self.vertices[vertex_id.index()].edges.to_vec();
        for edge_id in edges {
            self.remove_edge(edge_id);
        }

        self.vertices[vertex_id.index()].alive = false;
        self.live_vertices -= 1;
        faces
    }

    /// Set the position of a vertex
    pub fn set_vertex_position(&mut self, vertex_id: VertexId, position: Vec3) {
        if let Some(v) = self.vertex_mut(vertex_id) {
            v.position = position;
        }
    }

    /// Set the normal of a vertex
    pub fn set_vertex_normal(&mut self, vertex_id: VertexId, normal: Vec3) {
        if let Some(v) = self.vertex_mut(vertex_id) {
            v.normal = normal;
        }
    }

    /// Set the cached normal of a face
    pub fn set_face_normal(&mut self, face_id: FaceId, normal: Vec3) {
        if let Some(f) = self.face_mut(face_id) {
            f.normal = normal;
        }
    }

    pub fn set_face_hidden(&mut self, face_id: FaceId, hidden: bool) {
        if let Some(f) = self.face_mut(face_id) {
            f.hidden = hidden;
        }
    }

    pub fn set_face_material(&mut self, face_id: FaceId, material: u16) {
        if let Some(f) = self.face_mut(face_id) {
            f.material = material;
        }
    }

    pub fn set_face_set(&mut self, face_id: FaceId, face_set: i32) {
        if let Some(f) = self.face_mut(face_id) {
            f.face_set = face_set;
        }
    }

    /// Set one corner UV; allocates zeroed UVs for the face if it had none
    pub fn set_corner_uv(&mut self, face_id: FaceId, corner: usize, uv: Vec2) {
        if let Some(f) = self.face_mut(face_id) {
            let n = f.verts.len();
            let uvs = f
                .uvs
                .get_or_insert_with(|| std::iter::repeat_n(Vec2::ZERO, n).collect());
            if let Some(slot) = uvs.get_mut(corner) {
                *slot = uv;
            }
        }
    }

    /// Snapshot current positions as the original positions of this edit
    pub fn store_original_positions(&mut self) {
        for v in self.vertices.iter_mut().filter(|v| v.alive) {
            v.original_position = v.position;
        }
    }

    /// Update face normals after vertex positions change
    pub fn recalculate_face_normals(&mut self) {
        for i in 0..self.faces.len() {
            if !self.faces[i].alive {
                continue;
            }
            let normal = self.compute_face_normal(FaceId(i as u32));
            self.faces[i].normal = normal;
        }
    }

    /// Recalculate vertex normals from adjacent face normals
    pub fn recalculate_vertex_normals(&mut self) {
        for i in 0..self.vertices.len() {
            if !self.vertices[i].alive {
                continue;
            }
            let faces = self.vertex_faces(VertexId(i as u32));
            if faces.is_empty() {
                continue;
            }

            let mut normal = Vec3::ZERO;
            for fid in &faces {
                if let Some(f) = self.face(*fid) {
                    normal += f.normal;
                }
            }
            self.vertices[i].normal = normal.normalize_or_zero();
        }
    }
}
