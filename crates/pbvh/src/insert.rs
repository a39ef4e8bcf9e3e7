//! Incremental insertion of faces and vertices.
//!
//! Insertion never splits; over-full leaves are handled by the next
//! [`Pbvh::after_edit_batch`].

use dyntopo_mesh::{DynMesh, FaceId, VertexId};
use glam::Vec3;
use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::node::{NodeFlags, NodeIndex};
use crate::tree::Pbvh;

impl Pbvh {
    /// Insert a face the mesh just created.
    ///
    /// Prefers a leaf that already owns a face across one of the new face's
    /// edges, then descends by vertex containment, then falls back to the
    /// leaf whose center is nearest the face centroid. Returns the leaf the
    /// face landed in, or `None` if the face is not live in `mesh`.
    pub fn insert_face(&mut self, mesh: &DynMesh, face: FaceId) -> Option<NodeIndex> {
        if let Some(existing) = self.already_owned(mesh, face) {
            return existing;
        }

        let neighbor_leaf = mesh.face_edges(face).iter().find_map(|&e| {
            mesh.edge_faces(e).iter().find_map(|&g| {
                self.owners
                    .face(g)
                    .filter(|&owner| g != face && self.is_leaf(owner))
            })
        });

        let leaf = match neighbor_leaf {
            Some(leaf) => leaf,
            None => self.find_leaf_for_face(mesh, face),
        };
        self.add_face_to_leaf(mesh, face, leaf);
        Some(leaf)
    }

    /// Insert a face by tree descent only (no adjacency shortcut).
    pub fn insert_face_tree_walk(&mut self, mesh: &DynMesh, face: FaceId) -> Option<NodeIndex> {
        if let Some(existing) = self.already_owned(mesh, face) {
            return existing;
        }
        let leaf = self.find_leaf_for_face(mesh, face);
        self.add_face_to_leaf(mesh, face, leaf);
        Some(leaf)
    }

    /// Add a vertex to the mesh and give it a unique owner.
    pub fn create_vertex(&mut self, mesh: &mut DynMesh, position: Vec3, normal: Vec3) -> VertexId {
        let vertex = mesh.add_vertex(position, normal);
        self.adopt_vertex(mesh, vertex, position);
        vertex
    }

    /// `Some(result)` when the insert should short-circuit
    fn already_owned(&mut self, mesh: &DynMesh, face: FaceId) -> Option<Option<NodeIndex>> {
        if !mesh.is_face_alive(face) {
            warn!("insert_face: {:?} is not a live face", face);
            return Some(None);
        }
        self.sync_capacity(mesh);
        let owner = self.owners.face(face)?;
        if self.is_leaf(owner) {
            warn!("insert_face: {:?} is already in leaf {:?}", face, owner);
            Some(Some(owner))
        } else {
            // Stale entry; insert normally
            None
        }
    }

    /// Descend while a child's bounds contain any of the face's vertices
    fn find_leaf_for_face(&self, mesh: &DynMesh, face: FaceId) -> NodeIndex {
        let points: SmallVec<[Vec3; 4]> = mesh
            .face_vertices(face)
            .iter()
            .map(|&v| mesh.position(v))
            .collect();

        let mut index = NodeIndex::ROOT;
        loop {
            let Some(children) = self.nodes[index.index()].children() else {
                return index;
            };
            let next = children.into_iter().find(|c| {
                let bounds = &self.nodes[c.index()].bounds;
                points.iter().any(|&p| bounds.contains_point(p))
            });
            match next {
                Some(child) => index = child,
                None => break,
            }
        }
        self.nearest_leaf(mesh.face_centroid(face))
    }

    /// Place a vertex already in the mesh into the leaf found by point search
    pub(crate) fn adopt_vertex(&mut self, mesh: &DynMesh, vertex: VertexId, position: Vec3) {
        self.sync_capacity(mesh);
        let leaf = self.find_leaf_for_point(position);
        let original = mesh
            .vertex(vertex)
            .map_or(position, |v| v.original_position);

        let node = &mut self.nodes[leaf.index()];
        node.bounds.include_point(position);
        node.original_bounds.include_point(original);
        node.flags
            .insert(NodeFlags::UPDATE_BB | NodeFlags::UPDATE_NORMALS | NodeFlags::UPDATE_REDRAW);
        if let Some(data) = node.leaf_mut() {
            data.unique_vertices.insert(vertex);
        }
        self.owners.set_vertex(vertex, Some(leaf));
        trace!("adopt_vertex: {:?} -> {:?}", vertex, leaf);
    }

    /// Put `face` into `leaf`, claiming or sharing its vertices
    pub(crate) fn add_face_to_leaf(&mut self, mesh: &DynMesh, face: FaceId, leaf: NodeIndex) {
        let Some(face_data) = mesh.face(face) else {
            return;
        };
        self.owners.set_face(face, Some(leaf));

        let mut shared: SmallVec<[(NodeIndex, Vec3); 4]> = SmallVec::new();
        for &v in &face_data.verts {
            let Some(vertex) = mesh.vertex(v) else {
                continue;
            };
            match self.owners.vertex(v) {
                Some(owner) if owner == leaf => {
                    if let Some(data) = self.leaf_mut(leaf) {
                        data.unique_vertices.insert(v);
                    }
                }
                Some(owner) if self.leaf_owns_vertex(owner, v) => {
                    if let Some(data) = self.leaf_mut(leaf) {
                        data.other_vertices.insert(v);
                    }
                    shared.push((owner, vertex.position));
                }
                _ => {
                    self.owners.set_vertex(v, Some(leaf));
                    if let Some(data) = self.leaf_mut(leaf) {
                        data.unique_vertices.insert(v);
                        data.other_vertices.remove(&v);
                    }
                }
            }
            let node = &mut self.nodes[leaf.index()];
            node.bounds.include_point(vertex.position);
            node.original_bounds.include_point(vertex.original_position);
        }

        // Owners of shared vertices grow to keep containing them
        for (owner, position) in shared {
            let node = &mut self.nodes[owner.index()];
            node.bounds.include_point(position);
            node.flags.insert(NodeFlags::UPDATE_REDRAW);
        }

        let node = &mut self.nodes[leaf.index()];
        if let Some(data) = node.leaf_mut() {
            data.faces.insert(face);
        }
        if !face_data.hidden {
            node.flags.remove(NodeFlags::FULLY_HIDDEN);
        }
        node.flags.insert(NodeFlags::TOPOLOGY_CHANGED);
        trace!("add_face_to_leaf: {:?} -> {:?}", face, leaf);
    }
}
