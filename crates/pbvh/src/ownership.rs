//! Unique-owner bookkeeping for vertices and faces.
//!
//! Every vertex used by a face in the tree has exactly one leaf as its
//! unique owner; every other leaf using it lists it under
//! `other_vertices`. These operations keep that true as faces come and go.

use std::collections::HashSet;

use dyntopo_mesh::{DynMesh, FaceId, VertexId};
use smallvec::SmallVec;
use tracing::{debug, error, trace, warn};

use crate::node::{NodeFlags, NodeIndex};
use crate::tree::{Pbvh, all_faces_hidden};

const OWNER_CHANGED: NodeFlags = NodeFlags::UPDATE_BB
    .union(NodeFlags::UPDATE_REDRAW)
    .union(NodeFlags::UPDATE_OTHER_VERTS);

impl Pbvh {
    /// Move unique ownership of `vertex` from `from` to `to`.
    ///
    /// `to` must be a leaf; otherwise the call logs and does nothing.
    /// If `from` keeps using the vertex the caller records it in
    /// `from`'s other set.
    pub fn transfer_unique_owner(&mut self, vertex: VertexId, from: NodeIndex, to: NodeIndex) {
        if !self.is_leaf(to) {
            error!(
                "transfer_unique_owner: target {:?} for {:?} is not a leaf",
                to, vertex
            );
            return;
        }

        if let Some(leaf) = self.leaf_mut(from) {
            leaf.unique_vertices.remove(&vertex);
        }
        if let Some(leaf) = self.leaf_mut(to) {
            leaf.unique_vertices.insert(vertex);
            leaf.other_vertices.remove(&vertex);
        }
        self.owners.set_vertex(vertex, Some(to));

        self.flag(from, OWNER_CHANGED);
        self.flag(to, OWNER_CHANGED);
        trace!("transfer_unique_owner: {:?} {:?} -> {:?}", vertex, from, to);
    }

    /// Drop a vertex from the tree's bookkeeping.
    ///
    /// Call before (or instead of) removing a loose vertex from the mesh.
    pub fn remove_vertex(&mut self, vertex: VertexId) {
        if let Some(owner) = self.owners.vertex(vertex) {
            if let Some(leaf) = self.leaf_mut(owner) {
                leaf.unique_vertices.remove(&vertex);
            }
            self.flag(owner, NodeFlags::UPDATE_BB | NodeFlags::UPDATE_REDRAW);
        }
        self.owners.set_vertex(vertex, None);
    }

    /// Detach a face from its leaf.
    ///
    /// Must run while the face still exists in the mesh. Vertices only this
    /// face kept in the leaf are handed to another leaf that still uses
    /// them, dropped if nothing uses them, or removed from the leaf's other
    /// set. Returns false if the face was not in the tree.
    pub fn remove_face(&mut self, mesh: &DynMesh, face: FaceId) -> bool {
        let Some(owner) = self.owners.face(face) else {
            warn!("remove_face: {:?} is not owned by any leaf", face);
            return false;
        };
        if !self.is_leaf(owner) {
            error!("remove_face: {:?} names non-leaf node {:?}", face, owner);
            self.owners.set_face(face, None);
            return false;
        }

        let verts: SmallVec<[VertexId; 4]> = mesh.face_vertices(face).iter().copied().collect();
        for v in verts {
            if self.leaf_use_count(mesh, owner, v) != 1 {
                continue;
            }
            if self.owners.vertex(v) == Some(owner) {
                if let Some(next) = self.other_leaf_using(mesh, v, owner) {
                    self.transfer_unique_owner(v, owner, next);
                } else if mesh.vertex_face_count(v) <= 1 {
                    self.remove_vertex(v);
                }
                // Other faces exist but are unowned (queued for re-insertion):
                // keep ownership until they land
            } else if let Some(leaf) = self.leaf_mut(owner) {
                leaf.other_vertices.remove(&v);
            }
        }

        if let Some(leaf) = self.leaf_mut(owner) {
            leaf.faces.remove(&face);
        }
        self.owners.set_face(face, None);
        self.flag(owner, NodeFlags::TOPOLOGY_CHANGED);
        trace!("remove_face: {:?} from {:?}", face, owner);
        true
    }

    /// Reconcile a leaf's vertex sets with its faces.
    ///
    /// Releases unique vertices the leaf no longer uses to a leaf that
    /// does, claims vertices whose owner is missing or stale, and
    /// re-derives the other set.
    pub(crate) fn reconcile_leaf_vertices(&mut self, mesh: &DynMesh, index: NodeIndex) {
        let Some(leaf) = self.leaf(index) else {
            return;
        };
        let faces = leaf.sorted_faces();
        let unique = leaf.sorted_unique_vertices();

        let mut used: Vec<VertexId> = faces
            .iter()
            .flat_map(|&f| mesh.face_vertices(f).iter().copied())
            .collect();
        used.sort_unstable();
        used.dedup();

        // Release vertices this leaf no longer touches
        let mut transfers = Vec::new();
        let mut dropped = 0usize;
        for &v in &unique {
            if !mesh.is_vertex_alive(v) {
                self.owners.set_vertex(v, None);
                if let Some(leaf) = self.leaf_mut(index) {
                    leaf.unique_vertices.remove(&v);
                }
                dropped += 1;
                continue;
            }
            if used.binary_search(&v).is_ok() {
                continue;
            }
            if let Some(next) = self.other_leaf_using(mesh, v, index) {
                transfers.push((v, next));
            }
        }
        for (v, next) in transfers {
            self.transfer_unique_owner(v, index, next);
        }

        // Claim missing or stale owners, collect the rest as other
        let mut other = HashSet::new();
        let mut claimed = Vec::new();
        for &v in &used {
            match self.owners.vertex(v) {
                Some(owner) if owner == index => claimed.push(v),
                Some(owner) if self.leaf_owns_vertex(owner, v) => {
                    other.insert(v);
                }
                _ => claimed.push(v),
            }
        }
        for &v in &claimed {
            self.owners.set_vertex(v, Some(index));
        }
        let Some(leaf) = self.leaf_mut(index) else {
            return;
        };
        leaf.unique_vertices.extend(claimed);
        leaf.other_vertices = other;

        let node = &mut self.nodes[index.index()];
        node.flags
            .set(NodeFlags::FULLY_HIDDEN, all_faces_hidden(mesh, &faces));
        node.flags.remove(NodeFlags::REBUILD_VERTS | NodeFlags::UPDATE_OTHER_VERTS);
        node.flags
            .insert(NodeFlags::UPDATE_BB | NodeFlags::UPDATE_NORMALS | NodeFlags::UPDATE_REDRAW);
        if dropped > 0 {
            debug!(
                "reconcile_leaf_vertices: {:?} dropped {} removed vertices",
                index, dropped
            );
        }
    }

    /// Re-derive a leaf's other set from its faces without touching owners
    pub(crate) fn rebuild_other_vertices(&mut self, mesh: &DynMesh, index: NodeIndex) {
        let Some(leaf) = self.leaf(index) else {
            return;
        };
        let other: HashSet<VertexId> = leaf
            .faces
            .iter()
            .flat_map(|&f| mesh.face_vertices(f).iter().copied())
            .filter(|v| !leaf.unique_vertices.contains(v))
            .collect();
        if let Some(leaf) = self.leaf_mut(index) {
            leaf.other_vertices = other;
        }
        self.nodes[index.index()]
            .flags
            .remove(NodeFlags::UPDATE_OTHER_VERTS);
    }

    /// Run pending vertex reconciliation on every flagged leaf
    pub(crate) fn reconcile_flagged(&mut self, mesh: &DynMesh) {
        let mut rebuilt = 0usize;
        for i in 0..self.nodes.len() {
            let index = NodeIndex(i as u32);
            let flags = self.nodes[i].flags;
            if !self.nodes[i].is_leaf() || flags.contains(NodeFlags::DELETE) {
                continue;
            }
            if flags.contains(NodeFlags::REBUILD_VERTS) {
                self.reconcile_leaf_vertices(mesh, index);
                rebuilt += 1;
            }
        }
        // Transfers above may flag leaves already visited
        for i in 0..self.nodes.len() {
            let flags = self.nodes[i].flags;
            if self.nodes[i].is_leaf()
                && !flags.contains(NodeFlags::DELETE)
                && flags.contains(NodeFlags::UPDATE_OTHER_VERTS)
            {
                self.rebuild_other_vertices(mesh, NodeIndex(i as u32));
            }
        }
        if rebuilt > 0 {
            trace!("reconcile_flagged: {} leaves", rebuilt);
        }
    }
}
