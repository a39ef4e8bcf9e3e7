//! The tree container: node arena, owner table and shared helpers.

use dyntopo_config::PbvhConfig;
use dyntopo_mesh::{DynMesh, FaceId, VertexId};
use glam::Vec3;
use serde::Serialize;
use tracing::trace;

use crate::aabb::Aabb;
use crate::node::{LeafData, Node, NodeFlags, NodeIndex, NodeKind};
use crate::owner::OwnerTable;

/// True when `faces` is non-empty and none of them is visible
pub(crate) fn all_faces_hidden(mesh: &DynMesh, faces: &[FaceId]) -> bool {
    !faces.is_empty() && faces.iter().all(|&f| mesh.face(f).is_none_or(|face| face.hidden))
}

/// Adaptive bounding volume hierarchy over a [`DynMesh`].
///
/// Leaves own disjoint sets of faces and vertices. The mesh is never stored
/// here; every operation that reads geometry takes it as a parameter.
#[derive(Debug)]
pub struct Pbvh {
    pub(crate) nodes: Vec<Node>,
    pub(crate) owners: OwnerTable,
    pub(crate) config: PbvhConfig,
    /// Edit batches since the last balance pass
    pub(crate) batches_since_balance: u32,
}

/// Summary counters, serializable for logging and tooling
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PbvhStats {
    pub nodes: usize,
    pub leaves: usize,
    pub empty_leaves: usize,
    pub faces: usize,
    pub unique_vertices: usize,
    pub max_depth: u32,
    pub max_leaf_faces: usize,
}

impl Pbvh {
    /// A tree with a single empty root leaf
    pub(crate) fn with_root(config: PbvhConfig, vertex_bound: usize, face_bound: usize) -> Self {
        Self {
            nodes: vec![Node::new_leaf(0)],
            owners: OwnerTable::new(vertex_bound, face_bound),
            config,
            batches_since_balance: 0,
        }
    }

    pub fn config(&self) -> &PbvhConfig {
        &self.config
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index.index())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Indices of every leaf in array order
    pub fn leaf_indices(&self) -> Vec<NodeIndex> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_leaf())
            .map(|(i, _)| NodeIndex(i as u32))
            .collect()
    }

    /// Leaf owning a face
    pub fn face_owner(&self, face: FaceId) -> Option<NodeIndex> {
        self.owners.face(face)
    }

    /// Leaf uniquely owning a vertex
    pub fn vertex_owner(&self, vertex: VertexId) -> Option<NodeIndex> {
        self.owners.vertex(vertex)
    }

    /// Total faces held by leaves
    pub fn total_face_count(&self) -> usize {
        self.nodes.iter().map(Node::face_count).sum()
    }

    pub fn stats(&self) -> PbvhStats {
        let mut stats = PbvhStats {
            nodes: self.nodes.len(),
            ..Default::default()
        };
        for node in &self.nodes {
            stats.max_depth = stats.max_depth.max(node.depth);
            if let Some(leaf) = node.leaf() {
                stats.leaves += 1;
                stats.faces += leaf.faces.len();
                stats.unique_vertices += leaf.unique_vertices.len();
                stats.max_leaf_faces = stats.max_leaf_faces.max(leaf.faces.len());
                if leaf.faces.is_empty() {
                    stats.empty_leaves += 1;
                }
            }
        }
        stats
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    pub(crate) fn is_leaf(&self, index: NodeIndex) -> bool {
        self.nodes.get(index.index()).is_some_and(Node::is_leaf)
    }

    pub(crate) fn leaf(&self, index: NodeIndex) -> Option<&LeafData> {
        self.nodes.get(index.index()).and_then(Node::leaf)
    }

    pub(crate) fn leaf_mut(&mut self, index: NodeIndex) -> Option<&mut LeafData> {
        self.nodes.get_mut(index.index()).and_then(Node::leaf_mut)
    }

    pub(crate) fn flag(&mut self, index: NodeIndex, flags: NodeFlags) {
        if let Some(node) = self.nodes.get_mut(index.index()) {
            node.flags.insert(flags);
        }
    }

    /// True if `leaf` is a live leaf holding `vertex` in its unique set
    pub(crate) fn leaf_owns_vertex(&self, leaf: NodeIndex, vertex: VertexId) -> bool {
        self.leaf(leaf)
            .is_some_and(|l| l.unique_vertices.contains(&vertex))
    }

    /// Number of faces around `vertex` owned by `leaf`
    pub(crate) fn leaf_use_count(&self, mesh: &DynMesh, leaf: NodeIndex, vertex: VertexId) -> usize {
        mesh.vertex_faces(vertex)
            .iter()
            .filter(|&&f| self.owners.face(f) == Some(leaf))
            .count()
    }

    /// First leaf other than `exclude` owning a face around `vertex`
    pub(crate) fn other_leaf_using(
        &self,
        mesh: &DynMesh,
        vertex: VertexId,
        exclude: NodeIndex,
    ) -> Option<NodeIndex> {
        mesh.vertex_faces(vertex).iter().find_map(|&f| {
            self.owners
                .face(f)
                .filter(|&owner| owner != exclude && self.is_leaf(owner))
        })
    }

    /// Parent of every node, `None` for the root
    pub(crate) fn parent_map(&self) -> Vec<Option<NodeIndex>> {
        let mut parents = vec![None; self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(children) = node.children() {
                for child in children {
                    if let Some(slot) = parents.get_mut(child.index()) {
                        *slot = Some(NodeIndex(i as u32));
                    }
                }
            }
        }
        parents
    }

    /// Faces held by every leaf below (and including) `index`
    pub(crate) fn subtree_face_count(&self, index: NodeIndex) -> usize {
        let mut total = 0;
        let mut stack = vec![index];
        while let Some(i) = stack.pop() {
            let Some(node) = self.nodes.get(i.index()) else {
                continue;
            };
            match &node.kind {
                NodeKind::Leaf(leaf) => total += leaf.faces.len(),
                NodeKind::Internal { children_offset } => {
                    stack.push(*children_offset);
                    stack.push(children_offset.sibling_slot());
                }
            }
        }
        total
    }

    /// Descend from the root by point containment, falling back to the
    /// leaf whose center is nearest.
    pub(crate) fn find_leaf_for_point(&self, point: Vec3) -> NodeIndex {
        let mut index = NodeIndex::ROOT;
        loop {
            let Some(children) = self.nodes[index.index()].children() else {
                return index;
            };
            match children
                .into_iter()
                .find(|c| self.nodes[c.index()].bounds.contains_point(point))
            {
                Some(child) => index = child,
                None => break,
            }
        }
        self.nearest_leaf(point)
    }

    /// Leaf whose bounds center is nearest to `point` (empty leaves last)
    pub(crate) fn nearest_leaf(&self, point: Vec3) -> NodeIndex {
        let mut best: Option<(NodeIndex, (bool, f32))> = None;
        for (i, node) in self.nodes.iter().enumerate() {
            if !node.is_leaf() || node.flags.contains(NodeFlags::DELETE) {
                continue;
            }
            let key = if node.bounds.is_valid() {
                (false, node.bounds.center().distance_squared(point))
            } else {
                (true, f32::INFINITY)
            };
            if best.is_none_or(|(_, best_key)| key < best_key) {
                best = Some((NodeIndex(i as u32), key));
            }
        }
        let best = best.map_or(NodeIndex::ROOT, |(index, _)| index);
        trace!("nearest_leaf: {:?} for {:?}", best, point);
        best
    }

    // ========================================================================
    // Bounds
    // ========================================================================

    /// Recompute one leaf's bounds from its faces and unique vertices
    pub(crate) fn recompute_leaf_bounds(&mut self, mesh: &DynMesh, index: NodeIndex) {
        let Some(node) = self.nodes.get(index.index()) else {
            return;
        };
        let Some(leaf) = node.leaf() else {
            return;
        };
        let update_original = node.flags.contains(NodeFlags::UPDATE_ORIGINAL_BB);

        let mut bounds = Aabb::empty();
        let mut original = Aabb::empty();
        let mut include = |v: VertexId| {
            if let Some(vertex) = mesh.vertex(v) {
                bounds.include_point(vertex.position);
                original.include_point(vertex.original_position);
            }
        };
        for &f in &leaf.faces {
            for &v in mesh.face_vertices(f) {
                include(v);
            }
        }
        for &v in &leaf.unique_vertices {
            include(v);
        }

        let node = &mut self.nodes[index.index()];
        node.bounds = bounds;
        if update_original {
            node.original_bounds = original;
        }
        node.flags
            .remove(NodeFlags::UPDATE_BB | NodeFlags::UPDATE_ORIGINAL_BB);
    }

    /// Refresh flagged leaf bounds, then aggregate every internal node
    /// bottom-up so each equals the union of its children.
    pub fn update_bounds(&mut self, mesh: &DynMesh) {
        for i in 0..self.nodes.len() {
            let node = &self.nodes[i];
            if node.is_leaf()
                && node
                    .flags
                    .intersects(NodeFlags::UPDATE_BB | NodeFlags::UPDATE_ORIGINAL_BB)
            {
                self.recompute_leaf_bounds(mesh, NodeIndex(i as u32));
            }
        }
        self.aggregate_internal_bounds();
    }

    /// Children are always stored after their parent, so a reverse sweep
    /// visits them first.
    pub(crate) fn aggregate_internal_bounds(&mut self) {
        for i in (0..self.nodes.len()).rev() {
            let Some([a, b]) = self.nodes[i].children() else {
                continue;
            };
            let (Some(na), Some(nb)) = (self.nodes.get(a.index()), self.nodes.get(b.index())) else {
                continue;
            };
            let bounds = na.bounds.union(&nb.bounds);
            let original = na.original_bounds.union(&nb.original_bounds);
            let node = &mut self.nodes[i];
            node.bounds = bounds;
            node.original_bounds = original;
            node.flags.remove(NodeFlags::UPDATE_BB);
        }
    }

    // ========================================================================
    // Dirty marking
    // ========================================================================

    /// Flag a leaf whose topology changed outside the tree's own operations
    pub fn mark_topology_dirty(&mut self, leaf: NodeIndex) {
        if self.is_leaf(leaf) {
            self.flag(leaf, NodeFlags::TOPOLOGY_CHANGED | NodeFlags::REBUILD_VERTS);
        }
    }

    /// Recompute `FULLY_HIDDEN` for leaves with stale topology.
    ///
    /// Visibility edits only reach the tree through `mark_topology_dirty`,
    /// so these are the only leaves whose flag can be out of date.
    pub(crate) fn refresh_hidden_flags(&mut self, mesh: &DynMesh) {
        for node in &mut self.nodes {
            if !node
                .flags
                .intersects(NodeFlags::UPDATE_TRIS | NodeFlags::REBUILD_VERTS)
            {
                continue;
            }
            let Some(leaf) = node.leaf() else {
                continue;
            };
            let hidden = all_faces_hidden(mesh, &leaf.sorted_faces());
            node.flags.set(NodeFlags::FULLY_HIDDEN, hidden);
        }
    }

    /// Flag leaves whose vertex coordinates moved
    pub fn mark_normals_dirty(&mut self, leaves: &[NodeIndex]) {
        for &leaf in leaves {
            if self.is_leaf(leaf) {
                self.flag(
                    leaf,
                    NodeFlags::UPDATE_NORMALS
                        | NodeFlags::UPDATE_BB
                        | NodeFlags::UPDATE_TRI_POSITIONS
                        | NodeFlags::UPDATE_DRAW_BUFFERS
                        | NodeFlags::UPDATE_REDRAW,
                );
            }
        }
    }

    /// Leaves whose draw buffers are stale; clears the flags
    pub fn take_draw_updates(&mut self) -> Vec<NodeIndex> {
        let mut out = Vec::new();
        for (i, node) in self.nodes.iter_mut().enumerate() {
            if node.is_leaf()
                && node
                    .flags
                    .intersects(NodeFlags::UPDATE_DRAW_BUFFERS | NodeFlags::UPDATE_REDRAW)
            {
                node.flags
                    .remove(NodeFlags::UPDATE_DRAW_BUFFERS | NodeFlags::UPDATE_REDRAW);
                out.push(NodeIndex(i as u32));
            }
        }
        out
    }

    /// Grow the owner table to cover ids the mesh has allocated since
    pub(crate) fn sync_capacity(&mut self, mesh: &DynMesh) {
        self.owners
            .ensure_capacity(mesh.vertex_id_bound(), mesh.face_id_bound());
    }
}
