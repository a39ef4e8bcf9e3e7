//! Post-edit maintenance: join, balance, compact.
//!
//! Edits accumulate structural drift: leaves emptied by deletions, siblings
//! whose bounds overlap after geometry moved, nodes pending removal.
//! [`Pbvh::after_edit_batch`] repairs all of it at stroke boundaries.

use dyntopo_mesh::{DynMesh, FaceId, VertexId};
use tracing::{debug, error, trace, warn};

use crate::node::{LeafData, NodeFlags, NodeIndex, NodeKind};
use crate::tree::Pbvh;

/// Geometry detached by a balance pass, waiting to be inserted again
#[derive(Debug, Default)]
pub(crate) struct PendingReinsert {
    pub faces: Vec<FaceId>,
    pub vertices: Vec<VertexId>,
}

impl PendingReinsert {
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty() && self.vertices.is_empty()
    }
}

impl Pbvh {
    /// Restore the tree's structural invariants after a batch of edits.
    ///
    /// Joins under-populated subtrees, rebalances overlapping siblings when
    /// `force_balance` is set or the balance interval elapsed, compacts the
    /// node array, re-inserts detached geometry and splits over-full
    /// leaves. Returns true when the node count changed.
    pub fn after_edit_batch(&mut self, mesh: &DynMesh, force_balance: bool) -> bool {
        let start_nodes = self.nodes.len();
        self.sync_capacity(mesh);
        self.update_bounds(mesh);
        self.reconcile_flagged(mesh);

        let mut structure_changed = self.correct_tree(NodeIndex::ROOT);

        self.batches_since_balance += 1;
        let interval = self.config.balance_interval;
        let mut pending = PendingReinsert::default();
        if force_balance || (interval > 0 && self.batches_since_balance >= interval) {
            structure_changed |= self.balance_tree(&mut pending);
            self.batches_since_balance = 0;
        }

        structure_changed |= self.repair_structure(mesh, pending);

        if self.config.validate_after_batch && cfg!(debug_assertions) {
            if let Err(err) = self.validate(mesh) {
                error!("after_edit_batch: tree invariant violated: {}", err);
                debug_assert!(false, "tree invariant violated: {err}");
            }
        }

        let changed = self.nodes.len() != start_nodes;
        debug!(
            "after_edit_batch: {} -> {} nodes (structure changed: {})",
            start_nodes,
            self.nodes.len(),
            structure_changed
        );
        changed
    }

    /// Compact, refill and split after join and balance, then bring vertex
    /// sets and bounds up to date.
    pub(crate) fn repair_structure(&mut self, mesh: &DynMesh, pending: PendingReinsert) -> bool {
        let mut changed = self.compact();
        self.reacquire_other_vertices();
        changed |= self.patch_orphan_leaves(mesh);
        self.reinsert_pending(mesh, pending);

        // Split anything still over the limit; newly appended children are
        // visited too but are already within it
        let mut i = 0;
        while i < self.nodes.len() {
            changed |= self.ensure_leaf_limit(mesh, NodeIndex(i as u32));
            i += 1;
        }

        self.reconcile_flagged(mesh);
        self.update_bounds(mesh);
        changed
    }

    // ========================================================================
    // Join
    // ========================================================================

    /// Join every subtree holding fewer than `leaf_limit / 2` faces
    pub(crate) fn correct_tree(&mut self, index: NodeIndex) -> bool {
        let Some(children) = self.nodes[index.index()].children() else {
            return false;
        };
        if self.subtree_face_count(index) < self.config.join_threshold() {
            self.join_subtree(index);
            return true;
        }
        let mut changed = false;
        for child in children {
            changed |= self.correct_tree(child);
        }
        changed
    }

    /// Collapse the subtree below `index` into a single leaf.
    ///
    /// Descendants are flagged for deletion and removed by compaction.
    fn join_subtree(&mut self, index: NodeIndex) {
        let mut merged = LeafData::default();
        let mut stack: Vec<NodeIndex> = self.nodes[index.index()].children().into_iter().flatten().collect();
        let mut removed = 0usize;

        while let Some(i) = stack.pop() {
            let node = &mut self.nodes[i.index()];
            node.flags.insert(NodeFlags::DELETE);
            removed += 1;
            match std::mem::replace(&mut node.kind, NodeKind::Leaf(LeafData::default())) {
                NodeKind::Leaf(leaf) => {
                    merged.faces.extend(leaf.faces);
                    merged.unique_vertices.extend(leaf.unique_vertices);
                    merged.other_vertices.extend(leaf.other_vertices);
                }
                NodeKind::Internal { children_offset } => {
                    stack.push(children_offset);
                    stack.push(children_offset.sibling_slot());
                }
            }
        }

        let unique = &merged.unique_vertices;
        merged.other_vertices.retain(|v| !unique.contains(v));
        for &f in &merged.faces {
            self.owners.set_face(f, Some(index));
        }
        for &v in &merged.unique_vertices {
            self.owners.set_vertex(v, Some(index));
        }

        debug!(
            "join_subtree: {:?} absorbs {} nodes ({} faces)",
            index,
            removed,
            merged.faces.len()
        );
        let node = &mut self.nodes[index.index()];
        node.kind = NodeKind::Leaf(merged);
        node.flags.insert(NodeFlags::UPDATE_ALL | NodeFlags::REBUILD_VERTS);
    }

    // ========================================================================
    // Balance
    // ========================================================================

    /// Dissolve subtrees whose children overlap too much or where a child
    /// holds no faces. Their contents go to `pending`.
    pub(crate) fn balance_tree(&mut self, pending: &mut PendingReinsert) -> bool {
        let mut changed = false;
        let mut stack = vec![NodeIndex::ROOT];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index.index()];
            let Some([a, b]) = node.children() else {
                continue;
            };
            let depth = node.depth;
            let bounds_a = self.nodes[a.index()].bounds;
            let bounds_b = self.nodes[b.index()].bounds;

            let volume = bounds_a.volume() + bounds_b.volume();
            let overlap = bounds_a.intersection(&bounds_b).volume();
            // Flat geometry has no volume to overlap
            let ratio = if volume > 0.0 { overlap / volume } else { 0.0 };
            let empty_child = self.subtree_face_count(a) == 0 || self.subtree_face_count(b) == 0;

            if ratio > self.config.overlap_factor_at(depth) || empty_child {
                trace!(
                    "balance_tree: dissolving {:?} (overlap ratio {:.3}, empty child {})",
                    index,
                    ratio,
                    empty_child
                );
                self.dissolve_subtree(index, pending);
                changed = true;
            } else {
                stack.push(a);
                stack.push(b);
            }
        }
        if changed {
            debug!(
                "balance_tree: queued {} faces and {} vertices for re-insertion",
                pending.faces.len(),
                pending.vertices.len()
            );
        }
        changed
    }

    /// Detach everything below `index`, leaving it an empty leaf that
    /// keeps its bounds.
    fn dissolve_subtree(&mut self, index: NodeIndex, pending: &mut PendingReinsert) {
        let mut stack: Vec<NodeIndex> = self.nodes[index.index()].children().into_iter().flatten().collect();
        while let Some(i) = stack.pop() {
            let node = &mut self.nodes[i.index()];
            node.flags.insert(NodeFlags::DELETE);
            match std::mem::replace(&mut node.kind, NodeKind::Leaf(LeafData::default())) {
                NodeKind::Leaf(leaf) => {
                    let mut faces: Vec<FaceId> = leaf.faces.into_iter().collect();
                    faces.sort_unstable();
                    for f in faces {
                        match self.owners.face(f) {
                            Some(owner) if owner == i => self.owners.set_face(f, None),
                            owner => warn!(
                                "dissolve_subtree: face {:?} in {:?} has owner entry {:?}",
                                f, i, owner
                            ),
                        }
                        pending.faces.push(f);
                    }
                    let mut verts: Vec<VertexId> = leaf.unique_vertices.into_iter().collect();
                    verts.sort_unstable();
                    for v in verts {
                        self.owners.set_vertex(v, None);
                        pending.vertices.push(v);
                    }
                }
                NodeKind::Internal { children_offset } => {
                    stack.push(children_offset);
                    stack.push(children_offset.sibling_slot());
                }
            }
        }

        let node = &mut self.nodes[index.index()];
        node.kind = NodeKind::Leaf(LeafData::default());
        node.flags = NodeFlags::UPDATE_ALL;
    }

    // ========================================================================
    // Compaction
    // ========================================================================

    /// Remove nodes flagged for deletion and remap child offsets.
    ///
    /// Ownership is rebuilt from the surviving leaves afterwards. Returns
    /// true if any node was removed.
    pub(crate) fn compact(&mut self) -> bool {
        let old_len = self.nodes.len();
        let mut remap: Vec<Option<NodeIndex>> = Vec::with_capacity(old_len);
        let mut next = 0u32;
        for node in &self.nodes {
            if node.flags.contains(NodeFlags::DELETE) {
                remap.push(None);
            } else {
                remap.push(Some(NodeIndex(next)));
                next += 1;
            }
        }
        if next as usize == old_len {
            return false;
        }

        let old_nodes = std::mem::take(&mut self.nodes);
        self.nodes = old_nodes
            .into_iter()
            .filter(|n| !n.flags.contains(NodeFlags::DELETE))
            .collect();

        for (i, node) in self.nodes.iter_mut().enumerate() {
            let NodeKind::Internal { children_offset } = node.kind else {
                continue;
            };
            let first = remap.get(children_offset.index()).copied().flatten();
            let second = remap
                .get(children_offset.sibling_slot().index())
                .copied()
                .flatten();
            match (first, second) {
                (Some(a), Some(b)) if b.0 == a.0 + 1 => {
                    node.kind = NodeKind::Internal { children_offset: a };
                }
                _ => {
                    error!(
                        "compact: node {} lost its children (offset {:?}), converting to leaf",
                        i, children_offset
                    );
                    node.kind = NodeKind::Leaf(LeafData::default());
                    node.flags.insert(NodeFlags::UPDATE_ALL);
                }
            }
        }

        // Leaf indices moved: rebuild every owner entry from the leaf sets
        self.owners.clear();
        for i in 0..self.nodes.len() {
            let index = NodeIndex(i as u32);
            let Some(leaf) = self.nodes[i].leaf() else {
                continue;
            };
            let faces: Vec<FaceId> = leaf.faces.iter().copied().collect();
            let verts: Vec<VertexId> = leaf.unique_vertices.iter().copied().collect();
            for f in faces {
                self.owners.set_face(f, Some(index));
            }
            for v in verts {
                self.owners.set_vertex(v, Some(index));
            }
            self.nodes[i].flags.insert(NodeFlags::UPDATE_DRAW_BUFFERS);
        }

        debug!("compact: {} -> {} nodes", old_len, self.nodes.len());
        true
    }

    /// Claim "other" vertices whose unique owner disappeared
    pub(crate) fn reacquire_other_vertices(&mut self) {
        let mut reacquired = 0usize;
        for i in 0..self.nodes.len() {
            let index = NodeIndex(i as u32);
            let Some(leaf) = self.nodes[i].leaf() else {
                continue;
            };
            let mut orphaned: Vec<VertexId> = leaf
                .other_vertices
                .iter()
                .copied()
                .filter(|&v| self.owners.vertex(v).is_none())
                .collect();
            if orphaned.is_empty() {
                continue;
            }
            orphaned.sort_unstable();
            for &v in &orphaned {
                self.owners.set_vertex(v, Some(index));
            }
            if let Some(leaf) = self.leaf_mut(index) {
                for v in &orphaned {
                    leaf.other_vertices.remove(v);
                    leaf.unique_vertices.insert(*v);
                }
            }
            self.flag(index, NodeFlags::UPDATE_BB | NodeFlags::UPDATE_NORMALS);
            reacquired += orphaned.len();
        }
        if reacquired > 0 {
            trace!("reacquire_other_vertices: {} vertices", reacquired);
        }
    }

    /// Give every empty non-root leaf one face stolen from its sibling
    /// subtree, so no leaf survives without geometry.
    pub(crate) fn patch_orphan_leaves(&mut self, mesh: &DynMesh) -> bool {
        let empty: Vec<NodeIndex> = (1..self.nodes.len())
            .map(|i| NodeIndex(i as u32))
            .filter(|&i| self.leaf(i).is_some_and(|l| l.faces.is_empty()))
            .collect();
        if empty.is_empty() {
            return false;
        }

        let parents = self.parent_map();
        let mut patched = false;
        for orphan in empty {
            let Some(parent) = parents[orphan.index()] else {
                continue;
            };
            let Some([a, b]) = self.nodes[parent.index()].children() else {
                continue;
            };
            let sibling = if a == orphan { b } else { a };
            let Some(donor) = self.find_donor_leaf(sibling) else {
                warn!(
                    "patch_orphan_leaves: no donor for empty leaf {:?} under {:?}",
                    orphan, sibling
                );
                continue;
            };
            let Some(face) = self.leaf(donor).and_then(|l| l.faces.iter().min().copied()) else {
                continue;
            };
            self.move_face(mesh, face, donor, orphan);
            patched = true;
            trace!(
                "patch_orphan_leaves: moved {:?} from {:?} to {:?}",
                face, donor, orphan
            );
        }
        patched
    }

    /// Leaf with the most faces (at least two) below `index`
    fn find_donor_leaf(&self, index: NodeIndex) -> Option<NodeIndex> {
        let mut best: Option<(NodeIndex, usize)> = None;
        let mut stack = vec![index];
        while let Some(i) = stack.pop() {
            match &self.nodes[i.index()].kind {
                NodeKind::Leaf(leaf) => {
                    let count = leaf.faces.len();
                    if count >= 2 && best.is_none_or(|(_, c)| count > c) {
                        best = Some((i, count));
                    }
                }
                NodeKind::Internal { children_offset } => {
                    stack.push(*children_offset);
                    stack.push(children_offset.sibling_slot());
                }
            }
        }
        best.map(|(i, _)| i)
    }

    /// Move a face between leaves along with the vertices only it used
    fn move_face(&mut self, mesh: &DynMesh, face: FaceId, from: NodeIndex, to: NodeIndex) {
        if let Some(leaf) = self.leaf_mut(from) {
            leaf.faces.remove(&face);
        }
        self.owners.set_face(face, None);

        for &v in mesh.face_vertices(face) {
            let still_used = self.leaf_use_count(mesh, from, v) > 0;
            if self.owners.vertex(v) == Some(from) && !still_used {
                // Hand the vertex over before the face lands in `to`
                if let Some(leaf) = self.leaf_mut(from) {
                    leaf.unique_vertices.remove(&v);
                }
                self.owners.set_vertex(v, None);
            }
            if !still_used {
                if let Some(leaf) = self.leaf_mut(from) {
                    leaf.other_vertices.remove(&v);
                }
            }
        }

        self.add_face_to_leaf(mesh, face, to);
        self.flag(from, NodeFlags::TOPOLOGY_CHANGED);
        self.flag(to, NodeFlags::UPDATE_ALL);
    }

    /// Insert balance leftovers: faces by tree walk, loose vertices by
    /// point search.
    fn reinsert_pending(&mut self, mesh: &DynMesh, pending: PendingReinsert) {
        if pending.is_empty() {
            return;
        }
        let mut faces = 0usize;
        for f in pending.faces {
            if mesh.is_face_alive(f) && self.owners.face(f).is_none() {
                self.insert_face_tree_walk(mesh, f);
                faces += 1;
            }
        }
        let mut vertices = 0usize;
        for v in pending.vertices {
            if let Some(vertex) = mesh.vertex(v) {
                if self.owners.vertex(v).is_none() {
                    self.adopt_vertex(mesh, v, vertex.position);
                    vertices += 1;
                }
            }
        }
        debug!(
            "reinsert_pending: {} faces, {} loose vertices",
            faces, vertices
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aabb::Aabb;
    use crate::test_support::{assert_consistent, grid_tree};
    use dyntopo_mesh::primitives::subdivided_box;
    use dyntopo_mesh::FaceAttributes;
    use glam::Vec3;

    #[test]
    fn test_deleting_region_joins_and_compacts() {
        let (mut mesh, mut pbvh) = grid_tree(10, 10, 8);
        let before = pbvh.node_count();

        // Remove a 5x5 block of faces
        for y in 0..5 {
            for x in 0..5 {
                let face = FaceId((y * 10 + x) as u32);
                assert!(pbvh.remove_face(&mesh, face));
                mesh.remove_face(face);
            }
        }
        assert!(pbvh.after_edit_batch(&mesh, true));
        assert!(pbvh.node_count() < before);
        assert_eq!(pbvh.total_face_count(), 75);
        assert_eq!(pbvh.stats().empty_leaves, 0);
        assert!(pbvh
            .nodes()
            .iter()
            .all(|n| !n.flags.contains(NodeFlags::DELETE)));
        assert_consistent(&mesh, &pbvh);
    }

    #[test]
    fn test_join_under_populated_subtree() {
        let (mut mesh, mut pbvh) = grid_tree(4, 2, 4);
        assert_eq!(pbvh.node_count(), 3);
        // One face left is below the join threshold of 4 / 2
        for f in 0..7 {
            pbvh.remove_face(&mesh, FaceId(f));
            mesh.remove_face(FaceId(f));
        }
        assert!(pbvh.after_edit_batch(&mesh, false));
        assert_eq!(pbvh.node_count(), 1);
        assert_eq!(pbvh.total_face_count(), 1);
        assert_consistent(&mesh, &pbvh);
    }

    #[test]
    fn test_forced_balance_on_box_conserves_faces() {
        let mesh = subdivided_box(6, 1.0);
        let mut pbvh = crate::Pbvh::build_with_leaf_limit(&mesh, 16).unwrap();
        let faces = mesh.face_count();
        pbvh.after_edit_batch(&mesh, true);
        assert_eq!(pbvh.total_face_count(), faces);
        assert_consistent(&mesh, &pbvh);
    }

    fn subtree_faces(pbvh: &Pbvh, index: NodeIndex) -> Vec<FaceId> {
        let mut out = Vec::new();
        let mut stack = vec![index];
        while let Some(i) = stack.pop() {
            match &pbvh.nodes[i.index()].kind {
                NodeKind::Leaf(leaf) => out.extend(leaf.faces.iter().copied()),
                NodeKind::Internal { children_offset } => {
                    stack.push(*children_offset);
                    stack.push(children_offset.sibling_slot());
                }
            }
        }
        out
    }

    /// Give the children of `parent` boxes whose overlap ratio is 0.3
    fn overlap_children(pbvh: &mut Pbvh, parent: NodeIndex) -> [NodeIndex; 2] {
        let [a, b] = pbvh.nodes[parent.index()].children().unwrap();
        pbvh.nodes[a.index()].bounds = Aabb::new(Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0));
        pbvh.nodes[b.index()].bounds =
            Aabb::new(Vec3::new(0.8, 0.0, 0.0), Vec3::new(2.8, 1.0, 1.0));
        [a, b]
    }

    #[test]
    fn test_root_tolerates_moderate_overlap() {
        let (_, mut pbvh) = grid_tree(4, 2, 4);
        assert_eq!(pbvh.node_count(), 3);
        overlap_children(&mut pbvh, NodeIndex::ROOT);

        let mut pending = PendingReinsert::default();
        assert!(!pbvh.balance_tree(&mut pending));
        assert!(pending.is_empty());
        assert_eq!(pbvh.node_count(), 3);
        assert!(!pbvh.nodes[0].is_leaf());
    }

    #[test]
    fn test_overlap_below_root_dissolves_and_reinserts() {
        let (mesh, mut pbvh) = grid_tree(8, 2, 4);
        let [left, right] = pbvh.nodes[0].children().unwrap();
        assert!(!pbvh.nodes[left.index()].is_leaf());
        assert_eq!(pbvh.nodes[left.index()].depth, 1);
        let [first, _] = overlap_children(&mut pbvh, left);
        let mut detached = subtree_faces(&pbvh, left);
        detached.sort_unstable();
        assert_eq!(detached.len(), 8);

        // A face with a stale owner entry still leaves with its subtree
        let stale = pbvh.leaf(first).unwrap().sorted_faces()[0];
        pbvh.owners.set_face(stale, None);

        let mut pending = PendingReinsert::default();
        assert!(pbvh.balance_tree(&mut pending));
        let mut queued = pending.faces.clone();
        queued.sort_unstable();
        assert_eq!(queued, detached);
        assert!(pbvh.nodes[left.index()].is_leaf());
        assert_eq!(pbvh.nodes[left.index()].face_count(), 0);
        // The sibling subtree was flat and stays untouched
        assert!(!pbvh.nodes[right.index()].is_leaf());

        pbvh.repair_structure(&mesh, pending);
        assert_eq!(pbvh.total_face_count(), 16);
        for f in detached {
            let owner = pbvh.face_owner(f).unwrap();
            assert!(pbvh.leaf(owner).unwrap().faces.contains(&f));
        }
        assert_eq!(pbvh.stats().empty_leaves, 0);
        assert_consistent(&mesh, &pbvh);
    }

    #[test]
    fn test_forced_balance_on_flat_grid_keeps_faces() {
        let (mesh, mut pbvh) = grid_tree(10, 10, 8);
        let leaves_before = pbvh.stats().leaves;
        pbvh.after_edit_batch(&mesh, true);
        // Flat siblings have zero volume, so nothing is dissolved
        assert_eq!(pbvh.stats().leaves, leaves_before);
        assert_eq!(pbvh.total_face_count(), 100);
    }

    #[test]
    fn test_balance_interval() {
        let (mesh, mut pbvh) = grid_tree(4, 4, 4);
        pbvh.config.balance_interval = 3;
        pbvh.after_edit_batch(&mesh, false);
        pbvh.after_edit_batch(&mesh, false);
        assert_eq!(pbvh.batches_since_balance, 2);
        pbvh.after_edit_batch(&mesh, false);
        assert_eq!(pbvh.batches_since_balance, 0);
    }

    #[test]
    fn test_growth_splits_leaf() {
        let (mut mesh, mut pbvh) = grid_tree(2, 2, 4);
        assert_eq!(pbvh.node_count(), 1);
        // Add a row of triangles above the grid
        for x in 0..3 {
            let top = pbvh.create_vertex(&mut mesh, Vec3::new(x as f32 + 0.5, 3.0, 0.0), Vec3::Z);
            let a = dyntopo_mesh::primitives::grid_vertex(2, x.min(1), 2);
            let b = dyntopo_mesh::primitives::grid_vertex(2, x.min(1) + 1, 2);
            let face = mesh.add_face(&[a, b, top], FaceAttributes::default()).unwrap();
            pbvh.insert_face(&mesh, face);
        }
        assert!(pbvh.after_edit_batch(&mesh, false));
        assert!(pbvh.stats().max_leaf_faces <= 4);
        assert_eq!(pbvh.total_face_count(), 7);
        assert_consistent(&mesh, &pbvh);
    }
}
