//! Leaf splitting and finalization.
//!
//! Over-full leaves are split recursively at the midpoint of their face
//! centroids along the widest axis. Faces go to a side by centroid, the
//! parent's unique vertices by their own coordinate; the mismatch this
//! creates is repaired by the `REBUILD_VERTS` reconciliation.

use std::collections::HashMap;

use dyntopo_mesh::{DynMesh, FaceId, VertexId};
use glam::Vec3;
use tracing::{debug, trace, warn};

use crate::aabb::Aabb;
use crate::node::{LeafData, Node, NodeFlags, NodeIndex, NodeKind};
use crate::tree::Pbvh;

/// Axis and coordinate a group of faces is split at
#[derive(Debug, Clone, Copy)]
pub(crate) struct SplitPlane {
    pub axis: usize,
    pub mid: f32,
}

impl SplitPlane {
    /// Midpoint of the centroid bounds along their widest axis.
    ///
    /// `None` when there is nothing to bound or the midpoint is not
    /// finite (NaN coordinates).
    pub fn from_centroids(centroids: impl Iterator<Item = Vec3>) -> Option<Self> {
        let mut bounds = Aabb::empty();
        for c in centroids {
            bounds.include_point(c);
        }
        if !bounds.is_valid() {
            return None;
        }
        let axis = bounds.longest_axis();
        let mid = (bounds.min[axis] + bounds.max[axis]) * 0.5;
        mid.is_finite().then_some(Self { axis, mid })
    }

    #[inline]
    pub fn is_left(&self, point: Vec3) -> bool {
        point[self.axis] < self.mid
    }
}

/// Partition `items` into two non-empty groups.
///
/// Falls back to an index split when no usable plane exists, and moves one
/// item across when everything lands on the same side.
pub(crate) fn partition_by<T: Copy>(
    items: Vec<T>,
    plane: Option<SplitPlane>,
    centroid: impl Fn(T) -> Option<Vec3>,
) -> (Vec<T>, Vec<T>) {
    let (mut left, mut right): (Vec<T>, Vec<T>) = match plane {
        Some(plane) => items
            .into_iter()
            .partition(|&item| centroid(item).is_some_and(|c| plane.is_left(c))),
        None => {
            let mut left = items;
            let right = left.split_off(left.len() / 2);
            (left, right)
        }
    };

    if left.is_empty() {
        if let Some(item) = right.pop() {
            left.push(item);
        }
    } else if right.is_empty() {
        if let Some(item) = left.pop() {
            right.push(item);
        }
    }
    (left, right)
}

impl Pbvh {
    /// Split `index` if it holds more than `leaf_limit` faces.
    ///
    /// Returns true if the leaf was split. Leaves at `max_depth` are left
    /// alone so splitting always terminates.
    pub(crate) fn ensure_leaf_limit(&mut self, mesh: &DynMesh, index: NodeIndex) -> bool {
        let Some(node) = self.nodes.get(index.index()) else {
            return false;
        };
        let Some(leaf) = node.leaf() else {
            return false;
        };
        if leaf.faces.len() <= self.config.leaf_limit || node.depth >= self.config.max_depth {
            return false;
        }

        let centroids: HashMap<FaceId, Vec3> = leaf
            .faces
            .iter()
            .map(|&f| (f, mesh.face_centroid(f)))
            .collect();
        debug!(
            "ensure_leaf_limit: splitting {:?} with {} faces at depth {}",
            index,
            centroids.len(),
            node.depth
        );
        self.split_leaf(mesh, index, &centroids);
        true
    }

    fn split_leaf(&mut self, mesh: &DynMesh, index: NodeIndex, centroids: &HashMap<FaceId, Vec3>) {
        let node = &self.nodes[index.index()];
        let depth = node.depth;
        let Some(leaf) = node.leaf() else {
            return;
        };
        if leaf.faces.len() <= self.config.leaf_limit || depth >= self.config.max_depth {
            self.finalize_leaf(mesh, index);
            return;
        }

        let faces = leaf.sorted_faces();
        let plane = SplitPlane::from_centroids(faces.iter().filter_map(|f| centroids.get(f).copied()));
        if plane.is_none() {
            warn!(
                "split_leaf: non-finite centroid bounds in {:?}, splitting by index",
                index
            );
        }
        let (left_faces, right_faces) = partition_by(faces, plane, |f| centroids.get(&f).copied());

        // Detach the parent's contents before it becomes internal
        let NodeKind::Leaf(parent) = std::mem::replace(
            &mut self.nodes[index.index()].kind,
            NodeKind::Internal {
                children_offset: NodeIndex(0),
            },
        ) else {
            return;
        };

        let first = NodeIndex(self.nodes.len() as u32);
        let mut left = LeafData {
            faces: left_faces.iter().copied().collect(),
            ..Default::default()
        };
        let mut right = LeafData {
            faces: right_faces.iter().copied().collect(),
            ..Default::default()
        };

        let mut unique: Vec<VertexId> = parent.unique_vertices.into_iter().collect();
        unique.sort_unstable();
        for v in unique {
            let goes_left = match plane {
                Some(plane) => plane.is_left(mesh.position(v)),
                None => true,
            };
            if goes_left {
                left.unique_vertices.insert(v);
                self.owners.set_vertex(v, Some(first));
            } else {
                right.unique_vertices.insert(v);
                self.owners.set_vertex(v, Some(first.sibling_slot()));
            }
        }
        for f in left_faces.iter().chain(right_faces.iter()) {
            self.owners.set_face(*f, None);
        }

        for data in [left, right] {
            let mut child = Node::new_leaf(depth + 1);
            child.kind = NodeKind::Leaf(data);
            self.nodes.push(child);
        }
        self.nodes[index.index()].kind = NodeKind::Internal {
            children_offset: first,
        };
        trace!(
            "split_leaf: {:?} -> {:?} ({} faces) / {:?} ({} faces)",
            index,
            first,
            left_faces.len(),
            first.sibling_slot(),
            right_faces.len()
        );

        self.split_leaf(mesh, first, centroids);
        self.split_leaf(mesh, first.sibling_slot(), centroids);

        let a = &self.nodes[first.index()];
        let b = &self.nodes[first.sibling_slot().index()];
        let bounds = a.bounds.union(&b.bounds);
        let original = a.original_bounds.union(&b.original_bounds);
        let node = &mut self.nodes[index.index()];
        node.bounds = bounds;
        node.original_bounds = original;
        // Leaf-only bookkeeping does not apply to internal nodes
        node.flags = NodeFlags::UPDATE_REDRAW;
    }

    /// Finish a leaf after its face set changed wholesale.
    ///
    /// Assigns face owners, claims unowned vertices, classifies shared
    /// vertices as other, recomputes both bounds, updates the hidden flag
    /// and marks every derived cache dirty.
    pub(crate) fn finalize_leaf(&mut self, mesh: &DynMesh, index: NodeIndex) {
        let Some(leaf) = self.leaf(index) else {
            return;
        };
        let faces = leaf.sorted_faces();

        let mut claimed = Vec::new();
        let mut other = Vec::new();
        let mut bounds = Aabb::empty();
        let mut original = Aabb::empty();
        let mut has_visible = false;

        for &f in &faces {
            self.owners.set_face(f, Some(index));
            let Some(face) = mesh.face(f) else {
                continue;
            };
            has_visible |= !face.hidden;
            for &v in &face.verts {
                match self.owners.vertex(v) {
                    None => {
                        self.owners.set_vertex(v, Some(index));
                        claimed.push(v);
                    }
                    Some(owner) if owner == index => {}
                    Some(_) => other.push(v),
                }
                if let Some(vertex) = mesh.vertex(v) {
                    bounds.include_point(vertex.position);
                    original.include_point(vertex.original_position);
                }
            }
        }

        let Some(leaf) = self.leaf_mut(index) else {
            return;
        };
        leaf.unique_vertices.extend(claimed);
        leaf.other_vertices = other.into_iter().collect();
        leaf.triangulation = None;
        for &v in &leaf.unique_vertices {
            if let Some(vertex) = mesh.vertex(v) {
                bounds.include_point(vertex.position);
                original.include_point(vertex.original_position);
            }
        }

        let node = &mut self.nodes[index.index()];
        node.bounds = bounds;
        node.original_bounds = original;
        node.flags
            .set(NodeFlags::FULLY_HIDDEN, !faces.is_empty() && !has_visible);
        node.flags.remove(NodeFlags::UPDATE_BB | NodeFlags::UPDATE_ORIGINAL_BB);
        node.flags.insert(
            NodeFlags::UPDATE_NORMALS
                | NodeFlags::UPDATE_TRIS
                | NodeFlags::UPDATE_DRAW_BUFFERS
                | NodeFlags::UPDATE_REDRAW
                | NodeFlags::REBUILD_VERTS,
        );
    }
}
