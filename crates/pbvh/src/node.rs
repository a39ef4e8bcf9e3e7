//! Tree nodes and their update flags.

use std::collections::HashSet;

use dyntopo_mesh::{FaceId, VertexId};
use serde::{Deserialize, Serialize};

use crate::aabb::Aabb;
use crate::triangulation::Triangulation;

/// Index of a node in the tree's node array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    pub const ROOT: NodeIndex = NodeIndex(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The second child of a pair starting at `self`
    #[inline]
    pub fn sibling_slot(self) -> NodeIndex {
        NodeIndex(self.0 + 1)
    }
}

bitflags::bitflags! {
    /// Independent bookkeeping bits carried by every node.
    ///
    /// Structural kind lives in [`NodeKind`]; these only track what needs to
    /// be recomputed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeFlags: u32 {
        const UPDATE_BB = 1 << 0;
        const UPDATE_ORIGINAL_BB = 1 << 1;
        const UPDATE_NORMALS = 1 << 2;
        const UPDATE_TRIS = 1 << 3;
        /// Coordinates changed but topology did not
        const UPDATE_TRI_POSITIONS = 1 << 4;
        const UPDATE_DRAW_BUFFERS = 1 << 5;
        const UPDATE_REDRAW = 1 << 6;
        const UPDATE_OTHER_VERTS = 1 << 7;
        /// Unique/other vertex sets must be reconciled with the leaf's faces
        const REBUILD_VERTS = 1 << 8;
        const FULLY_HIDDEN = 1 << 9;
        /// Pending removal by compaction
        const DELETE = 1 << 10;

        /// Everything a leaf needs after its contents were rebuilt
        const UPDATE_ALL = Self::UPDATE_BB.bits()
            | Self::UPDATE_ORIGINAL_BB.bits()
            | Self::UPDATE_NORMALS.bits()
            | Self::UPDATE_TRIS.bits()
            | Self::UPDATE_DRAW_BUFFERS.bits()
            | Self::UPDATE_REDRAW.bits()
            | Self::UPDATE_OTHER_VERTS.bits();

        /// What a topology change inside a leaf invalidates
        const TOPOLOGY_CHANGED = Self::UPDATE_BB.bits()
            | Self::UPDATE_NORMALS.bits()
            | Self::UPDATE_TRIS.bits()
            | Self::UPDATE_DRAW_BUFFERS.bits()
            | Self::UPDATE_REDRAW.bits()
            | Self::UPDATE_OTHER_VERTS.bits();
    }
}

/// Per-leaf membership and caches
#[derive(Debug, Clone, Default)]
pub struct LeafData {
    /// Vertices this leaf is the unique owner of
    pub unique_vertices: HashSet<VertexId>,
    /// Vertices used by this leaf's faces but owned by another leaf
    pub other_vertices: HashSet<VertexId>,
    pub faces: HashSet<FaceId>,
    /// Lazily rebuilt; `None` until first requested
    pub triangulation: Option<Triangulation>,
}

impl LeafData {
    /// Faces in ascending id order
    pub fn sorted_faces(&self) -> Vec<FaceId> {
        let mut faces: Vec<FaceId> = self.faces.iter().copied().collect();
        faces.sort_unstable();
        faces
    }

    /// Unique vertices in ascending id order
    pub fn sorted_unique_vertices(&self) -> Vec<VertexId> {
        let mut verts: Vec<VertexId> = self.unique_vertices.iter().copied().collect();
        verts.sort_unstable();
        verts
    }
}

/// Structural kind of a node
#[derive(Debug, Clone)]
pub enum NodeKind {
    Leaf(LeafData),
    /// Children live at `children_offset` and `children_offset + 1`
    Internal { children_offset: NodeIndex },
}

/// A node of the bounding volume hierarchy
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub flags: NodeFlags,
    /// Current bounds; for internal nodes the union of both children
    pub bounds: Aabb,
    /// Bounds of the original (pre-edit) positions
    pub original_bounds: Aabb,
    pub depth: u32,
}

impl Node {
    pub fn new_leaf(depth: u32) -> Self {
        Self {
            kind: NodeKind::Leaf(LeafData::default()),
            flags: NodeFlags::empty(),
            bounds: Aabb::empty(),
            original_bounds: Aabb::empty(),
            depth,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }

    pub fn leaf(&self) -> Option<&LeafData> {
        match &self.kind {
            NodeKind::Leaf(leaf) => Some(leaf),
            NodeKind::Internal { .. } => None,
        }
    }

    pub fn leaf_mut(&mut self) -> Option<&mut LeafData> {
        match &mut self.kind {
            NodeKind::Leaf(leaf) => Some(leaf),
            NodeKind::Internal { .. } => None,
        }
    }

    /// Both child indices of an internal node
    pub fn children(&self) -> Option<[NodeIndex; 2]> {
        match self.kind {
            NodeKind::Internal { children_offset } => {
                Some([children_offset, children_offset.sibling_slot()])
            }
            NodeKind::Leaf(_) => None,
        }
    }

    /// Number of faces held directly (zero for internal nodes)
    pub fn face_count(&self) -> usize {
        self.leaf().map_or(0, |leaf| leaf.faces.len())
    }
}
