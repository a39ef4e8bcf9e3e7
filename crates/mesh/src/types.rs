//! Type definitions for the dynamic mesh.

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Type-safe vertex identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexId(pub u32);

/// Type-safe edge identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub u32);

/// Type-safe face identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FaceId(pub u32);

impl VertexId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl EdgeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl FaceId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A vertex in the mesh
#[derive(Debug, Clone)]
pub struct Vertex {
    pub id: VertexId,
    pub position: Vec3,
    pub normal: Vec3,
    /// Position captured at the start of the current edit (stroke)
    pub original_position: Vec3,
    /// Disk cycle: every live edge using this vertex
    pub edges: SmallVec<[EdgeId; 8]>,
    pub hidden: bool,
    pub(crate) alive: bool,
}

impl Vertex {
    pub fn is_alive(&self) -> bool {
        self.alive
    }
}

/// An undirected edge
#[derive(Debug, Clone)]
pub struct Edge {
    pub id: EdgeId,
    pub verts: [VertexId; 2],
    /// Radial cycle: every live face using this edge
    pub faces: SmallVec<[FaceId; 2]>,
    pub(crate) alive: bool,
}

impl Edge {
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// The endpoint that is not `v` (or `v` itself if the edge is degenerate)
    pub fn other_vertex(&self, v: VertexId) -> VertexId {
        if self.verts[0] == v {
            self.verts[1]
        } else {
            self.verts[0]
        }
    }

    pub fn uses_vertex(&self, v: VertexId) -> bool {
        self.verts[0] == v || self.verts[1] == v
    }
}

/// A polygon face
#[derive(Debug, Clone)]
pub struct Face {
    pub id: FaceId,
    /// Corner vertices in winding order
    pub verts: SmallVec<[VertexId; 4]>,
    /// `edges[i]` joins `verts[i]` and `verts[(i + 1) % n]`
    pub edges: SmallVec<[EdgeId; 4]>,
    /// Per-corner UVs, parallel to `verts`
    pub uvs: Option<SmallVec<[Vec2; 4]>>,
    /// Cached face normal
    pub normal: Vec3,
    pub material: u16,
    pub face_set: i32,
    pub hidden: bool,
    pub(crate) alive: bool,
}

impl Face {
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn len(&self) -> usize {
        self.verts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verts.is_empty()
    }

    /// UV of the given corner, or zero when the mesh carries no UVs
    pub fn corner_uv(&self, corner: usize) -> Vec2 {
        self.uvs
            .as_ref()
            .and_then(|uvs| uvs.get(corner).copied())
            .unwrap_or(Vec2::ZERO)
    }
}

/// Per-face attributes supplied at creation
#[derive(Debug, Clone, Default)]
pub struct FaceAttributes {
    pub uvs: Option<Vec<Vec2>>,
    pub material: u16,
    pub face_set: i32,
    pub hidden: bool,
}

/// Errors that can occur during mesh operations
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("Face needs at least 3 corners, got {0}")]
    TooFewCorners(usize),
    #[error("Face references missing or removed vertex {0:?}")]
    MissingVertex(VertexId),
    #[error("Face repeats vertex {0:?}")]
    RepeatedVertex(VertexId),
    #[error("Face has {uvs} UVs for {corners} corners")]
    UvCountMismatch { corners: usize, uvs: usize },
    #[error("Index count {0} is not divisible by 3")]
    BadIndexCount(usize),
    #[error("Invalid mesh topology: {0}")]
    InvalidTopology(String),
}
