//! Structural consistency checks.

use std::collections::HashMap;

use dyntopo_config::ConfigError;
use dyntopo_mesh::{DynMesh, FaceId, VertexId};
use glam::Vec3;
use thiserror::Error;

use crate::aabb::Aabb;
use crate::node::{NodeFlags, NodeIndex, NodeKind};
use crate::tree::Pbvh;

/// Slack allowed when checking that bounds contain their geometry
const BOUNDS_EPSILON: f32 = 1e-4;

/// Errors produced by tree construction and consistency checks
#[derive(Debug, Error)]
pub enum PbvhError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("node {0:?} is still flagged for deletion")]
    PendingDelete(NodeIndex),

    #[error("node {node:?} has children at {children:?}, outside 0..{len} or not after the parent")]
    ChildOutOfRange {
        node: NodeIndex,
        children: NodeIndex,
        len: usize,
    },

    #[error("face {face:?} is in leaf {leaf:?} but its owner entry names {owner:?}")]
    FaceOwnerMismatch {
        face: FaceId,
        leaf: NodeIndex,
        owner: Option<NodeIndex>,
    },

    #[error("face {face:?} is held by both {first:?} and {second:?}")]
    FaceOwnedTwice {
        face: FaceId,
        first: NodeIndex,
        second: NodeIndex,
    },

    #[error("face {face:?} is not held by any leaf")]
    UnownedFace { face: FaceId },

    #[error("leaf {leaf:?} holds removed face {face:?}")]
    DeadFace { face: FaceId, leaf: NodeIndex },

    #[error("vertex {vertex:?} is unique to leaf {leaf:?} but its owner entry names {owner:?}")]
    VertexOwnerMismatch {
        vertex: VertexId,
        leaf: NodeIndex,
        owner: Option<NodeIndex>,
    },

    #[error("vertex {vertex:?} is unique to both {first:?} and {second:?}")]
    VertexOwnedTwice {
        vertex: VertexId,
        first: NodeIndex,
        second: NodeIndex,
    },

    #[error("vertex {vertex:?} has faces but no unique owner")]
    UnownedVertex { vertex: VertexId },

    #[error("leaf {leaf:?} holds removed vertex {vertex:?}")]
    DeadVertex { vertex: VertexId, leaf: NodeIndex },

    #[error("leaf {leaf:?} uses vertex {vertex:?} but lists it as neither unique nor other")]
    MissingSharedVertex { vertex: VertexId, leaf: NodeIndex },

    #[error("leaf {leaf:?} lists vertex {vertex:?} as other although it owns it")]
    OtherVertexOwnedHere { vertex: VertexId, leaf: NodeIndex },

    #[error("bounds of node {node:?} do not contain {what}")]
    BoundsMismatch { node: NodeIndex, what: String },

    #[error("leaf {leaf:?} holds {faces} faces at depth {depth}, over the limit of {limit}")]
    LeafOverLimit {
        leaf: NodeIndex,
        faces: usize,
        depth: u32,
        limit: usize,
    },
}

fn contains_with_slack(bounds: &Aabb, point: Vec3) -> bool {
    let slack = Vec3::splat(BOUNDS_EPSILON);
    bounds.is_valid()
        && point.cmpge(bounds.min - slack).all()
        && point.cmple(bounds.max + slack).all()
}

fn encloses(outer: &Aabb, inner: &Aabb) -> bool {
    !inner.is_valid() || (contains_with_slack(outer, inner.min) && contains_with_slack(outer, inner.max))
}

impl Pbvh {
    /// Check every structural invariant against `mesh`.
    ///
    /// Returns the first violation found. Intended for tests and debug
    /// builds; the walk touches every node, face and vertex.
    pub fn validate(&self, mesh: &DynMesh) -> Result<(), PbvhError> {
        let len = self.nodes.len();
        let mut face_seen: HashMap<FaceId, NodeIndex> = HashMap::new();
        let mut vertex_seen: HashMap<VertexId, NodeIndex> = HashMap::new();

        for (i, node) in self.nodes.iter().enumerate() {
            let index = NodeIndex(i as u32);
            if node.flags.contains(NodeFlags::DELETE) {
                return Err(PbvhError::PendingDelete(index));
            }

            let leaf = match &node.kind {
                NodeKind::Internal { children_offset } => {
                    let first = children_offset.index();
                    if first <= i || first + 1 >= len {
                        return Err(PbvhError::ChildOutOfRange {
                            node: index,
                            children: *children_offset,
                            len,
                        });
                    }
                    for child in [first, first + 1] {
                        let child_bounds = &self.nodes[child].bounds;
                        if !encloses(&node.bounds, child_bounds) {
                            return Err(PbvhError::BoundsMismatch {
                                node: index,
                                what: format!("child {child}"),
                            });
                        }
                    }
                    continue;
                }
                NodeKind::Leaf(leaf) => leaf,
            };

            if leaf.faces.len() > self.config.leaf_limit && node.depth < self.config.max_depth {
                return Err(PbvhError::LeafOverLimit {
                    leaf: index,
                    faces: leaf.faces.len(),
                    depth: node.depth,
                    limit: self.config.leaf_limit,
                });
            }

            for f in leaf.sorted_faces() {
                let Some(face) = mesh.face(f) else {
                    return Err(PbvhError::DeadFace { face: f, leaf: index });
                };
                let owner = self.owners.face(f);
                if owner != Some(index) {
                    return Err(PbvhError::FaceOwnerMismatch {
                        face: f,
                        leaf: index,
                        owner,
                    });
                }
                if let Some(first) = face_seen.insert(f, index) {
                    return Err(PbvhError::FaceOwnedTwice {
                        face: f,
                        first,
                        second: index,
                    });
                }
                for &v in &face.verts {
                    if !leaf.unique_vertices.contains(&v) && !leaf.other_vertices.contains(&v) {
                        return Err(PbvhError::MissingSharedVertex { vertex: v, leaf: index });
                    }
                    if !contains_with_slack(&node.bounds, mesh.position(v)) {
                        return Err(PbvhError::BoundsMismatch {
                            node: index,
                            what: format!("vertex {v:?} of face {f:?}"),
                        });
                    }
                }
            }

            for v in leaf.sorted_unique_vertices() {
                if !mesh.is_vertex_alive(v) {
                    return Err(PbvhError::DeadVertex { vertex: v, leaf: index });
                }
                let owner = self.owners.vertex(v);
                if owner != Some(index) {
                    return Err(PbvhError::VertexOwnerMismatch {
                        vertex: v,
                        leaf: index,
                        owner,
                    });
                }
                if let Some(first) = vertex_seen.insert(v, index) {
                    return Err(PbvhError::VertexOwnedTwice {
                        vertex: v,
                        first,
                        second: index,
                    });
                }
                if !contains_with_slack(&node.bounds, mesh.position(v)) {
                    return Err(PbvhError::BoundsMismatch {
                        node: index,
                        what: format!("unique vertex {v:?}"),
                    });
                }
            }

            if let Some(&v) = leaf
                .other_vertices
                .iter()
                .find(|v| leaf.unique_vertices.contains(v))
            {
                return Err(PbvhError::OtherVertexOwnedHere { vertex: v, leaf: index });
            }
        }

        for face in mesh.faces() {
            if !face_seen.contains_key(&face.id) {
                return Err(PbvhError::UnownedFace { face: face.id });
            }
        }
        for vertex in mesh.vertices() {
            if !vertex_seen.contains_key(&vertex.id) && mesh.vertex_face_count(vertex.id) > 0 {
                return Err(PbvhError::UnownedVertex { vertex: vertex.id });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::grid_tree;
    use dyntopo_mesh::primitives::grid_vertex;

    #[test]
    fn test_fresh_tree_is_valid() {
        let (mesh, pbvh) = grid_tree(6, 6, 4);
        assert!(pbvh.validate(&mesh).is_ok());
    }

    #[test]
    fn test_detects_face_owner_mismatch() {
        let (mesh, mut pbvh) = grid_tree(6, 6, 4);
        let leaves = pbvh.leaf_indices();
        pbvh.owners.set_face(FaceId(0), Some(leaves[leaves.len() - 1]));
        let err = pbvh.validate(&mesh).unwrap_err();
        assert!(matches!(
            err,
            PbvhError::FaceOwnerMismatch { .. } | PbvhError::FaceOwnedTwice { .. }
        ));
    }

    #[test]
    fn test_detects_second_unique_owner() {
        let (mesh, mut pbvh) = grid_tree(6, 6, 4);
        let v = grid_vertex(6, 3, 3);
        let owner = pbvh.vertex_owner(v).unwrap();
        let other = pbvh
            .leaf_indices()
            .into_iter()
            .find(|&l| l != owner)
            .unwrap();
        pbvh.leaf_mut(other).unwrap().unique_vertices.insert(v);
        assert!(matches!(
            pbvh.validate(&mesh),
            Err(PbvhError::VertexOwnerMismatch { .. })
        ));
    }

    #[test]
    fn test_detects_pending_delete_and_bad_child() {
        let (mesh, mut pbvh) = grid_tree(6, 6, 4);
        pbvh.nodes[1].flags.insert(NodeFlags::DELETE);
        assert!(matches!(
            pbvh.validate(&mesh),
            Err(PbvhError::PendingDelete(NodeIndex(1)))
        ));
        pbvh.nodes[1].flags.remove(NodeFlags::DELETE);

        pbvh.nodes[0].kind = NodeKind::Internal {
            children_offset: NodeIndex(9999),
        };
        assert!(matches!(
            pbvh.validate(&mesh),
            Err(PbvhError::ChildOutOfRange { .. })
        ));
    }

    #[test]
    fn test_detects_unowned_face() {
        let (mut mesh, pbvh) = grid_tree(2, 2, 4);
        let a = grid_vertex(2, 0, 0);
        let b = grid_vertex(2, 2, 2);
        let c = grid_vertex(2, 0, 2);
        mesh.add_face(&[a, b, c], Default::default()).unwrap();
        assert!(matches!(
            pbvh.validate(&mesh),
            Err(PbvhError::UnownedFace { .. })
        ));
    }

    #[test]
    fn test_detects_stale_bounds() {
        let (mut mesh, pbvh) = grid_tree(4, 4, 4);
        mesh.set_vertex_position(grid_vertex(4, 2, 2), Vec3::new(2.0, 2.0, 5.0));
        assert!(matches!(
            pbvh.validate(&mesh),
            Err(PbvhError::BoundsMismatch { .. })
        ));
    }
}
