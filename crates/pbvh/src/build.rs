//! Bulk construction from a whole mesh.
//!
//! Faces are partitioned by centroid into an implicit range tree (halves
//! built with `rayon::join` when large), laid out into the node array with
//! children appended in pairs, and the leaves are then populated in
//! parallel. Vertex ownership is settled by one compare-and-set per claim.

use dyntopo_config::PbvhConfig;
use dyntopo_mesh::{DynMesh, FaceId};
use glam::Vec3;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::aabb::Aabb;
use crate::node::{LeafData, Node, NodeFlags, NodeIndex, NodeKind};
use crate::split::{partition_by, SplitPlane};
use crate::tree::Pbvh;
use crate::validate::PbvhError;

/// Face count above which both halves of a partition are built in parallel
const PARALLEL_THRESHOLD: usize = 4096;

/// Implicit range tree produced by the partition step
enum BuildNode {
    Leaf(Vec<usize>),
    Split(Box<[BuildNode; 2]>),
}

struct Partitioner<'a> {
    centroids: &'a [Vec3],
    leaf_limit: usize,
    max_depth: u32,
}

impl Partitioner<'_> {
    fn build(&self, indices: Vec<usize>, depth: u32) -> BuildNode {
        if indices.len() <= self.leaf_limit || depth >= self.max_depth {
            return BuildNode::Leaf(indices);
        }

        let plane = SplitPlane::from_centroids(indices.iter().map(|&i| self.centroids[i]));
        if plane.is_none() {
            warn!(
                "build: non-finite centroid bounds over {} faces, splitting by index",
                indices.len()
            );
        }
        let total = indices.len();
        let (left, right) = partition_by(indices, plane, |i| self.centroids.get(i).copied());

        let (a, b) = if total >= PARALLEL_THRESHOLD {
            rayon::join(|| self.build(left, depth + 1), || self.build(right, depth + 1))
        } else {
            (self.build(left, depth + 1), self.build(right, depth + 1))
        };
        BuildNode::Split(Box::new([a, b]))
    }
}

/// Contents of one leaf gathered by a populate task
struct PopulatedLeaf {
    index: NodeIndex,
    data: LeafData,
    bounds: Aabb,
    original_bounds: Aabb,
    fully_hidden: bool,
}

/// Append the range tree below `index`, collecting leaf ranges
fn layout(
    nodes: &mut Vec<Node>,
    build: BuildNode,
    index: NodeIndex,
    leaves: &mut Vec<(NodeIndex, Vec<usize>)>,
) {
    match build {
        BuildNode::Leaf(members) => leaves.push((index, members)),
        BuildNode::Split(children) => {
            let depth = nodes[index.index()].depth + 1;
            let first = NodeIndex(nodes.len() as u32);
            nodes.push(Node::new_leaf(depth));
            nodes.push(Node::new_leaf(depth));
            nodes[index.index()].kind = NodeKind::Internal {
                children_offset: first,
            };
            let [a, b] = *children;
            layout(nodes, a, first, leaves);
            layout(nodes, b, first.sibling_slot(), leaves);
        }
    }
}

impl Pbvh {
    /// Build a tree over every live face and vertex of `mesh`.
    ///
    /// An empty mesh yields a single empty root leaf.
    pub fn build(mesh: &DynMesh, config: PbvhConfig) -> Result<Self, PbvhError> {
        config.validate()?;
        let mut pbvh = Pbvh::with_root(config, mesh.vertex_id_bound(), mesh.face_id_bound());

        let faces: Vec<FaceId> = mesh.faces().map(|f| f.id).collect();
        let centroids: Vec<Vec3> = faces.par_iter().map(|&f| mesh.face_centroid(f)).collect();

        let partitioner = Partitioner {
            centroids: &centroids,
            leaf_limit: pbvh.config.leaf_limit,
            max_depth: pbvh.config.max_depth,
        };
        let range_tree = partitioner.build((0..faces.len()).collect(), 0);

        let mut leaves = Vec::new();
        layout(&mut pbvh.nodes, range_tree, NodeIndex::ROOT, &mut leaves);

        let owners = &pbvh.owners;
        let populated: Vec<PopulatedLeaf> = leaves
            .into_par_iter()
            .map(|(index, members)| {
                let mut data = LeafData::default();
                let mut bounds = Aabb::empty();
                let mut original_bounds = Aabb::empty();
                let mut has_visible = false;

                for i in members {
                    let f = faces[i];
                    owners.store_face(f, index);
                    data.faces.insert(f);
                    let Some(face) = mesh.face(f) else {
                        continue;
                    };
                    has_visible |= !face.hidden;
                    for &v in &face.verts {
                        match owners.claim_vertex(v, index) {
                            Ok(()) => {
                                data.unique_vertices.insert(v);
                            }
                            Err(Some(owner)) if owner == index => {}
                            Err(_) => {
                                data.other_vertices.insert(v);
                            }
                        }
                        if let Some(vertex) = mesh.vertex(v) {
                            bounds.include_point(vertex.position);
                            original_bounds.include_point(vertex.original_position);
                        }
                    }
                }

                PopulatedLeaf {
                    index,
                    fully_hidden: !data.faces.is_empty() && !has_visible,
                    data,
                    bounds,
                    original_bounds,
                }
            })
            .collect();

        for leaf in populated {
            let node = &mut pbvh.nodes[leaf.index.index()];
            node.kind = NodeKind::Leaf(leaf.data);
            node.bounds = leaf.bounds;
            node.original_bounds = leaf.original_bounds;
            node.flags = NodeFlags::UPDATE_NORMALS
                | NodeFlags::UPDATE_TRIS
                | NodeFlags::UPDATE_DRAW_BUFFERS
                | NodeFlags::UPDATE_REDRAW;
            node.flags.set(NodeFlags::FULLY_HIDDEN, leaf.fully_hidden);
        }
        pbvh.aggregate_internal_bounds();

        // Loose vertices are tracked too so every live vertex has an owner
        let loose: Vec<_> = mesh
            .vertices()
            .filter(|v| pbvh.owners.vertex(v.id).is_none())
            .map(|v| (v.id, v.position))
            .collect();
        if !loose.is_empty() {
            debug!("build: placing {} loose vertices", loose.len());
            for (v, position) in loose {
                pbvh.adopt_vertex(mesh, v, position);
            }
            pbvh.update_bounds(mesh);
        }

        let stats = pbvh.stats();
        info!(
            "Built sculpt BVH: {} faces in {} leaves ({} nodes, depth {})",
            stats.faces, stats.leaves, stats.nodes, stats.max_depth
        );
        Ok(pbvh)
    }

    /// Build with default settings apart from the leaf limit
    pub fn build_with_leaf_limit(mesh: &DynMesh, leaf_limit: usize) -> Result<Self, PbvhError> {
        Self::build(mesh, PbvhConfig::with_leaf_limit(leaf_limit))
    }
}
