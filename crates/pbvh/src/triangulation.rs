//! Per-leaf triangulation cache.
//!
//! Each leaf's polygons are fan-triangulated into a compact vertex/triangle
//! list used by ray queries and draw-buffer builders. Corners are
//! deduplicated by (vertex, material, face set, snapped UV), so UV seams and
//! material borders produce distinct cache vertices.

use std::collections::{HashMap, HashSet};

use dyntopo_mesh::{DynMesh, FaceId, VertexId};
use glam::{Vec2, Vec3};
use tracing::{trace, warn};

use crate::node::{NodeFlags, NodeIndex};
use crate::tree::{Pbvh, all_faces_hidden};

/// A deduplicated cache vertex
#[derive(Debug, Clone, PartialEq)]
pub struct TriVertex {
    pub vertex: VertexId,
    pub material: u16,
    pub face_set: i32,
    pub uv: Vec2,
    pub position: Vec3,
}

/// One fan triangle of a source face
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriFace {
    /// Cache-local vertex indices
    pub verts: [u32; 3],
    /// Whether edge `(i, i + 1)` is an edge of the source polygon
    pub real_edges: [bool; 3],
    pub face: FaceId,
}

/// Vertex, triangle and edge lists for one leaf (or one material of it)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriBuffers {
    pub verts: Vec<TriVertex>,
    pub tris: Vec<TriFace>,
    /// Deduplicated real polygon edges, as cache-local index pairs
    pub edges: Vec<[u32; 2]>,
    indices: Vec<[u32; 3]>,
}

impl TriBuffers {
    /// Triangle indices as raw bytes for upload
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    pub fn indices(&self) -> &[[u32; 3]] {
        &self.indices
    }

    pub fn triangle_positions(&self, tri: &TriFace) -> [Vec3; 3] {
        tri.verts.map(|i| self.verts[i as usize].position)
    }
}

/// Triangles of a single material
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialTriangulation {
    pub material: u16,
    pub buffers: TriBuffers,
}

/// Cached triangulation of a leaf
#[derive(Debug, Clone, PartialEq)]
pub struct Triangulation {
    pub buffers: TriBuffers,
    /// One entry per material, ascending by material id
    pub materials: Vec<MaterialTriangulation>,
    pub min: Vec3,
    pub max: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CornerKey {
    vertex: VertexId,
    material: u16,
    face_set: i32,
    uv: [i32; 2],
}

/// Incremental builder for one [`TriBuffers`]
#[derive(Default)]
struct BufferBuilder {
    buffers: TriBuffers,
    corner_index: HashMap<CornerKey, u32>,
    edge_set: HashSet<(u32, u32)>,
}

impl BufferBuilder {
    fn corner(&mut self, key: CornerKey, vertex: TriVertex) -> u32 {
        let verts = &mut self.buffers.verts;
        *self.corner_index.entry(key).or_insert_with(|| {
            verts.push(vertex);
            (verts.len() - 1) as u32
        })
    }

    fn push(&mut self, corners: [(CornerKey, &TriVertex); 3], real_edges: [bool; 3], face: FaceId) {
        let verts = corners.map(|(key, vertex)| self.corner(key, vertex.clone()));
        for i in 0..3 {
            if real_edges[i] {
                let (a, b) = (verts[i], verts[(i + 1) % 3]);
                let key = if a <= b { (a, b) } else { (b, a) };
                if self.edge_set.insert(key) {
                    self.buffers.edges.push([key.0, key.1]);
                }
            }
        }
        self.buffers.indices.push(verts);
        self.buffers.tris.push(TriFace {
            verts,
            real_edges,
            face,
        });
    }
}

fn snap_uv(uv: Vec2, resolution: f32) -> [i32; 2] {
    [
        (uv.x * resolution).round() as i32,
        (uv.y * resolution).round() as i32,
    ]
}

impl Triangulation {
    /// Fan-triangulate `faces` (ascending id order), skipping hidden ones.
    pub fn build(mesh: &DynMesh, faces: &[FaceId], uv_snap_resolution: f32) -> Self {
        let mut faces = faces.to_vec();
        faces.sort_unstable();

        let mut all = BufferBuilder::default();
        let mut per_material: HashMap<u16, BufferBuilder> = HashMap::new();
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);

        for f in faces {
            let Some(face) = mesh.face(f) else {
                warn!("Triangulation::build: skipping removed face {:?}", f);
                continue;
            };
            if face.hidden || face.verts.len() < 3 {
                continue;
            }

            let corners: Vec<(CornerKey, TriVertex)> = face
                .verts
                .iter()
                .enumerate()
                .map(|(i, &v)| {
                    let uv = face.corner_uv(i);
                    let position = mesh.position(v);
                    min = min.min(position);
                    max = max.max(position);
                    (
                        CornerKey {
                            vertex: v,
                            material: face.material,
                            face_set: face.face_set,
                            uv: snap_uv(uv, uv_snap_resolution),
                        },
                        TriVertex {
                            vertex: v,
                            material: face.material,
                            face_set: face.face_set,
                            uv,
                            position,
                        },
                    )
                })
                .collect();

            let n = corners.len();
            let material = per_material.entry(face.material).or_default();
            for i in 1..n - 1 {
                let tri = [0, i, i + 1].map(|c| (corners[c].0, &corners[c].1));
                // Fan diagonals are not polygon edges
                let real_edges = [i == 1, true, i + 1 == n - 1];
                all.push(tri, real_edges, f);
                material.push(tri, real_edges, f);
            }
        }

        let mut materials: Vec<MaterialTriangulation> = per_material
            .into_iter()
            .map(|(material, builder)| MaterialTriangulation {
                material,
                buffers: builder.buffers,
            })
            .collect();
        materials.sort_unstable_by_key(|m| m.material);

        if all.buffers.verts.is_empty() {
            min = Vec3::ZERO;
            max = Vec3::ZERO;
        }
        Self {
            buffers: all.buffers,
            materials,
            min,
            max,
        }
    }

    /// Reload coordinates after vertices moved without topology changes
    pub fn refresh_positions(&mut self, mesh: &DynMesh) {
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for vertex in &mut self.buffers.verts {
            vertex.position = mesh.position(vertex.vertex);
            min = min.min(vertex.position);
            max = max.max(vertex.position);
        }
        for material in &mut self.materials {
            for vertex in &mut material.buffers.verts {
                vertex.position = mesh.position(vertex.vertex);
            }
        }
        if self.buffers.verts.is_empty() {
            min = Vec3::ZERO;
            max = Vec3::ZERO;
        }
        self.min = min;
        self.max = max;
    }

    pub fn verts(&self) -> &[TriVertex] {
        &self.buffers.verts
    }

    pub fn tris(&self) -> &[TriFace] {
        &self.buffers.tris
    }

    pub fn edges(&self) -> &[[u32; 2]] {
        &self.buffers.edges
    }

    /// Triangle indices of every material as raw bytes
    pub fn index_bytes(&self) -> &[u8] {
        self.buffers.index_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.tris.is_empty()
    }
}

impl Pbvh {
    /// Rebuild a leaf's triangulation if it is missing or stale.
    ///
    /// Returns false if `leaf` is not a leaf.
    pub fn ensure_triangulation(&mut self, mesh: &DynMesh, leaf: NodeIndex) -> bool {
        let snap = self.config.uv_snap_resolution;
        let Some(node) = self.nodes.get_mut(leaf.index()) else {
            return false;
        };
        let flags = node.flags;
        let Some(data) = node.leaf_mut() else {
            return false;
        };

        let rebuild = data.triangulation.is_none() || flags.contains(NodeFlags::UPDATE_TRIS);
        let mut hidden = None;
        if rebuild {
            let faces = data.sorted_faces();
            hidden = Some(all_faces_hidden(mesh, &faces));
            let tris = Triangulation::build(mesh, &faces, snap);
            trace!(
                "ensure_triangulation: {:?} -> {} verts, {} tris",
                leaf,
                tris.verts().len(),
                tris.tris().len()
            );
            data.triangulation = Some(tris);
        } else if flags.contains(NodeFlags::UPDATE_TRI_POSITIONS) {
            if let Some(tris) = data.triangulation.as_mut() {
                tris.refresh_positions(mesh);
            }
        }
        node.flags
            .remove(NodeFlags::UPDATE_TRIS | NodeFlags::UPDATE_TRI_POSITIONS);
        if let Some(hidden) = hidden {
            node.flags.set(NodeFlags::FULLY_HIDDEN, hidden);
        }
        true
    }

    /// The up-to-date triangulation of a leaf
    pub fn triangulation(&mut self, mesh: &DynMesh, leaf: NodeIndex) -> Option<&Triangulation> {
        if !self.ensure_triangulation(mesh, leaf) {
            return None;
        }
        self.leaf(leaf).and_then(|l| l.triangulation.as_ref())
    }
}
