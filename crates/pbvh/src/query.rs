//! Spatial queries: raycast, ray proximity and brush gathering.
//!
//! Ray queries read the per-leaf triangulation caches, so they take
//! `&mut self` to bring stale caches up to date before testing candidate
//! leaves in parallel.

use std::cmp::Ordering;

use dyntopo_mesh::{DynMesh, FaceId, VertexId};
use glam::Vec3;
use rayon::prelude::*;
use serde::Serialize;
use tracing::trace;

use crate::node::{NodeFlags, NodeIndex, NodeKind};
use crate::triangulation::Triangulation;
use crate::tree::Pbvh;

/// Epsilon for floating point comparisons in ray intersection
const EPSILON: f32 = 1e-6;

/// Nearest surface hit along a ray
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RayHit {
    pub face: FaceId,
    /// Corner of the hit triangle closest to the hit point
    pub vertex: VertexId,
    /// Distance along the normalized ray direction
    pub distance: f32,
    pub leaf: NodeIndex,
}

/// Möller-Trumbore intersection, returning the hit distance
fn intersect_triangle(origin: Vec3, dir: Vec3, [v0, v1, v2]: [Vec3; 3]) -> Option<f32> {
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;
    let pvec = dir.cross(edge2);
    let det = edge1.dot(pvec);
    if det.abs() < EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;

    let tvec = origin - v0;
    let u = tvec.dot(pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let qvec = tvec.cross(edge1);
    let v = dir.dot(qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = edge2.dot(qvec) * inv_det;
    (t >= 0.0).then_some(t)
}

/// Squared distance between a half-line and a segment
fn ray_segment_distance_squared(origin: Vec3, dir: Vec3, a: Vec3, b: Vec3) -> f32 {
    let e = b - a;
    let r = origin - a;
    let dd = dir.dot(dir);
    let ee = e.dot(e);
    let de = dir.dot(e);
    let dr = dir.dot(r);
    let er = e.dot(r);

    if ee <= EPSILON {
        let s = (-dr / dd).max(0.0);
        return (r + dir * s).length_squared();
    }

    let denom = dd * ee - de * de;
    let mut s = if denom > EPSILON {
        ((de * er - ee * dr) / denom).max(0.0)
    } else {
        0.0
    };
    let t = ((de * s + er) / ee).clamp(0.0, 1.0);
    s = ((de * t - dr) / dd).max(0.0);
    (r + dir * s - e * t).length_squared()
}

/// Closest point on a triangle to `p`
fn closest_point_on_triangle(p: Vec3, [a, b, c]: [Vec3; 3]) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        return a + ab * (d1 / (d1 - d3));
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        return a + ac * (d2 / (d2 - d6));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        return b + (c - b) * ((d4 - d3) / ((d4 - d3) + (d5 - d6)));
    }

    let denom = 1.0 / (va + vb + vc);
    a + ab * (vb * denom) + ac * (vc * denom)
}

/// Squared distance between a half-line and a triangle
fn ray_triangle_distance_squared(origin: Vec3, dir: Vec3, tri: [Vec3; 3]) -> f32 {
    if intersect_triangle(origin, dir, tri).is_some() {
        return 0.0;
    }
    let from_origin = closest_point_on_triangle(origin, tri).distance_squared(origin);
    (0..3)
        .map(|i| ray_segment_distance_squared(origin, dir, tri[i], tri[(i + 1) % 3]))
        .fold(from_origin, f32::min)
}

/// Order hits by distance, then by face id
fn closer(a: &RayHit, b: &RayHit) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.face.cmp(&b.face))
}

fn raycast_leaf(leaf: NodeIndex, tris: &Triangulation, origin: Vec3, dir: Vec3) -> Option<RayHit> {
    let mut best: Option<RayHit> = None;
    for tri in tris.tris() {
        let corners = tris.buffers.triangle_positions(tri);
        let Some(t) = intersect_triangle(origin, dir, corners) else {
            continue;
        };
        let point = origin + dir * t;
        let nearest = (0..3)
            .min_by(|&i, &j| {
                corners[i]
                    .distance_squared(point)
                    .total_cmp(&corners[j].distance_squared(point))
            })
            .unwrap_or(0);
        let hit = RayHit {
            face: tri.face,
            vertex: tris.verts()[tri.verts[nearest] as usize].vertex,
            distance: t,
            leaf,
        };
        if best.is_none_or(|b| closer(&hit, &b).is_lt()) {
            best = Some(hit);
        }
    }
    best
}

impl Pbvh {
    /// Visible leaves whose bounds the ray enters
    fn ray_candidates(&self, origin: Vec3, dir: Vec3) -> Vec<NodeIndex> {
        let inv_dir = dir.recip();
        let mut out = Vec::new();
        let mut stack = vec![NodeIndex::ROOT];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index.index()];
            if node.bounds.ray_entry(origin, inv_dir).is_none() {
                continue;
            }
            match &node.kind {
                NodeKind::Internal { children_offset } => {
                    stack.push(*children_offset);
                    stack.push(children_offset.sibling_slot());
                }
                NodeKind::Leaf(_) if !node.flags.contains(NodeFlags::FULLY_HIDDEN) => {
                    out.push(index);
                }
                NodeKind::Leaf(_) => {}
            }
        }
        out.sort_unstable();
        out
    }

    /// Bring the caches of `leaves` up to date
    fn ensure_triangulations(&mut self, mesh: &DynMesh, leaves: &[NodeIndex]) {
        for &leaf in leaves {
            self.ensure_triangulation(mesh, leaf);
        }
    }

    /// Nearest visible surface hit along a ray.
    ///
    /// Ties in distance resolve to the lower face id, so the result does
    /// not depend on task scheduling.
    pub fn raycast(&mut self, mesh: &DynMesh, origin: Vec3, direction: Vec3) -> Option<RayHit> {
        let dir = direction.try_normalize()?;
        self.refresh_hidden_flags(mesh);
        let candidates = self.ray_candidates(origin, dir);
        self.ensure_triangulations(mesh, &candidates);

        let tree = &*self;
        let hit = candidates
            .par_iter()
            .filter_map(|&leaf| {
                let tris = tree.leaf(leaf)?.triangulation.as_ref()?;
                raycast_leaf(leaf, tris, origin, dir)
            })
            .min_by(closer);
        trace!(
            "raycast: {} candidate leaves, hit {:?}",
            candidates.len(),
            hit.map(|h| h.face)
        );
        hit
    }

    /// Smallest distance between the ray and any visible triangle.
    ///
    /// Zero when the ray hits the surface; `None` when nothing is visible.
    pub fn nearest_to_ray(&mut self, mesh: &DynMesh, origin: Vec3, direction: Vec3) -> Option<f32> {
        let dir = direction.try_normalize()?;
        self.refresh_hidden_flags(mesh);
        let leaves: Vec<NodeIndex> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_leaf() && !n.flags.contains(NodeFlags::FULLY_HIDDEN))
            .map(|(i, _)| NodeIndex(i as u32))
            .collect();
        self.ensure_triangulations(mesh, &leaves);

        let tree = &*self;
        leaves
            .par_iter()
            .filter_map(|&leaf| {
                let tris = tree.leaf(leaf)?.triangulation.as_ref()?;
                tris.tris()
                    .iter()
                    .map(|tri| {
                        ray_triangle_distance_squared(origin, dir, tris.buffers.triangle_positions(tri))
                    })
                    .min_by(f32::total_cmp)
            })
            .min_by(f32::total_cmp)
            .map(f32::sqrt)
    }

    /// Leaves whose bounds intersect a sphere, in array order
    pub fn leaves_in_sphere(&self, center: Vec3, radius: f32) -> Vec<NodeIndex> {
        let mut out = Vec::new();
        let mut stack = vec![NodeIndex::ROOT];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index.index()];
            if !node.bounds.intersects_sphere(center, radius) {
                continue;
            }
            match node.children() {
                Some([a, b]) => {
                    stack.push(a);
                    stack.push(b);
                }
                None => out.push(index),
            }
        }
        out.sort_unstable();
        out
    }

    /// Vertices within `radius` of `center`, sorted by id
    pub fn vertices_in_sphere(&self, mesh: &DynMesh, center: Vec3, radius: f32) -> Vec<VertexId> {
        let radius_sq = radius * radius;
        let mut out: Vec<VertexId> = self
            .leaves_in_sphere(center, radius)
            .into_iter()
            .filter_map(|leaf| self.leaf(leaf))
            .flat_map(|leaf| leaf.unique_vertices.iter().copied())
            .filter(|&v| mesh.position(v).distance_squared(center) <= radius_sq)
            .collect();
        out.sort_unstable();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::grid_tree;
    use dyntopo_mesh::primitives::{grid_vertex, quad_grid, subdivided_box};

    #[test]
    fn test_raycast_grid_hits_cell() {
        let (mesh, mut pbvh) = grid_tree(6, 6, 4);
        let hit = pbvh
            .raycast(&mesh, Vec3::new(2.2, 2.3, 5.0), Vec3::NEG_Z * 3.0)
            .unwrap();
        assert_eq!(hit.face, FaceId(14));
        assert_eq!(hit.vertex, grid_vertex(6, 2, 2));
        assert!((hit.distance - 5.0).abs() < 1e-5);
        assert_eq!(pbvh.face_owner(hit.face), Some(hit.leaf));
    }

    #[test]
    fn test_raycast_misses() {
        let (mesh, mut pbvh) = grid_tree(6, 6, 4);
        assert!(pbvh.raycast(&mesh, Vec3::new(2.5, 2.5, 5.0), Vec3::Z).is_none());
        assert!(pbvh.raycast(&mesh, Vec3::new(9.0, 9.0, 5.0), Vec3::NEG_Z).is_none());
        assert!(pbvh.raycast(&mesh, Vec3::new(2.5, 2.5, 5.0), Vec3::ZERO).is_none());
    }

    #[test]
    fn test_raycast_skips_hidden_faces() {
        let (mut mesh, mut pbvh) = grid_tree(6, 6, 4);
        mesh.set_face_hidden(FaceId(14), true);
        let leaf = pbvh.face_owner(FaceId(14)).unwrap();
        pbvh.mark_topology_dirty(leaf);
        assert!(pbvh
            .raycast(&mesh, Vec3::new(2.2, 2.3, 5.0), Vec3::NEG_Z)
            .is_none());
    }

    #[test]
    fn test_unhidden_leaf_is_hit_again() {
        let mut mesh = quad_grid(2, 1, 1.0);
        mesh.set_face_hidden(FaceId(0), true);
        mesh.set_face_hidden(FaceId(1), true);
        let mut pbvh = Pbvh::build_with_leaf_limit(&mesh, 4).unwrap();
        let origin = Vec3::new(0.5, 0.5, 5.0);
        assert!(pbvh.raycast(&mesh, origin, Vec3::NEG_Z).is_none());
        assert!(pbvh.nearest_to_ray(&mesh, origin, Vec3::NEG_Z).is_none());

        mesh.set_face_hidden(FaceId(0), false);
        mesh.set_face_hidden(FaceId(1), false);
        pbvh.mark_topology_dirty(NodeIndex::ROOT);
        let hit = pbvh.raycast(&mesh, origin, Vec3::NEG_Z).unwrap();
        assert_eq!(hit.face, FaceId(0));
        assert!((hit.distance - 5.0).abs() < 1e-5);
        assert_eq!(pbvh.nearest_to_ray(&mesh, origin, Vec3::NEG_Z), Some(0.0));
    }

    #[test]
    fn test_batch_clears_hidden_flag() {
        let mut mesh = quad_grid(2, 1, 1.0);
        mesh.set_face_hidden(FaceId(0), true);
        mesh.set_face_hidden(FaceId(1), true);
        let mut pbvh = Pbvh::build_with_leaf_limit(&mesh, 4).unwrap();

        mesh.set_face_hidden(FaceId(1), false);
        pbvh.mark_topology_dirty(NodeIndex::ROOT);
        pbvh.after_edit_batch(&mesh, true);
        assert!(!pbvh.nodes()[0].flags.contains(NodeFlags::FULLY_HIDDEN));
        let hit = pbvh.raycast(&mesh, Vec3::new(1.5, 0.5, 5.0), Vec3::NEG_Z);
        assert_eq!(hit.map(|h| h.face), Some(FaceId(1)));

        // Hiding everything again prunes the leaf
        mesh.set_face_hidden(FaceId(1), true);
        pbvh.mark_topology_dirty(NodeIndex::ROOT);
        pbvh.after_edit_batch(&mesh, false);
        assert!(pbvh.nodes()[0].flags.contains(NodeFlags::FULLY_HIDDEN));
    }

    #[test]
    fn test_raycast_on_leaf_boundary() {
        let (mesh, mut pbvh) = grid_tree(6, 6, 4);
        for x in [0.0, 2.0, 3.0, 6.0] {
            let hit = pbvh.raycast(&mesh, Vec3::new(x, 2.5, 5.0), Vec3::NEG_Z);
            assert!(hit.is_some_and(|h| (h.distance - 5.0).abs() < 1e-5), "x = {x}");
        }
        let hit = pbvh.raycast(&mesh, Vec3::new(2.5, 0.0, 5.0), Vec3::NEG_Z);
        assert!(hit.is_some_and(|h| (h.distance - 5.0).abs() < 1e-5));
    }

    #[test]
    fn test_raycast_box_takes_nearest_side() {
        let mesh = subdivided_box(4, 1.0);
        let mut pbvh = Pbvh::build_with_leaf_limit(&mesh, 8).unwrap();
        let hit = pbvh
            .raycast(&mesh, Vec3::new(0.1, 0.2, 5.0), Vec3::NEG_Z)
            .unwrap();
        assert!((hit.distance - 4.0).abs() < 1e-5);
        assert!(mesh.compute_face_normal(hit.face).z > 0.99);

        // From inside, the far wall is hit
        let hit = pbvh.raycast(&mesh, Vec3::ZERO, Vec3::X).unwrap();
        assert!((hit.distance - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_nearest_to_ray() {
        let (mesh, mut pbvh) = grid_tree(6, 6, 4);
        let above = pbvh
            .nearest_to_ray(&mesh, Vec3::new(2.0, 2.0, 1.0), Vec3::X)
            .unwrap();
        assert!((above - 1.0).abs() < 1e-5);

        let away = pbvh
            .nearest_to_ray(&mesh, Vec3::new(-3.0, 2.0, 0.0), Vec3::NEG_X)
            .unwrap();
        assert!((away - 3.0).abs() < 1e-5);

        let through = pbvh
            .nearest_to_ray(&mesh, Vec3::new(1.5, 1.5, 2.0), Vec3::NEG_Z)
            .unwrap();
        assert_eq!(through, 0.0);
    }

    #[test]
    fn test_sphere_gathering() {
        let (mesh, pbvh) = grid_tree(6, 6, 4);
        let verts = pbvh.vertices_in_sphere(&mesh, Vec3::new(3.0, 3.0, 0.0), 1.01);
        let mut expected = vec![
            grid_vertex(6, 3, 3),
            grid_vertex(6, 2, 3),
            grid_vertex(6, 4, 3),
            grid_vertex(6, 3, 2),
            grid_vertex(6, 3, 4),
        ];
        expected.sort_unstable();
        assert_eq!(verts, expected);

        let leaves = pbvh.leaves_in_sphere(Vec3::new(0.0, 0.0, 0.0), 0.5);
        assert!(leaves.contains(&pbvh.face_owner(FaceId(0)).unwrap()));
        assert!(!leaves.contains(&pbvh.face_owner(FaceId(35)).unwrap()));
    }

    #[test]
    fn test_segment_distance_helpers() {
        let d = ray_segment_distance_squared(
            Vec3::ZERO,
            Vec3::X,
            Vec3::new(-1.0, 2.0, 0.0),
            Vec3::new(-1.0, 3.0, 0.0),
        );
        assert!((d - 5.0).abs() < 1e-6);
        let tri = [Vec3::ZERO, Vec3::X, Vec3::Y];
        assert_eq!(closest_point_on_triangle(Vec3::new(0.25, 0.25, 3.0), tri), Vec3::new(0.25, 0.25, 0.0));
        assert_eq!(closest_point_on_triangle(Vec3::new(-1.0, -1.0, 0.0), tri), Vec3::ZERO);
    }
}
