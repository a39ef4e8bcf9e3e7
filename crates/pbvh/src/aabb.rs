//! Axis-aligned bounding boxes for tree nodes.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box.
///
/// The empty box is inverted (`min > max`) so that accumulating points or
/// other boxes into it works without special cases.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    /// Create a new AABB from min/max corners.
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create an AABB that contains nothing (for accumulation).
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(f32::MIN),
        }
    }

    /// True once at least one point has been accumulated.
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    /// Expand this AABB to include a point.
    pub fn include_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Expand this AABB to include another one.
    pub fn include_aabb(&mut self, other: &Aabb) {
        if other.is_valid() {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        let mut out = *self;
        out.include_aabb(other);
        out
    }

    /// Overlapping region of two boxes (empty when they are disjoint).
    pub fn intersection(&self, other: &Aabb) -> Aabb {
        let out = Aabb::new(self.min.max(other.min), self.max.min(other.max));
        if out.is_valid() { out } else { Aabb::empty() }
    }

    /// Volume, zero for empty or flat boxes.
    pub fn volume(&self) -> f32 {
        if !self.is_valid() {
            return 0.0;
        }
        let size = self.size();
        size.x * size.y * size.z
    }

    /// Check if this AABB intersects a sphere.
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        if !self.is_valid() {
            return false;
        }
        let closest = center.clamp(self.min, self.max);
        closest.distance_squared(center) <= radius * radius
    }

    /// Check if this AABB contains a point (boundary inclusive).
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Get the center of this AABB.
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the size (extent) of this AABB.
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Get the longest axis (0=x, 1=y, 2=z).
    pub fn longest_axis(&self) -> usize {
        let size = self.size();
        if size.x >= size.y && size.x >= size.z {
            0
        } else if size.y >= size.z {
            1
        } else {
            2
        }
    }

    /// Slab test against a ray.
    ///
    /// `inv_dir` is the component-wise reciprocal of the ray direction.
    /// Returns the entry distance (clamped to zero when the origin is
    /// inside) if the ray hits the box in front of its origin.
    pub fn ray_entry(&self, origin: Vec3, inv_dir: Vec3) -> Option<f32> {
        if !self.is_valid() {
            return None;
        }
        let t1 = (self.min - origin) * inv_dir;
        let t2 = (self.max - origin) * inv_dir;
        // An origin on a slab plane with a zero direction component gives
        // 0 * inf = NaN; that axis then places no constraint on t
        let t1 = Vec3::select(t1.is_nan_mask(), Vec3::NEG_INFINITY, t1);
        let t2 = Vec3::select(t2.is_nan_mask(), Vec3::INFINITY, t2);
        let t_near = t1.min(t2).max_element();
        let t_far = t1.max(t2).min_element();
        if t_far < 0.0 || t_near > t_far {
            return None;
        }
        Some(t_near.max(0.0))
    }

    /// Squared distance from a point to the box (zero inside).
    pub fn distance_squared_to_point(&self, point: Vec3) -> f32 {
        if !self.is_valid() {
            return f32::INFINITY;
        }
        point.clamp(self.min, self.max).distance_squared(point)
    }
}
