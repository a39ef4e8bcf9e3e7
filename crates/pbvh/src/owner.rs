//! Element-to-leaf ownership lookup.
//!
//! Every vertex and face id maps to the index of the leaf that owns it, or
//! to [`NODE_NONE`]. Entries are atomics so the parallel bulk build can
//! claim vertices with a single compare-and-set; everything else goes
//! through `&mut self` and plain stores.

use std::sync::atomic::{AtomicU32, Ordering};

use dyntopo_mesh::{FaceId, VertexId};

use crate::node::NodeIndex;

/// Raw marker for "no owner"
pub const NODE_NONE: u32 = u32::MAX;

#[derive(Debug, Default)]
pub struct OwnerTable {
    vertices: Vec<AtomicU32>,
    faces: Vec<AtomicU32>,
}

fn unowned(len: usize) -> Vec<AtomicU32> {
    (0..len).map(|_| AtomicU32::new(NODE_NONE)).collect()
}

fn decode(raw: u32) -> Option<NodeIndex> {
    (raw != NODE_NONE).then_some(NodeIndex(raw))
}

fn encode(owner: Option<NodeIndex>) -> u32 {
    owner.map_or(NODE_NONE, |n| n.0)
}

impl OwnerTable {
    pub fn new(vertex_bound: usize, face_bound: usize) -> Self {
        Self {
            vertices: unowned(vertex_bound),
            faces: unowned(face_bound),
        }
    }

    /// Grow both tables to cover the given id bounds
    pub fn ensure_capacity(&mut self, vertex_bound: usize, face_bound: usize) {
        if self.vertices.len() < vertex_bound {
            self.vertices
                .resize_with(vertex_bound, || AtomicU32::new(NODE_NONE));
        }
        if self.faces.len() < face_bound {
            self.faces.resize_with(face_bound, || AtomicU32::new(NODE_NONE));
        }
    }

    pub fn vertex(&self, v: VertexId) -> Option<NodeIndex> {
        self.vertices
            .get(v.index())
            .and_then(|slot| decode(slot.load(Ordering::Acquire)))
    }

    pub fn face(&self, f: FaceId) -> Option<NodeIndex> {
        self.faces
            .get(f.index())
            .and_then(|slot| decode(slot.load(Ordering::Acquire)))
    }

    pub fn set_vertex(&mut self, v: VertexId, owner: Option<NodeIndex>) {
        if v.index() >= self.vertices.len() {
            if owner.is_none() {
                return;
            }
            self.vertices
                .resize_with(v.index() + 1, || AtomicU32::new(NODE_NONE));
        }
        *self.vertices[v.index()].get_mut() = encode(owner);
    }

    pub fn set_face(&mut self, f: FaceId, owner: Option<NodeIndex>) {
        if f.index() >= self.faces.len() {
            if owner.is_none() {
                return;
            }
            self.faces
                .resize_with(f.index() + 1, || AtomicU32::new(NODE_NONE));
        }
        *self.faces[f.index()].get_mut() = encode(owner);
    }

    /// Claim an unowned vertex for `node`.
    ///
    /// Returns `Ok(())` if this call won the claim, or the current owner.
    /// Ids outside the table are reported as owned by nobody and not
    /// claimed; callers size the table before populating in parallel.
    pub fn claim_vertex(&self, v: VertexId, node: NodeIndex) -> Result<(), Option<NodeIndex>> {
        let Some(slot) = self.vertices.get(v.index()) else {
            return Err(None);
        };
        slot.compare_exchange(NODE_NONE, node.0, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(decode)
    }

    /// Record a face owner from a shared reference (parallel population)
    pub fn store_face(&self, f: FaceId, node: NodeIndex) {
        if let Some(slot) = self.faces.get(f.index()) {
            slot.store(node.0, Ordering::Release);
        }
    }

    /// Reset every entry to unowned
    pub fn clear(&mut self) {
        for slot in self.vertices.iter_mut().chain(self.faces.iter_mut()) {
            *slot.get_mut() = NODE_NONE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_vertex_once() {
        let table = OwnerTable::new(4, 0);
        assert_eq!(table.claim_vertex(VertexId(2), NodeIndex(7)), Ok(()));
        assert_eq!(
            table.claim_vertex(VertexId(2), NodeIndex(9)),
            Err(Some(NodeIndex(7)))
        );
        assert_eq!(table.vertex(VertexId(2)), Some(NodeIndex(7)));
        assert_eq!(table.claim_vertex(VertexId(10), NodeIndex(1)), Err(None));
    }

    #[test]
    fn test_set_grows_and_clear_resets() {
        let mut table = OwnerTable::new(0, 0);
        table.set_face(FaceId(5), Some(NodeIndex(3)));
        table.set_vertex(VertexId(1), Some(NodeIndex(2)));
        assert_eq!(table.face(FaceId(5)), Some(NodeIndex(3)));
        assert_eq!(table.face(FaceId(4)), None);

        table.clear();
        assert_eq!(table.face(FaceId(5)), None);
        assert_eq!(table.vertex(VertexId(1)), None);
    }

    #[test]
    fn test_parallel_claims_have_one_winner() {
        use rayon::prelude::*;

        let table = OwnerTable::new(1, 0);
        let winners = (0..64u32)
            .into_par_iter()
            .filter(|&n| table.claim_vertex(VertexId(0), NodeIndex(n)).is_ok())
            .count();
        assert_eq!(winners, 1);
    }
}
