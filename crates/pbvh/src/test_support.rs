//! Shared fixtures for unit tests.

use dyntopo_config::PbvhConfig;
use dyntopo_mesh::primitives::quad_grid;
use dyntopo_mesh::DynMesh;

use crate::tree::Pbvh;

/// Default configuration with the given leaf limit and validation disabled,
/// so tests can check intermediate states themselves.
pub(crate) fn config_with_limit(leaf_limit: usize) -> PbvhConfig {
    PbvhConfig {
        validate_after_batch: false,
        ..PbvhConfig::with_leaf_limit(leaf_limit)
    }
}

/// Unit quad grid and a tree built over it
pub(crate) fn grid_tree(nx: usize, ny: usize, leaf_limit: usize) -> (DynMesh, Pbvh) {
    let mesh = quad_grid(nx, ny, 1.0);
    let pbvh = Pbvh::build(&mesh, config_with_limit(leaf_limit)).expect("valid test config");
    (mesh, pbvh)
}

#[track_caller]
pub(crate) fn assert_consistent(mesh: &DynMesh, pbvh: &Pbvh) {
    if let Err(err) = pbvh.validate(mesh) {
        panic!("tree is inconsistent: {err}\n{:#?}", pbvh.stats());
    }
}
