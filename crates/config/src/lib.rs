//! Shared configuration for the sculpting BVH
//!
//! This crate provides the single source of truth for tree sizing and
//! maintenance thresholds. Values are configurable and should not be
//! treated as magic numbers by the tree code.

use serde::{Deserialize, Serialize};

/// Default maximum number of faces a leaf may hold once maintenance has run
pub const DEFAULT_LEAF_LIMIT: usize = 100;

/// Default depth bound; guarantees split termination on degenerate input
pub const DEFAULT_MAX_DEPTH: u32 = 48;

/// Default sibling overlap ratio tolerated at the root
pub const DEFAULT_ROOT_OVERLAP_FACTOR: f32 = 0.5;

/// Default sibling overlap ratio tolerated below the root
pub const DEFAULT_OVERLAP_FACTOR: f32 = 0.2;

/// Default number of edit batches between forced balance passes
pub const DEFAULT_BALANCE_INTERVAL: u32 = 10;

/// Default UV snapping grid (cells per UV unit) for triangulation dedup keys
pub const DEFAULT_UV_SNAP_RESOLUTION: f32 = 4096.0;

/// Errors raised while loading or checking a configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("leaf_limit must be at least 1")]
    ZeroLeafLimit,
    #[error("max_depth must be at least 1")]
    ZeroMaxDepth,
    #[error("{name} must be within 0.0..=1.0, got {value}")]
    FactorOutOfRange { name: &'static str, value: f32 },
    #[error("uv_snap_resolution must be positive and finite, got {0}")]
    InvalidUvSnap(f32),
}

/// Tree sizing and maintenance configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PbvhConfig {
    /// Maximum faces per leaf after split/balance completes
    pub leaf_limit: usize,
    /// Leaves at this depth are never split
    pub max_depth: u32,
    /// Overlap ratio above which the root's children are dissolved
    pub root_overlap_factor: f32,
    /// Overlap ratio above which deeper siblings are dissolved
    pub overlap_factor: f32,
    /// Run a balance pass every this many edit batches (0 = only when forced)
    pub balance_interval: u32,
    /// UV snapping grid used when deduplicating triangulation vertices
    pub uv_snap_resolution: f32,
    /// Run the structural consistency checks after every edit batch (debug builds)
    pub validate_after_batch: bool,
}

impl Default for PbvhConfig {
    fn default() -> Self {
        Self {
            leaf_limit: DEFAULT_LEAF_LIMIT,
            max_depth: DEFAULT_MAX_DEPTH,
            root_overlap_factor: DEFAULT_ROOT_OVERLAP_FACTOR,
            overlap_factor: DEFAULT_OVERLAP_FACTOR,
            balance_interval: DEFAULT_BALANCE_INTERVAL,
            uv_snap_resolution: DEFAULT_UV_SNAP_RESOLUTION,
            validate_after_batch: true,
        }
    }
}

impl PbvhConfig {
    /// Create a config with the given leaf limit and defaults elsewhere
    pub fn with_leaf_limit(leaf_limit: usize) -> Self {
        Self {
            leaf_limit,
            ..Self::default()
        }
    }

    /// Parse a config from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize this config to pretty JSON
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check that every field is usable by the tree
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.leaf_limit == 0 {
            return Err(ConfigError::ZeroLeafLimit);
        }
        if self.max_depth == 0 {
            return Err(ConfigError::ZeroMaxDepth);
        }
        for (name, value) in [
            ("root_overlap_factor", self.root_overlap_factor),
            ("overlap_factor", self.overlap_factor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::FactorOutOfRange { name, value });
            }
        }
        if !(self.uv_snap_resolution.is_finite() && self.uv_snap_resolution > 0.0) {
            return Err(ConfigError::InvalidUvSnap(self.uv_snap_resolution));
        }
        Ok(())
    }

    /// Overlap threshold for a node at the given depth
    pub fn overlap_factor_at(&self, depth: u32) -> f32 {
        if depth == 0 {
            self.root_overlap_factor
        } else {
            self.overlap_factor
        }
    }

    /// Subtrees holding fewer faces than this are joined into one leaf
    pub fn join_threshold(&self) -> usize {
        self.leaf_limit / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PbvhConfig::default();
        assert_eq!(config.leaf_limit, DEFAULT_LEAF_LIMIT);
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PbvhConfig::from_json_str(r#"{ "leaf_limit": 8 }"#).unwrap();
        assert_eq!(config.leaf_limit, 8);
        assert_eq!(config.overlap_factor, DEFAULT_OVERLAP_FACTOR);
        assert_eq!(config.join_threshold(), 4);
    }

    #[test]
    fn test_json_round_trip() {
        let config = PbvhConfig::with_leaf_limit(32);
        let json = config.to_json_string().unwrap();
        assert_eq!(PbvhConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            PbvhConfig::from_json_str(r#"{ "leaf_limit": 0 }"#),
            Err(ConfigError::ZeroLeafLimit)
        ));
        assert!(matches!(
            PbvhConfig::from_json_str(r#"{ "overlap_factor": 1.5 }"#),
            Err(ConfigError::FactorOutOfRange { .. })
        ));
        assert!(matches!(
            PbvhConfig::from_json_str("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_overlap_factor_by_depth() {
        let config = PbvhConfig::default();
        assert_eq!(config.overlap_factor_at(0), 0.5);
        assert_eq!(config.overlap_factor_at(3), 0.2);
    }
}
