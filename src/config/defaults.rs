//! Default constants for engine configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Retry Defaults
// =============================================================================

/// Retries after the first attempt before a transient conflict is surfaced.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

// =============================================================================
// Configuration Sources
// =============================================================================

/// Prefix for environment variable overrides (`OCN_CLUSTERS_RETRY__MAX_RETRIES=3`).
pub const ENV_PREFIX: &str = "OCN_CLUSTERS_";

/// Comment marker in large-cluster OCN files.
pub const LARGE_CLUSTER_FILE_COMMENT: char = '#';

// =============================================================================
// Storage Defaults (RocksDB)
// =============================================================================

/// Run RocksDB repair before opening.
pub const DEFAULT_REPAIR_ON_OPEN: bool = false;

/// Fsync the WAL on every commit.
pub const DEFAULT_SYNC_WRITES: bool = true;
