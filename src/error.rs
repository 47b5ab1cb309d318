use crate::config::ConfigError;
use crate::model::{ClusterId, Ocn, RecordKind, RecordRef};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    WriteConflict,
    DuplicateOcn,
    InconsistentState,
    InvalidBatch,
    DuplicateIdentity,
    DataIntegrity,
    LargeClusterSplit,
    NotFound,
    Storage,
    Config,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::WriteConflict => "write_conflict",
            ErrorCode::DuplicateOcn => "duplicate_ocn",
            ErrorCode::InconsistentState => "inconsistent_state",
            ErrorCode::InvalidBatch => "invalid_batch",
            ErrorCode::DuplicateIdentity => "duplicate_identity",
            ErrorCode::DataIntegrity => "data_integrity",
            ErrorCode::LargeClusterSplit => "large_cluster_split",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Storage => "storage",
            ErrorCode::Config => "config",
        }
    }
}

#[derive(Debug, Error)]
pub enum ClusterError {
    /// A concurrent writer committed a change this transaction read.
    #[error("write conflict: {0}")]
    WriteConflict(String),
    /// The OCN uniqueness index rejected the commit.
    #[error("{ocn} is already owned by cluster {existing}")]
    DuplicateOcn { ocn: Ocn, existing: ClusterId },
    /// A precondition checked earlier in the transaction no longer holds.
    #[error("inconsistent cluster state: {0}")]
    InconsistentState(String),
    #[error("invalid {kind} batch: {reason}")]
    InvalidBatch { kind: RecordKind, reason: String },
    #[error("duplicate {kind} identity in batch: {identity}")]
    DuplicateIdentity { kind: RecordKind, identity: String },
    #[error("data integrity violation in cluster {cluster}: {reason}")]
    DataIntegrity { cluster: ClusterId, reason: String },
    #[error(
        "refusing to split large cluster {cluster} into {components} components; operator action required"
    )]
    LargeClusterSplit { cluster: ClusterId, components: usize },
    #[error("{0} is not attached to any cluster")]
    NotFound(RecordRef),
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClusterError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ClusterError::WriteConflict(_) => ErrorCode::WriteConflict,
            ClusterError::DuplicateOcn { .. } => ErrorCode::DuplicateOcn,
            ClusterError::InconsistentState(_) => ErrorCode::InconsistentState,
            ClusterError::InvalidBatch { .. } => ErrorCode::InvalidBatch,
            ClusterError::DuplicateIdentity { .. } => ErrorCode::DuplicateIdentity,
            ClusterError::DataIntegrity { .. } => ErrorCode::DataIntegrity,
            ClusterError::LargeClusterSplit { .. } => ErrorCode::LargeClusterSplit,
            ClusterError::NotFound(_) => ErrorCode::NotFound,
            ClusterError::Storage(_) => ErrorCode::Storage,
            ClusterError::Config(_) => ErrorCode::Config,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// Whether re-running the whole unit of work may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClusterError::WriteConflict(_)
                | ClusterError::DuplicateOcn { .. }
                | ClusterError::InconsistentState(_)
        )
    }

    pub(crate) fn invalid_batch(kind: RecordKind, reason: impl Into<String>) -> Self {
        ClusterError::InvalidBatch {
            kind,
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = ClusterError> = std::result::Result<T, E>;
