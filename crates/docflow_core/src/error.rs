use std::fmt;

use thiserror::Error;

use crate::contract::{StageId, WorkStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure reported by a state-store adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("conditional write rejected for '{document_id}'")]
    ConditionFailed { document_id: String },
    #[error("state store unavailable: {0}")]
    Unavailable(String),
    #[error("stored state for '{document_id}' is unreadable: {message}")]
    Corrupt {
        document_id: String,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ObjectStore,
    Extraction,
    Inference,
    Search,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ObjectStore => "object_store",
            Self::Extraction => "extraction",
            Self::Inference => "inference",
            Self::Search => "search",
        })
    }
}

/// Failure of a delegated extraction, inference, search or artifact call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{capability} failed: {message}")]
pub struct CapabilityError {
    pub capability: Capability,
    pub message: String,
}

impl CapabilityError {
    pub fn new(capability: Capability, message: impl Into<String>) -> Self {
        Self {
            capability,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("no work item found for '{document_id}'")]
    NotFound { document_id: String },

    #[error("stage '{stage}' already recorded a result for '{document_id}'")]
    Conflict {
        document_id: String,
        stage: StageId,
    },

    #[error("state store unavailable: {0}")]
    StorageUnavailable(String),

    #[error("work item '{document_id}' was modified concurrently")]
    StaleWrite { document_id: String },

    #[error("failed to hand '{document_id}' off to stage '{stage}': {message}")]
    DispatchError {
        document_id: String,
        stage: StageId,
        message: String,
    },

    #[error("stage '{stage}' failed for '{document_id}': {source}")]
    CapabilityError {
        document_id: String,
        stage: StageId,
        source: CapabilityError,
    },

    #[error("stage '{stage}' does not own '{document_id}' (owner: {owner:?})")]
    OutOfOrder {
        document_id: String,
        stage: StageId,
        owner: Option<StageId>,
    },

    #[error("work item '{document_id}' is already {status}")]
    Terminal {
        document_id: String,
        status: WorkStatus,
    },

    #[error("stored state for '{document_id}' is unreadable: {message}")]
    CorruptState {
        document_id: String,
        message: String,
    },

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoordinatorError {
    /// Transient failures the invoking platform may redeliver.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_) | Self::DispatchError { .. })
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::StaleWrite { .. } => "stale_write",
            Self::DispatchError { .. } => "dispatch_error",
            Self::CapabilityError { .. } => "capability_error",
            Self::OutOfOrder { .. } => "out_of_order",
            Self::Terminal { .. } => "terminal",
            Self::CorruptState { .. } => "corrupt_state",
            Self::Validation(_) => "validation_error",
        }
    }
}

impl From<StoreError> for CoordinatorError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::ConditionFailed { document_id } => Self::StaleWrite { document_id },
            StoreError::Unavailable(message) => Self::StorageUnavailable(message),
            StoreError::Corrupt {
                document_id,
                message,
            } => Self::CorruptState {
                document_id,
                message,
            },
        }
    }
}
