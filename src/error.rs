//! Error types for the reconciliation engine.

use crate::types::{IndexPath, ItemType, Reference, SectionId, SourceId};
use thiserror::Error;

/// Main error type for engine operations.
#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    #[error("Record not found: {0}")]
    RecordNotFound(Reference),

    #[error("Data source {source_id:?} failed: {reason}")]
    SourceFailed { source_id: SourceId, reason: String },

    #[error("Invalid section: {0}")]
    InvalidSection(String),

    #[error("Section not found: {0}")]
    SectionNotFound(SectionId),

    #[error("Section already exists: {0}")]
    DuplicateSection(SectionId),

    #[error("No item at {0:?}")]
    InvalidIndexPath(IndexPath),

    #[error("No cell provider for item type {0}")]
    NoProvider(ItemType),

    #[error("Section {0} is not attached to a controller")]
    NotAttached(SectionId),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for ReconcileError {
    fn from(e: serde_json::Error) -> Self {
        ReconcileError::Config(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;
