//! Error types for Distribuito
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::schema::ValueType;

/// Result type alias using DistribuitoError
pub type Result<T> = std::result::Result<T, DistribuitoError>;

/// Unified error type for Distribuito operations
#[derive(Debug, Error)]
pub enum DistribuitoError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Schema Errors
    // -------------------------------------------------------------------------
    #[error("Type conflict on column '{column}': declared {existing}, got {attempted}")]
    SchemaTypeConflict {
        column: String,
        existing: ValueType,
        attempted: ValueType,
    },

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Unknown column id: {0}")]
    UnknownColumnId(u32),

    // -------------------------------------------------------------------------
    // Segment Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt segment {path:?}: {reason}")]
    CorruptSegment { path: PathBuf, reason: String },

    #[error("Corrupt manifest {path:?}: {reason}")]
    CorruptManifest { path: PathBuf, reason: String },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Invalid compaction: {0}")]
    InvalidCompaction(String),

    // -------------------------------------------------------------------------
    // Table Errors
    // -------------------------------------------------------------------------
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Invalid table name '{0}': only [A-Za-z0-9_] is allowed")]
    InvalidTableName(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Engine is closed")]
    EngineClosed,
}

impl DistribuitoError {
    /// Build a `CorruptSegment` error for the given file
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        DistribuitoError::CorruptSegment {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that mean on-disk bytes cannot be trusted
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            DistribuitoError::CorruptSegment { .. } | DistribuitoError::CorruptManifest { .. }
        )
    }
}
