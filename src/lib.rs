//! # Distribuito
//!
//! A single-node, column-oriented storage engine with:
//! - Schema-on-write: columns are registered the first time they are seen
//! - Per-column compressed blocks with min/max statistics for pruning
//! - Immutable segment files published atomically through a manifest
//! - Order-preserving compaction with reference-counted segment retirement
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! │            (tables by name, background compactor)           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                          Table                              │
//! └──────┬──────────────────────┬──────────────────────┬────────┘
//!        │                      │                      │
//!        ▼                      ▼                      ▼
//! ┌─────────────┐        ┌─────────────┐        ┌─────────────┐
//! │   Schema    │◄───────│  MemTable   │──take─►│   Segment   │
//! │  Registry   │        │  (Mutex)    │        │   Manager   │
//! └─────────────┘        └─────────────┘        └──────┬──────┘
//!                                                      │
//!                                       ┌──────────────┴──────────────┐
//!                                       ▼                             ▼
//!                               ┌──────────────┐              ┌──────────────┐
//!                               │SegmentWriter │              │SegmentReader │
//!                               │   (codec)    │              │   (codec)    │
//!                               └──────────────┘              └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod schema;
pub mod batch;
pub mod codec;
pub mod memtable;
pub mod storage;
pub mod table;
pub mod engine;

mod compactor;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{DistribuitoError, Result};
pub use config::Config;
pub use engine::Engine;
pub use batch::{ColumnarBatch, Row};
pub use schema::{ColumnId, Value, ValueType};
pub use storage::{AllSegments, CompactionStrategy, SegmentFilter, SegmentHandle, SegmentStats};
pub use table::{CompactionOutcome, ReadOutput, Table, WriteReceipt};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Distribuito
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
