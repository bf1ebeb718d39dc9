//! MemTable Module
//!
//! In-memory ingestion buffer for rows not yet flushed to a segment.
//!
//! ## Responsibilities
//! - Validate each incoming value against the schema registry
//! - Accumulate values column-by-column, keeping every column the same length
//! - Track row count and approximate size for flush triggers
//! - Hand the whole buffer off for flushing in one swap
//!
//! ## Concurrency
//! A single `parking_lot::Mutex` guards the buffer. `append` and
//! `take_and_reset` are mutually exclusive; the swap only moves the column
//! map out, so encoding and I/O of the taken batch happen outside the lock
//! while new rows keep arriving.

mod table;

pub use table::{FlushThresholds, MemTable};
