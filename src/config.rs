//! Configuration for Distribuito
//!
//! Centralized configuration with sensible defaults, loadable from a JSON file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::{Compression, EncodingPolicy};
use crate::error::{DistribuitoError, Result};
use crate::memtable::FlushThresholds;
use crate::storage::{CompactionPolicy, CompactionStrategy, WriteOptions};

/// Directory under `data_dir` holding one subdirectory per table
pub const TABLES_DIR: &str = "tables";

/// Main configuration for a Distribuito instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     └── tables/
    ///         └── {table}/
    ///             ├── MANIFEST
    ///             └── segments/
    pub data_dir: PathBuf,

    /// fsync segment files and manifests before they are published
    pub sync_on_write: bool,

    // -------------------------------------------------------------------------
    // Ingestion Buffer Configuration
    // -------------------------------------------------------------------------
    /// Flush once this many rows are buffered
    pub flush_max_rows: usize,

    /// Flush once the buffer's approximate size reaches this many bytes
    pub flush_max_bytes: usize,

    // -------------------------------------------------------------------------
    // Encoding Configuration
    // -------------------------------------------------------------------------
    /// Block compression for new segments
    pub compression: Compression,

    /// Codec selection for new segments
    pub encoding: EncodingPolicy,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Strategy used by `compact_default` and the background compactor
    pub compaction: CompactionPolicy,

    /// Ask the background compactor to run after every flush
    pub background_compaction: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./distribuito_data"),
            sync_on_write: true,
            flush_max_rows: 64 * 1024,
            flush_max_bytes: 64 * 1024 * 1024, // 64 MB
            compression: Compression::Lz4,
            encoding: EncodingPolicy::Compact,
            compaction: CompactionPolicy::default(),
            background_compaction: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load a JSON config file; absent fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| DistribuitoError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.flush_max_rows == 0 {
            return Err(DistribuitoError::Config(
                "flush_max_rows must be greater than zero".to_string(),
            ));
        }
        if self.flush_max_bytes == 0 {
            return Err(DistribuitoError::Config(
                "flush_max_bytes must be greater than zero".to_string(),
            ));
        }
        if self.compaction.min_segments() < 2 {
            return Err(DistribuitoError::Config(
                "compaction min_segments must be at least 2".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory holding every table
    pub fn tables_dir(&self) -> PathBuf {
        self.data_dir.join(TABLES_DIR)
    }

    pub fn flush_thresholds(&self) -> FlushThresholds {
        FlushThresholds {
            max_rows: self.flush_max_rows,
            max_bytes: self.flush_max_bytes,
        }
    }

    /// Strategy used by `compact_default` and the background compactor
    pub fn compaction_strategy(&self) -> Box<dyn CompactionStrategy> {
        self.compaction.build(self.flush_max_rows)
    }

    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            compression: self.compression,
            encoding: self.encoding,
            sync: self.sync_on_write,
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set whether writes are fsynced before publish
    pub fn sync_on_write(mut self, sync: bool) -> Self {
        self.config.sync_on_write = sync;
        self
    }

    /// Set the buffered row count that triggers a flush
    pub fn flush_max_rows(mut self, rows: usize) -> Self {
        self.config.flush_max_rows = rows;
        self
    }

    /// Set the buffered size (in bytes) that triggers a flush
    pub fn flush_max_bytes(mut self, bytes: usize) -> Self {
        self.config.flush_max_bytes = bytes;
        self
    }

    /// Set block compression
    pub fn compression(mut self, compression: Compression) -> Self {
        self.config.compression = compression;
        self
    }

    /// Set codec selection
    pub fn encoding(mut self, encoding: EncodingPolicy) -> Self {
        self.config.encoding = encoding;
        self
    }

    /// Set the default compaction strategy
    pub fn compaction(mut self, policy: CompactionPolicy) -> Self {
        self.config.compaction = policy;
        self
    }

    /// Enable or disable the background compactor
    pub fn background_compaction(mut self, enabled: bool) -> Self {
        self.config.background_compaction = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
