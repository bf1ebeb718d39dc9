//! Engine Module
//!
//! The façade over every table under one data directory.
//!
//! ## Responsibilities
//! - Discover existing tables on startup
//! - Create, open and drop tables
//! - Route writes, flushes, reads and compactions to the right table
//! - Feed the background compactor after flushes
//! - Flush every buffer on close

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::batch::Row;
use crate::compactor::Compactor;
use crate::config::Config;
use crate::error::{DistribuitoError, Result};
use crate::schema::{ColumnId, ValueType};
use crate::storage::{CompactionStrategy, Manifest, SegmentFilter, SegmentHandle};
use crate::table::{CompactionOutcome, ReadOutput, Table, WriteReceipt};

/// The main storage engine
///
/// ## Concurrency Model
///
/// - `tables`: RwLock held only to look up or insert an `Arc<Table>`
/// - Each table synchronizes its own buffer, flushes and segment list, so
///   work on different tables never contends
/// - All methods take `&self`; share the engine across threads with `Arc`
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// `{data_dir}/tables`
    tables_dir: PathBuf,

    /// Open tables by name
    tables: RwLock<HashMap<String, Arc<Table>>>,

    /// Tables found on disk that failed to open, with the reason
    unavailable: BTreeMap<String, String>,

    /// Background compaction worker, if enabled
    compactor: Option<Compactor>,

    closed: AtomicBool,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate the config
    /// 2. Create `{data_dir}/tables` if needed
    /// 3. Open every table directory that has a manifest; one that fails is
    ///    logged and listed by [`unavailable_tables`](Self::unavailable_tables)
    /// 4. Start the background compactor
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let tables_dir = config.tables_dir();
        fs::create_dir_all(&tables_dir)?;

        let mut tables = HashMap::new();
        let mut unavailable = BTreeMap::new();
        for entry in fs::read_dir(&tables_dir)? {
            let path = entry?.path();
            if !path.is_dir() || !Manifest::path_in(&path).exists() {
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) if is_valid_table_name(name) => name.to_string(),
                _ => {
                    warn!(path = %path.display(), "Skipping directory with an invalid table name");
                    continue;
                }
            };
            match Table::open(&path, &name, &config) {
                Ok(table) => {
                    tables.insert(name, Arc::new(table));
                }
                Err(e) => {
                    warn!(table = %name, error = %e, "Table cannot be opened, skipping it");
                    unavailable.insert(name, e.to_string());
                }
            }
        }

        let compactor = if config.background_compaction {
            Some(Compactor::start(config.compaction_strategy())?)
        } else {
            None
        };

        info!(
            data_dir = %config.data_dir.display(),
            tables = tables.len(),
            unavailable = unavailable.len(),
            "Engine opened"
        );

        Ok(Self {
            config,
            tables_dir,
            tables: RwLock::new(tables),
            unavailable,
            compactor,
            closed: AtomicBool::new(false),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    // =========================================================================
    // Table Management
    // =========================================================================

    /// Create a table, optionally declaring columns up front
    ///
    /// Undeclared columns are still registered on first write.
    pub fn create_table(&self, name: &str, columns: &[(String, ValueType)]) -> Result<Arc<Table>> {
        self.ensure_open()?;
        if !is_valid_table_name(name) {
            return Err(DistribuitoError::InvalidTableName(name.to_string()));
        }

        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(DistribuitoError::TableExists(name.to_string()));
        }
        let table = Arc::new(Table::create(
            &self.tables_dir.join(name),
            name,
            columns,
            &self.config,
        )?);
        tables.insert(name.to_string(), Arc::clone(&table));
        Ok(table)
    }

    /// Return the table, creating it with no declared columns if needed
    pub fn open_or_create_table(&self, name: &str) -> Result<Arc<Table>> {
        match self.table(name) {
            Err(DistribuitoError::TableNotFound(_)) => match self.create_table(name, &[]) {
                Err(DistribuitoError::TableExists(_)) => self.table(name),
                other => other,
            },
            other => other,
        }
    }

    /// Forget a table; its directory is deleted once the last handle drops
    pub fn drop_table(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let table = self
            .tables
            .write()
            .remove(name)
            .ok_or_else(|| DistribuitoError::TableNotFound(name.to_string()))?;
        table.mark_dropped();
        info!(table = name, "Dropped table");
        Ok(())
    }

    /// Handle to an open table
    pub fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.ensure_open()?;
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DistribuitoError::TableNotFound(name.to_string()))
    }

    /// Tables skipped at open because they could not be loaded, with the reason
    pub fn unavailable_tables(&self) -> &BTreeMap<String, String> {
        &self.unavailable
    }

    /// Names of all tables, sorted
    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    // =========================================================================
    // Data Path
    // =========================================================================

    /// Append rows to a table; returns once they are buffered
    pub fn write(&self, table: &str, rows: &[Row]) -> Result<WriteReceipt> {
        let table = self.table(table)?;
        let receipt = table.write(rows)?;
        if receipt.flushed.is_some() {
            self.after_flush(&table);
        }
        Ok(receipt)
    }

    /// Flush a table's buffer; `None` when there was nothing to flush
    pub fn flush(&self, table: &str) -> Result<Option<SegmentHandle>> {
        let table = self.table(table)?;
        let flushed = table.flush()?;
        if flushed.is_some() {
            self.after_flush(&table);
        }
        Ok(flushed)
    }

    /// Read columns by id from the segments `filter` selects
    pub fn read<F>(&self, table: &str, column_ids: &[ColumnId], filter: &F) -> Result<ReadOutput>
    where
        F: SegmentFilter + ?Sized,
    {
        self.table(table)?.read(column_ids, filter)
    }

    /// Read columns by name from the segments `filter` selects
    pub fn read_named<F>(&self, table: &str, names: &[&str], filter: &F) -> Result<ReadOutput>
    where
        F: SegmentFilter + ?Sized,
    {
        self.table(table)?.read_named(names, filter)
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// Compact a table with an explicit strategy
    pub fn compact(
        &self,
        table: &str,
        strategy: &dyn CompactionStrategy,
    ) -> Result<CompactionOutcome> {
        self.table(table)?.compact(strategy)
    }

    /// Compact a table with the configured strategy
    pub fn compact_default(&self, table: &str) -> Result<CompactionOutcome> {
        let strategy = self.config.compaction_strategy();
        self.compact(table, strategy.as_ref())
    }

    /// Most recent background compaction failure, if any
    pub fn last_background_error(&self) -> Option<String> {
        self.compactor.as_ref().and_then(Compactor::last_error)
    }

    fn after_flush(&self, table: &Arc<Table>) {
        if let Some(compactor) = &self.compactor {
            compactor.request(Arc::clone(table));
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Column name → (id, type) of a table
    pub fn schema(&self, table: &str) -> Result<BTreeMap<String, (ColumnId, ValueType)>> {
        Ok(self.table(table)?.schema())
    }

    /// Live segments of a table, oldest rows first
    pub fn segments(&self, table: &str) -> Result<Vec<SegmentHandle>> {
        Ok(self.table(table)?.segments())
    }

    /// Close the engine gracefully
    ///
    /// Flushes every table's staged batch and buffer, then stops the
    /// background compactor. Every table is attempted; the first flush error
    /// is returned.
    pub fn close(self) -> Result<()> {
        let mut first_error = None;
        for table in self.tables.read().values() {
            if let Err(e) = table.flush() {
                warn!(table = table.name(), error = %e, "Flush on close failed");
                first_error.get_or_insert(e);
            }
        }
        self.closed.store(true, Ordering::Release);
        if let Some(compactor) = &self.compactor {
            compactor.shutdown();
        }
        info!("Engine closed");
        first_error.map_or(Ok(()), Err)
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the directory holding all tables
    pub fn tables_dir(&self) -> &Path {
        &self.tables_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(DistribuitoError::EngineClosed)
        } else {
            Ok(())
        }
    }
}

/// Table names become directory names: `[A-Za-z0-9_]+`
pub fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
