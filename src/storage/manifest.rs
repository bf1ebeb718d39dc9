//! Table manifest
//!
//! The manifest is the single source of truth for which segments are live,
//! in what order, and what the schema registry looked like when the list
//! last changed. It is always replaced whole via write-tmp-then-rename, so a
//! crash leaves either the old or the new manifest, never a mix.
//!
//! ## File Format
//! ```text
//! ┌──────────────┬─────────────┬───────────┬───────────┬──────────────────┐
//! │ "DSTOMAN1"   │ Version u32 │ Len u64   │ CRC32 u32 │ bincode(Manifest)│
//! └──────────────┴─────────────┴───────────┴───────────┴──────────────────┘
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DistribuitoError, Result};
use crate::schema::SchemaSnapshot;

use super::segment::{sync_parent_dir, SegmentId};

const MANIFEST_MAGIC: &[u8; 8] = b"DSTOMAN1";
const MANIFEST_VERSION: u32 = 1;
const HEADER_SIZE: usize = 8 + 4 + 8 + 4;

/// Manifest file name inside a table directory
pub const MANIFEST_FILE: &str = "MANIFEST";

/// Persistent description of one table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Next id to hand out; ids are never reused
    pub next_segment_id: SegmentId,
    /// Live segments, oldest rows first
    pub segments: Vec<SegmentId>,
    pub schema: SchemaSnapshot,
}

impl Manifest {
    pub fn path_in(table_dir: &Path) -> PathBuf {
        table_dir.join(MANIFEST_FILE)
    }

    /// Read and verify a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;

        let corrupt = |reason: String| DistribuitoError::CorruptManifest {
            path: path.to_path_buf(),
            reason,
        };

        if bytes.len() < HEADER_SIZE {
            return Err(corrupt(format!("{} bytes is too short", bytes.len())));
        }
        if &bytes[0..8] != MANIFEST_MAGIC {
            return Err(corrupt("bad magic".to_string()));
        }
        let version = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        if version != MANIFEST_VERSION {
            return Err(corrupt(format!("unsupported version {}", version)));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&bytes[12..20]);
        let len = u64::from_le_bytes(len_bytes);
        let crc = u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);

        let body = &bytes[HEADER_SIZE..];
        if body.len() as u64 != len {
            return Err(corrupt(format!(
                "body is {} bytes, header says {}",
                body.len(),
                len
            )));
        }
        if crc32fast::hash(body) != crc {
            return Err(corrupt("checksum mismatch".to_string()));
        }

        bincode::deserialize(body).map_err(|e| corrupt(e.to_string()))
    }

    /// Load the manifest if the table has one yet
    pub fn load_if_exists(path: &Path) -> Result<Option<Self>> {
        if path.exists() {
            Self::load(path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Atomically replace the manifest at `path`
    pub fn store(&self, path: &Path, sync: bool) -> Result<()> {
        let body =
            bincode::serialize(self).map_err(|e| DistribuitoError::Serialization(e.to_string()))?;

        let mut bytes = Vec::with_capacity(HEADER_SIZE + body.len());
        bytes.extend_from_slice(MANIFEST_MAGIC);
        bytes.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(body.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        bytes.extend_from_slice(&body);

        let tmp_path = path.with_extension("tmp");
        let result = (|| -> Result<()> {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&bytes)?;
            if sync {
                file.sync_all()?;
            }
            drop(file);

            fs::rename(&tmp_path, path)?;
            if sync {
                sync_parent_dir(path)?;
            }
            Ok(())
        })();

        if result.is_err() {
            if let Err(e) = fs::remove_file(&tmp_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %tmp_path.display(), error = %e, "Failed to remove partial manifest");
                }
            }
        }
        result
    }
}
