//! Segment Reader
//!
//! Opens a segment, loads its footer into memory, and decodes only the
//! column blocks a caller asks for.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::batch::ColumnarBatch;
use crate::codec::{decode_column, ColumnStats};
use crate::error::{DistribuitoError, Result};
use crate::schema::{ColumnId, Value};

use super::{FooterEntry, SegmentFooter, Trailer, MIN_FOOTER_SIZE, TRAILER_SIZE};

/// Reader over one segment
///
/// The source sits behind a mutex so `&self` reads can seek; concurrent
/// readers of the same segment take turns per block.
pub struct SegmentReader<R = File> {
    path: PathBuf,
    source: Mutex<R>,
    footer: SegmentFooter,
    file_size: u64,
}

impl SegmentReader<File> {
    /// Open a segment file and validate its trailer and footer
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_source(file, path)
    }
}

impl<R: Read + Seek> SegmentReader<R> {
    /// Open a segment from any seekable source; `path` is only used in errors
    pub fn from_source(mut source: R, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file_size = source.seek(SeekFrom::End(0))?;

        if file_size < TRAILER_SIZE + MIN_FOOTER_SIZE {
            return Err(DistribuitoError::corrupt(
                &path,
                format!("{} bytes is too short for a segment", file_size),
            ));
        }

        let mut trailer_bytes = [0u8; TRAILER_SIZE as usize];
        source.seek(SeekFrom::Start(file_size - TRAILER_SIZE))?;
        source.read_exact(&mut trailer_bytes)?;
        let trailer = Trailer::decode(&trailer_bytes, &path)?;

        let footer_end = trailer
            .footer_offset
            .checked_add(trailer.footer_length)
            .and_then(|end| end.checked_add(TRAILER_SIZE));
        if footer_end != Some(file_size) {
            return Err(DistribuitoError::corrupt(
                &path,
                format!(
                    "footer at {} (+{}) does not end at the trailer of a {}-byte file",
                    trailer.footer_offset, trailer.footer_length, file_size
                ),
            ));
        }

        let mut footer_bytes = vec![0u8; trailer.footer_length as usize];
        source.seek(SeekFrom::Start(trailer.footer_offset))?;
        source.read_exact(&mut footer_bytes)?;
        let footer = SegmentFooter::decode(&footer_bytes, trailer.footer_offset, &path)?;

        Ok(Self {
            path,
            source: Mutex::new(source),
            footer,
            file_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn row_count(&self) -> u64 {
        self.footer.row_count
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn footer(&self) -> &SegmentFooter {
        &self.footer
    }

    /// Columns this segment stores, ascending
    pub fn column_ids(&self) -> Vec<ColumnId> {
        self.footer.entries.keys().copied().collect()
    }

    pub fn contains(&self, id: ColumnId) -> bool {
        self.footer.entries.contains_key(&id)
    }

    /// Footer statistics for `id`, with no block I/O
    ///
    /// A column the segment does not store is reported as all-null.
    pub fn stats(&self, id: ColumnId) -> ColumnStats {
        match self.footer.entries.get(&id) {
            Some(entry) => entry.stats(),
            None => ColumnStats::all_null(self.footer.row_count),
        }
    }

    /// Decode one column; absent columns come back as `row_count` nulls
    pub fn read_column(&self, id: ColumnId) -> Result<Vec<Value>> {
        let row_count = self.footer.row_count as usize;
        let entry = match self.footer.entries.get(&id) {
            Some(entry) => entry,
            None => return Ok(vec![Value::Null; row_count]),
        };

        let block = self.read_block(entry)?;
        decode_column(&block, entry.codec, entry.compression, row_count).map_err(|e| match e {
            DistribuitoError::Codec(reason) | DistribuitoError::Compression(reason) => {
                DistribuitoError::corrupt(&self.path, format!("column {}: {}", id, reason))
            }
            other => other,
        })
    }

    /// Decode the requested columns into a batch of this segment's rows
    ///
    /// Only the blocks for `ids` are read; other columns are never touched.
    pub fn read_columns(&self, ids: &[ColumnId]) -> Result<ColumnarBatch> {
        let mut batch = ColumnarBatch::new(self.footer.row_count as usize);
        for &id in ids {
            if batch.column(id).is_some() {
                continue;
            }
            let values = self.read_column(id)?;
            batch.insert_column(id, values)?;
        }
        Ok(batch)
    }

    fn read_block(&self, entry: &FooterEntry) -> Result<Vec<u8>> {
        let mut block = vec![0u8; entry.length as usize];
        {
            let mut source = self.source.lock();
            source.seek(SeekFrom::Start(entry.offset))?;
            source.read_exact(&mut block)?;
        }

        let actual = crc32fast::hash(&block);
        if actual != entry.block_crc {
            return Err(DistribuitoError::corrupt(
                &self.path,
                format!(
                    "column {} block checksum mismatch: expected {:08x}, got {:08x}",
                    entry.column_id, entry.block_crc, actual
                ),
            ));
        }
        Ok(block)
    }

    /// Give back the underlying source
    pub fn into_inner(self) -> R {
        self.source.into_inner()
    }
}
