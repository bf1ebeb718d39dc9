//! Segment Writer
//!
//! Encodes a columnar batch into a new segment file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::batch::ColumnarBatch;
use crate::codec::{encode_column, Compression, EncodingPolicy};
use crate::error::{DistribuitoError, Result};
use crate::schema::SchemaSnapshot;

use super::{FooterEntry, SegmentFooter, Trailer};

/// Destination of segment bytes
///
/// Anything writable that can also be made durable. Wrapping the file in a
/// custom sink is how tests inject write failures part-way through a segment.
pub trait SegmentSink: Write {
    /// Persist everything written so far
    fn sync(&mut self) -> io::Result<()>;
}

impl SegmentSink for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

impl<W: SegmentSink> SegmentSink for BufWriter<W> {
    fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        self.get_mut().sync()
    }
}

impl SegmentSink for Vec<u8> {
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Encoding choices applied to every column of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub compression: Compression,
    pub encoding: EncodingPolicy,
    /// fsync the segment and its directory before it becomes visible
    pub sync: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            encoding: EncodingPolicy::default(),
            sync: true,
        }
    }
}

/// What a finished write produced
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSummary {
    pub row_count: u64,
    pub column_count: usize,
    /// Total bytes written, trailer included
    pub file_size: u64,
    pub footer: SegmentFooter,
}

/// Streams column blocks, footer and trailer into a sink
pub struct SegmentWriter<S: SegmentSink> {
    sink: S,
    options: WriteOptions,
    position: u64,
}

impl<S: SegmentSink> SegmentWriter<S> {
    pub fn new(sink: S, options: WriteOptions) -> Self {
        Self {
            sink,
            options,
            position: 0,
        }
    }

    /// Write the whole segment for `batch`
    ///
    /// Column types come from `schema`; a column the schema does not know
    /// fails with `UnknownColumnId` before anything is written.
    pub fn write_segment(
        &mut self,
        schema: &SchemaSnapshot,
        batch: &ColumnarBatch,
    ) -> Result<SegmentSummary> {
        let row_count = batch.row_count() as u64;

        // Resolve every type up front
        let mut typed = Vec::with_capacity(batch.column_count());
        for (id, values) in batch.columns() {
            let value_type = schema
                .value_type(id)
                .ok_or(DistribuitoError::UnknownColumnId(id.0))?;
            typed.push((id, value_type, values));
        }

        let mut footer = SegmentFooter {
            row_count,
            entries: Default::default(),
        };

        for (id, value_type, values) in typed {
            let encoded =
                encode_column(values, value_type, self.options.encoding, self.options.compression)?;
            let offset = self.position;
            let length = encoded.block.len() as u64;
            let block_crc = crc32fast::hash(&encoded.block);

            self.sink.write_all(&encoded.block)?;
            self.position += length;

            debug!(
                column = %id,
                codec = ?encoded.codec,
                bytes = length,
                "Encoded column block"
            );

            footer.entries.insert(
                id,
                FooterEntry {
                    column_id: id,
                    offset,
                    length,
                    codec: encoded.codec,
                    compression: encoded.compression,
                    row_count,
                    null_count: encoded.stats.null_count,
                    block_crc,
                    min: encoded.stats.min,
                    max: encoded.stats.max,
                },
            );
        }

        let footer_bytes = footer.encode()?;
        let trailer = Trailer {
            footer_offset: self.position,
            footer_length: footer_bytes.len() as u64,
        };
        self.sink.write_all(&footer_bytes)?;
        self.sink.write_all(&trailer.encode())?;
        self.position += footer_bytes.len() as u64 + super::TRAILER_SIZE;

        self.sink.flush()?;
        if self.options.sync {
            self.sink.sync()?;
        }

        Ok(SegmentSummary {
            row_count,
            column_count: footer.entries.len(),
            file_size: self.position,
            footer,
        })
    }

    /// Bytes written so far
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn into_inner(self) -> S {
        self.sink
    }
}

/// Write a segment file at `path` so it appears complete or not at all
///
/// Bytes go to `<path>.tmp` first through the sink built by `wrap`; only a
/// fully written file is renamed into place. On any failure the temporary
/// file is removed and `path` is untouched.
pub fn write_segment_file<S, F>(
    path: &Path,
    schema: &SchemaSnapshot,
    batch: &ColumnarBatch,
    options: WriteOptions,
    wrap: F,
) -> Result<SegmentSummary>
where
    S: SegmentSink,
    F: FnOnce(File) -> S,
{
    let tmp_path = tmp_path_for(path);

    let result = (|| -> Result<SegmentSummary> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = SegmentWriter::new(wrap(file), options);
        let summary = writer.write_segment(schema, batch)?;
        drop(writer);

        fs::rename(&tmp_path, path)?;
        if options.sync {
            sync_parent_dir(path)?;
        }
        Ok(summary)
    })();

    if result.is_err() {
        if let Err(e) = fs::remove_file(&tmp_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %tmp_path.display(), error = %e, "Failed to remove partial segment");
            }
        }
    }
    result
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// fsync a file's directory so a rename survives a crash
#[cfg(unix)]
pub(crate) fn sync_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}
