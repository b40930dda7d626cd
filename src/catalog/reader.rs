//! Streaming reader for per-cell quad catalogs.
//!
//! [CatalogReader::open] validates the header and pass table and returns
//! without touching quad data. Records of a pass are then streamed through
//! [CatalogReader::read_pass], so a cell never has to be materialised whole.
//! Every reader owns its own file handle; concurrent readers of the same file
//! need no coordination.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::format::{
    le4, le8, read_array, read_key, FieldValue, FileDescriptor, PassInfo, QuadRecord, CATALOG_MAGIC,
    CATALOG_VERSION, HEADER_SIZE, PASS_ENTRY_SIZE, QUAD_RECORD_SIZE,
};
use crate::error::CatalogError;
use crate::index::CellId;

/// Open handle to one cell catalog
pub struct CatalogReader {
    path: PathBuf,
    reader: BufReader<File>,
    descriptor: FileDescriptor,
}

impl CatalogReader {
    /// Open a catalog file and parse its descriptor.
    ///
    /// # Errors
    /// [CatalogError::UnrecognizedHeader] / [CatalogError::Version] when the
    /// magic or version byte is not understood (nothing past the header is read),
    /// [CatalogError::Format] when the header, pass table or metadata is
    /// truncated or inconsistent with the file size.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let descriptor = read_descriptor(&mut reader, file_len)?;
        debug!(
            "opened catalog {:?}: cell {} with {} passes",
            path,
            descriptor.cell,
            descriptor.passes.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            descriptor,
        })
    }

    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lazily stream the quads of pass `pass_index`.
    pub fn read_pass(&mut self, pass_index: usize) -> Result<PassRecords<'_>, CatalogError> {
        let pass = *self.descriptor.passes.get(pass_index).ok_or_else(|| {
            CatalogError::Format(format!(
                "pass {} requested, catalog has {}",
                pass_index,
                self.descriptor.passes.len()
            ))
        })?;
        self.reader.seek(SeekFrom::Start(pass.offset))?;
        Ok(PassRecords {
            reader: &mut self.reader,
            remaining: pass.record_count,
        })
    }

    /// Release the file handle now rather than at end of scope
    pub fn close(self) {
        drop(self);
    }
}

/// Iterator over the quads of one pass
pub struct PassRecords<'a> {
    reader: &'a mut BufReader<File>,
    remaining: u32,
}

impl PassRecords<'_> {
    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl Iterator for PassRecords<'_> {
    type Item = Result<QuadRecord, CatalogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let mut buf = [0u8; QUAD_RECORD_SIZE];
        match self.reader.read_exact(&mut buf) {
            Ok(()) => {
                self.remaining -= 1;
                Some(Ok(QuadRecord::from_bytes(&buf)))
            }
            Err(e) => {
                // stop after the first failure
                self.remaining = 0;
                Some(Err(CatalogError::from_read(e, "quad record")))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}

fn read_descriptor<R: Read>(r: &mut R, file_len: u64) -> Result<FileDescriptor, CatalogError> {
    let header: [u8; HEADER_SIZE] = read_array(r, "header")?;

    let magic = [header[0], header[1], header[2], header[3]];
    if &magic != CATALOG_MAGIC {
        return Err(CatalogError::UnrecognizedHeader(magic));
    }
    let version = header[4];
    if version != CATALOG_VERSION {
        return Err(CatalogError::Version {
            found: version,
            expected: CATALOG_VERSION,
        });
    }

    let cell = CellId(u32::from_le_bytes(le4(&header[8..12])));
    let pass_count = u32::from_le_bytes(le4(&header[12..16])) as usize;
    let meta_count = u32::from_le_bytes(le4(&header[16..20])) as usize;

    let table_end = HEADER_SIZE as u64 + (pass_count * PASS_ENTRY_SIZE) as u64;
    if table_end > file_len {
        return Err(CatalogError::Format(format!(
            "pass table for {pass_count} passes exceeds file size {file_len}"
        )));
    }

    let mut passes: Vec<PassInfo> = Vec::with_capacity(pass_count);
    for _ in 0..pass_count {
        let entry: [u8; PASS_ENTRY_SIZE] = read_array(r, "pass table")?;
        let pass = PassInfo {
            density: f64::from_le_bytes(le8(&entry[0..8])),
            record_count: u32::from_le_bytes(le4(&entry[8..12])),
            offset: u64::from_le_bytes(le8(&entry[16..24])),
        };
        if !pass.density.is_finite() || pass.density <= 0.0 {
            return Err(CatalogError::Format(format!(
                "invalid pass density {}",
                pass.density
            )));
        }
        if let Some(prev) = passes.last() {
            if pass.density <= prev.density {
                return Err(CatalogError::Format(
                    "pass densities are not ascending".to_string(),
                ));
            }
        }
        let past_end = pass
            .offset
            .checked_add(pass.byte_len())
            .map_or(true, |end| end > file_len);
        if pass.offset < table_end || past_end {
            return Err(CatalogError::Format(format!(
                "pass at offset {} with {} records exceeds file size {}",
                pass.offset, pass.record_count, file_len
            )));
        }
        passes.push(pass);
    }

    let mut metadata = Vec::with_capacity(meta_count.min(64));
    for _ in 0..meta_count {
        let key = read_key(r)?;
        let value = FieldValue::read_from(r)?;
        metadata.push((key, value));
    }

    Ok(FileDescriptor {
        version,
        cell,
        passes,
        metadata,
    })
}
