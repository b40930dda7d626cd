//! Producer side of the catalog format.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use super::format::{
    write_key, FieldValue, QuadRecord, CATALOG_MAGIC, CATALOG_VERSION, HEADER_SIZE,
    PASS_ENTRY_SIZE, QUAD_RECORD_SIZE,
};
use crate::error::CatalogError;
use crate::index::CellId;

/// Quads of one density pass, ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct PassData {
    pub density: f64,
    pub records: Vec<QuadRecord>,
}

/// Writes complete cell catalogs
pub struct CatalogWriter;

impl CatalogWriter {
    /// Write a catalog for `cell` to `path`.
    ///
    /// Passes are sorted by ascending density; equal or non-positive densities
    /// are rejected. The file is written next to `path` and renamed into place,
    /// so readers never observe a half-written catalog.
    pub fn write(
        path: impl AsRef<Path>,
        cell: CellId,
        mut passes: Vec<PassData>,
        metadata: &[(String, FieldValue)],
    ) -> Result<(), CatalogError> {
        let path = path.as_ref();
        passes.sort_by(|a, b| a.density.total_cmp(&b.density));
        for pair in passes.windows(2) {
            if pair[0].density >= pair[1].density {
                return Err(CatalogError::Format(format!(
                    "duplicate pass density {}",
                    pair[0].density
                )));
            }
        }
        if let Some(bad) = passes
            .iter()
            .find(|p| !p.density.is_finite() || p.density <= 0.0)
        {
            return Err(CatalogError::Format(format!(
                "invalid pass density {}",
                bad.density
            )));
        }

        let mut meta = Vec::new();
        for (key, value) in metadata {
            write_key(&mut meta, key)?;
            value.write_to(&mut meta)?;
        }

        let temp_path = path.with_extension("qcat.tmp");
        {
            let mut w = BufWriter::new(File::create(&temp_path)?);

            let mut header = [0u8; HEADER_SIZE];
            header[0..4].copy_from_slice(CATALOG_MAGIC);
            header[4] = CATALOG_VERSION;
            header[8..12].copy_from_slice(&cell.0.to_le_bytes());
            header[12..16].copy_from_slice(&(passes.len() as u32).to_le_bytes());
            header[16..20].copy_from_slice(&(metadata.len() as u32).to_le_bytes());
            w.write_all(&header)?;

            let mut offset = (HEADER_SIZE + passes.len() * PASS_ENTRY_SIZE + meta.len()) as u64;
            for pass in &passes {
                let mut entry = [0u8; PASS_ENTRY_SIZE];
                entry[0..8].copy_from_slice(&pass.density.to_le_bytes());
                entry[8..12].copy_from_slice(&(pass.records.len() as u32).to_le_bytes());
                entry[16..24].copy_from_slice(&offset.to_le_bytes());
                w.write_all(&entry)?;
                offset += (pass.records.len() * QUAD_RECORD_SIZE) as u64;
            }

            w.write_all(&meta)?;

            for pass in &passes {
                for record in &pass.records {
                    w.write_all(&record.to_bytes())?;
                }
            }
            w.flush()?;
        }
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}
