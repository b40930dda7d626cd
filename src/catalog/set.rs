//! A directory of per-cell catalogs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use super::build::{catalog_file_name, parse_catalog_file_name};
use super::format::FileDescriptor;
use super::reader::CatalogReader;
use crate::error::CatalogError;
use crate::index::{CellId, SkyIndex};
use crate::region::PassLadder;

struct Entry {
    descriptor: FileDescriptor,
    densities: Vec<f64>,
}

/// Descriptors of every `cell_NNNNN.qcat` file in a directory.
///
/// Only descriptors are kept in memory; solves open their own
/// [CatalogReader] per search unit.
pub struct CatalogSet {
    dir: PathBuf,
    index: Arc<SkyIndex>,
    entries: HashMap<CellId, Entry>,
    skipped: Vec<(CellId, CatalogError)>,
}

impl CatalogSet {
    /// Scan `dir` and read the descriptor of every cell catalog in it.
    ///
    /// Files not named like a cell catalog are ignored. A catalog that cannot
    /// be used (bad header or version, a header naming a different cell than
    /// its file name, a cell outside `index`) is left out of the set and
    /// listed in [CatalogSet::skipped]; its siblings stay usable. Only a
    /// directory that cannot be read fails the whole open.
    pub fn open(dir: impl AsRef<Path>, index: Arc<SkyIndex>) -> Result<Self, CatalogError> {
        let dir = dir.as_ref();
        let mut entries = HashMap::new();
        let mut skipped = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(cell) = name.to_str().and_then(parse_catalog_file_name) else {
                continue;
            };
            match read_entry(&entry.path(), cell, &index) {
                Ok(e) => {
                    entries.insert(cell, e);
                }
                Err(e) => {
                    warn!("skipping catalog {:?}: {}", entry.path(), e);
                    skipped.push((cell, e));
                }
            }
        }
        skipped.sort_by_key(|(cell, _)| *cell);

        info!(
            "catalog set {:?}: {} cells, {} skipped",
            dir,
            entries.len(),
            skipped.len()
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            index,
            entries,
            skipped,
        })
    }

    /// Catalog files left out by [CatalogSet::open], by cell
    pub fn skipped(&self) -> &[(CellId, CatalogError)] {
        &self.skipped
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index(&self) -> &SkyIndex {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, cell: CellId) -> bool {
        self.entries.contains_key(&cell)
    }

    /// Where the catalog of `cell` lives (whether or not it exists)
    pub fn path_for(&self, cell: CellId) -> PathBuf {
        self.dir.join(catalog_file_name(cell))
    }

    pub fn descriptor(&self, cell: CellId) -> Option<&FileDescriptor> {
        self.entries.get(&cell).map(|e| &e.descriptor)
    }

    /// Ascending pass densities of `cell`; empty without a catalog
    pub fn pass_densities(&self, cell: CellId) -> &[f64] {
        self.entries
            .get(&cell)
            .map(|e| e.densities.as_slice())
            .unwrap_or(&[])
    }

    /// Fresh reader for the catalog of `cell`
    pub fn open_reader(&self, cell: CellId) -> Result<CatalogReader, CatalogError> {
        CatalogReader::open(self.path_for(cell))
    }
}

fn read_entry(path: &Path, cell: CellId, index: &SkyIndex) -> Result<Entry, CatalogError> {
    if index.cell(cell).is_none() {
        return Err(CatalogError::Format(format!(
            "catalog for cell {cell} but the sky index has {} cells",
            index.cell_count()
        )));
    }
    let reader = CatalogReader::open(path)?;
    let descriptor = reader.descriptor().clone();
    reader.close();
    if descriptor.cell != cell {
        return Err(CatalogError::Format(format!(
            "{:?} holds cell {}",
            path, descriptor.cell
        )));
    }
    if descriptor.passes.is_empty() {
        warn!("catalog for cell {} has no passes", cell);
    }
    let densities = descriptor.densities();
    Ok(Entry {
        descriptor,
        densities,
    })
}

impl PassLadder for CatalogSet {
    fn pass_densities(&self, cell: CellId) -> &[f64] {
        CatalogSet::pass_densities(self, cell)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::catalog::writer::{CatalogWriter, PassData};
    use std::fs;
    use tempfile::tempdir;

    fn empty_pass(density: f64) -> PassData {
        PassData {
            density,
            records: vec![],
        }
    }

    #[test]
    fn test_open_scans_cell_catalogs() {
        let dir = tempdir().unwrap();
        let index = Arc::new(SkyIndex::default());
        for id in [3u32, 17] {
            CatalogWriter::write(
                dir.path().join(catalog_file_name(CellId(id))),
                CellId(id),
                vec![empty_pass(2.0), empty_pass(8.0)],
                &[],
            )
            .unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let set = CatalogSet::open(dir.path(), index).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains(CellId(3)));
        assert_eq!(set.pass_densities(CellId(17)), &[2.0, 8.0]);
        assert!(set.pass_densities(CellId(4)).is_empty());
        assert_eq!(set.path_for(CellId(3)), dir.path().join("cell_00003.qcat"));
        assert!(set.open_reader(CellId(3)).is_ok());
    }

    #[test]
    fn test_mismatched_cell_is_skipped() {
        let dir = tempdir().unwrap();
        CatalogWriter::write(
            dir.path().join(catalog_file_name(CellId(5))),
            CellId(6),
            vec![empty_pass(1.0)],
            &[],
        )
        .unwrap();
        let set = CatalogSet::open(dir.path(), Arc::new(SkyIndex::default())).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.skipped().len(), 1);
        assert_eq!(set.skipped()[0].0, CellId(5));
        assert!(matches!(set.skipped()[0].1, CatalogError::Format(_)));
    }

    #[test]
    fn test_bad_sibling_leaves_other_cells_usable() {
        let dir = tempdir().unwrap();
        for id in [3u32, 4] {
            CatalogWriter::write(
                dir.path().join(catalog_file_name(CellId(id))),
                CellId(id),
                vec![empty_pass(1.0), empty_pass(4.0)],
                &[],
            )
            .unwrap();
        }
        let bad = dir.path().join(catalog_file_name(CellId(4)));
        let mut bytes = fs::read(&bad).unwrap();
        bytes[4] = 9;
        fs::write(&bad, bytes).unwrap();
        // outside the default index
        CatalogWriter::write(
            dir.path().join(catalog_file_name(CellId(99_999))),
            CellId(99_999),
            vec![empty_pass(1.0)],
            &[],
        )
        .unwrap();

        let set = CatalogSet::open(dir.path(), Arc::new(SkyIndex::default())).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains(CellId(3)));
        assert_eq!(set.pass_densities(CellId(3)), &[1.0, 4.0]);
        assert!(set.pass_densities(CellId(4)).is_empty());
        assert!(set.open_reader(CellId(3)).is_ok());

        let skipped: Vec<CellId> = set.skipped().iter().map(|(c, _)| *c).collect();
        assert_eq!(skipped, vec![CellId(4), CellId(99_999)]);
        assert!(set.skipped()[0].1.is_version_error());
        assert!(!set.skipped()[1].1.is_version_error());
    }
}
