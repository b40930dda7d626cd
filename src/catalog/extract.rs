//! Raw star extraction: external catalog rows → per-cell star files.
//!
//! Shards of an external catalog are processed in parallel on a dedicated
//! rayon pool. Each worker batches records per cell and periodically merges
//! them into the shared per-cell append streams. Every cell stream has its own
//! lock, so workers only contend when they flush into the same cell.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::format::{FieldValue, StarRecord, STAR_RECORD_SIZE};
use crate::common::EquatorialCoords;
use crate::error::{CatalogError, InputError, SolveError};
use crate::index::{CellId, SkyIndex};

/// Records buffered per worker before merging into the cell streams
const FLUSH_THRESHOLD: usize = 64 * 1024;

/// Which columns of a catalog row hold RA, Dec and magnitude
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLayout {
    pub ra: usize,
    pub dec: usize,
    pub mag: usize,
}

impl Default for RowLayout {
    fn default() -> Self {
        Self {
            ra: 0,
            dec: 1,
            mag: 2,
        }
    }
}

/// File name of the raw star file for `cell`
pub fn star_file_name(cell: CellId) -> String {
    format!("cell_{:05}.stars", cell.0)
}

/// Split a row on commas, tabs or spaces into typed fields
pub fn parse_fields(line: &str) -> Vec<FieldValue> {
    if line.contains(',') {
        line.split(',').map(FieldValue::parse).collect()
    } else {
        line.split_whitespace().map(FieldValue::parse).collect()
    }
}

/// Parse one catalog row.
///
/// Returns `Ok(None)` for blank lines, `#` comments and rows whose magnitude is
/// absent (stars without photometry cannot be ranked by brightness).
pub fn parse_catalog_row(
    line: &str,
    line_no: usize,
    layout: RowLayout,
) -> Result<Option<StarRecord>, InputError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let fields = parse_fields(trimmed);
    let column = |idx: usize, name: &str| -> Result<Option<f64>, InputError> {
        match fields.get(idx) {
            None => Err(InputError::BadRow {
                line: line_no,
                reason: format!("missing {name} column {idx}"),
            }),
            Some(FieldValue::Integer(i)) => Ok(Some(*i as f64)),
            Some(FieldValue::Float(f)) => Ok(Some(*f)),
            Some(FieldValue::Absent) => Ok(None),
            Some(FieldValue::Text(t)) => Err(InputError::BadRow {
                line: line_no,
                reason: format!("{name} is not numeric: {t:?}"),
            }),
        }
    };

    let (Some(ra), Some(dec)) = (column(layout.ra, "ra")?, column(layout.dec, "dec")?) else {
        return Err(InputError::BadRow {
            line: line_no,
            reason: "missing position".to_string(),
        });
    };
    let Some(mag) = column(layout.mag, "magnitude")? else {
        return Ok(None);
    };

    let coords = EquatorialCoords::wrapped(ra, dec).map_err(|e| InputError::BadRow {
        line: line_no,
        reason: e.to_string(),
    })?;
    Ok(Some(StarRecord {
        ra: coords.ra(),
        dec: coords.dec(),
        mag: mag as f32,
    }))
}

/// Append-only per-cell star files, each behind its own lock
pub struct CellStreams {
    dir: PathBuf,
    streams: Vec<Mutex<Option<BufWriter<File>>>>,
    written: Vec<AtomicU64>,
}

impl CellStreams {
    pub fn new(dir: impl AsRef<Path>, index: &SkyIndex) -> Result<Self, CatalogError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let n = index.cell_count();
        Ok(Self {
            dir,
            streams: (0..n).map(|_| Mutex::new(None)).collect(),
            written: (0..n).map(|_| AtomicU64::new(0)).collect(),
        })
    }

    pub fn path_for(&self, cell: CellId) -> PathBuf {
        self.dir.join(star_file_name(cell))
    }

    /// Append `records` to the stream of `cell`, opening it on first use
    pub fn append(&self, cell: CellId, records: &[StarRecord]) -> Result<(), CatalogError> {
        let slot = self
            .streams
            .get(cell.index())
            .ok_or_else(|| CatalogError::Format(format!("cell {cell} outside the index")))?;
        let mut guard = slot.lock();
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path_for(cell))?;
            *guard = Some(BufWriter::new(file));
        }
        if let Some(w) = guard.as_mut() {
            for r in records {
                w.write_all(&r.to_bytes())?;
            }
        }
        self.written[cell.index()].fetch_add(records.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Number of records appended to `cell` through this instance
    pub fn written(&self, cell: CellId) -> u64 {
        self.written
            .get(cell.index())
            .map_or(0, |w| w.load(Ordering::Relaxed))
    }

    /// Flush and close every open stream
    pub fn finish(self) -> Result<(), CatalogError> {
        for slot in self.streams {
            if let Some(mut w) = slot.into_inner() {
                w.flush()?;
            }
        }
        Ok(())
    }
}

/// Totals of an extraction run
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ExtractStats {
    pub rows: u64,
    pub kept: u64,
    pub skipped: u64,
    pub failed_shards: Vec<(PathBuf, String)>,
}

/// Route the rows of every shard into per-cell star files under `out_dir`.
///
/// Shards are independent; a shard that fails (unreadable file, malformed row)
/// is reported in [ExtractStats::failed_shards] and does not stop the others.
/// Records a failed shard merged before the failure stay in the cell files.
pub fn extract_shards(
    shards: &[PathBuf],
    index: &SkyIndex,
    out_dir: impl AsRef<Path>,
    layout: RowLayout,
    threads: usize,
) -> Result<ExtractStats, SolveError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()
        .map_err(|e| SolveError::Config(e.to_string()))?;
    let streams = CellStreams::new(out_dir, index)?;
    info!(
        "extracting {} shards into {} cells with {} threads",
        shards.len(),
        index.cell_count(),
        threads.max(1)
    );

    let rows = AtomicU64::new(0);
    let kept = AtomicU64::new(0);
    let skipped = AtomicU64::new(0);
    let failed: Mutex<Vec<(PathBuf, String)>> = Mutex::new(Vec::new());

    pool.install(|| {
        shards.par_iter().for_each(|shard| {
            match extract_shard(shard, index, &streams, layout) {
                Ok(stats) => {
                    rows.fetch_add(stats.rows, Ordering::Relaxed);
                    kept.fetch_add(stats.kept, Ordering::Relaxed);
                    skipped.fetch_add(stats.skipped, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("shard {:?} failed: {}", shard, e);
                    failed.lock().push((shard.clone(), e.to_string()));
                }
            }
        });
    });

    streams.finish()?;
    let mut failed_shards = failed.into_inner();
    failed_shards.sort();
    Ok(ExtractStats {
        rows: rows.into_inner(),
        kept: kept.into_inner(),
        skipped: skipped.into_inner(),
        failed_shards,
    })
}

fn extract_shard(
    shard: &Path,
    index: &SkyIndex,
    streams: &CellStreams,
    layout: RowLayout,
) -> Result<ExtractStats, SolveError> {
    let reader = BufReader::new(File::open(shard).map_err(CatalogError::from)?);
    let mut stats = ExtractStats::default();
    let mut pending: HashMap<CellId, Vec<StarRecord>> = HashMap::new();
    let mut buffered = 0usize;

    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(CatalogError::from)?;
        stats.rows += 1;
        let Some(star) = parse_catalog_row(&line, i + 1, layout)? else {
            stats.skipped += 1;
            continue;
        };
        let coords = EquatorialCoords::new(star.ra, star.dec)?;
        let cell = index.cell_at(&coords).id;
        pending.entry(cell).or_default().push(star);
        stats.kept += 1;
        buffered += 1;
        if buffered >= FLUSH_THRESHOLD {
            merge(&mut pending, streams)?;
            buffered = 0;
        }
    }
    merge(&mut pending, streams)?;
    debug!("shard {:?}: {} rows, {} kept", shard, stats.rows, stats.kept);
    Ok(stats)
}

fn merge(
    pending: &mut HashMap<CellId, Vec<StarRecord>>,
    streams: &CellStreams,
) -> Result<(), CatalogError> {
    for (cell, records) in pending.drain() {
        streams.append(cell, &records)?;
    }
    Ok(())
}

/// Read a raw star file back. A trailing partial record is a format error.
pub fn read_star_file(path: impl AsRef<Path>) -> Result<Vec<StarRecord>, CatalogError> {
    let mut bytes = Vec::new();
    File::open(path.as_ref())?.read_to_end(&mut bytes)?;
    if bytes.len() % STAR_RECORD_SIZE != 0 {
        return Err(CatalogError::Format(format!(
            "star file {:?} has {} trailing bytes",
            path.as_ref(),
            bytes.len() % STAR_RECORD_SIZE
        )));
    }
    Ok(bytes
        .chunks_exact(STAR_RECORD_SIZE)
        .map(|chunk| {
            let mut buf = [0u8; STAR_RECORD_SIZE];
            buf.copy_from_slice(chunk);
            StarRecord::from_bytes(&buf)
        })
        .collect())
}

#[cfg(test)]
mod test {
    use super::*;
    use rayon::prelude::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_parse_row_whitespace_and_csv() {
        let star = parse_catalog_row("10.5 -20.25 7.1", 1, RowLayout::default())
            .unwrap()
            .unwrap();
        assert_eq!(star.ra, 10.5);
        assert_eq!(star.dec, -20.25);
        assert_eq!(star.mag, 7.1f32);

        let layout = RowLayout {
            ra: 1,
            dec: 2,
            mag: 4,
        };
        let star = parse_catalog_row("HIP1,0.5,1,x,9", 1, layout).unwrap().unwrap();
        assert_eq!((star.ra, star.dec, star.mag), (0.5, 1.0, 9.0));
    }

    #[test]
    fn test_parse_row_skips_comments_and_missing_magnitude() {
        assert_eq!(parse_catalog_row("# ra dec mag", 1, RowLayout::default()), Ok(None));
        assert_eq!(parse_catalog_row("   ", 2, RowLayout::default()), Ok(None));
        assert_eq!(parse_catalog_row("1,2,", 3, RowLayout::default()), Ok(None));
    }

    #[test]
    fn test_parse_row_errors() {
        assert!(matches!(
            parse_catalog_row("abc 2 3", 4, RowLayout::default()),
            Err(InputError::BadRow { line: 4, .. })
        ));
        assert!(matches!(
            parse_catalog_row("1 2", 5, RowLayout::default()),
            Err(InputError::BadRow { line: 5, .. })
        ));
        assert!(matches!(
            parse_catalog_row("1 95 3", 6, RowLayout::default()),
            Err(InputError::BadRow { line: 6, .. })
        ));
    }

    #[test]
    fn test_parse_row_wraps_ra() {
        let star = parse_catalog_row("-1 0 5", 1, RowLayout::default())
            .unwrap()
            .unwrap();
        assert_eq!(star.ra, 359.0);
    }

    #[test]
    fn test_extract_routes_rows_to_cells() {
        let dir = tempdir().unwrap();
        let index = SkyIndex::default();
        let shard_a = dir.path().join("a.txt");
        let shard_b = dir.path().join("b.txt");
        fs::write(&shard_a, "# header\n0.1 0.5 5\n359.9 0.5 6\n45 45 7\n").unwrap();
        fs::write(&shard_b, "0.2 0.6 8\n45.1 45.1 9\n0 90 3\n").unwrap();
        let out = dir.path().join("stars");

        let stats = extract_shards(
            &[shard_a, shard_b],
            &index,
            &out,
            RowLayout::default(),
            2,
        )
        .unwrap();
        assert_eq!(stats.rows, 7);
        assert_eq!(stats.kept, 6);
        assert_eq!(stats.skipped, 1);
        assert!(stats.failed_shards.is_empty());

        let seam = index.cell_at_deg(0.1, 0.5).unwrap().id;
        let stars = read_star_file(out.join(star_file_name(seam))).unwrap();
        assert_eq!(stars.len(), 3);

        let pole = index.cell_at_deg(0.0, 90.0).unwrap().id;
        let stars = read_star_file(out.join(star_file_name(pole))).unwrap();
        assert_eq!(stars, vec![StarRecord { ra: 0.0, dec: 90.0, mag: 3.0 }]);
    }

    #[test]
    fn test_failed_shard_is_isolated() {
        let dir = tempdir().unwrap();
        let index = SkyIndex::default();
        let good = dir.path().join("good.txt");
        let bad = dir.path().join("bad.txt");
        fs::write(&good, "10 10 5\n").unwrap();
        fs::write(&bad, "10 10 5\nnot a row\n").unwrap();
        let missing = dir.path().join("missing.txt");

        let stats = extract_shards(
            &[good, bad.clone(), missing.clone()],
            &index,
            dir.path().join("stars"),
            RowLayout::default(),
            3,
        )
        .unwrap();
        assert_eq!(stats.failed_shards.len(), 2);
        let failed: Vec<&PathBuf> = stats.failed_shards.iter().map(|(p, _)| p).collect();
        assert!(failed.contains(&&bad));
        assert!(failed.contains(&&missing));
        assert_eq!(stats.kept, 1);
    }

    #[test]
    fn test_concurrent_appends_to_one_cell() {
        let dir = tempdir().unwrap();
        let index = SkyIndex::default();
        let streams = CellStreams::new(dir.path(), &index).unwrap();
        let cell = index.cell_at_deg(100.0, 20.0).unwrap().id;
        let star = StarRecord {
            ra: 100.0,
            dec: 20.0,
            mag: 4.0,
        };

        (0..8).into_par_iter().for_each(|_| {
            for _ in 0..100 {
                streams.append(cell, &[star, star]).unwrap();
            }
        });
        assert_eq!(streams.written(cell), 1600);
        let path = streams.path_for(cell);
        streams.finish().unwrap();
        assert_eq!(read_star_file(path).unwrap().len(), 1600);
    }

    #[test]
    fn test_partial_star_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.stars");
        fs::write(&path, [0u8; STAR_RECORD_SIZE + 3]).unwrap();
        assert!(matches!(read_star_file(&path), Err(CatalogError::Format(_))));
    }
}
