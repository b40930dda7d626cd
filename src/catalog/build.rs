//! Offline catalog build: raw per-cell star files → quad catalogs.
//!
//! Each density pass of a cell keeps the `round(density * area)` brightest
//! stars of the cell and generates their quads. Cells are independent and are
//! built in parallel.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info};

use super::extract::{read_star_file, star_file_name};
use super::format::{FieldValue, StarRecord};
use super::writer::{CatalogWriter, PassData};
use crate::error::{CatalogError, InputError, SolveError};
use crate::index::{Cell, CellId, SkyIndex};
use crate::solver::quad::catalog_quads;

/// File name of the quad catalog for `cell`
pub fn catalog_file_name(cell: CellId) -> String {
    format!("cell_{:05}.qcat", cell.0)
}

/// Inverse of [catalog_file_name]
pub fn parse_catalog_file_name(name: &str) -> Option<CellId> {
    let digits = name.strip_prefix("cell_")?.strip_suffix(".qcat")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(CellId)
}

/// Check a density ladder: finite, positive, no duplicates. Returns it sorted.
pub fn validate_densities(densities: &[f64]) -> Result<Vec<f64>, InputError> {
    if densities.is_empty() {
        return Err(InputError::InvalidParameter(
            "at least one pass density is required".to_string(),
        ));
    }
    let mut sorted = densities.to_vec();
    if let Some(bad) = sorted.iter().find(|d| !d.is_finite() || **d <= 0.0) {
        return Err(InputError::InvalidParameter(format!(
            "pass density must be positive, got {bad}"
        )));
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    if sorted.windows(2).any(|w| w[0] == w[1]) {
        return Err(InputError::InvalidParameter(
            "pass densities must be distinct".to_string(),
        ));
    }
    Ok(sorted)
}

/// Quads of every density pass of one cell
pub fn build_cell_passes(
    cell: &Cell,
    stars: &[StarRecord],
    densities: &[f64],
) -> Result<Vec<PassData>, InputError> {
    let densities = validate_densities(densities)?;
    let mut by_brightness = stars.to_vec();
    by_brightness.sort_by(|a, b| a.mag.total_cmp(&b.mag));

    let area = cell.area_sq_deg();
    Ok(densities
        .into_iter()
        .map(|density| {
            let take = ((density * area).round() as usize).min(by_brightness.len());
            PassData {
                density,
                records: catalog_quads(&by_brightness[..take]),
            }
        })
        .collect())
}

/// Totals of a build run
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BuildStats {
    pub cells: usize,
    pub quads: u64,
}

/// Build `cell_NNNNN.qcat` under `out_dir` for every cell with a star file in `stars_dir`.
///
/// Cells without a star file are skipped. The first failing cell aborts the run.
pub fn build_catalog(
    stars_dir: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    index: &SkyIndex,
    densities: &[f64],
    threads: usize,
) -> Result<BuildStats, SolveError> {
    let densities = validate_densities(densities)?;
    let stars_dir = stars_dir.as_ref();
    let out_dir = out_dir.as_ref();
    std::fs::create_dir_all(out_dir).map_err(CatalogError::from)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()
        .map_err(|e| SolveError::Config(e.to_string()))?;

    let todo: Vec<(&Cell, PathBuf)> = index
        .cells()
        .iter()
        .map(|cell| (cell, stars_dir.join(star_file_name(cell.id))))
        .filter(|(_, path)| path.is_file())
        .collect();
    info!(
        "building {} cell catalogs with {} passes each",
        todo.len(),
        densities.len()
    );

    let quads = pool.install(|| {
        todo.par_iter()
            .map(|(cell, path)| build_cell(cell, path, out_dir, &densities))
            .collect::<Result<Vec<u64>, SolveError>>()
    })?;

    Ok(BuildStats {
        cells: quads.len(),
        quads: quads.iter().sum(),
    })
}

fn build_cell(
    cell: &Cell,
    stars_path: &Path,
    out_dir: &Path,
    densities: &[f64],
) -> Result<u64, SolveError> {
    let stars = read_star_file(stars_path)?;
    let passes = build_cell_passes(cell, &stars, densities)?;
    let quads: u64 = passes.iter().map(|p| p.records.len() as u64).sum();

    let metadata = vec![
        ("stars".to_string(), FieldValue::Integer(stars.len() as i64)),
        ("area_sq_deg".to_string(), FieldValue::Float(cell.area_sq_deg())),
        (
            "builder".to_string(),
            FieldValue::Text(format!("starbot {}", env!("CARGO_PKG_VERSION"))),
        ),
    ];
    CatalogWriter::write(
        out_dir.join(catalog_file_name(cell.id)),
        cell.id,
        passes,
        &metadata,
    )?;
    debug!("cell {}: {} stars, {} quads", cell.id, stars.len(), quads);
    Ok(quads)
}
