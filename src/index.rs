//! Partition of the celestial sphere into cells
//!
//! The sky is cut into declination bands of equal height. Each band is split
//! into RA cells whose count scales with cos(dec), so every cell covers roughly
//! the same solid angle and therefore holds a comparable number of stars and
//! quads. The two polar cap bands are single cells covering the full RA circle.
//!
//! Cells of a band are centred on RA `k * 360 / n`, so the first cell of every
//! multi-cell band straddles the 0/360 seam (e.g. 350..10).

use derive_more::{Display, From};

use crate::common::EquatorialCoords;
use crate::error::InputError;

/// Stable identifier of a sky cell, dense in `0..cell_count`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From)]
#[display(fmt = "{}", _0)]
pub struct CellId(pub u32);

impl CellId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// RA/Dec extent of a cell in degrees
///
/// When `ra_left > ra_right` the cell wraps through RA 0. A full-circle cell
/// has `ra_left == 0` and `ra_right == 360`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaDecBounds {
    pub ra_left: f64,
    pub ra_right: f64,
    pub dec_top: f64,
    pub dec_bottom: f64,
}

impl RaDecBounds {
    pub fn wraps(&self) -> bool {
        self.ra_left > self.ra_right
    }

    pub fn is_full_circle(&self) -> bool {
        self.ra_left == 0.0 && self.ra_right >= 360.0
    }

    /// RA width in degrees
    pub fn ra_width(&self) -> f64 {
        if self.wraps() {
            360.0 - self.ra_left + self.ra_right
        } else {
            self.ra_right - self.ra_left
        }
    }

    /// Half-open containment, left edge inclusive
    pub fn contains_ra(&self, ra: f64) -> bool {
        if self.wraps() {
            ra >= self.ra_left || ra < self.ra_right
        } else {
            ra >= self.ra_left && ra < self.ra_right
        }
    }

    /// Open containment used by the search radius test
    pub fn contains_ra_strictly(&self, ra: f64) -> bool {
        if self.is_full_circle() {
            return true;
        }
        if self.wraps() {
            ra > self.ra_left || ra < self.ra_right
        } else {
            ra > self.ra_left && ra < self.ra_right
        }
    }

    /// Half-open `[dec_bottom, dec_top)`; only the north cap also owns +90
    pub fn contains_dec(&self, dec: f64) -> bool {
        dec >= self.dec_bottom && (dec < self.dec_top || self.dec_top >= 90.0)
    }

    /// Closed `[dec_bottom, dec_top]`, for distance tests where edges touch
    pub fn spans_dec(&self, dec: f64) -> bool {
        dec >= self.dec_bottom && dec <= self.dec_top
    }

    pub fn contains(&self, coords: &EquatorialCoords) -> bool {
        self.contains_ra(coords.ra()) && self.contains_dec(coords.dec())
    }
}

/// One partition unit of the sky
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub id: CellId,
    pub band: usize,
    pub bounds: RaDecBounds,
}

impl Cell {
    /// Solid angle covered by the cell in square degrees
    pub fn area_sq_deg(&self) -> f64 {
        let b = &self.bounds;
        let rad2 = (180.0 / std::f64::consts::PI).powi(2);
        b.ra_width().to_radians()
            * (b.dec_top.to_radians().sin() - b.dec_bottom.to_radians().sin())
            * rad2
    }

    pub fn center(&self) -> EquatorialCoords {
        let b = &self.bounds;
        let dec = if b.is_full_circle() {
            // polar caps: the pole itself
            if b.dec_top >= 90.0 {
                90.0
            } else {
                -90.0
            }
        } else {
            (b.dec_top + b.dec_bottom) / 2.0
        };
        let ra = if b.is_full_circle() {
            0.0
        } else {
            b.ra_left + b.ra_width() / 2.0
        };
        // ra may exceed 360 for wrapping cells; dec is always in range
        let center = EquatorialCoords::wrapped(ra, dec);
        debug_assert!(center.is_ok(), "cell centre out of range: {ra} {dec}");
        center.unwrap_or_default()
    }
}

/// A declination strip of cells with equal RA width
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub index: usize,
    pub dec_bottom: f64,
    pub dec_top: f64,
    pub first_cell: CellId,
    pub cell_count: u32,
}

impl Band {
    pub fn cell_width(&self) -> f64 {
        360.0 / self.cell_count as f64
    }
}

/// Deterministic banded partition of the sphere
#[derive(Debug, Clone)]
pub struct SkyIndex {
    band_height: f64,
    bands: Vec<Band>,
    cells: Vec<Cell>,
}

impl Default for SkyIndex {
    fn default() -> Self {
        // 18 bands is always valid
        Self::build(Self::DEFAULT_BANDS)
    }
}

impl SkyIndex {
    /// 10 degree bands
    pub const DEFAULT_BANDS: usize = 18;

    /// Partition the sky into `band_count` declination bands (at least 3:
    /// two polar caps and one equatorial band).
    pub fn new(band_count: usize) -> Result<Self, InputError> {
        if band_count < 3 {
            return Err(InputError::InvalidParameter(format!(
                "band count must be at least 3, got {band_count}"
            )));
        }
        Ok(Self::build(band_count))
    }

    fn build(band_count: usize) -> Self {
        let band_height = 180.0 / band_count as f64;
        let mut bands = Vec::with_capacity(band_count);
        let mut cells = Vec::new();

        for index in 0..band_count {
            let dec_bottom = -90.0 + index as f64 * band_height;
            let dec_top = if index + 1 == band_count {
                90.0
            } else {
                -90.0 + (index + 1) as f64 * band_height
            };
            let polar = index == 0 || index + 1 == band_count;
            let cell_count = if polar {
                1
            } else {
                let mid = ((dec_top + dec_bottom) / 2.0).to_radians();
                ((360.0 * mid.cos() / band_height).round() as u32).max(1)
            };
            let first_cell = CellId(cells.len() as u32);
            let width = 360.0 / cell_count as f64;
            // shared edges, so neighbouring cells neither overlap nor leave gaps
            let edges: Vec<f64> = (0..cell_count)
                .map(|k| (k as f64 * width - width / 2.0).rem_euclid(360.0))
                .collect();

            for k in 0..cell_count as usize {
                let (ra_left, ra_right) = if cell_count == 1 {
                    (0.0, 360.0)
                } else {
                    (edges[k], edges[(k + 1) % edges.len()])
                };
                cells.push(Cell {
                    id: CellId(cells.len() as u32),
                    band: index,
                    bounds: RaDecBounds {
                        ra_left,
                        ra_right,
                        dec_top,
                        dec_bottom,
                    },
                });
            }

            bands.push(Band {
                index,
                dec_bottom,
                dec_top,
                first_cell,
                cell_count,
            });
        }

        Self {
            band_height,
            bands,
            cells,
        }
    }

    /// Every cell, south to north, RA ascending from the seam cell within a band
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn band_height(&self) -> f64 {
        self.band_height
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(id.index())
    }

    /// The unique cell owning `coords`. Dec = ±90 always yields the polar cell.
    pub fn cell_at(&self, coords: &EquatorialCoords) -> &Cell {
        let band = self.band_at(coords.dec());
        if band.cell_count == 1 {
            return &self.cells[band.first_cell.index()];
        }
        let n = band.cell_count as usize;
        let width = band.cell_width();
        let shifted = (coords.ra() + width / 2.0).rem_euclid(360.0);
        let guess = ((shifted / width).floor() as usize).min(n - 1);
        // the guess can be one off at an edge; the stored bounds decide
        let band_cells = &self.cells[band.first_cell.index()..band.first_cell.index() + n];
        [guess, (guess + 1) % n, (guess + n - 1) % n]
            .into_iter()
            .map(|k| &band_cells[k])
            .find(|c| c.bounds.contains_ra(coords.ra()))
            .or_else(|| band_cells.iter().find(|c| c.bounds.contains_ra(coords.ra())))
            .unwrap_or(&band_cells[guess])
    }

    /// [SkyIndex::cell_at] for raw degrees, rejecting out of range input
    pub fn cell_at_deg(&self, ra: f64, dec: f64) -> Result<&Cell, InputError> {
        let coords = EquatorialCoords::new(ra, dec)?;
        Ok(self.cell_at(&coords))
    }

    fn band_at(&self, dec: f64) -> &Band {
        let last = self.bands.len() - 1;
        let i = (((dec + 90.0) / self.band_height).floor().max(0.0) as usize).min(last);
        let owns = |b: &Band| dec >= b.dec_bottom && (dec < b.dec_top || b.index == last);
        [i, (i + 1).min(last), i.saturating_sub(1)]
            .into_iter()
            .map(|j| &self.bands[j])
            .find(|b| owns(b))
            .unwrap_or(&self.bands[i])
    }
}
