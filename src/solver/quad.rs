//! Quad signatures: the geometric hash shared by catalog and image.
//!
//! Every star together with its three nearest neighbours forms a quad; quads
//! with the same four members are kept once. The six pairwise distances of a
//! quad are sorted descending and the five smaller ones are divided by the
//! largest. Those ratios do not change under translation, rotation, scaling or
//! mirroring, so an image quad and the catalog quad of the same four stars
//! share them. The largest distance fixes the scale once a pair is matched and
//! the quad centre gives one point correspondence for the plate fit.
//!
//! Catalog distances are angles on the sphere (degrees), image distances are
//! pixels.

use std::collections::HashSet;

use glam::DVec3;

use super::common::DetectedStar;
use crate::catalog::format::{QuadRecord, StarRecord, NUM_RATIOS};
use crate::math::{ra_dec_of, unit_vector, vector_separation};

/// Stars per quad
pub const QUAD_SIZE: usize = 4;

/// A quad built from detected image stars
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageQuad {
    pub ratios: [f64; NUM_RATIOS],
    /// Largest edge in pixels
    pub largest: f64,
    /// Mean position of the four stars, pixels
    pub center: (f64, f64),
}

/// Member sets of all nearest-neighbour quads among `n` points.
///
/// `rank(i, j)` only has to order neighbours correctly (squared distances,
/// `1 - cos` and so on are fine). Brute force: O(n²).
pub fn nearest_neighbour_quads<F>(n: usize, rank: F) -> Vec<[usize; QUAD_SIZE]>
where
    F: Fn(usize, usize) -> f64,
{
    if n < QUAD_SIZE {
        return Vec::new();
    }
    let mut seen = HashSet::new();
    let mut quads = Vec::new();
    let mut nearest: Vec<(f64, usize)> = Vec::with_capacity(n);

    for i in 0..n {
        nearest.clear();
        nearest.extend((0..n).filter(|&j| j != i).map(|j| (rank(i, j), j)));
        nearest.select_nth_unstable_by(QUAD_SIZE - 2, |a, b| a.0.total_cmp(&b.0));

        let mut members = [i, nearest[0].1, nearest[1].1, nearest[2].1];
        members.sort_unstable();
        if seen.insert(members) {
            quads.push(members);
        }
    }
    quads
}

/// Ratios and largest edge from the six pairwise distances of a quad.
/// `None` when the quad has no extent.
pub fn signature(mut edges: [f64; 6]) -> Option<([f64; NUM_RATIOS], f64)> {
    edges.sort_unstable_by(|a, b| b.total_cmp(a));
    let largest = edges[0];
    if !(largest > 0.0) || !largest.is_finite() {
        return None;
    }
    let mut ratios = [0.0; NUM_RATIOS];
    for (r, e) in ratios.iter_mut().zip(&edges[1..]) {
        *r = e / largest;
    }
    Some((ratios, largest))
}

fn edges<F: Fn(usize, usize) -> f64>(m: &[usize; QUAD_SIZE], dist: F) -> [f64; 6] {
    [
        dist(m[0], m[1]),
        dist(m[0], m[2]),
        dist(m[0], m[3]),
        dist(m[1], m[2]),
        dist(m[1], m[3]),
        dist(m[2], m[3]),
    ]
}

/// Quads of the brightest `max_stars` detected stars
pub fn image_quads(stars: &[DetectedStar], max_stars: usize) -> Vec<ImageQuad> {
    let mut sorted: Vec<&DetectedStar> = stars
        .iter()
        .filter(|s| s.x.is_finite() && s.y.is_finite())
        .collect();
    sorted.sort_by(|a, b| b.flux.total_cmp(&a.flux));
    sorted.truncate(max_stars);

    let dist2 = |i: usize, j: usize| {
        let dx = sorted[i].x - sorted[j].x;
        let dy = sorted[i].y - sorted[j].y;
        dx * dx + dy * dy
    };

    nearest_neighbour_quads(sorted.len(), dist2)
        .into_iter()
        .filter_map(|m| {
            let (ratios, largest) = signature(edges(&m, |i, j| dist2(i, j).sqrt()))?;
            let cx = m.iter().map(|&i| sorted[i].x).sum::<f64>() / QUAD_SIZE as f64;
            let cy = m.iter().map(|&i| sorted[i].y).sum::<f64>() / QUAD_SIZE as f64;
            Some(ImageQuad {
                ratios,
                largest,
                center: (cx, cy),
            })
        })
        .collect()
}

/// Quads of catalog stars; distances are great-circle angles in degrees
pub fn catalog_quads(stars: &[StarRecord]) -> Vec<QuadRecord> {
    let vectors: Vec<DVec3> = stars.iter().map(|s| unit_vector(s.ra, s.dec)).collect();
    // larger dot product means closer
    let rank = |i: usize, j: usize| 1.0 - vectors[i].dot(vectors[j]);

    nearest_neighbour_quads(vectors.len(), rank)
        .into_iter()
        .filter_map(|m| {
            let (ratios, largest) =
                signature(edges(&m, |i, j| vector_separation(vectors[i], vectors[j])))?;
            let sum = m.iter().fold(DVec3::ZERO, |acc, &i| acc + vectors[i]);
            if sum.length() == 0.0 {
                return None;
            }
            let (center_ra, center_dec) = ra_dec_of(sum);
            Some(QuadRecord {
                ratios: ratios.map(|r| r as f32),
                largest_edge: largest as f32,
                center_ra,
                center_dec,
            })
        })
        .collect()
}

/// Image quads ordered by their first ratio for range lookups
#[derive(Debug, Clone, Default)]
pub struct ImageQuadSet {
    quads: Vec<ImageQuad>,
}

impl ImageQuadSet {
    pub fn new(mut quads: Vec<ImageQuad>) -> Self {
        quads.sort_by(|a, b| a.ratios[0].total_cmp(&b.ratios[0]));
        Self { quads }
    }

    pub fn len(&self) -> usize {
        self.quads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quads.is_empty()
    }

    pub fn quads(&self) -> &[ImageQuad] {
        &self.quads
    }

    /// Image quads whose every ratio lies within `tolerance` of `ratios`
    pub fn candidates<'a>(
        &'a self,
        ratios: &'a [f32; NUM_RATIOS],
        tolerance: f64,
    ) -> impl Iterator<Item = &'a ImageQuad> + 'a {
        let lo = ratios[0] as f64 - tolerance;
        let hi = ratios[0] as f64 + tolerance;
        let start = self.quads.partition_point(|q| q.ratios[0] < lo);
        self.quads[start..]
            .iter()
            .take_while(move |q| q.ratios[0] <= hi)
            .filter(move |q| {
                q.ratios
                    .iter()
                    .zip(ratios.iter())
                    .all(|(a, &b)| (a - b as f64).abs() <= tolerance)
            })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn star(x: f64, y: f64, flux: f64) -> DetectedStar {
        DetectedStar { x, y, flux }
    }

    fn field() -> Vec<DetectedStar> {
        vec![
            star(10.0, 12.0, 9.0),
            star(40.0, 18.0, 8.0),
            star(22.0, 47.0, 7.0),
            star(55.0, 60.0, 6.0),
            star(80.0, 20.0, 5.0),
            star(95.0, 75.0, 4.0),
            star(30.0, 90.0, 3.0),
        ]
    }

    #[test]
    fn test_too_few_stars() {
        assert!(image_quads(&field()[..3], 100).is_empty());
        assert!(catalog_quads(&[]).is_empty());
    }

    #[test]
    fn test_quads_are_unique() {
        let quads = nearest_neighbour_quads(7, |i, j| (i as f64 - j as f64).abs());
        let set: HashSet<[usize; 4]> = quads.iter().cloned().collect();
        assert_eq!(set.len(), quads.len());
        assert!(quads.contains(&[0, 1, 2, 3]));
    }

    #[test]
    fn test_signature_ratios() {
        // unit square: four sides of 1 and two diagonals of sqrt(2)
        let s = 2f64.sqrt();
        let (ratios, largest) = signature([1.0, 1.0, s, s, 1.0, 1.0]).unwrap();
        assert_relative_eq!(largest, s);
        assert_relative_eq!(ratios[0], 1.0);
        for r in &ratios[1..] {
            assert_relative_eq!(*r, 1.0 / s, epsilon = 1e-12);
        }
        assert!(signature([0.0; 6]).is_none());
    }

    #[test]
    fn test_image_signature_invariant_under_similarity() {
        let base = image_quads(&field(), 100);
        let theta = 0.7f64;
        let (s, c) = theta.sin_cos();
        let moved: Vec<DetectedStar> = field()
            .iter()
            .map(|p| star(3.0 * (c * p.x - s * p.y) + 100.0, -3.0 * (s * p.x + c * p.y) + 7.0, p.flux))
            .collect();
        let other = image_quads(&moved, 100);
        assert_eq!(base.len(), other.len());
        for (a, b) in base.iter().zip(&other) {
            for k in 0..NUM_RATIOS {
                assert_relative_eq!(a.ratios[k], b.ratios[k], epsilon = 1e-9);
            }
            assert_relative_eq!(b.largest, 3.0 * a.largest, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_max_stars_keeps_brightest() {
        let quads = image_quads(&field(), 4);
        assert_eq!(quads.len(), 1);
        let q = quads[0];
        assert_relative_eq!(q.center.0, (10.0 + 40.0 + 22.0 + 55.0) / 4.0);
    }

    #[test]
    fn test_catalog_quad_center_and_scale() {
        let stars = [
            StarRecord { ra: 10.0, dec: 0.0, mag: 5.0 },
            StarRecord { ra: 11.0, dec: 0.0, mag: 5.0 },
            StarRecord { ra: 10.0, dec: 1.0, mag: 5.0 },
            StarRecord { ra: 11.0, dec: 1.0, mag: 5.0 },
        ];
        let quads = catalog_quads(&stars);
        assert_eq!(quads.len(), 1);
        let q = quads[0];
        assert_relative_eq!(q.center_ra, 10.5, epsilon = 1e-6);
        assert_relative_eq!(q.center_dec, 0.5, epsilon = 1e-3);
        assert_relative_eq!(q.largest_edge as f64, 2f64.sqrt(), epsilon = 1e-3);
    }

    #[test]
    fn test_candidates_respect_tolerance() {
        let quads = ImageQuadSet::new(image_quads(&field(), 100));
        let target = quads.quads()[0];
        let ratios = target.ratios.map(|r| r as f32);
        let found: Vec<&ImageQuad> = quads.candidates(&ratios, 1e-4).collect();
        assert!(found.iter().any(|q| **q == target));
        for q in found {
            for k in 0..NUM_RATIOS {
                assert!((q.ratios[k] - ratios[k] as f64).abs() <= 1e-4);
            }
        }
        let mut off = ratios;
        off[4] += 0.2;
        assert!(quads.candidates(&off, 1e-4).all(|q| q.ratios != target.ratios));
    }
}
