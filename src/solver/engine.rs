//! Quad-matching plate solver
//!
//! A solve builds the image quads once, picks the (cell, pass) units around
//! the search centre and hands every unit to the shared [Scheduler]. The first
//! unit that produces an accepted fit raises the per-solve token, which makes
//! the remaining units stop at their next poll. When several units succeed at
//! about the same time any of them may win.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Select;
use tracing::{debug, info, warn};

use super::common::{
    DetectedStar, ImageMetadata, PlateSolver, SearchParameters, SolveFailure, SolveOutcome,
};
use super::matcher::{UnitMatcher, UnitReport};
use super::quad::{image_quads, ImageQuadSet, QUAD_SIZE};
use crate::catalog::set::CatalogSet;
use crate::config::SolverConfig;
use crate::error::{CatalogError, InputError, JobError, SolveError, SubmitError};
use crate::region::{RegionSelector, SearchUnit};
use crate::scheduler::{CancellationToken, JobHandle, Scheduler};

/// How often the collector wakes up to check for external cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(20);

type UnitResult = Result<UnitReport, CatalogError>;

/// Plate solver over a [CatalogSet]
pub struct QuadSolver {
    catalogs: Arc<CatalogSet>,
    scheduler: Arc<Scheduler>,
    config: SolverConfig,
}

impl QuadSolver {
    pub fn new(
        catalogs: Arc<CatalogSet>,
        scheduler: Arc<Scheduler>,
        config: SolverConfig,
    ) -> Result<Self, SolveError> {
        config.validate()?;
        Ok(Self {
            catalogs,
            scheduler,
            config,
        })
    }

    /// Solver with its own scheduler sized by `config.threads`
    pub fn from_config(catalogs: Arc<CatalogSet>, config: SolverConfig) -> Result<Self, SolveError> {
        let scheduler = match config.threads {
            Some(n) => Scheduler::new(n)?,
            None => Scheduler::with_available_parallelism()?,
        };
        Self::new(catalogs, Arc::new(scheduler), config)
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn catalogs(&self) -> &CatalogSet {
        &self.catalogs
    }

    /// [PlateSolver::solve] that also gives up with [SolveError::Cancelled]
    /// once `cancel` is raised
    pub fn solve_with_token(
        &self,
        stars: &[DetectedStar],
        image: &ImageMetadata,
        params: &SearchParameters,
        cancel: &CancellationToken,
    ) -> Result<SolveOutcome, SolveError> {
        validate(stars, image, params)?;
        let start = Instant::now();
        let deadline = params.timeout.map(|t| start + t);
        let timeout = params.timeout.unwrap_or_default();

        if stars.len() < QUAD_SIZE {
            debug!("{} stars, need {}", stars.len(), QUAD_SIZE);
            return Ok(SolveOutcome::NoMatch(SolveFailure::default()));
        }
        let quads = ImageQuadSet::new(image_quads(stars, self.config.max_stars));
        if quads.is_empty() {
            return Ok(SolveOutcome::NoMatch(SolveFailure::default()));
        }

        let fov_h = params.fov_guess.degrees();
        let fov_w = fov_h * image.width as f64 / image.height as f64;
        let image_density = quads.len() as f64 / (fov_h * fov_w);

        let units = RegionSelector::new(self.catalogs.index(), &*self.catalogs).select_units(
            params.center,
            params.radius,
            image_density,
            params.density_offsets,
        )?;
        info!(
            "solving {} stars ({} quads, {:.2} per sq deg) over {} units",
            stars.len(),
            quads.len(),
            image_density,
            units.len()
        );
        if units.is_empty() {
            return Ok(SolveOutcome::NoMatch(SolveFailure::default()));
        }

        let matcher = Arc::new(UnitMatcher::new(quads, *image, self.config.clone(), fov_h));
        let token = CancellationToken::new();

        let mut handles = Vec::with_capacity(units.len());
        for unit in &units {
            if cancel.is_cancelled() {
                token.cancel();
                return Err(SolveError::Cancelled);
            }
            let job = unit_job(*unit, self.catalogs.clone(), matcher.clone(), token.clone());
            let submitted = match deadline {
                Some(deadline) => self.scheduler.submit_deadline(job, deadline),
                None => self.scheduler.submit(job),
            };
            match submitted {
                Ok(handle) => handles.push(handle),
                Err(SubmitError::Timeout) => {
                    token.cancel();
                    return Err(SolveError::Timeout(timeout));
                }
                Err(e) => {
                    token.cancel();
                    return Err(e.into());
                }
            }
        }

        let result = collect(&handles, &token, cancel, deadline, timeout);
        // stop stragglers whatever the outcome
        token.cancel();
        match &result {
            Ok(SolveOutcome::Solved(s)) => info!(
                "solved in {:?}: ({:.4}, {:.4}) cell {} pass density {}",
                start.elapsed(),
                s.ra.degrees(),
                s.dec.degrees(),
                s.cell,
                s.pass_density
            ),
            Ok(SolveOutcome::NoMatch(f)) => info!("no match after {:?}: {:?}", start.elapsed(), f),
            Err(e) => info!("solve failed after {:?}: {}", start.elapsed(), e),
        }
        result
    }
}

impl PlateSolver for QuadSolver {
    type E = SolveError;

    fn solve(
        &self,
        stars: &[DetectedStar],
        image: &ImageMetadata,
        params: &SearchParameters,
    ) -> Result<SolveOutcome, Self::E> {
        self.solve_with_token(stars, image, params, &CancellationToken::new())
    }
}

fn validate(
    stars: &[DetectedStar],
    image: &ImageMetadata,
    params: &SearchParameters,
) -> Result<(), InputError> {
    if image.width == 0 || image.height == 0 {
        return Err(InputError::InvalidParameter(format!(
            "image size {}x{}",
            image.width, image.height
        )));
    }
    let fov = params.fov_guess.degrees();
    if !(fov > 0.0 && fov < 180.0) {
        return Err(InputError::InvalidParameter(format!(
            "field of view must be in (0, 180), got {fov}"
        )));
    }
    if !(params.radius > 0.0 && params.radius <= 180.0) {
        return Err(InputError::InvalidParameter(format!(
            "search radius must be in (0, 180], got {}",
            params.radius
        )));
    }
    if let Some(star) = stars
        .iter()
        .find(|s| !s.x.is_finite() || !s.y.is_finite() || !s.flux.is_finite())
    {
        return Err(InputError::InvalidParameter(format!(
            "detected star with non-finite values {star:?}"
        )));
    }
    Ok(())
}

fn unit_job(
    unit: SearchUnit,
    catalogs: Arc<CatalogSet>,
    matcher: Arc<UnitMatcher>,
    token: CancellationToken,
) -> impl FnOnce() -> UnitResult + Send + 'static {
    move || {
        if token.is_cancelled() {
            return Ok(UnitReport {
                cancelled: true,
                ..Default::default()
            });
        }
        let mut reader = catalogs.open_reader(unit.cell)?;
        let report = matcher.match_unit(&unit, &mut reader, &token)?;
        reader.close();
        if report.solution.is_some() {
            token.cancel();
        }
        Ok(report)
    }
}

fn collect(
    handles: &[JobHandle<UnitResult>],
    token: &CancellationToken,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    timeout: Duration,
) -> Result<SolveOutcome, SolveError> {
    let mut done = vec![false; handles.len()];
    let mut remaining = handles.len();
    let mut failure = SolveFailure {
        units_searched: handles.len(),
        ..Default::default()
    };
    let mut first_error: Option<SolveError> = None;

    while remaining > 0 {
        if cancel.is_cancelled() {
            token.cancel();
            return Err(SolveError::Cancelled);
        }
        let wait = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    token.cancel();
                    return Err(SolveError::Timeout(timeout));
                }
                left.min(POLL_INTERVAL)
            }
            None => POLL_INTERVAL,
        };

        let mut select = Select::new();
        let mut slots = Vec::with_capacity(remaining);
        for (i, handle) in handles.iter().enumerate() {
            if !done[i] {
                select.recv(&handle.receiver);
                slots.push(i);
            }
        }
        let Ok(op) = select.select_timeout(wait) else {
            continue;
        };
        let i = slots[op.index()];
        let result = op
            .recv(&handles[i].receiver)
            .unwrap_or(Err(JobError::Disconnected));
        done[i] = true;
        remaining -= 1;

        let error = match result {
            Ok(Ok(report)) => {
                failure.candidates += report.candidates;
                if let Some(solution) = report.solution {
                    token.cancel();
                    return Ok(SolveOutcome::Solved(solution));
                }
                continue;
            }
            Ok(Err(e)) => SolveError::from(e),
            Err(e) => SolveError::from(e),
        };
        warn!("search unit failed: {}", error);
        failure.units_failed += 1;
        first_error.get_or_insert(error);
    }

    match first_error {
        Some(e) if failure.units_failed == failure.units_searched => Err(e),
        _ => Ok(SolveOutcome::NoMatch(failure)),
    }
}
