//! Solver tuning knobs, loadable from TOML.
//!
//! Every field has a default, so a config file only needs the keys it changes:
//!
//! ```toml
//! quad_tolerance = 0.01
//! threads = 4
//!
//! [density_offsets]
//! higher = 2
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SolveError;
use crate::region::DensityOffsets;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Largest difference allowed between corresponding quad ratios
    pub quad_tolerance: f64,
    /// Largest relative deviation of a quad's implied pixel scale from the guess
    pub scale_tolerance: f64,
    /// Brightest detected stars used to build image quads
    pub max_stars: usize,
    /// Quad pairs needed to accept a fit
    pub min_quad_matches: usize,
    /// Worst residual kept in the fit and RMS bound for acceptance, pixels
    pub max_residual_px: f64,
    /// Worker threads; `None` uses the available parallelism
    pub threads: Option<usize>,
    pub density_offsets: DensityOffsets,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            quad_tolerance: 0.008,
            scale_tolerance: 0.25,
            max_stars: 500,
            min_quad_matches: 3,
            max_residual_px: 2.0,
            threads: None,
            density_offsets: DensityOffsets::default(),
        }
    }
}

impl SolverConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, SolveError> {
        let config: Self = toml::from_str(s).map_err(|e| SolveError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, SolveError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SolveError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, SolveError> {
        toml::to_string(self).map_err(|e| SolveError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), SolveError> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(SolveError::Config(format!("{name} must be positive, got {v}")))
            }
        };
        positive("quad_tolerance", self.quad_tolerance)?;
        positive("scale_tolerance", self.scale_tolerance)?;
        positive("max_residual_px", self.max_residual_px)?;
        if self.max_stars < 4 {
            return Err(SolveError::Config(format!(
                "max_stars must be at least 4, got {}",
                self.max_stars
            )));
        }
        if self.min_quad_matches < 3 {
            return Err(SolveError::Config(format!(
                "min_quad_matches must be at least 3, got {}",
                self.min_quad_matches
            )));
        }
        if self.threads == Some(0) {
            return Err(SolveError::Config("threads must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SolverConfig::from_toml_str(
            "quad_tolerance = 0.01\nthreads = 4\n[density_offsets]\nhigher = 2\n",
        )
        .unwrap();
        assert_eq!(config.quad_tolerance, 0.01);
        assert_eq!(config.threads, Some(4));
        assert_eq!(config.density_offsets.higher(), 2);
        assert_eq!(config.density_offsets.lower(), 1);
        assert_eq!(config.max_stars, 500);
        assert_eq!(config.min_quad_matches, 3);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(SolverConfig::from_toml_str("").unwrap(), SolverConfig::default());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            SolverConfig::from_toml_str("min_quad_matches = 2"),
            Err(SolveError::Config(_))
        ));
        assert!(SolverConfig::from_toml_str("threads = 0").is_err());
        assert!(SolverConfig::from_toml_str("quad_tolerance = -1.0").is_err());
        assert!(SolverConfig::from_toml_str("quad_tolerance = \"wide\"").is_err());
    }

    #[test]
    fn test_toml_file_round_trip() {
        let mut config = SolverConfig::default();
        config.max_residual_px = 1.5;
        config.density_offsets = DensityOffsets::new(0, 3);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml_string().unwrap().as_bytes()).unwrap();
        assert_eq!(SolverConfig::from_toml_file(file.path()).unwrap(), config);
    }
}
