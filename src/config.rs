//! config.rs - Simulation Configuration
//!
//! This module centralizes the tunable parameters of the simulator: the
//! coupling scheme between the 1D and CFD layers, the per-module CFD solver
//! settings, and the time control of the event loop. All configurations are
//! validated at creation time and immutable afterwards.

use crate::error::{NetworkError, NetworkResult};

/// Configuration constants: defaults and validation bounds
pub mod constants {
    /// Default relaxation factor applied to boundary-value updates between
    /// hybrid iterations
    pub const DEFAULT_RELAXATION_FACTOR: f64 = 0.5;
    /// Minimum relaxation factor the adaptive scheme may decay to
    pub const MIN_RELAXATION_FACTOR: f64 = 0.01;
    /// Default relative tolerance of the hybrid convergence test
    pub const DEFAULT_HYBRID_TOLERANCE: f64 = 1e-4;
    /// Default number of LBM sub-iterations per coupling step
    pub const DEFAULT_THETA: usize = 10;
    /// Default number of successive converged iterations required
    pub const DEFAULT_STABLE_ITERATIONS: usize = 3;
    /// Default hard cap on hybrid iterations
    pub const DEFAULT_MAX_ITERATIONS: usize = 1000;

    /// Default lattice relaxation time tau
    pub const DEFAULT_RELAXATION_TIME: f64 = 0.932;
    /// Default resolution in lattice points per characteristic length
    pub const DEFAULT_RESOLUTION: usize = 20;
    /// Default relative tolerance of the kinetic-energy convergence tracer
    pub const DEFAULT_CFD_TOLERANCE: f64 = 1e-4;
    /// Default window length of the convergence tracer in sub-steps
    pub const DEFAULT_TRACER_WINDOW: usize = 100;
    /// Default interval between VTK snapshots in sub-steps (0 disables)
    pub const DEFAULT_VTK_INTERVAL: usize = 0;

    /// Default simulation time step in s
    pub const DEFAULT_TIME_STEP: f64 = 0.01;
    /// Default interval between written states in s
    pub const DEFAULT_WRITE_INTERVAL: f64 = 0.1;
    /// Default end time of the simulation in s
    pub const DEFAULT_MAX_END_TIME: f64 = 100.0;
}

/// Configuration of the hybrid fixed-point coupling between the 1D nodal
/// solver and the CFD sub-domains
#[derive(Clone, Copy, Debug)]
pub struct HybridConfig {
    /// Relaxation factor alpha applied to boundary-value updates
    pub relaxation_factor: f64,
    /// Relative tolerance of the convergence test at the openings
    pub tolerance: f64,
    /// Number of LBM sub-iterations per coupling step
    pub theta: usize,
    /// Number of successive iterations that must pass the tolerance test
    pub stable_iterations: usize,
    /// Hard cap on coupling iterations
    pub max_iterations: usize,
}

impl HybridConfig {
    /// Create a new hybrid configuration with validation
    pub fn new(relaxation_factor: f64, tolerance: f64, max_iterations: usize) -> NetworkResult<Self> {
        let config = Self {
            relaxation_factor,
            tolerance,
            max_iterations,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the hybrid configuration
    pub fn validate(&self) -> NetworkResult<()> {
        if !(0.0..=1.0).contains(&self.relaxation_factor) || self.relaxation_factor == 0.0 {
            return Err(NetworkError::invalid_geometry(format!(
                "relaxation factor {} must lie in (0, 1]",
                self.relaxation_factor
            )));
        }
        if self.tolerance <= 0.0 || !self.tolerance.is_finite() {
            return Err(NetworkError::invalid_geometry(format!(
                "hybrid tolerance {} must be positive and finite",
                self.tolerance
            )));
        }
        if self.theta == 0 || self.max_iterations == 0 {
            return Err(NetworkError::invalid_geometry(
                "theta and max_iterations must be positive",
            ));
        }
        Ok(())
    }
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            relaxation_factor: constants::DEFAULT_RELAXATION_FACTOR,
            tolerance: constants::DEFAULT_HYBRID_TOLERANCE,
            theta: constants::DEFAULT_THETA,
            stable_iterations: constants::DEFAULT_STABLE_ITERATIONS,
            max_iterations: constants::DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Configuration of one CFD sub-domain solver
#[derive(Clone, Debug)]
pub struct CfdConfig {
    /// Characteristic physical length in m (usually the channel width)
    pub char_phys_length: f64,
    /// Characteristic physical velocity in m/s
    pub char_phys_velocity: f64,
    /// Lattice points per characteristic length
    pub resolution: usize,
    /// Lattice relaxation time tau
    pub relaxation_time: f64,
    /// Relaxation time of the advection-diffusion lattices, if species
    /// transport is coupled into the domain
    pub ad_relaxation_time: Option<f64>,
    /// Relative tolerance of the kinetic-energy convergence tracer
    pub tolerance: f64,
    /// Window length of the convergence tracer in sub-steps
    pub tracer_window: usize,
    /// Interval between VTK snapshots in sub-steps; 0 disables snapshots
    pub vtk_interval: usize,
    /// Output directory for VTK snapshots
    pub vtk_dir: String,
}

impl CfdConfig {
    /// Create a new CFD configuration with validation
    pub fn new(char_phys_length: f64, char_phys_velocity: f64, resolution: usize) -> NetworkResult<Self> {
        let config = Self {
            char_phys_length,
            char_phys_velocity,
            resolution,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the CFD configuration
    pub fn validate(&self) -> NetworkResult<()> {
        if self.char_phys_length <= 0.0 || self.char_phys_velocity <= 0.0 {
            return Err(NetworkError::invalid_geometry(
                "characteristic length and velocity must be positive",
            ));
        }
        if self.resolution < 2 {
            return Err(NetworkError::invalid_geometry(format!(
                "resolution {} must be at least 2 lattice points",
                self.resolution
            )));
        }
        if self.relaxation_time <= 0.5 {
            return Err(NetworkError::invalid_geometry(format!(
                "relaxation time {} must exceed 0.5 for a stable lattice",
                self.relaxation_time
            )));
        }
        if let Some(tau_ad) = self.ad_relaxation_time {
            if tau_ad <= 0.5 {
                return Err(NetworkError::invalid_geometry(format!(
                    "AD relaxation time {tau_ad} must exceed 0.5"
                )));
            }
        }
        Ok(())
    }

    /// Lattice spacing dx in m
    pub fn spacing(&self) -> f64 {
        self.char_phys_length / self.resolution as f64
    }
}

impl Default for CfdConfig {
    fn default() -> Self {
        Self {
            char_phys_length: 1e-4,
            char_phys_velocity: 1e-1,
            resolution: constants::DEFAULT_RESOLUTION,
            relaxation_time: constants::DEFAULT_RELAXATION_TIME,
            ad_relaxation_time: None,
            tolerance: constants::DEFAULT_CFD_TOLERANCE,
            tracer_window: constants::DEFAULT_TRACER_WINDOW,
            vtk_interval: constants::DEFAULT_VTK_INTERVAL,
            vtk_dir: String::from("vtk_output"),
        }
    }
}

/// Time control of the event loop
#[derive(Clone, Copy, Debug)]
pub struct TimeConfig {
    /// Fixed time step for scalar transport in s
    pub time_step: f64,
    /// Interval between written states in s
    pub write_interval: f64,
    /// End time of the simulation in s
    pub max_end_time: f64,
    /// Write a state at every event instead of at fixed intervals
    pub event_based_writing: bool,
    /// Upper bound on the time step while a droplet sits at a bifurcation;
    /// 0 disables the bound
    pub max_adaptive_time_step: f64,
}

impl TimeConfig {
    /// Create a new time configuration with validation
    pub fn new(time_step: f64, write_interval: f64, max_end_time: f64) -> NetworkResult<Self> {
        let config = Self {
            time_step,
            write_interval,
            max_end_time,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the time configuration
    pub fn validate(&self) -> NetworkResult<()> {
        if self.time_step <= 0.0 || self.write_interval <= 0.0 || self.max_end_time <= 0.0 {
            return Err(NetworkError::invalid_geometry(
                "time step, write interval and end time must be positive",
            ));
        }
        if self.max_adaptive_time_step < 0.0 {
            return Err(NetworkError::invalid_geometry(
                "maximal adaptive time step must not be negative",
            ));
        }
        Ok(())
    }
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            time_step: constants::DEFAULT_TIME_STEP,
            write_interval: constants::DEFAULT_WRITE_INTERVAL,
            max_end_time: constants::DEFAULT_MAX_END_TIME,
            event_based_writing: false,
            max_adaptive_time_step: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hybrid_config_is_valid() {
        assert!(HybridConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_relaxation() {
        assert!(HybridConfig::new(0.0, 1e-4, 100).is_err());
        assert!(HybridConfig::new(1.5, 1e-4, 100).is_err());
    }

    #[test]
    fn rejects_unstable_relaxation_time() {
        let mut config = CfdConfig::default();
        config.relaxation_time = 0.4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn spacing_follows_resolution() {
        let config = CfdConfig::new(1e-4, 1e-1, 20).unwrap();
        assert!((config.spacing() - 5e-6).abs() < 1e-18);
    }
}
