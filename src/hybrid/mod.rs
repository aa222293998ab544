//! hybrid - Coupling of the 1D Network with CFD Sub-Domains
//!
//! The hybrid scheme reconciles the abstract nodal solution with the CFD
//! modules by a damped fixed-point iteration. CFD solvers are driven through
//! the [`CfdSimulator`] trait; the bundled implementation wraps the in-repo
//! lattice Boltzmann kernel.

pub mod lbm_simulator;
pub mod scheme;

pub use lbm_simulator::LbmSimulator;
pub use scheme::{HybridScheme, SchemeVariant};

use crate::error::CfdResult;
use crate::network::Network;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// One CFD sub-domain seen from the coupling loop.
///
/// Openings are addressed by their network node id. Flow rates are positive
/// when fluid enters the module. At *pressure-export* openings the simulator
/// imposes a velocity boundary fed by the 1D flow rate and reports a
/// pressure; at all other openings it imposes a pressure boundary fed by the
/// 1D pressure and reports a flow rate.
pub trait CfdSimulator {
    /// The network module this simulator covers
    fn module_id(&self) -> usize;

    /// Declare the openings at which this module exports pressure
    fn set_pressure_export(&mut self, openings: &HashSet<usize>);

    /// Build the lattice from the module geometry
    fn prepare(&mut self, network: &Network, dyn_viscosity: f64, density: f64) -> CfdResult<()>;

    /// Write target flow rates at velocity-driven openings
    fn set_flow_rates(&mut self, flow_rates: &HashMap<usize, f64>);

    /// Write target pressures at pressure-driven openings
    fn set_pressures(&mut self, pressures: &HashMap<usize, f64>);

    /// Run the configured number of sub-iterations
    fn solve(&mut self) -> CfdResult<()>;

    /// Pressures at the openings in Pa
    fn read_pressures(&self) -> HashMap<usize, f64>;

    /// Flow rates at the openings in m^3/s, positive into the module
    fn read_flow_rates(&self) -> HashMap<usize, f64>;

    /// Whether the sub-domain has converged on its own convergence signal
    fn has_converged(&self) -> bool;

    /// Path of the VTK master file, if snapshots are written
    fn vtk_master(&self) -> Option<PathBuf> {
        None
    }
}
