//! Chipflow - Hybrid 1D/CFD Microfluidic Network Simulator
//!
//! A library for simulating fluidic behavior in channel-based microfluidic
//! networks. A fast one-dimensional abstract solver (nodes linked by
//! channels modeled as hydraulic resistors) is coupled with two-dimensional
//! lattice Boltzmann sub-domains that replace selected regions of the
//! network. On top of the flow layer the library tracks scalar transport:
//! instantaneous or diffusive mixing of species, advection of droplet
//! boundaries, and mass transfer across porous membranes into tanks.
//!
//! # Architecture
//!
//! - **network**: the directed multigraph of nodes, channels, pumps,
//!   membranes, tanks and CFD modules, stored arena-style with id
//!   cross-references
//! - **resistance**: maps channel geometry and viscosity to hydraulic
//!   resistance (Poiseuille and rectangular-duct models)
//! - **nodal**: per-group modified nodal analysis for pressures and flow
//!   rates
//! - **hybrid**: the damped fixed-point iteration reconciling the 1D
//!   solution with the CFD sub-domains, and the LBM-backed adapter
//! - **lbm**: the D2Q9 collide-and-stream collaborator behind the adapter
//! - **mixing**: instantaneous and diffusive species transport
//! - **droplet**: droplet boundary tracking with merging, splitting,
//!   waiting, trapping and sinks
//! - **membrane**: Runge-Kutta mass exchange between channels and tanks
//! - **simulation**: the event-driven control loop owning fluids, droplets,
//!   mixtures and the state history
//! - **porting**: JSON input and output
//! - **visualization**: schematic rendering of networks and results
//!
//! # Example
//!
//! ```rust
//! use chipflow::network::Network;
//! use chipflow::simulation::{Platform, Simulation};
//!
//! let mut network = Network::new();
//! let ground = network.add_node(0.0, 0.0, true).unwrap();
//! let inlet = network.add_node(0.0, 1e-3, false).unwrap();
//! let outlet = network.add_node(1e-3, 1e-3, false).unwrap();
//! network.add_pressure_pump(ground, inlet, 1000.0).unwrap();
//! network.add_channel(inlet, outlet, 100e-6, 30e-6, None).unwrap();
//! network.add_channel(outlet, ground, 100e-6, 30e-6, Some(1e-3)).unwrap();
//!
//! let mut simulation = Simulation::new(network);
//! simulation.set_platform(Platform::Continuous);
//! let fluid = simulation.add_fluid(1e-3, 997.0, 1.0);
//! simulation.set_continuous_phase(fluid);
//! simulation.set_rectangular_resistance_model();
//! let result = simulation.simulate().unwrap();
//! assert!(!result.states.is_empty());
//! ```

pub mod config;
pub mod droplet;
pub mod error;
pub mod hybrid;
pub mod lbm;
pub mod membrane;
pub mod mesh;
pub mod mixing;
pub mod network;
pub mod nodal;
pub mod porting;
pub mod resistance;
pub mod simulation;
pub mod visualization;

pub use error::{ChipflowError, Result};
pub use network::Network;
pub use simulation::{Platform, SimType, Simulation, SimulationResult};
pub use visualization::plot_network;
