//! lbm - Lattice Boltzmann Collaborator
//!
//! The collide-and-stream kernel, unit conversion, convergence tracing and
//! VTK output backing the CFD simulator adapter. The rest of the core only
//! talks to this module through [`crate::hybrid::CfdSimulator`], so an
//! external kernel can be substituted without touching the coupling logic.

pub mod lattice;
pub mod tracer;
pub mod units;
pub mod vtk;

pub use lattice::{AdLattice, Lattice, MAT_BULK, MAT_NONE, MAT_OPENING, MAT_WALL};
pub use tracer::ValueTracer;
pub use units::UnitConverter;
pub use vtk::VtkWriter;
