//! mesh - STL Geometry Input
//!
//! CFD module geometries are supplied as STL files interpreted as 2D
//! outlines in the XY plane, in meters.

pub mod stl;

pub use stl::{read_outline, write_stl, StlOutline};
